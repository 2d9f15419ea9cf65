mod client;
pub mod oauth;

pub use client::{QWEN_USER_AGENT, QwenTransport};
