mod client;
mod frames;
pub mod oauth;

pub use client::{KIRO_USER_AGENT, KiroTransport};
pub use frames::FrameDecoder;
