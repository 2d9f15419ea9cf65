mod client;
pub mod oauth;
mod project;
mod sse;

pub use client::{ANTIGRAVITY_USER_AGENT, AntigravityTransport};
pub use sse::{Aggregator, GeminiStreamState, SseParser};
