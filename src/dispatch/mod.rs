mod classify;
mod engine;
mod events;
mod select;
mod state;
mod traits;

pub use classify::{UpstreamOutcome, classify};
pub use engine::{DispatchEngine, DispatchSummary};
pub use events::{StreamEvent, StreamSummary, ToolCall};
pub use select::select_account;
pub use state::{DispatchState, MAX_PROJECT_RETRIES, MAX_QUOTA_SWAPS};
pub use traits::{
    AccountDirectory, DispatchRequest, QuotaView, RequestPayload, Transport, UpstreamBody,
    UpstreamResponse,
};
