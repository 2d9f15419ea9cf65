mod dispatch;
mod hub;
mod oauth;
mod upstream;

pub use dispatch::{DispatchError, Error403Class};
pub use hub::{ApiErrorBody, ApiErrorObject, HubError};
pub use oauth::OauthError;
pub use upstream::{UpstreamErrorBody, UpstreamErrorObject};

pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}
