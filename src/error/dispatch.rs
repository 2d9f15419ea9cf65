use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error as ThisError;

use super::hub::{ApiErrorBody, ApiErrorObject, HubError};

/// Class of the first 403 seen while walking endpoints; latched for the rest
/// of the request. Permission-denied is sticky per account, so exhausting
/// every endpoint under it must NOT disable the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Error403Class {
    PermissionDenied,
    ProjectIneligible,
    Generic,
}

/// Terminal outcome of a dispatch, one per request. Everything retryable is
/// consumed inside the engine; the caller sees exactly one of these or a
/// clean stream end.
#[derive(Debug, ThisError)]
pub enum DispatchError {
    /// 400 `image exceeds 5 MB maximum`. Account untouched.
    #[error("request image exceeds the upstream size limit")]
    ImageTooLarge,

    /// 400 `INVALID_ARGUMENT` / `invalid_request_error`. Raw body preserved
    /// for the caller; account untouched.
    #[error("upstream rejected the request arguments")]
    InvalidArgument { body: String },

    /// 500 `Internal error encountered` — upstream refuses the prompt.
    #[error("upstream refused the prompt")]
    IllegalPrompt,

    /// Every configured endpoint returned 403 for the chosen account.
    #[error("all endpoints returned 403 ({class:?})")]
    AllEndpoints403 { class: Error403Class },

    /// Account-fatal upstream response; the account was disabled and the raw
    /// body is surfaced.
    #[error("upstream rejected the account: {status}")]
    AccountFatal { status: StatusCode, body: String },

    /// No accounts remain after exclusions and swap limits.
    #[error("no upstream capacity remains for this request")]
    ResourceExhausted,

    #[error(transparent)]
    Upstream(#[from] HubError),
}

impl DispatchError {
    /// Short taxonomy tag carried on the terminal error event.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::ImageTooLarge => "image-too-large",
            DispatchError::InvalidArgument { .. } => "invalid-argument",
            DispatchError::IllegalPrompt => "illegal-prompt",
            DispatchError::AllEndpoints403 { .. } => "all-endpoints-403",
            DispatchError::AccountFatal { .. } => "account-rejected",
            DispatchError::ResourceExhausted => "resource-exhausted",
            DispatchError::Upstream(_) => "upstream-error",
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = match self {
            DispatchError::Upstream(inner) => return inner.into_response(),

            DispatchError::ImageTooLarge => (
                StatusCode::BAD_REQUEST,
                ApiErrorObject {
                    code: "IMAGE_TOO_LARGE".to_string(),
                    message: "request image exceeds the upstream size limit".to_string(),
                    details: None,
                },
            ),
            DispatchError::InvalidArgument { body } => (
                StatusCode::BAD_REQUEST,
                ApiErrorObject {
                    code: "INVALID_ARGUMENT".to_string(),
                    message: body,
                    details: None,
                },
            ),
            DispatchError::IllegalPrompt => (
                StatusCode::BAD_REQUEST,
                ApiErrorObject {
                    code: "ILLEGAL_PROMPT".to_string(),
                    message: "upstream refused the prompt".to_string(),
                    details: None,
                },
            ),
            DispatchError::AllEndpoints403 { class } => (
                StatusCode::FORBIDDEN,
                ApiErrorObject {
                    code: "ALL_ENDPOINTS_403".to_string(),
                    message: format!("all endpoints returned 403 ({class:?})"),
                    details: None,
                },
            ),
            DispatchError::AccountFatal { status, body } => (
                status,
                ApiErrorObject {
                    code: "ACCOUNT_REJECTED".to_string(),
                    message: body,
                    details: None,
                },
            ),
            DispatchError::ResourceExhausted => (
                StatusCode::TOO_MANY_REQUESTS,
                ApiErrorObject {
                    code: "RESOURCE_EXHAUSTED".to_string(),
                    message: "no upstream capacity remains for this request".to_string(),
                    details: None,
                },
            ),
        };
        (status, Json(ApiErrorBody { inner: body })).into_response()
    }
}
