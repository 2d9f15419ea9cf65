use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error as ThisError;

use super::IsRetryable;
use super::oauth::OauthError;

#[derive(Debug, ThisError)]
pub enum HubError {
    #[error("Upstream error with status: {0}")]
    UpstreamStatus(StatusCode),

    #[error(transparent)]
    Oauth(#[from] OauthError),

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Stream protocol error: {0}")]
    StreamProtocol(String),

    #[error("No available account")]
    NoAvailableAccount,

    #[error("Actor error: {0}")]
    Actor(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl IntoResponse for HubError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_body) = match self {
            HubError::Database(_)
            | HubError::Actor(_)
            | HubError::Unexpected(_)
            | HubError::Oauth(OauthError::Other { .. })
            | HubError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiErrorObject {
                    code: "INTERNAL_ERROR".to_string(),
                    message: "An internal server error occurred.".to_string(),
                    details: None,
                },
            ),

            HubError::Oauth(OauthError::Flow {
                code,
                message,
                details,
            }) => (
                StatusCode::FORBIDDEN,
                ApiErrorObject {
                    code,
                    message,
                    details,
                },
            ),

            HubError::Json(_) | HubError::Oauth(OauthError::Parse { .. }) => (
                StatusCode::BAD_GATEWAY,
                ApiErrorObject {
                    code: "BAD_UPSTREAM_PAYLOAD".to_string(),
                    message: "Failed to parse upstream response.".to_string(),
                    details: None,
                },
            ),

            HubError::StreamProtocol(_)
            | HubError::Oauth(OauthError::Request(_))
            | HubError::Oauth(OauthError::ServerResponse { .. })
            | HubError::Reqwest(_)
            | HubError::Url(_) => (
                StatusCode::BAD_GATEWAY,
                ApiErrorObject {
                    code: "UPSTREAM_ERROR".to_string(),
                    message: "Upstream service error.".to_string(),
                    details: None,
                },
            ),

            HubError::NoAvailableAccount => (
                StatusCode::SERVICE_UNAVAILABLE,
                ApiErrorObject {
                    code: "NO_ACCOUNT".to_string(),
                    message: "No available accounts to process the request.".to_string(),
                    details: None,
                },
            ),

            HubError::UpstreamStatus(code) | HubError::Oauth(OauthError::UpstreamStatus(code)) => {
                let (err_code, msg) = match code {
                    StatusCode::TOO_MANY_REQUESTS => {
                        ("RATE_LIMIT", "Upstream rate limit exceeded.")
                    }
                    StatusCode::UNAUTHORIZED => ("UNAUTHORIZED", "Upstream authentication failed."),
                    StatusCode::FORBIDDEN => ("FORBIDDEN", "Upstream permission denied."),
                    StatusCode::NOT_FOUND => ("NOT_FOUND", "Upstream resource not found."),
                    _ => ("UPSTREAM_ERROR", "An upstream error occurred."),
                };
                (
                    code,
                    ApiErrorObject {
                        code: err_code.to_string(),
                        message: msg.to_string(),
                        details: None,
                    },
                )
            }
        };
        (status, Json(ApiErrorBody { inner: error_body })).into_response()
    }
}

/// Standardized API error response payload.
#[derive(Serialize)]
pub struct ApiErrorObject {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Serialize)]
pub struct ApiErrorBody {
    #[serde(rename = "error")]
    pub inner: ApiErrorObject,
}

impl IsRetryable for HubError {
    fn is_retryable(&self) -> bool {
        match self {
            HubError::Reqwest(_) => true,
            HubError::UpstreamStatus(status) => status.is_server_error(),
            _ => false,
        }
    }
}
