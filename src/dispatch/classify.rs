use crate::error::{Error403Class, UpstreamErrorBody};
use crate::store::Provider;
use axum::http::StatusCode;

/// Classified upstream failure, one row of the retry matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamOutcome {
    /// 400 quota/RESOURCE_EXHAUSTED: the account is out, swap it.
    QuotaExhausted,
    /// 400 RESOURCE_PROJECT_INVALID: the project id is stale.
    ProjectInvalid,
    /// Request-fatal, account untouched.
    ImageTooLarge,
    /// Request-fatal, account untouched, raw body surfaced.
    InvalidArgument,
    /// Any other 400: account-fatal.
    BadRequestFatal,
    Forbidden(Error403Class),
    RateLimited,
    PaymentRequired,
    /// 500 "Internal error encountered": upstream refuses the prompt.
    IllegalPrompt,
    /// 503: walk endpoints.
    Overloaded,
    ServerError,
    Other,
}

pub fn classify(provider: Provider, status: StatusCode, body: &str) -> UpstreamOutcome {
    match provider {
        Provider::Kiro => classify_kiro(status),
        Provider::Antigravity | Provider::Qwen => classify_gemini(status, body),
    }
}

/// Kiro's surface is simpler: 402/403 are account-state signals, everything
/// else maps by status alone.
fn classify_kiro(status: StatusCode) -> UpstreamOutcome {
    match status {
        StatusCode::PAYMENT_REQUIRED => UpstreamOutcome::PaymentRequired,
        StatusCode::FORBIDDEN => UpstreamOutcome::Forbidden(Error403Class::Generic),
        StatusCode::TOO_MANY_REQUESTS => UpstreamOutcome::RateLimited,
        StatusCode::BAD_REQUEST => UpstreamOutcome::InvalidArgument,
        StatusCode::SERVICE_UNAVAILABLE => UpstreamOutcome::Overloaded,
        s if s.is_server_error() => UpstreamOutcome::ServerError,
        _ => UpstreamOutcome::Other,
    }
}

fn classify_gemini(status: StatusCode, body: &str) -> UpstreamOutcome {
    // Google-style bodies carry a canonical status string; prefer it and
    // fall back to raw-body matching for unstructured responses.
    let parsed = UpstreamErrorBody::parse(body);
    let status_is = |s: &str| parsed.as_ref().is_some_and(|p| p.status_is(s)) || body.contains(s);
    let message_has =
        |m: &str| parsed.as_ref().is_some_and(|p| p.message_contains(m)) || body.contains(m);

    match status {
        StatusCode::BAD_REQUEST => {
            // Specific messages first; generic INVALID_ARGUMENT bodies carry
            // the same canonical status string.
            if message_has("image exceeds 5 MB maximum") {
                UpstreamOutcome::ImageTooLarge
            } else if status_is("RESOURCE_PROJECT_INVALID") {
                UpstreamOutcome::ProjectInvalid
            } else if status_is("RESOURCE_EXHAUSTED") || body.to_lowercase().contains("quota") {
                UpstreamOutcome::QuotaExhausted
            } else if status_is("INVALID_ARGUMENT") || body.contains("invalid_request_error") {
                UpstreamOutcome::InvalidArgument
            } else {
                UpstreamOutcome::BadRequestFatal
            }
        }

        StatusCode::FORBIDDEN => {
            if status_is("PERMISSION_DENIED")
                || message_has("The caller does not have permission")
            {
                UpstreamOutcome::Forbidden(Error403Class::PermissionDenied)
            } else if body.contains("CONSUMER_INVALID") || body.contains("SERVICE_DISABLED") {
                UpstreamOutcome::Forbidden(Error403Class::ProjectIneligible)
            } else {
                UpstreamOutcome::Forbidden(Error403Class::Generic)
            }
        }

        StatusCode::TOO_MANY_REQUESTS => UpstreamOutcome::RateLimited,
        StatusCode::PAYMENT_REQUIRED => UpstreamOutcome::PaymentRequired,
        StatusCode::SERVICE_UNAVAILABLE => UpstreamOutcome::Overloaded,

        StatusCode::INTERNAL_SERVER_ERROR => {
            if body.contains("Internal error encountered") {
                UpstreamOutcome::IllegalPrompt
            } else {
                UpstreamOutcome::ServerError
            }
        }

        s if s.is_server_error() => UpstreamOutcome::ServerError,
        _ => UpstreamOutcome::Other,
    }
}
