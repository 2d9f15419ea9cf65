use crate::server::router::HubState;
use crate::store::User;
use axum::{
    Json,
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use serde_json::json;
use subtle::ConstantTimeEq;

fn extract_bearer(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .typed_get::<Authorization<Bearer>>()
        .map(|auth| auth.token().to_string())
}

/// Resolves the caller's `sk-…` API key to an enabled `users` row.
#[derive(Debug, Clone)]
pub struct AuthedUser(pub User);

impl FromRequestParts<HubState> for AuthedUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &HubState,
    ) -> Result<Self, Self::Rejection> {
        let Some(key) = extract_bearer(&parts.headers) else {
            return Err(AuthError::MissingKey);
        };

        match state.store.user_by_api_key(&key).await {
            Ok(Some(user)) => Ok(AuthedUser(user)),
            Ok(None) => Err(AuthError::InvalidKey),
            Err(e) => {
                tracing::error!("api key lookup failed: {e}");
                Err(AuthError::Internal)
            }
        }
    }
}

/// Gate for account-management endpoints; compares against the configured
/// admin key in constant time.
#[derive(Debug, Clone, Copy)]
pub struct RequireAdmin;

impl FromRequestParts<HubState> for RequireAdmin {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &HubState,
    ) -> Result<Self, Self::Rejection> {
        let Some(key) = extract_bearer(&parts.headers) else {
            return Err(AuthError::MissingKey);
        };

        let expected = state.admin_key.as_ref();
        if key.as_bytes().ct_eq(expected.as_bytes()).into() {
            Ok(RequireAdmin)
        } else {
            Err(AuthError::InvalidKey)
        }
    }
}

pub enum AuthError {
    MissingKey,
    InvalidKey,
    Internal,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, reason) = match self {
            AuthError::MissingKey => (StatusCode::UNAUTHORIZED, "Missing API key"),
            AuthError::InvalidKey => (StatusCode::UNAUTHORIZED, "Invalid API key"),
            AuthError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "Auth backend error"),
        };
        (
            status,
            Json(json!({ "error": "unauthorized", "reason": reason })),
        )
            .into_response()
    }
}
