use crate::config::QwenResolvedConfig;
use crate::db::TokenPatch;
use crate::error::OauthError;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct QwenTokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    /// Per-tenant API host, rotated together with the token.
    #[serde(default)]
    resource_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QwenTokenError {
    error: String,
}

/// Refresh a Qwen access token. The endpoint rotates the refresh token and
/// may move the account to a different `resource_url`.
pub async fn refresh_token(
    cfg: &QwenResolvedConfig,
    http: &reqwest::Client,
    refresh_token: &str,
) -> Result<TokenPatch, OauthError> {
    let resp = http
        .post(cfg.oauth_token_url.clone())
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", cfg.oauth_client_id.as_str()),
        ])
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        if let Ok(err) = serde_json::from_str::<QwenTokenError>(&body) {
            return Err(OauthError::ServerResponse { error: err.error });
        }
        let _ = body; // unstructured body carries no classification signal
        return Err(OauthError::UpstreamStatus(status));
    }

    let token: QwenTokenResponse = resp.json().await.map_err(|e| OauthError::Parse {
        message: e.to_string(),
        body: "<qwen token response>".to_string(),
    })?;

    let expires_in = token.expires_in.unwrap_or(3600);
    let expiry = Utc::now() + ChronoDuration::seconds(i64::try_from(expires_in).unwrap_or(3600));

    Ok(TokenPatch {
        access_token: token.access_token,
        expiry,
        refresh_token: token.refresh_token,
        resource_url: token.resource_url,
        profile_arn: None,
    })
}
