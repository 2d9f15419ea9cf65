use crate::config::AntigravityResolvedConfig;
use crate::db::TokenPatch;
use crate::error::OauthError;
use chrono::{Duration as ChronoDuration, Utc};
use oauth2::basic::BasicClient;
use oauth2::{ClientId, ClientSecret, RefreshToken, TokenResponse, TokenUrl};
use std::time::Duration;

/// Refresh an access token at the Google token endpoint.
///
/// OAuth parameters are fixed in the resolved config; the oauth2 client is
/// rebuilt per call (it is cheap, and avoids holding typestate in structs).
pub async fn refresh_access_token(
    cfg: &AntigravityResolvedConfig,
    http_client: reqwest::Client,
    refresh_token: &str,
) -> Result<TokenPatch, OauthError> {
    let token_url =
        TokenUrl::new(cfg.oauth_token_url.to_string()).map_err(|e| OauthError::Other {
            message: format!("invalid token url: {e}"),
        })?;

    let client = BasicClient::new(ClientId::new(cfg.oauth_client_id.clone()))
        .set_client_secret(ClientSecret::new(cfg.oauth_client_secret.clone()))
        .set_token_uri(token_url);

    let token = client
        .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
        .request_async(&http_client)
        .await?;

    let expires_in = token.expires_in().unwrap_or(Duration::from_secs(3600));
    let expiry = Utc::now()
        + ChronoDuration::from_std(expires_in).unwrap_or_else(|_| ChronoDuration::seconds(3600));

    Ok(TokenPatch {
        access_token: token.access_token().secret().to_string(),
        expiry,
        refresh_token: token.refresh_token().map(|t| t.secret().to_string()),
        resource_url: None,
        profile_arn: None,
    })
}
