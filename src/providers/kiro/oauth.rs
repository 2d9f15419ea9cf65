use crate::config::KiroResolvedConfig;
use crate::db::TokenPatch;
use crate::error::OauthError;
use crate::store::{Account, KiroAuthMethod, ProviderDetail};
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::json;

/// Token endpoint response, shared by the Social and IdC flows.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KiroTokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    profile_arn: Option<String>,
}

/// Refresh a Kiro access token. The endpoint and request shape depend on
/// the account's auth method: Social uses the desktop-auth refresh
/// endpoint, IdC the AWS OIDC token endpoint with client credentials.
pub async fn refresh_token(
    cfg: &KiroResolvedConfig,
    http: &reqwest::Client,
    account: &Account,
) -> Result<TokenPatch, OauthError> {
    let ProviderDetail::Kiro {
        auth_method,
        client_id,
        client_secret,
        ..
    } = &account.detail
    else {
        return Err(OauthError::Other {
            message: "kiro refresh called with a non-kiro account".to_string(),
        });
    };

    let resp = match auth_method {
        KiroAuthMethod::Social => {
            http.post(cfg.social_token_url.clone())
                .json(&json!({ "refreshToken": account.refresh_token }))
                .send()
                .await?
        }
        KiroAuthMethod::Idc => {
            http.post(cfg.idc_token_url.clone())
                .json(&json!({
                    "clientId": client_id,
                    "clientSecret": client_secret,
                    "refreshToken": account.refresh_token,
                    "grantType": "refresh_token",
                }))
                .send()
                .await?
        }
    };

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        // Both endpoints signal a dead refresh token in the body; normalize
        // to the RFC 6749 string so classification stays uniform.
        if body.contains("invalid_grant") || body.contains("InvalidGrantException") {
            return Err(OauthError::ServerResponse {
                error: "invalid_grant".to_string(),
            });
        }
        return Err(OauthError::UpstreamStatus(status));
    }

    let token: KiroTokenResponse = resp.json().await.map_err(|e| OauthError::Parse {
        message: e.to_string(),
        body: "<kiro token response>".to_string(),
    })?;

    let expires_in = token.expires_in.unwrap_or(3600);
    let expiry = Utc::now() + ChronoDuration::seconds(i64::try_from(expires_in).unwrap_or(3600));

    Ok(TokenPatch {
        access_token: token.access_token,
        expiry,
        refresh_token: token.refresh_token,
        resource_url: None,
        profile_arn: token.profile_arn,
    })
}
