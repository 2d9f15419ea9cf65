use crate::db::ProjectPatch;
use crate::error::{HubError, OauthError};
use crate::providers::Endpoint;
use crate::providers::upstream_retry::post_json_with_retry;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};
use url::Url;

const ONBOARD_MAX_ATTEMPTS: usize = 5;
const ONBOARD_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadCodeAssistResponse {
    #[serde(default)]
    cloudaicompanion_project: Option<String>,
    #[serde(default)]
    allowed_tiers: Vec<AllowedTier>,
    #[serde(default)]
    current_tier: Option<AllowedTier>,
    #[serde(default)]
    ineligible_tiers: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AllowedTier {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    is_default: bool,
    #[serde(default)]
    user_defined_cloudaicompanion_project: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OnboardUserOperation {
    #[serde(default)]
    done: bool,
    #[serde(default)]
    response: Option<OnboardUserResponse>,
}

#[derive(Debug, Deserialize)]
struct OnboardUserResponse {
    #[serde(rename = "cloudaicompanionProject")]
    project: Option<ProjectIdOrObject>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProjectIdOrObject {
    String(String),
    Object { id: String },
}

impl ProjectIdOrObject {
    fn into_id(self) -> Option<String> {
        match self {
            ProjectIdOrObject::String(s) if !s.trim().is_empty() => Some(s),
            ProjectIdOrObject::Object { id } if !id.trim().is_empty() => Some(id),
            _ => None,
        }
    }
}

/// Mint (or rediscover) the upstream tenant project id for an account:
/// `loadCodeAssist` first, then `onboardUser` polled until `done`.
pub async fn ensure_project(
    client: &reqwest::Client,
    endpoint: &Endpoint,
    access_token: &str,
) -> Result<ProjectPatch, HubError> {
    let load = load_code_assist(client, endpoint, access_token).await?;

    let paid_tier = load
        .current_tier
        .as_ref()
        .and_then(|t| t.id.as_deref())
        .is_some_and(|id| id.contains("paid"));
    let ineligible = load
        .ineligible_tiers
        .as_ref()
        .is_some_and(|tiers| !tiers.is_empty());
    let is_restricted = load
        .allowed_tiers
        .iter()
        .find(|t| t.is_default)
        .and_then(|t| t.user_defined_cloudaicompanion_project)
        .unwrap_or(false);

    if let Some(project_id) = load
        .cloudaicompanion_project
        .clone()
        .filter(|s| !s.trim().is_empty())
    {
        return Ok(ProjectPatch {
            project_id: Some(project_id),
            is_restricted,
            ineligible,
            paid_tier,
        });
    }

    let tier_id = load
        .allowed_tiers
        .iter()
        .find(|t| t.is_default)
        .and_then(|t| t.id.clone())
        .unwrap_or_else(|| "LEGACY".to_string());

    let project_id = onboard_user(client, endpoint, access_token, &tier_id).await?;
    Ok(ProjectPatch {
        project_id: Some(project_id),
        is_restricted,
        ineligible,
        paid_tier,
    })
}

fn op_url(endpoint: &Endpoint, op: &str) -> Url {
    let mut url = endpoint.models().clone();
    url.set_path(&format!("/v1internal:{op}"));
    url.set_query(None);
    url
}

fn bearer_headers(access_token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {access_token}"))
            .expect("invalid fixed auth header value"),
    );
    headers
}

async fn load_code_assist(
    client: &reqwest::Client,
    endpoint: &Endpoint,
    access_token: &str,
) -> Result<LoadCodeAssistResponse, HubError> {
    let body = json!({
        "metadata": { "pluginType": "GEMINI" }
    });

    let resp = post_json_with_retry(
        "Antigravity",
        client,
        &op_url(endpoint, "loadCodeAssist"),
        Some(bearer_headers(access_token)),
        &body,
    )
    .await?;

    if !resp.status().is_success() {
        return Err(HubError::UpstreamStatus(resp.status()));
    }

    let raw: Value = resp.json().await?;
    debug!(body = %raw, "loadCodeAssist upstream body");
    serde_json::from_value(raw).map_err(HubError::Json)
}

async fn onboard_user(
    client: &reqwest::Client,
    endpoint: &Endpoint,
    access_token: &str,
    tier_id: &str,
) -> Result<String, HubError> {
    let body = json!({
        "tierId": tier_id,
        "metadata": { "pluginType": "GEMINI" }
    });

    let mut last_resp: Option<Value> = None;
    for attempt in 1..=ONBOARD_MAX_ATTEMPTS {
        let resp = post_json_with_retry(
            "Antigravity",
            client,
            &op_url(endpoint, "onboardUser"),
            Some(bearer_headers(access_token)),
            &body,
        )
        .await?;

        if !resp.status().is_success() {
            return Err(HubError::UpstreamStatus(resp.status()));
        }

        let raw: Value = resp.json().await?;
        debug!(body = %raw, "onboardUser upstream body");
        last_resp = Some(raw.clone());

        let op: OnboardUserOperation = serde_json::from_value(raw.clone())?;
        if op.done {
            return op
                .response
                .and_then(|r| r.project)
                .and_then(ProjectIdOrObject::into_id)
                .ok_or_else(|| {
                    OauthError::Flow {
                        code: "ONBOARD_FAILED".to_string(),
                        message: "Onboarding completed but returned no project ID".to_string(),
                        details: Some(raw),
                    }
                    .into()
                });
        }

        if attempt < ONBOARD_MAX_ATTEMPTS {
            info!(
                "onboardUser pending (attempt {}/{}), retrying in {:?}...",
                attempt, ONBOARD_MAX_ATTEMPTS, ONBOARD_RETRY_DELAY
            );
            sleep(ONBOARD_RETRY_DELAY).await;
        }
    }

    Err(OauthError::Flow {
        code: "ONBOARD_TIMEOUT".to_string(),
        message: "Project provisioning timed out".to_string(),
        details: last_resp,
    }
    .into())
}
