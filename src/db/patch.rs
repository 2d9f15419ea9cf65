use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::KiroAuthMethod;

/// Result of a successful token refresh, persisted as one row update.
/// Optional fields are provider-specific rotations (`None` => unchanged).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPatch {
    pub access_token: String,
    pub expiry: DateTime<Utc>,
    /// Rotated refresh token, when the endpoint returned one.
    pub refresh_token: Option<String>,
    /// Qwen rotates the per-tenant API host together with the token.
    pub resource_url: Option<String>,
    /// Kiro IdC occasionally re-issues the profile ARN.
    pub profile_arn: Option<String>,
}

/// Antigravity project-id block, written after `loadCodeAssist`/`onboardUser`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectPatch {
    pub project_id: Option<String>,
    pub is_restricted: bool,
    pub ineligible: bool,
    pub paid_tier: bool,
}

/// Kiro usage block as reported by the upstream profile/usage endpoint.
/// `None` => do not change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KiroUsagePatch {
    pub subscription: Option<String>,
    pub current_usage: Option<f64>,
    pub reset_date: Option<DateTime<Utc>>,
    pub usage_limit: Option<f64>,
    pub free_trial_status: Option<String>,
    pub free_trial_usage: Option<f64>,
    pub free_trial_expiry: Option<DateTime<Utc>>,
    pub free_trial_limit: Option<f64>,
    pub bonus_usage: Option<f64>,
    pub bonus_limit: Option<f64>,
    pub bonus_available: Option<bool>,
    pub bonus_details: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AntigravityCreate {
    pub user_id: String,
    pub shared: bool,
    pub email: Option<String>,
    pub refresh_token: String,
    pub access_token: Option<String>,
    pub expiry: DateTime<Utc>,
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KiroCreate {
    pub user_id: String,
    pub shared: bool,
    pub email: Option<String>,
    pub auth_method: KiroAuthMethod,
    pub refresh_token: String,
    pub access_token: Option<String>,
    pub expiry: DateTime<Utc>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub profile_arn: Option<String>,
    pub machine_id: String,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QwenCreate {
    pub user_id: String,
    pub shared: bool,
    pub email: Option<String>,
    pub refresh_token: String,
    pub access_token: Option<String>,
    pub expiry: DateTime<Utc>,
    pub resource_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum AccountCreate {
    Antigravity(AntigravityCreate),
    Kiro(KiroCreate),
    Qwen(QwenCreate),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCreate {
    pub id: String,
    pub api_key: String,
    #[serde(default)]
    pub sharing: crate::store::SharingPreference,
}
