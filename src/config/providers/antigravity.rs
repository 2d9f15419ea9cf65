use serde::{Deserialize, Serialize};
use url::Url;

use super::ProviderDefaults;

/// Antigravity provider configuration managed by Figment.
///
/// Notes:
/// - `endpoints` is an ordered failover list; index 0 is tried first and the
///   dispatch engine walks the list on 403/429/503.
/// - OAuth endpoints/client credentials are intentionally fixed to built-in
///   defaults (not configurable via `config.toml`).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AntigravityConfig {
    /// Ordered base API URLs for the antigravity upstream.
    /// TOML: `providers.antigravity.endpoints`.
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<Url>,

    /// Optional upstream HTTP proxy; falls back to `providers.defaults.proxy`.
    #[serde(default)]
    pub proxy: Option<Url>,

    /// OAuth refresh requests per second for the token manager.
    /// TOML: `providers.antigravity.oauth_tps`. Default: `5`.
    #[serde(default = "default_oauth_tps")]
    pub oauth_tps: usize,

    /// Models-list refresh requests per second for the quota ledger.
    /// TOML: `providers.antigravity.quota_refresh_tps`. Default: `2`.
    #[serde(default = "default_quota_refresh_tps")]
    pub quota_refresh_tps: usize,

    /// List of supported model names served to south-side model listings.
    /// TOML: `providers.antigravity.model_list`.
    #[serde(default = "default_model_list")]
    pub model_list: Vec<String>,

    /// Allow HTTP/2 multiplexing; falls back to
    /// `providers.defaults.enable_multiplexing`.
    #[serde(default)]
    pub enable_multiplexing: Option<bool>,

    /// Max transport retry attempts; falls back to
    /// `providers.defaults.retry_max_times`.
    #[serde(default)]
    pub retry_max_times: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct AntigravityResolvedConfig {
    pub endpoints: Vec<Url>,
    pub proxy: Option<Url>,
    pub oauth_tps: usize,
    pub quota_refresh_tps: usize,
    pub model_list: Vec<String>,
    pub enable_multiplexing: bool,
    pub retry_max_times: usize,
    pub oauth_token_url: Url,
    pub oauth_client_id: String,
    pub oauth_client_secret: String,
}

impl AntigravityConfig {
    pub fn resolve(&self, defaults: &ProviderDefaults) -> AntigravityResolvedConfig {
        AntigravityResolvedConfig {
            endpoints: if self.endpoints.is_empty() {
                default_endpoints()
            } else {
                self.endpoints.clone()
            },
            proxy: self.proxy.clone().or_else(|| defaults.proxy.clone()),
            oauth_tps: self.oauth_tps,
            quota_refresh_tps: self.quota_refresh_tps,
            model_list: self.model_list.clone(),
            enable_multiplexing: self
                .enable_multiplexing
                .unwrap_or(defaults.enable_multiplexing),
            retry_max_times: self.retry_max_times.unwrap_or(defaults.retry_max_times),
            oauth_token_url: default_oauth_token_url(),
            oauth_client_id: default_oauth_client_id(),
            oauth_client_secret: default_oauth_client_secret(),
        }
    }
}

impl Default for AntigravityConfig {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            proxy: None,
            oauth_tps: default_oauth_tps(),
            quota_refresh_tps: default_quota_refresh_tps(),
            model_list: default_model_list(),
            enable_multiplexing: None,
            retry_max_times: None,
        }
    }
}

fn default_endpoints() -> Vec<Url> {
    vec![
        Url::parse("https://daily-cloudcode-pa.googleapis.com")
            .expect("default antigravity endpoint must be a valid URL"),
        Url::parse("https://cloudcode-pa.googleapis.com")
            .expect("default antigravity endpoint must be a valid URL"),
    ]
}

fn default_oauth_tps() -> usize {
    5
}

fn default_quota_refresh_tps() -> usize {
    2
}

fn default_model_list() -> Vec<String> {
    vec![
        "gemini-2.5-pro".to_string(),
        "gemini-3-flash".to_string(),
        "gemini-3-pro-preview".to_string(),
        "claude-sonnet-4-5".to_string(),
    ]
}

fn default_oauth_token_url() -> Url {
    Url::parse("https://oauth2.googleapis.com/token")
        .expect("default oauth_token_url must be a valid URL")
}

fn default_oauth_client_id() -> String {
    "1071006060591-tmhssin2h21lcre235vtolojh4g403ep.apps.googleusercontent.com".to_string()
}

fn default_oauth_client_secret() -> String {
    "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".to_string()
}
