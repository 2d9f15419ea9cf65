use serde::{Deserialize, Serialize};
use url::Url;

use super::ProviderDefaults;

/// Qwen provider configuration managed by Figment.
///
/// The chat endpoint is per-account (`resource_url` on the account row);
/// only the token endpoint and client id are provider-global.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QwenConfig {
    /// Optional upstream HTTP proxy; falls back to `providers.defaults.proxy`.
    #[serde(default)]
    pub proxy: Option<Url>,

    /// OAuth refresh requests per second for the token manager.
    /// TOML: `providers.qwen.oauth_tps`. Default: `5`.
    #[serde(default = "default_oauth_tps")]
    pub oauth_tps: usize,

    /// List of supported model names served to south-side model listings.
    /// TOML: `providers.qwen.model_list`.
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
pub struct QwenResolvedConfig {
    pub proxy: Option<Url>,
    pub oauth_tps: usize,
    pub model_list: Vec<String>,
    pub enable_multiplexing: bool,
    pub retry_max_times: usize,
    pub oauth_token_url: Url,
    pub oauth_client_id: String,
}

impl QwenConfig {
    pub fn resolve(&self, defaults: &ProviderDefaults) -> QwenResolvedConfig {
        QwenResolvedConfig {
            proxy: self.proxy.clone().or_else(|| defaults.proxy.clone()),
            oauth_tps: self.oauth_tps,
            model_list: self.model_list.clone(),
            enable_multiplexing: self
                .enable_multiplexing
                .unwrap_or(defaults.enable_multiplexing),
            retry_max_times: self.retry_max_times.unwrap_or(defaults.retry_max_times),
            oauth_token_url: default_oauth_token_url(),
            oauth_client_id: default_oauth_client_id(),
        }
    }
}

impl Default for QwenConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            oauth_tps: default_oauth_tps(),
            model_list: default_model_list(),
            enable_multiplexing: None,
            retry_max_times: None,
        }
    }
}

fn default_oauth_tps() -> usize {
    5
}

fn default_model_list() -> Vec<String> {
    vec!["qwen3-coder-plus".to_string(), "qwen3-coder-flash".to_string()]
}

fn default_oauth_token_url() -> Url {
    Url::parse("https://chat.qwen.ai/api/v1/oauth2/token")
        .expect("default qwen oauth_token_url must be a valid URL")
}

fn default_oauth_client_id() -> String {
    "f0304373b74a44d2b584a3fb70ca9e56".to_string()
}
