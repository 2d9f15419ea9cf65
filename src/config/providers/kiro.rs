use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

use super::ProviderDefaults;

/// Kiro / CodeWhisperer provider configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct KiroConfig {
    /// Default region used when an account row carries none.
    /// TOML: `providers.kiro.default_region`. Default: `us-east-1`.
    #[serde(default = "default_region")]
    pub default_region: String,

    /// Optional upstream HTTP proxy; falls back to `providers.defaults.proxy`.
    #[serde(default)]
    pub proxy: Option<Url>,

    /// OAuth refresh requests per second for the token manager.
    /// TOML: `providers.kiro.oauth_tps`. Default: `5`.
    #[serde(default = "default_oauth_tps")]
    pub oauth_tps: usize,

    /// Subscription tier -> allowed model ids. An empty map allows every
    /// model on every tier (legacy behavior).
    /// TOML: `providers.kiro.tier_models`.
    #[serde(default)]
    pub tier_models: BTreeMap<String, Vec<String>>,

    /// List of supported model names served to south-side model listings.
    /// TOML: `providers.kiro.model_list`.
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
pub struct KiroResolvedConfig {
    pub default_region: String,
    pub proxy: Option<Url>,
    pub oauth_tps: usize,
    pub tier_models: BTreeMap<String, Vec<String>>,
    pub model_list: Vec<String>,
    pub enable_multiplexing: bool,
    pub retry_max_times: usize,
    pub social_token_url: Url,
    pub idc_token_url: Url,
}

impl KiroResolvedConfig {
    /// Tier gate used during account selection. An empty table allows all.
    pub fn tier_allows(&self, subscription: Option<&str>, model: &str) -> bool {
        if self.tier_models.is_empty() {
            return true;
        }
        let Some(tier) = subscription else {
            return true;
        };
        match self.tier_models.get(tier) {
            Some(models) => models.iter().any(|m| m == model),
            None => true,
        }
    }
}

impl KiroConfig {
    pub fn resolve(&self, defaults: &ProviderDefaults) -> KiroResolvedConfig {
        KiroResolvedConfig {
            default_region: self.default_region.clone(),
            proxy: self.proxy.clone().or_else(|| defaults.proxy.clone()),
            oauth_tps: self.oauth_tps,
            tier_models: self.tier_models.clone(),
            model_list: self.model_list.clone(),
            enable_multiplexing: self
                .enable_multiplexing
                .unwrap_or(defaults.enable_multiplexing),
            retry_max_times: self.retry_max_times.unwrap_or(defaults.retry_max_times),
            social_token_url: default_social_token_url(),
            idc_token_url: default_idc_token_url(),
        }
    }
}

impl Default for KiroConfig {
    fn default() -> Self {
        Self {
            default_region: default_region(),
            proxy: None,
            oauth_tps: default_oauth_tps(),
            tier_models: BTreeMap::new(),
            model_list: default_model_list(),
            enable_multiplexing: None,
            retry_max_times: None,
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_oauth_tps() -> usize {
    5
}

fn default_model_list() -> Vec<String> {
    vec![
        "claude-sonnet-4".to_string(),
        "claude-3-7-sonnet".to_string(),
    ]
}

fn default_social_token_url() -> Url {
    Url::parse("https://prod.us-east-1.auth.desktop.kiro.dev/refreshToken")
        .expect("default kiro social token URL must be a valid URL")
}

fn default_idc_token_url() -> Url {
    Url::parse("https://oidc.us-east-1.amazonaws.com/token")
        .expect("default kiro IdC token URL must be a valid URL")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tier_table_allows_everything() {
        let cfg = KiroConfig::default().resolve(&ProviderDefaults::default());
        assert!(cfg.tier_allows(Some("FREE"), "claude-sonnet-4"));
        assert!(cfg.tier_allows(None, "anything"));
    }

    #[test]
    fn tier_table_restricts_known_tiers_only() {
        let mut raw = KiroConfig::default();
        raw.tier_models
            .insert("FREE".to_string(), vec!["claude-3-7-sonnet".to_string()]);
        let cfg = raw.resolve(&ProviderDefaults::default());

        assert!(!cfg.tier_allows(Some("FREE"), "claude-sonnet-4"));
        assert!(cfg.tier_allows(Some("FREE"), "claude-3-7-sonnet"));
        // Unknown tier falls through open.
        assert!(cfg.tier_allows(Some("PRO"), "claude-sonnet-4"));
    }
}
