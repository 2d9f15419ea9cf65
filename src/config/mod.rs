mod basic;
mod providers;

pub use basic::BasicConfig;
pub use providers::{
    AntigravityConfig, AntigravityResolvedConfig, KiroConfig, KiroResolvedConfig, ProviderDefaults,
    ProvidersConfig, QwenConfig, QwenResolvedConfig,
};

use figment::{
    Figment,
    providers::{Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Application configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Core server configuration (see `basic` table in config.toml).
    #[serde(default)]
    pub basic: BasicConfig,

    /// Provider and upstream settings (see `providers` table in config.toml).
    #[serde(default)]
    pub providers: ProvidersConfig,
}

const DEFAULT_CONFIG_FILE: &str = "config.toml";

impl Config {
    /// Builds a Figment that merges defaults and a config TOML file.
    pub fn figment() -> Figment {
        let figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if PathBuf::from(DEFAULT_CONFIG_FILE).is_file() {
            figment.merge(Toml::file(DEFAULT_CONFIG_FILE))
        } else {
            figment
        }
    }

    /// Loads configuration by merging defaults and `config.toml` if present,
    /// without validating required fields. Tests and library consumers use
    /// this; the server binary calls `from_toml()`.
    pub fn from_optional_toml() -> Self {
        Self::figment().extract().unwrap_or_else(|err| {
            panic!("failed to extract configuration (defaults + optional config.toml): {err}")
        })
    }

    /// Loads configuration from the TOML file (with defaults) and validates
    /// required fields.
    pub fn from_toml() -> Self {
        if !PathBuf::from(DEFAULT_CONFIG_FILE).is_file() {
            panic!("config file not found: {DEFAULT_CONFIG_FILE}");
        }
        let cfg: Self = Self::figment().extract().unwrap_or_else(|err| {
            panic!("failed to extract configuration from {DEFAULT_CONFIG_FILE}: {err}")
        });
        if cfg.basic.admin_key.trim().is_empty() {
            panic!("basic.admin_key must be set and non-empty");
        }
        cfg
    }

    pub fn antigravity(&self) -> AntigravityResolvedConfig {
        self.providers.antigravity.resolve(&self.providers.defaults)
    }

    pub fn kiro(&self) -> KiroResolvedConfig {
        self.providers.kiro.resolve(&self.providers.defaults)
    }

    pub fn qwen(&self) -> QwenResolvedConfig {
        self.providers.qwen.resolve(&self.providers.defaults)
    }
}
