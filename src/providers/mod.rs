pub mod antigravity;
pub mod kiro;
pub mod qwen;

mod endpoints;
mod upstream_retry;

pub use endpoints::{Endpoint, EndpointTable};

use crate::config::Config;
use crate::ledger::ModelsFetcher;
use crate::store::Provider;
use antigravity::AntigravityTransport;
use kiro::KiroTransport;
use qwen::QwenTransport;
use reqwest::header::{CONNECTION, HeaderMap, HeaderValue};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use url::Url;

pub const UPSTREAM_BODY_PREVIEW_CHARS: usize = 300;

/// Hard deadline for any single upstream request, streaming included.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Aggregates the transports for all providers.
///
/// Kept as a simple struct (vs. a dynamic registry) to preserve
/// compile-time ergonomics and avoid over-abstracting too early.
#[derive(Clone)]
pub struct Providers {
    pub antigravity: Arc<AntigravityTransport>,
    pub antigravity_cfg: Arc<crate::config::AntigravityResolvedConfig>,
    pub kiro: Arc<KiroTransport>,
    pub kiro_cfg: Arc<crate::config::KiroResolvedConfig>,
    pub qwen: Arc<QwenTransport>,
    pub qwen_cfg: Arc<crate::config::QwenResolvedConfig>,
}

impl Providers {
    pub fn build(cfg: &Config) -> Self {
        let antigravity_cfg = Arc::new(cfg.antigravity());
        let kiro_cfg = Arc::new(cfg.kiro());
        let qwen_cfg = Arc::new(cfg.qwen());

        info!(
            antigravity_endpoints = antigravity_cfg.endpoints.len(),
            antigravity_models = ?antigravity_cfg.model_list,
            kiro_region = %kiro_cfg.default_region,
            kiro_tiers = kiro_cfg.tier_models.len(),
            qwen_models = ?qwen_cfg.model_list,
            "provider configs resolved"
        );

        let antigravity = Arc::new(AntigravityTransport::new(
            antigravity_cfg.clone(),
            build_client(
                antigravity::ANTIGRAVITY_USER_AGENT,
                antigravity_cfg.proxy.clone(),
                antigravity_cfg.enable_multiplexing,
            ),
        ));
        let kiro = Arc::new(KiroTransport::new(
            kiro_cfg.clone(),
            build_client(
                kiro::KIRO_USER_AGENT,
                kiro_cfg.proxy.clone(),
                kiro_cfg.enable_multiplexing,
            ),
        ));
        let qwen = Arc::new(QwenTransport::new(build_client(
            qwen::QWEN_USER_AGENT,
            qwen_cfg.proxy.clone(),
            qwen_cfg.enable_multiplexing,
        )));

        Self {
            antigravity,
            antigravity_cfg,
            kiro,
            kiro_cfg,
            qwen,
            qwen_cfg,
        }
    }

    /// Models-list fetchers for the quota refresh pipeline. Only providers
    /// that actually report per-model fractions appear here.
    pub fn models_fetchers(&self) -> HashMap<Provider, Arc<dyn ModelsFetcher>> {
        let mut map: HashMap<Provider, Arc<dyn ModelsFetcher>> = HashMap::new();
        map.insert(Provider::Antigravity, self.antigravity.clone());
        map
    }
}

/// Upstream HTTP client per provider: 10-minute hard deadline, optional
/// proxy, HTTP/1 + `Connection: close` unless multiplexing is enabled.
pub fn build_client(
    user_agent: &str,
    proxy: Option<Url>,
    enable_multiplexing: bool,
) -> reqwest::Client {
    let mut headers = HeaderMap::new();

    let mut builder = reqwest::Client::builder()
        .user_agent(user_agent)
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(Duration::from_secs(10))
        .timeout(UPSTREAM_TIMEOUT);

    if let Some(proxy_url) = proxy {
        let proxy =
            reqwest::Proxy::all(proxy_url.as_str()).expect("invalid proxy url for reqwest client");
        builder = builder.proxy(proxy);
    }

    if !enable_multiplexing {
        headers.insert(CONNECTION, HeaderValue::from_static("close"));

        builder = builder
            .http1_only()
            .pool_max_idle_per_host(0)
            .pool_idle_timeout(Duration::from_secs(0));
    } else {
        builder = builder.http2_adaptive_window(true);
    }

    builder
        .default_headers(headers)
        .build()
        .expect("failed to build reqwest client")
}
