use crate::config::{AntigravityResolvedConfig, KiroResolvedConfig, QwenResolvedConfig};
use crate::db::TokenPatch;
use crate::error::{IsRetryable, OauthError};
use crate::providers::{antigravity, kiro, qwen};
use crate::store::{Account, AccountKey, AccountStore, Provider, ProviderDetail};
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use chrono::Duration as ChronoDuration;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error as ThisError;
use tracing::{info, warn};

/// Tokens expiring inside this window are refreshed before use.
pub const REFRESH_MARGIN_SECS: i64 = 60;

/// Classified refresh failure. Side effects (disable / needs-reauth) have
/// already been applied when one of these is returned; the dispatch engine
/// only has to skip the account.
#[derive(Debug, ThisError)]
pub enum RefreshError {
    /// `invalid_grant`: the refresh token is dead and the account disabled.
    #[error("refresh token permanently rejected; account disabled")]
    InvalidGrant,

    /// Anything else: the account is flagged `needs_reauth` and skipped.
    #[error("token refresh failed: {reason}")]
    Transient { reason: String },
}

/// Produce a usable access token for an account; substitutable in tests.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Returns the account with a valid access token, refreshing iff the
    /// token expires within the safety margin or `force` is set.
    async fn ensure_fresh(&self, key: AccountKey, force: bool) -> Result<Account, RefreshError>;
}

/// Per-account OAuth lifecycle. Refreshes are serialized per account-id via
/// an in-flight lock map (at most one network refresh per account at any
/// moment); accounts refresh in parallel across the map.
pub struct TokenManager {
    store: AccountStore,
    http: reqwest::Client,
    antigravity: Arc<AntigravityResolvedConfig>,
    kiro: Arc<KiroResolvedConfig>,
    qwen: Arc<QwenResolvedConfig>,
    flights: Mutex<HashMap<AccountKey, Arc<tokio::sync::Mutex<()>>>>,
    limiters: HashMap<Provider, Arc<DefaultDirectRateLimiter>>,
}

impl TokenManager {
    pub fn new(
        store: AccountStore,
        http: reqwest::Client,
        antigravity: Arc<AntigravityResolvedConfig>,
        kiro: Arc<KiroResolvedConfig>,
        qwen: Arc<QwenResolvedConfig>,
    ) -> Self {
        let mut limiters = HashMap::new();
        limiters.insert(Provider::Antigravity, direct_limiter(antigravity.oauth_tps));
        limiters.insert(Provider::Kiro, direct_limiter(kiro.oauth_tps));
        limiters.insert(Provider::Qwen, direct_limiter(qwen.oauth_tps));

        Self {
            store,
            http,
            antigravity,
            kiro,
            qwen,
            flights: Mutex::new(HashMap::new()),
            limiters,
        }
    }

    fn refresh_slot(&self, key: AccountKey) -> Arc<tokio::sync::Mutex<()>> {
        self.flights
            .lock()
            .expect("flight map lock poisoned")
            .entry(key)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn refresh_upstream(&self, account: &Account) -> Result<TokenPatch, OauthError> {
        match &account.detail {
            ProviderDetail::Antigravity { .. } => {
                antigravity::oauth::refresh_access_token(
                    &self.antigravity,
                    self.http.clone(),
                    &account.refresh_token,
                )
                .await
            }
            ProviderDetail::Kiro { .. } => {
                kiro::oauth::refresh_token(&self.kiro, &self.http, account).await
            }
            ProviderDetail::Qwen { .. } => {
                qwen::oauth::refresh_token(&self.qwen, &self.http, &account.refresh_token).await
            }
        }
    }

    fn transient(reason: impl std::fmt::Display) -> RefreshError {
        RefreshError::Transient {
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl TokenSource for TokenManager {
    async fn ensure_fresh(&self, key: AccountKey, force: bool) -> Result<Account, RefreshError> {
        let margin = ChronoDuration::seconds(REFRESH_MARGIN_SECS);

        let account = self
            .store
            .get_by_id(key)
            .await
            .map_err(Self::transient)?;
        if !force && !account.token_stale(margin) {
            return Ok(account);
        }

        let slot = self.refresh_slot(key);
        let _guard = slot.lock().await;

        // Another caller may have finished the refresh while we waited on
        // the slot; re-read before spending a network call.
        let account = self
            .store
            .get_by_id(key)
            .await
            .map_err(Self::transient)?;
        if !force && !account.token_stale(margin) {
            return Ok(account);
        }

        if let Some(limiter) = self.limiters.get(&key.provider) {
            limiter.until_ready().await;
        }

        // Transport-level hiccups get a short deterministic retry here;
        // classification below only sees settled outcomes.
        let refresh_result = (|| self.refresh_upstream(&account))
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_millis(100))
                    .with_max_delay(Duration::from_millis(500))
                    .with_max_times(2)
                    .with_jitter(),
            )
            .when(OauthError::is_retryable)
            .await;

        match refresh_result {
            Ok(patch) => {
                self.store
                    .update_token(key, patch)
                    .await
                    .map_err(Self::transient)?;
                info!(account = %key, "access token refreshed");
                self.store.get_by_id(key).await.map_err(Self::transient)
            }

            Err(e) if e.is_invalid_grant() => {
                warn!(account = %key, "refresh rejected with invalid_grant, disabling");
                if let Err(db_err) = self.store.update_status(key, false).await {
                    warn!(account = %key, "failed to disable account: {db_err}");
                }
                Err(RefreshError::InvalidGrant)
            }

            Err(e) => {
                warn!(account = %key, "refresh failed: {e}, flagging needs_reauth");
                if let Err(db_err) = self.store.mark_needs_reauth(key).await {
                    warn!(account = %key, "failed to flag needs_reauth: {db_err}");
                }
                Err(Self::transient(e))
            }
        }
    }
}

fn direct_limiter(tps: usize) -> Arc<DefaultDirectRateLimiter> {
    let tps = u32::try_from(tps.max(1)).unwrap_or(u32::MAX);
    let burst = tps.saturating_mul(2).max(1);
    Arc::new(RateLimiter::direct(
        Quota::per_second(NonZeroU32::new(tps).unwrap())
            .allow_burst(NonZeroU32::new(burst).unwrap()),
    ))
}
