mod groups;
mod refresher;

pub use groups::quota_group;
pub use refresher::{ModelsFetcher, QuotaRefresherHandle, spawn_pipeline};

use crate::db::{ConsumptionRecord, DbHandle, QuotaSnapshot, SharedPool};
use crate::error::HubError;
use crate::store::{Account, AccountKey, Provider};
use chrono::Utc;
use moka::sync::Cache;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Cached quota older than this schedules a background models-list refresh.
pub const QUOTA_STALE_SECS: i64 = 5 * 60;

/// In-memory read-through layer; short TTL so pipeline upserts become
/// visible without explicit invalidation fan-out.
const CACHE_TTL: Duration = Duration::from_secs(60);

/// Everything the ledger needs to settle a finished request.
#[derive(Debug, Clone)]
pub struct CompletedRequest {
    /// Calling user (pool owner for shared accounts), not necessarily the
    /// account owner.
    pub user_id: String,
    pub account: Account,
    pub model: String,
    /// Cached remaining fraction captured at selection time.
    pub quota_before: Option<f64>,
    /// Credits reported on the completion frame (Kiro).
    pub usage_credits: Option<f64>,
}

/// Per-(account, model) quota cache, per-user shared pools, and the
/// append-only consumption log.
#[derive(Clone)]
pub struct QuotaLedger {
    db: DbHandle,
    cache: Cache<(AccountKey, String), QuotaSnapshot>,
    refresher: QuotaRefresherHandle,
    fetchers: HashMap<Provider, Arc<dyn ModelsFetcher>>,
}

impl QuotaLedger {
    pub fn new(
        db: DbHandle,
        refresher: QuotaRefresherHandle,
        fetchers: HashMap<Provider, Arc<dyn ModelsFetcher>>,
    ) -> Self {
        Self {
            db,
            cache: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(CACHE_TTL)
                .build(),
            refresher,
            fetchers,
        }
    }

    /// Cached quota for `(account, model)`; schedules a non-blocking
    /// background refresh when the row is missing or older than 5 minutes.
    pub async fn quota_for(
        &self,
        account: &Account,
        model: &str,
    ) -> Result<Option<QuotaSnapshot>, HubError> {
        let key = account.key();
        let cache_key = (key, model.to_string());

        let snap = match self.cache.get(&cache_key) {
            Some(s) => Some(s),
            None => {
                let s = self.db.get_quota(key, model).await?;
                if let Some(s) = s {
                    self.cache.insert(cache_key, s);
                }
                s
            }
        };

        let stale = snap
            .is_none_or(|s| (Utc::now() - s.fetched_at).num_seconds() > QUOTA_STALE_SECS);
        if stale {
            self.refresher.submit(account.clone());
        }

        Ok(snap)
    }

    /// Availability gate used during account selection: cached quota > 0,
    /// and for shared accounts a positive pool balance for the calling
    /// user and the model's quota group.
    ///
    /// A missing quota row reads as available (optimistic until the first
    /// refresh lands); a missing pool row likewise.
    pub async fn is_available(
        &self,
        user_id: &str,
        account: &Account,
        model: &str,
    ) -> Result<bool, HubError> {
        let quota_ok = self
            .quota_for(account, model)
            .await?
            .is_none_or(|s| s.available && s.remaining > 0.0);
        if !quota_ok {
            return Ok(false);
        }

        if account.shared {
            let pool = self
                .db
                .get_shared_pool(user_id, account.provider(), quota_group(model))
                .await?;
            return Ok(pool.is_none_or(|p| p.quota > 0.0));
        }
        Ok(true)
    }

    /// Fire-and-forget settlement of a successful request: fetch the fresh
    /// quota where the provider reports one, then write the consumption row
    /// (and shared-pool decrement) in one transaction.
    pub fn on_completed(&self, done: CompletedRequest) {
        let ledger = self.clone();
        tokio::spawn(async move {
            if let Err(e) = ledger.settle(done).await {
                warn!("consumption settlement failed: {e}");
            }
        });
    }

    async fn settle(&self, done: CompletedRequest) -> Result<(), HubError> {
        let key = done.account.key();

        let (before, after) = match key.provider {
            Provider::Antigravity => {
                let before = done.quota_before.unwrap_or(0.0);
                let after = self.fresh_remaining(&done.account, &done.model).await;
                (before, after.unwrap_or(before))
            }
            // Kiro reports consumed credits on the completion frame; the log
            // keeps `consumed = before - after` uniform across providers.
            Provider::Kiro => (done.usage_credits.unwrap_or(0.0), 0.0),
            // Qwen exposes no quota signal; the row still marks the request.
            Provider::Qwen => (0.0, 0.0),
        };

        let consumed = self
            .db
            .record_consumption(ConsumptionRecord {
                user_id: done.user_id,
                key,
                model: done.model.clone(),
                model_group: quota_group(&done.model).to_string(),
                quota_before: before,
                quota_after: after,
                shared: done.account.shared,
            })
            .await?;

        info!(
            account = %key,
            model = %done.model,
            consumed,
            shared = done.account.shared,
            "consumption recorded"
        );
        Ok(())
    }

    /// Synchronous models-list fetch used at settlement; also upserts every
    /// returned row so the next availability check reads fresh values.
    async fn fresh_remaining(&self, account: &Account, model: &str) -> Option<f64> {
        let key = account.key();
        let fetcher = self.fetchers.get(&key.provider)?;

        match fetcher.fetch_models(account).await {
            Ok(rows) => {
                let after = rows
                    .iter()
                    .find(|r| r.model == model)
                    .map(|r| r.remaining);
                if let Err(e) = self.db.upsert_quotas(key, rows).await {
                    warn!(account = %key, "post-completion quota upsert failed: {e}");
                }
                self.cache.invalidate(&(key, model.to_string()));
                after
            }
            Err(e) => {
                warn!(account = %key, "post-completion quota fetch failed: {e}");
                None
            }
        }
    }

    pub async fn shared_pool(
        &self,
        user_id: &str,
        provider: Provider,
        model_group: &str,
    ) -> Result<Option<SharedPool>, HubError> {
        self.db.get_shared_pool(user_id, provider, model_group).await
    }

    pub async fn recompute_pools(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<(), HubError> {
        self.db.recompute_shared_pools(user_id, provider).await
    }
}
