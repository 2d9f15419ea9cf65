use crate::db::{DbHandle, QuotaUpsert};
use crate::error::HubError;
use crate::store::{Account, AccountKey, Provider};
use async_trait::async_trait;
use futures::stream::StreamExt;
use governor::{Quota, RateLimiter};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

/// Provider-specific models-list call. Implemented by the upstream clients;
/// tests substitute fakes.
#[async_trait]
pub trait ModelsFetcher: Send + Sync {
    async fn fetch_models(&self, account: &Account) -> Result<Vec<QuotaUpsert>, HubError>;
}

#[derive(Debug)]
struct RefreshJob {
    account: Account,
}

/// Handle for scheduling background quota refreshes.
///
/// Submissions are de-duplicated per account while a refresh is in flight,
/// so a cold cache under a request burst produces one upstream models-list
/// call per account, not N.
#[derive(Clone)]
pub struct QuotaRefresherHandle {
    job_tx: mpsc::Sender<RefreshJob>,
    inflight: Arc<Mutex<HashSet<AccountKey>>>,
}

impl QuotaRefresherHandle {
    /// Best-effort: a full queue or closed pipeline only logs.
    pub fn submit(&self, account: Account) {
        let key = account.key();
        {
            let mut inflight = self.inflight.lock().expect("inflight lock poisoned");
            if !inflight.insert(key) {
                debug!(account = %key, "quota refresh already in flight, skipping");
                return;
            }
        }

        if let Err(e) = self.job_tx.try_send(RefreshJob { account }) {
            self.inflight
                .lock()
                .expect("inflight lock poisoned")
                .remove(&key);
            warn!(account = %key, "quota refresh enqueue failed: {e}");
        }
    }
}

/// Spawn the background quota-refresh pipeline: a bounded queue drained by
/// rate-limited `buffer_unordered` workers, one upsert per completed fetch.
pub fn spawn_pipeline(
    db: DbHandle,
    fetchers: HashMap<Provider, Arc<dyn ModelsFetcher>>,
    refresh_tps: usize,
) -> QuotaRefresherHandle {
    let (job_tx, job_rx) = mpsc::channel::<RefreshJob>(1000);
    let inflight: Arc<Mutex<HashSet<AccountKey>>> = Arc::new(Mutex::new(HashSet::new()));

    let tps = refresh_tps.max(1);
    let tps_u32 = u32::try_from(tps).unwrap_or(u32::MAX);
    let burst_u32 = u32::try_from(tps.saturating_mul(2)).unwrap_or(u32::MAX);
    let limiter = Arc::new(RateLimiter::direct(
        Quota::per_second(std::num::NonZeroU32::new(tps_u32).unwrap())
            .allow_burst(std::num::NonZeroU32::new(burst_u32).unwrap()),
    ));

    let buffer_unordered = tps.saturating_mul(2).max(1);
    let worker_inflight = inflight.clone();
    tokio::spawn(async move {
        info!(
            "Quota Refresh Pipeline Started: BufferUnordered={}, RateLimit={}/s",
            buffer_unordered, tps_u32
        );

        let mut pipeline = ReceiverStream::new(job_rx)
            .map(|job| {
                let lim = limiter.clone();
                let db = db.clone();
                let fetchers = fetchers.clone();
                let inflight = worker_inflight.clone();
                async move {
                    lim.until_ready().await;
                    let key = job.account.key();
                    let result = refresh_account(&db, &fetchers, &job.account).await;
                    inflight.lock().expect("inflight lock poisoned").remove(&key);
                    if let Err(e) = result {
                        warn!(account = %key, "quota refresh failed: {e}");
                    }
                }
            })
            .buffer_unordered(buffer_unordered);

        while pipeline.next().await.is_some() {}
        info!("Quota Refresh Pipeline Stopped");
    });

    QuotaRefresherHandle { job_tx, inflight }
}

async fn refresh_account(
    db: &DbHandle,
    fetchers: &HashMap<Provider, Arc<dyn ModelsFetcher>>,
    account: &Account,
) -> Result<(), HubError> {
    let key = account.key();
    let Some(fetcher) = fetchers.get(&key.provider) else {
        debug!(account = %key, "no models fetcher for provider, skipping");
        return Ok(());
    };

    let rows = fetcher.fetch_models(account).await?;
    let count = rows.len();
    db.upsert_quotas(key, rows).await?;
    debug!(account = %key, models = count, "quota cache refreshed");
    Ok(())
}
