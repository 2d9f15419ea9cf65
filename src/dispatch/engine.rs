use crate::dispatch::classify::{UpstreamOutcome, classify};
use crate::dispatch::events::StreamEvent;
use crate::dispatch::select::select_account;
use crate::dispatch::state::{DispatchState, MAX_PROJECT_RETRIES, MAX_QUOTA_SWAPS};
use crate::dispatch::traits::{
    AccountDirectory, DispatchRequest, QuotaView, Transport, UpstreamResponse,
};
use crate::error::{DispatchError, Error403Class, HubError};
use crate::ledger::CompletedRequest;
use crate::store::{Account, AccountKey, Provider};
use crate::token::{RefreshError, TokenSource};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// What a finished dispatch reports back to the route (the event stream has
/// already carried the content).
#[derive(Debug, Clone)]
pub struct DispatchSummary {
    pub account: AccountKey,
    pub finish_reason: Option<String>,
    pub quota_swaps: usize,
    pub project_retries: usize,
}

/// The orchestrator: account selection, token freshness, the
/// (endpoint × account) retry matrix, and consumption settlement.
///
/// Collaborators are injected so scenario tests run the full matrix against
/// fakes.
#[derive(Clone)]
pub struct DispatchEngine {
    directory: Arc<dyn AccountDirectory>,
    tokens: Arc<dyn TokenSource>,
    quotas: Arc<dyn QuotaView>,
}

impl DispatchEngine {
    pub fn new(
        directory: Arc<dyn AccountDirectory>,
        tokens: Arc<dyn TokenSource>,
        quotas: Arc<dyn QuotaView>,
    ) -> Self {
        Self {
            directory,
            tokens,
            quotas,
        }
    }

    /// Run one request to completion. Content flows through `events`; the
    /// caller sees a clean `Finished` or exactly one terminal `Error` event
    /// mirroring the returned `DispatchError`.
    pub async fn execute(
        &self,
        transport: &dyn Transport,
        request: &DispatchRequest,
        events: &mpsc::Sender<StreamEvent>,
    ) -> Result<DispatchSummary, DispatchError> {
        let result = self.run(transport, request, events).await;
        if let Err(e) = &result {
            let _ = events
                .send(StreamEvent::Error {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                })
                .await;
        }
        result
    }

    async fn run(
        &self,
        transport: &dyn Transport,
        request: &DispatchRequest,
        events: &mpsc::Sender<StreamEvent>,
    ) -> Result<DispatchSummary, DispatchError> {
        let provider = transport.provider();
        let mut st = DispatchState::new();

        // Outer loop: one iteration per selected account.
        loop {
            let Some(account) = select_account(
                self.directory.as_ref(),
                self.quotas.as_ref(),
                transport,
                &request.user,
                &request.model,
                &st.exclude,
            )
            .await?
            else {
                return Err(DispatchError::ResourceExhausted);
            };
            let key = account.key();

            let account = match self.tokens.ensure_fresh(key, false).await {
                Ok(a) => a,
                Err(RefreshError::InvalidGrant) => {
                    // Already disabled by the token manager; never pick again.
                    st.exclude.insert(key);
                    continue;
                }
                Err(RefreshError::Transient { reason }) => {
                    warn!(account = %key, %reason, "refresh failed, skipping account");
                    st.exclude.insert(key);
                    continue;
                }
            };

            // Antigravity needs a tenant project id before the first send.
            let account = if provider == Provider::Antigravity && account.project_id().is_none() {
                match self.mint_project(transport, &account).await {
                    Ok(Some(updated)) => updated,
                    Ok(None) | Err(_) => {
                        warn!(account = %key, "project onboarding failed, skipping account");
                        st.exclude.insert(key);
                        continue;
                    }
                }
            } else {
                account
            };

            let quota_before = self.quotas.quota_before(&account, &request.model).await;
            st.endpoint_index = 0;

            match self
                .drive_endpoints(transport, request, events, account, quota_before, &mut st)
                .await?
            {
                EndpointVerdict::Done(summary) => return Ok(summary),
                EndpointVerdict::SwapAccount => continue,
            }
        }
    }

    /// Inner loop: walk the endpoint list for one account until the request
    /// finishes, turns terminal, or the matrix says swap accounts.
    async fn drive_endpoints(
        &self,
        transport: &dyn Transport,
        request: &DispatchRequest,
        events: &mpsc::Sender<StreamEvent>,
        mut account: Account,
        quota_before: Option<f64>,
        st: &mut DispatchState,
    ) -> Result<EndpointVerdict, DispatchError> {
        let provider = transport.provider();
        let key = account.key();

        loop {
            let resp = transport.send(&account, st.endpoint_index, request).await?;

            let (status, body) = match resp {
                UpstreamResponse::Open(body) => {
                    let summary = transport.pump(body, request, events).await?;

                    self.quotas.on_completed(CompletedRequest {
                        user_id: request.user.id.clone(),
                        account: account.clone(),
                        model: request.model.clone(),
                        quota_before,
                        usage_credits: summary.usage_credits,
                    });

                    info!(
                        account = %key,
                        model = %request.model,
                        endpoint = st.endpoint_index,
                        swaps = st.quota_swaps,
                        project_retries = st.project_retries,
                        finish = summary.finish_reason.as_deref().unwrap_or("-"),
                        "dispatch complete"
                    );

                    return Ok(EndpointVerdict::Done(DispatchSummary {
                        account: key,
                        finish_reason: summary.finish_reason,
                        quota_swaps: st.quota_swaps,
                        project_retries: st.project_retries,
                    }));
                }
                UpstreamResponse::Failed { status, body } => (status, body),
            };

            let outcome = classify(provider, status, &body);
            warn!(
                account = %key,
                model = %request.model,
                endpoint = st.endpoint_index,
                %status,
                outcome = ?outcome,
                "upstream error"
            );

            match outcome {
                UpstreamOutcome::QuotaExhausted => {
                    st.exclude.insert(key);
                    return Ok(EndpointVerdict::SwapAccount);
                }

                UpstreamOutcome::RateLimited => {
                    if st.next_endpoint(transport.endpoint_count()) {
                        continue;
                    }
                    st.quota_swaps += 1;
                    if st.quota_swaps > MAX_QUOTA_SWAPS {
                        return Err(DispatchError::ResourceExhausted);
                    }
                    st.exclude.insert(key);
                    return Ok(EndpointVerdict::SwapAccount);
                }

                UpstreamOutcome::Forbidden(class) => {
                    if provider == Provider::Kiro {
                        self.disable(key).await;
                        return Err(DispatchError::AccountFatal { status, body });
                    }

                    st.latch_403(class);

                    // A project-ineligible 403 may be fixed by re-minting,
                    // at most once per request.
                    if class == Error403Class::ProjectIneligible
                        && st.project_retries < MAX_PROJECT_RETRIES
                    {
                        st.project_retries += 1;
                        if let Ok(Some(updated)) = self.mint_project(transport, &account).await {
                            account = updated;
                            continue;
                        }
                    }

                    if st.next_endpoint(transport.endpoint_count()) {
                        continue;
                    }

                    let latched = st.first_403.unwrap_or(class);
                    if latched != Error403Class::PermissionDenied {
                        self.disable(key).await;
                    }
                    return Err(DispatchError::AllEndpoints403 { class: latched });
                }

                UpstreamOutcome::ProjectInvalid => {
                    if st.project_retries < MAX_PROJECT_RETRIES {
                        st.project_retries += 1;
                        if let Ok(Some(updated)) = self.mint_project(transport, &account).await {
                            account = updated;
                            continue;
                        }
                    }
                    self.disable(key).await;
                    st.exclude.insert(key);
                    return Ok(EndpointVerdict::SwapAccount);
                }

                UpstreamOutcome::ImageTooLarge => return Err(DispatchError::ImageTooLarge),

                UpstreamOutcome::InvalidArgument => {
                    return Err(DispatchError::InvalidArgument { body });
                }

                UpstreamOutcome::BadRequestFatal => {
                    self.disable(key).await;
                    return Err(DispatchError::AccountFatal { status, body });
                }

                UpstreamOutcome::PaymentRequired => {
                    if provider == Provider::Kiro {
                        self.disable(key).await;
                        return Err(DispatchError::AccountFatal { status, body });
                    }
                    return Err(DispatchError::Upstream(HubError::UpstreamStatus(status)));
                }

                UpstreamOutcome::IllegalPrompt => return Err(DispatchError::IllegalPrompt),

                UpstreamOutcome::Overloaded => {
                    if st.next_endpoint(transport.endpoint_count()) {
                        continue;
                    }
                    return Err(DispatchError::Upstream(HubError::UpstreamStatus(status)));
                }

                UpstreamOutcome::ServerError | UpstreamOutcome::Other => {
                    return Err(DispatchError::Upstream(HubError::UpstreamStatus(status)));
                }
            }
        }
    }

    /// Mint + persist + reload. `Ok(None)` when the transport has no project
    /// concept or onboarding yielded nothing.
    async fn mint_project(
        &self,
        transport: &dyn Transport,
        account: &Account,
    ) -> Result<Option<Account>, HubError> {
        let Some(patch) = transport.mint_project(account).await? else {
            return Ok(None);
        };
        if patch.project_id.is_none() {
            return Ok(None);
        }
        self.directory.save_project(account.id, patch).await?;
        let updated = self.directory.reload(account.key()).await?;
        Ok(Some(updated))
    }

    async fn disable(&self, key: AccountKey) {
        if let Err(e) = self.directory.disable(key).await {
            warn!(account = %key, "failed to disable account: {e}");
        }
    }
}

enum EndpointVerdict {
    Done(DispatchSummary),
    SwapAccount,
}
