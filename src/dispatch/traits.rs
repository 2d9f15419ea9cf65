use crate::db::ProjectPatch;
use crate::dispatch::events::{StreamEvent, StreamSummary};
use crate::error::HubError;
use crate::ledger::{CompletedRequest, QuotaLedger};
use crate::store::{Account, AccountKey, AccountStore, Provider, User};
use antihub_schema::{ChatCompletionsRequest, ConversationState, GenerateContentRequest};
use async_trait::async_trait;
use axum::http::StatusCode;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use tokio::sync::mpsc;

/// One caller request as seen by the dispatch engine.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub user: User,
    pub model: String,
    pub stream: bool,
    pub payload: RequestPayload,
}

/// Provider-shaped request body, already translated by the south side.
#[derive(Debug, Clone)]
pub enum RequestPayload {
    Gemini(GenerateContentRequest),
    Kiro(ConversationState),
    Qwen(ChatCompletionsRequest),
}

/// Byte stream of an accepted (2xx) upstream response. Wraps the reqwest
/// body in production; tests feed canned chunks.
pub struct UpstreamBody {
    stream: BoxStream<'static, Result<Bytes, HubError>>,
}

impl UpstreamBody {
    pub fn from_response(resp: reqwest::Response) -> Self {
        Self {
            stream: resp.bytes_stream().map_err(HubError::from).boxed(),
        }
    }

    pub fn from_chunks(chunks: Vec<Bytes>) -> Self {
        Self {
            stream: futures::stream::iter(chunks.into_iter().map(Ok)).boxed(),
        }
    }

    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, HubError>> {
        self.stream.next().await
    }
}

/// Upstream call result before classification: either an open 2xx body or a
/// failure with the raw body read out.
pub enum UpstreamResponse {
    Open(UpstreamBody),
    Failed { status: StatusCode, body: String },
}

/// Accounts as the engine sees them. `AccountStore` is the production
/// implementation; scenario tests substitute fakes.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn available(
        &self,
        provider: Provider,
        user_id: &str,
        shared: Option<bool>,
    ) -> Result<Vec<Account>, HubError>;

    async fn reload(&self, key: AccountKey) -> Result<Account, HubError>;

    async fn disable(&self, key: AccountKey) -> Result<(), HubError>;

    async fn save_project(&self, account_id: i64, patch: ProjectPatch) -> Result<(), HubError>;
}

#[async_trait]
impl AccountDirectory for AccountStore {
    async fn available(
        &self,
        provider: Provider,
        user_id: &str,
        shared: Option<bool>,
    ) -> Result<Vec<Account>, HubError> {
        self.get_available(provider, user_id, shared).await
    }

    async fn reload(&self, key: AccountKey) -> Result<Account, HubError> {
        self.get_by_id(key).await
    }

    async fn disable(&self, key: AccountKey) -> Result<(), HubError> {
        self.update_status(key, false).await
    }

    async fn save_project(&self, account_id: i64, patch: ProjectPatch) -> Result<(), HubError> {
        self.update_project_ids(account_id, patch).await
    }
}

/// Ledger surface the engine needs: the availability gate at selection and
/// the settlement hook at completion.
#[async_trait]
pub trait QuotaView: Send + Sync {
    async fn is_available(
        &self,
        user_id: &str,
        account: &Account,
        model: &str,
    ) -> Result<bool, HubError>;

    /// Cached remaining fraction, captured before the request for the
    /// consumption row. Best effort.
    async fn quota_before(&self, account: &Account, model: &str) -> Option<f64>;

    fn on_completed(&self, done: CompletedRequest);
}

#[async_trait]
impl QuotaView for QuotaLedger {
    async fn is_available(
        &self,
        user_id: &str,
        account: &Account,
        model: &str,
    ) -> Result<bool, HubError> {
        QuotaLedger::is_available(self, user_id, account, model).await
    }

    async fn quota_before(&self, account: &Account, model: &str) -> Option<f64> {
        self.quota_for(account, model)
            .await
            .ok()
            .flatten()
            .map(|s| s.remaining)
    }

    fn on_completed(&self, done: CompletedRequest) {
        QuotaLedger::on_completed(self, done);
    }
}

/// Provider upstream: request send on one endpoint of the failover list,
/// and the streaming response parser.
#[async_trait]
pub trait Transport: Send + Sync {
    fn provider(&self) -> Provider;

    /// Number of interchangeable base URLs; the second failover dimension.
    fn endpoint_count(&self) -> usize;

    /// Pre-selection gate (Kiro subscription tiers). Default allows all.
    fn allows(&self, _account: &Account, _model: &str) -> bool {
        true
    }

    async fn send(
        &self,
        account: &Account,
        endpoint_index: usize,
        request: &DispatchRequest,
    ) -> Result<UpstreamResponse, HubError>;

    /// Drain an accepted body into caller events. Returns what the stream
    /// reported at finish.
    async fn pump(
        &self,
        body: UpstreamBody,
        request: &DispatchRequest,
        events: &mpsc::Sender<StreamEvent>,
    ) -> Result<StreamSummary, HubError>;

    /// Mint an upstream tenant project id (Antigravity). `None` means the
    /// provider has no such concept.
    async fn mint_project(&self, _account: &Account) -> Result<Option<ProjectPatch>, HubError> {
        Ok(None)
    }
}
