use crate::config::AntigravityResolvedConfig;
use crate::db::{ProjectPatch, QuotaUpsert};
use crate::dispatch::{
    DispatchRequest, RequestPayload, StreamEvent, StreamSummary, Transport, UpstreamBody,
    UpstreamResponse,
};
use crate::error::HubError;
use crate::ledger::ModelsFetcher;
use crate::providers::EndpointTable;
use crate::providers::antigravity::project;
use crate::providers::antigravity::sse::{GeminiStreamState, SseParser};
use crate::providers::upstream_retry::post_json_with_retry;
use crate::store::{Account, Provider};
use antihub_schema::gemini::{GenerateContentRequest, ModelsListResponse, SseEnvelope};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

pub const ANTIGRAVITY_USER_AGENT: &str = "antigravity/1.16.5 linux/amd64";

const REQUEST_ID_PREFIX: &str = "agent";

/// Upstream envelope around the Gemini request body. `project` is the
/// account's minted tenant id.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpstreamPayload<'a> {
    project: &'a str,
    request: &'a GenerateContentRequest,
    model: &'a str,
    request_id: String,
}

pub struct AntigravityTransport {
    client: reqwest::Client,
    endpoints: EndpointTable,
}

impl AntigravityTransport {
    pub fn new(cfg: Arc<AntigravityResolvedConfig>, client: reqwest::Client) -> Self {
        let endpoints = EndpointTable::new(
            &cfg.endpoints,
            "/v1internal:generateContent",
            "/v1internal:streamGenerateContent",
            Some("alt=sse"),
            "/v1internal:listModels",
        );
        Self { client, endpoints }
    }

    /// Models with an elevated 503 rate on the plain generate path are
    /// forced through SSE and re-aggregated locally for non-stream callers.
    pub fn force_sse(model: &str) -> bool {
        model.starts_with("gemini-3-pro") || model.starts_with("claude")
    }

    fn effective_stream(request: &DispatchRequest) -> bool {
        request.stream || Self::force_sse(&request.model)
    }

    fn headers(access_token: &str, stream: bool) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {access_token}"))
                .expect("invalid fixed auth header value"),
        );
        if stream {
            headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        }
        headers
    }

    fn request_id_from_parts(timestamp_ms: i64, request_uuid: Uuid) -> String {
        format!("{REQUEST_ID_PREFIX}/{timestamp_ms}/{request_uuid}")
    }

    fn generate_request_id() -> String {
        Self::request_id_from_parts(Utc::now().timestamp_millis(), Uuid::new_v4())
    }

    fn access_token(account: &Account) -> Result<&str, HubError> {
        account
            .access_token
            .as_deref()
            .ok_or_else(|| HubError::Unexpected("account has no access token".to_string()))
    }
}

#[async_trait]
impl Transport for AntigravityTransport {
    fn provider(&self) -> Provider {
        Provider::Antigravity
    }

    fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    async fn send(
        &self,
        account: &Account,
        endpoint_index: usize,
        request: &DispatchRequest,
    ) -> Result<UpstreamResponse, HubError> {
        let RequestPayload::Gemini(body) = &request.payload else {
            return Err(HubError::Unexpected(
                "antigravity transport received a non-gemini payload".to_string(),
            ));
        };
        let endpoint = self.endpoints.get(endpoint_index).ok_or_else(|| {
            HubError::Unexpected(format!("endpoint index {endpoint_index} out of range"))
        })?;
        let token = Self::access_token(account)?;
        let project = account
            .project_id()
            .ok_or_else(|| HubError::Unexpected("account has no project id".to_string()))?;

        let stream = Self::effective_stream(request);
        let payload = UpstreamPayload {
            project,
            request: body,
            model: &request.model,
            request_id: Self::generate_request_id(),
        };

        debug!(
            account = %account.key(),
            model = %request.model,
            endpoint = endpoint_index,
            sse = stream,
            "antigravity upstream post"
        );

        // No transport-level 5xx retry here: 500/503 classification (illegal
        // prompt vs endpoint walk) belongs to the dispatch matrix.
        let resp = self
            .client
            .post(endpoint.select(stream).clone())
            .headers(Self::headers(token, stream))
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            Ok(UpstreamResponse::Open(UpstreamBody::from_response(resp)))
        } else {
            let body = resp.text().await.unwrap_or_default();
            Ok(UpstreamResponse::Failed { status, body })
        }
    }

    async fn pump(
        &self,
        mut body: UpstreamBody,
        request: &DispatchRequest,
        events: &mpsc::Sender<StreamEvent>,
    ) -> Result<StreamSummary, HubError> {
        let mut state = GeminiStreamState::new();

        if Self::effective_stream(request) {
            let mut parser = SseParser::new();
            while let Some(chunk) = body.next_chunk().await {
                let chunk = chunk?;
                for line in parser.push(&chunk) {
                    match serde_json::from_str::<SseEnvelope>(&line) {
                        Ok(envelope) => {
                            for event in state.ingest(&envelope) {
                                send_event(events, event).await?;
                            }
                        }
                        Err(e) => {
                            warn!("skipping invalid SSE JSON data ({e}): {line:.50}");
                        }
                    }
                }
            }
        } else {
            let mut buf = Vec::new();
            while let Some(chunk) = body.next_chunk().await {
                buf.extend_from_slice(&chunk?);
            }
            let envelope: SseEnvelope = serde_json::from_slice(&buf)?;
            for event in state.ingest(&envelope) {
                send_event(events, event).await?;
            }
        }

        let (tail, summary) = state.finish();
        for event in tail {
            send_event(events, event).await?;
        }
        Ok(summary)
    }

    async fn mint_project(&self, account: &Account) -> Result<Option<ProjectPatch>, HubError> {
        let token = Self::access_token(account)?;
        let patch = project::ensure_project(&self.client, self.endpoints.primary(), token).await?;
        Ok(Some(patch))
    }
}

#[async_trait]
impl ModelsFetcher for AntigravityTransport {
    async fn fetch_models(&self, account: &Account) -> Result<Vec<QuotaUpsert>, HubError> {
        let token = Self::access_token(account)?;

        let resp = post_json_with_retry(
            "Antigravity",
            &self.client,
            self.endpoints.primary().models(),
            Some(Self::headers(token, false)),
            &serde_json::json!({}),
        )
        .await?;

        if !resp.status().is_success() {
            return Err(HubError::UpstreamStatus(resp.status()));
        }

        let list: ModelsListResponse = resp.json().await?;
        Ok(list
            .models
            .into_iter()
            .map(|m| {
                let quota = m.quota_info.unwrap_or_default();
                QuotaUpsert {
                    model: m.name,
                    remaining: quota.remaining_fraction.unwrap_or(1.0),
                    available: m.available,
                    reset_time: quota.reset_time,
                }
            })
            .collect())
    }
}

async fn send_event(
    events: &mpsc::Sender<StreamEvent>,
    event: StreamEvent,
) -> Result<(), HubError> {
    events
        .send(event)
        .await
        .map_err(|_| HubError::StreamProtocol("caller disconnected".to_string()))
}
