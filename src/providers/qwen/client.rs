use crate::dispatch::{
    DispatchRequest, RequestPayload, StreamEvent, StreamSummary, Transport, UpstreamBody,
    UpstreamResponse,
};
use crate::error::HubError;
use crate::store::{Account, Provider, ProviderDetail};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use tokio::sync::mpsc;
use tracing::debug;
use url::Url;

pub const QWEN_USER_AGENT: &str = "QwenCode/0.2 (linux; x64)";

const DEFAULT_RESOURCE_URL: &str = "https://portal.qwen.ai";

/// Qwen is a passthrough: OpenAI-shaped request in, raw JSON or SSE body
/// out, at the account's per-tenant host.
pub struct QwenTransport {
    client: reqwest::Client,
}

impl QwenTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn chat_url(account: &Account) -> Result<Url, HubError> {
        let base = match &account.detail {
            ProviderDetail::Qwen { resource_url } => resource_url
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(DEFAULT_RESOURCE_URL),
            _ => DEFAULT_RESOURCE_URL,
        };
        // resource_url arrives with or without a scheme depending on the
        // token endpoint's mood.
        let base = if base.starts_with("http") {
            base.to_string()
        } else {
            format!("https://{base}")
        };
        Url::parse(&format!("{}/v1/chat/completions", base.trim_end_matches('/')))
            .map_err(HubError::Url)
    }
}

#[async_trait]
impl Transport for QwenTransport {
    fn provider(&self) -> Provider {
        Provider::Qwen
    }

    fn endpoint_count(&self) -> usize {
        1
    }

    async fn send(
        &self,
        account: &Account,
        _endpoint_index: usize,
        request: &DispatchRequest,
    ) -> Result<UpstreamResponse, HubError> {
        let RequestPayload::Qwen(body) = &request.payload else {
            return Err(HubError::Unexpected(
                "qwen transport received a non-qwen payload".to_string(),
            ));
        };
        let token = account
            .access_token
            .as_deref()
            .ok_or_else(|| HubError::Unexpected("account has no access token".to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| HubError::Unexpected(format!("invalid auth header: {e}")))?,
        );
        if request.stream {
            headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        }

        let url = Self::chat_url(account)?;
        debug!(account = %account.key(), model = %request.model, url = %url, "qwen upstream post");

        let resp = self.client.post(url).headers(headers).json(body).send().await?;

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
        _request: &DispatchRequest,
        events: &mpsc::Sender<StreamEvent>,
    ) -> Result<StreamSummary, HubError> {
        while let Some(chunk) = body.next_chunk().await {
            let chunk = chunk?;
            let event = StreamEvent::Raw {
                chunk: String::from_utf8_lossy(&chunk).into_owned(),
            };
            events
                .send(event)
                .await
                .map_err(|_| HubError::StreamProtocol("caller disconnected".to_string()))?;
        }

        events
            .send(StreamEvent::Finished { reason: None })
            .await
            .map_err(|_| HubError::StreamProtocol("caller disconnected".to_string()))?;
        Ok(StreamSummary::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn qwen_account(resource_url: Option<&str>) -> Account {
        Account {
            id: 1,
            user_id: "u1".to_string(),
            shared: false,
            email: None,
            refresh_token: "rt".to_string(),
            access_token: Some("at".to_string()),
            expiry: Utc::now(),
            status: true,
            needs_reauth: false,
            detail: ProviderDetail::Qwen {
                resource_url: resource_url.map(str::to_string),
            },
        }
    }

    #[test]
    fn chat_url_uses_account_resource_url() {
        let url = QwenTransport::chat_url(&qwen_account(Some("https://tenant-7.qwen.ai"))).unwrap();
        assert_eq!(url.as_str(), "https://tenant-7.qwen.ai/v1/chat/completions");
    }

    #[test]
    fn chat_url_adds_scheme_and_falls_back() {
        let bare = QwenTransport::chat_url(&qwen_account(Some("tenant-9.qwen.ai"))).unwrap();
        assert_eq!(bare.as_str(), "https://tenant-9.qwen.ai/v1/chat/completions");

        let fallback = QwenTransport::chat_url(&qwen_account(None)).unwrap();
        assert_eq!(fallback.as_str(), "https://portal.qwen.ai/v1/chat/completions");
    }
}
