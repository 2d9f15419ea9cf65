use crate::config::KiroResolvedConfig;
use crate::dispatch::{
    DispatchRequest, RequestPayload, StreamEvent, StreamSummary, Transport, UpstreamBody,
    UpstreamResponse,
};
use crate::error::HubError;
use crate::providers::kiro::frames::FrameDecoder;
use crate::store::{Account, Provider, ProviderDetail};
use antihub_schema::kiro::ConversationState;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

pub const KIRO_USER_AGENT: &str = "KiroIDE/0.3 aws-sdk-js/3.0";

const MACHINE_ID_HEADER: HeaderName = HeaderName::from_static("x-amzn-kiro-machine-id");

/// Placeholder inserted for blank tool descriptions; the upstream rejects
/// empty `toolSpecification.description` with a 400.
const EMPTY_TOOL_DESCRIPTION: &str = "No description provided.";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateAssistantPayload<'a> {
    conversation_state: &'a ConversationState,
    #[serde(skip_serializing_if = "Option::is_none")]
    profile_arn: Option<&'a str>,
}

pub struct KiroTransport {
    cfg: Arc<KiroResolvedConfig>,
    client: reqwest::Client,
}

impl KiroTransport {
    pub fn new(cfg: Arc<KiroResolvedConfig>, client: reqwest::Client) -> Self {
        Self { cfg, client }
    }

    fn endpoint_url(&self, account: &Account) -> Result<Url, HubError> {
        let region = match &account.detail {
            ProviderDetail::Kiro { region, .. } => {
                region.as_deref().unwrap_or(&self.cfg.default_region)
            }
            _ => &self.cfg.default_region,
        };
        Url::parse(&format!(
            "https://codewhisperer.{region}.amazonaws.com/generateAssistantResponse"
        ))
        .map_err(HubError::Url)
    }

    fn headers(account: &Account) -> Result<HeaderMap, HubError> {
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
        if let ProviderDetail::Kiro { machine_id, .. } = &account.detail {
            if let Ok(value) = HeaderValue::from_str(machine_id) {
                headers.insert(MACHINE_ID_HEADER, value);
            }
        }
        Ok(headers)
    }

    /// Every declared tool must carry a non-empty description before the
    /// request goes out.
    fn fill_tool_descriptions(state: &mut ConversationState) {
        let Some(context) = state
            .current_message
            .user_input_message
            .user_input_message_context
            .as_mut()
        else {
            return;
        };
        for tool in &mut context.tools {
            if tool.tool_specification.description.trim().is_empty() {
                tool.tool_specification.description = EMPTY_TOOL_DESCRIPTION.to_string();
            }
        }
    }
}

#[async_trait]
impl Transport for KiroTransport {
    fn provider(&self) -> Provider {
        Provider::Kiro
    }

    fn endpoint_count(&self) -> usize {
        1
    }

    fn allows(&self, account: &Account, model: &str) -> bool {
        self.cfg.tier_allows(account.subscription(), model)
    }

    async fn send(
        &self,
        account: &Account,
        _endpoint_index: usize,
        request: &DispatchRequest,
    ) -> Result<UpstreamResponse, HubError> {
        let RequestPayload::Kiro(state) = &request.payload else {
            return Err(HubError::Unexpected(
                "kiro transport received a non-kiro payload".to_string(),
            ));
        };

        let mut state = state.clone();
        state.current_message.user_input_message.model_id = Some(request.model.clone());
        Self::fill_tool_descriptions(&mut state);

        let profile_arn = match &account.detail {
            ProviderDetail::Kiro { profile_arn, .. } => profile_arn.as_deref(),
            _ => None,
        };
        let payload = GenerateAssistantPayload {
            conversation_state: &state,
            profile_arn,
        };

        let url = self.endpoint_url(account)?;
        debug!(account = %account.key(), model = %request.model, url = %url, "kiro upstream post");

        let resp = self
            .client
            .post(url)
            .headers(Self::headers(account)?)
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
        _request: &DispatchRequest,
        events: &mpsc::Sender<StreamEvent>,
    ) -> Result<StreamSummary, HubError> {
        let mut decoder = FrameDecoder::new();
        let mut summary = StreamSummary::default();

        while let Some(chunk) = body.next_chunk().await {
            let chunk = chunk?;
            for event in decoder.push(&chunk) {
                if let Some(text) = &event.content {
                    if !text.is_empty() {
                        send_event(events, StreamEvent::Text { text: text.clone() }).await?;
                    }
                }

                if let (Some(name), Some(id)) = (&event.name, &event.tool_use_id) {
                    send_event(
                        events,
                        StreamEvent::ToolCallStart {
                            id: id.clone(),
                            name: name.clone(),
                        },
                    )
                    .await?;
                }
                if let (Some(id), Some(input)) = (&event.tool_use_id, &event.input) {
                    send_event(
                        events,
                        StreamEvent::ToolCallDelta {
                            id: id.clone(),
                            input: input.clone(),
                        },
                    )
                    .await?;
                }

                // Legacy tool-call shape, forwarded under a stable name.
                if let Some(code_query) = &event.code_query {
                    send_event(
                        events,
                        StreamEvent::ToolCallStart {
                            id: "code_query".to_string(),
                            name: "codeQuery".to_string(),
                        },
                    )
                    .await?;
                    send_event(
                        events,
                        StreamEvent::ToolCallDelta {
                            id: "code_query".to_string(),
                            input: code_query.to_string(),
                        },
                    )
                    .await?;
                }

                if let Some(credits) = event.usage {
                    summary.usage_credits = Some(credits);
                    send_event(events, StreamEvent::Usage { credits }).await?;
                }
            }
        }

        if decoder.pending() > 0 {
            warn!(
                pending = decoder.pending(),
                "kiro stream ended with undecoded trailing bytes"
            );
        }

        send_event(events, StreamEvent::Finished { reason: None }).await?;
        Ok(summary)
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

#[cfg(test)]
mod tests {
    use super::*;
    use antihub_schema::kiro::{Tool, ToolSpecification, UserInputMessageContext};

    #[test]
    fn blank_tool_descriptions_get_placeholders() {
        let mut state = ConversationState::default();
        state
            .current_message
            .user_input_message
            .user_input_message_context = Some(UserInputMessageContext {
            tools: vec![
                Tool {
                    tool_specification: ToolSpecification {
                        name: "described".to_string(),
                        description: "does things".to_string(),
                        input_schema: None,
                    },
                },
                Tool {
                    tool_specification: ToolSpecification {
                        name: "blank".to_string(),
                        description: "  ".to_string(),
                        input_schema: None,
                    },
                },
            ],
            ..UserInputMessageContext::default()
        });

        KiroTransport::fill_tool_descriptions(&mut state);

        let tools = &state
            .current_message
            .user_input_message
            .user_input_message_context
            .as_ref()
            .unwrap()
            .tools;
        assert_eq!(tools[0].tool_specification.description, "does things");
        assert_eq!(tools[1].tool_specification.description, EMPTY_TOOL_DESCRIPTION);
    }
}
