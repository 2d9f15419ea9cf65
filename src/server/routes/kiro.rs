use crate::dispatch::{DispatchRequest, RequestPayload, StreamEvent};
use crate::error::{DispatchError, HubError};
use crate::server::guards::auth::AuthedUser;
use crate::server::router::HubState;
use antihub_schema::kiro::{
    ConversationState, Tool, ToolResult, ToolSpecification, UserInputMessageContext,
};
use axum::{
    Json,
    extract::State,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::{StreamExt, wrappers::ReceiverStream};

/// Anthropic-shaped messages request, mapped minimally onto the
/// conversation-state tree. Full south-side translation is a separate
/// concern; this route only carries what the codec needs.
#[derive(Debug, Deserialize)]
pub struct MessagesRequest {
    pub model: String,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub messages: Vec<Value>,
    #[serde(default)]
    pub tools: Vec<Value>,
}

pub async fn models_handler(
    State(state): State<HubState>,
    AuthedUser(_user): AuthedUser,
) -> Json<Value> {
    let models: Vec<_> = state
        .providers
        .kiro_cfg
        .model_list
        .iter()
        .map(|name| json!({ "id": name, "type": "model" }))
        .collect();
    Json(json!({ "data": models }))
}

pub async fn messages_handler(
    State(state): State<HubState>,
    AuthedUser(user): AuthedUser,
    Json(body): Json<MessagesRequest>,
) -> Result<Response, DispatchError> {
    let stream = body.stream;
    let conversation = to_conversation_state(&body);

    let request = DispatchRequest {
        user,
        model: body.model,
        stream,
        payload: RequestPayload::Kiro(conversation),
    };

    let (tx, rx) = mpsc::channel::<StreamEvent>(64);
    let engine = state.engine.clone();
    let transport = state.providers.kiro.clone();

    let handle =
        tokio::spawn(async move { engine.execute(transport.as_ref(), &request, &tx).await });

    if stream {
        let sse_stream = ReceiverStream::new(rx).filter_map(|event| {
            match Event::default().json_data(&event) {
                Ok(sse) => Some(Ok::<_, std::convert::Infallible>(sse)),
                Err(e) => {
                    tracing::warn!("failed to serialize kiro SSE event: {e}");
                    None
                }
            }
        });
        return Ok(Sse::new(sse_stream)
            .keep_alive(KeepAlive::default())
            .into_response());
    }

    let mut rx = rx;
    let mut text = String::new();
    let mut usage = None;
    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Text { text: delta } => text.push_str(&delta),
            StreamEvent::Usage { credits } => usage = Some(credits),
            _ => {}
        }
    }
    handle
        .await
        .map_err(|e| DispatchError::Upstream(HubError::Unexpected(e.to_string())))??;

    Ok(Json(json!({
        "content": [{ "type": "text", "text": text }],
        "usage": usage,
    }))
    .into_response())
}

/// Last user message becomes the current message; everything before it is
/// carried as raw history. Tool declarations and tool results map onto the
/// context block.
fn to_conversation_state(req: &MessagesRequest) -> ConversationState {
    let mut state = ConversationState {
        chat_trigger_type: Some("MANUAL".to_string()),
        ..ConversationState::default()
    };

    let mut messages = req.messages.clone();
    let current = messages.pop();

    state.history = messages;
    state.current_message.user_input_message.content = current
        .as_ref()
        .map(extract_text)
        .unwrap_or_default();
    state.current_message.user_input_message.origin = Some("AI_EDITOR".to_string());

    let tools: Vec<Tool> = req
        .tools
        .iter()
        .map(|tool| Tool {
            tool_specification: ToolSpecification {
                name: tool
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                description: tool
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                input_schema: tool.get("input_schema").cloned(),
            },
        })
        .collect();

    let tool_results: Vec<ToolResult> = current
        .as_ref()
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("tool_result"))
                .map(|b| ToolResult {
                    tool_use_id: b
                        .get("tool_use_id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    content: b
                        .get("content")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default(),
                    status: Some("success".to_string()),
                })
                .collect()
        })
        .unwrap_or_default();

    if !tools.is_empty() || !tool_results.is_empty() {
        state.current_message.user_input_message.user_input_message_context =
            Some(UserInputMessageContext {
                tools,
                tool_results,
                ..UserInputMessageContext::default()
            });
    }

    state
}

fn extract_text(message: &Value) -> String {
    match message.get("content") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_user_message_becomes_current_and_rest_history() {
        let req = MessagesRequest {
            model: "claude-sonnet-4".to_string(),
            stream: false,
            messages: vec![
                json!({"role": "user", "content": "first"}),
                json!({"role": "assistant", "content": "reply"}),
                json!({"role": "user", "content": [{"type": "text", "text": "second"}]}),
            ],
            tools: vec![],
        };

        let state = to_conversation_state(&req);
        assert_eq!(state.history.len(), 2);
        assert_eq!(state.current_message.user_input_message.content, "second");
    }

    #[test]
    fn tools_and_tool_results_land_in_context() {
        let req = MessagesRequest {
            model: "claude-sonnet-4".to_string(),
            stream: false,
            messages: vec![json!({
                "role": "user",
                "content": [
                    {"type": "tool_result", "tool_use_id": "t1", "content": [{"type": "text", "text": "42"}]}
                ]
            })],
            tools: vec![json!({"name": "calc", "description": "", "input_schema": {"type": "object"}})],
        };

        let state = to_conversation_state(&req);
        let context = state
            .current_message
            .user_input_message
            .user_input_message_context
            .unwrap();
        assert_eq!(context.tools.len(), 1);
        assert_eq!(context.tools[0].tool_specification.name, "calc");
        assert_eq!(context.tool_results.len(), 1);
        assert_eq!(context.tool_results[0].tool_use_id, "t1");
    }
}
