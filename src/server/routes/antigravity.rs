use crate::dispatch::{DispatchRequest, RequestPayload, StreamEvent};
use crate::error::{DispatchError, HubError};
use crate::providers::antigravity::Aggregator;
use crate::server::guards::auth::AuthedUser;
use crate::server::router::HubState;
use antihub_schema::gemini::{
    Candidate, Content, GenerateContentRequest, GenerateContentResponse, Part,
};
use axum::{
    Json,
    extract::{Path, State},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use serde_json::json;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio_stream::{StreamExt, wrappers::ReceiverStream};

/// `{model}:generateContent` and `{model}:streamGenerateContent`, Gemini
/// path convention (the colon segment is one path component).
pub async fn generate_handler(
    State(state): State<HubState>,
    AuthedUser(user): AuthedUser,
    Path(model_action): Path<String>,
    Json(body): Json<GenerateContentRequest>,
) -> Result<Response, DispatchError> {
    let Some((model, action)) = model_action.split_once(':') else {
        return Err(DispatchError::InvalidArgument {
            body: format!("expected model:action, got {model_action}"),
        });
    };
    let stream = action == "streamGenerateContent";

    let request = DispatchRequest {
        user,
        model: model.to_string(),
        stream,
        payload: RequestPayload::Gemini(body),
    };

    let (tx, rx) = mpsc::channel::<StreamEvent>(64);
    let engine = state.engine.clone();
    let transport = state.providers.antigravity.clone();

    let handle = tokio::spawn(async move {
        engine.execute(transport.as_ref(), &request, &tx).await
    });

    if stream {
        let sse_stream = ReceiverStream::new(rx).filter_map(event_to_sse);
        Ok(Sse::new(sse_stream)
            .keep_alive(KeepAlive::default())
            .into_response())
    } else {
        let mut rx = rx;
        let mut agg = Aggregator::new();
        while let Some(event) = rx.recv().await {
            agg.push(&event);
        }
        handle
            .await
            .map_err(|e| DispatchError::Upstream(HubError::Unexpected(e.to_string())))??;
        Ok(Json(agg.finish()).into_response())
    }
}

pub async fn models_handler(
    State(state): State<HubState>,
    AuthedUser(_user): AuthedUser,
) -> Json<serde_json::Value> {
    let models: Vec<_> = state
        .providers
        .antigravity_cfg
        .model_list
        .iter()
        .map(|name| json!({ "name": format!("models/{name}") }))
        .collect();
    Json(json!({ "models": models }))
}

/// One dispatch event as a Gemini-shaped SSE chunk. Terminal errors become
/// a single error frame; `Finished` closes via channel end.
fn event_to_sse(event: StreamEvent) -> Option<Result<Event, std::convert::Infallible>> {
    let chunk = match event {
        StreamEvent::Text { text } => chunk_with_part(Part::from_text(text), None),
        StreamEvent::Reasoning { text, signature } => {
            let mut part = Part::from_text(text);
            part.thought = Some(true);
            part.thought_signature = signature;
            chunk_with_part(part, None)
        }
        StreamEvent::InlineData { data } => chunk_with_part(
            Part {
                inline_data: Some(data),
                ..Part::default()
            },
            None,
        ),
        StreamEvent::ToolCalls { calls } => {
            let parts = calls
                .into_iter()
                .map(|call| Part {
                    function_call: Some(json!({ "name": call.name, "args": call.args })),
                    ..Part::default()
                })
                .collect();
            chunk_with_parts(parts, None)
        }
        StreamEvent::Finished { reason } => chunk_with_parts(Vec::new(), reason),
        StreamEvent::Error { kind, message } => {
            let frame = json!({ "error": { "status": kind, "message": message } });
            return Some(Ok(Event::default().data(frame.to_string())));
        }
        // Start/delta pairs are Gemini-invisible (calls arrive whole at
        // finish); Usage/Raw belong to other providers.
        StreamEvent::ToolCallStart { .. }
        | StreamEvent::ToolCallDelta { .. }
        | StreamEvent::Usage { .. }
        | StreamEvent::Raw { .. } => return None,
    };

    match Event::default().json_data(&chunk) {
        Ok(event) => Some(Ok(event)),
        Err(e) => {
            tracing::warn!("failed to serialize SSE chunk: {e}");
            None
        }
    }
}

fn chunk_with_part(part: Part, finish_reason: Option<String>) -> GenerateContentResponse {
    chunk_with_parts(vec![part], finish_reason)
}

fn chunk_with_parts(parts: Vec<Part>, finish_reason: Option<String>) -> GenerateContentResponse {
    let content = if parts.is_empty() {
        None
    } else {
        Some(Content {
            role: Some("model".to_string()),
            parts,
            extra: BTreeMap::new(),
        })
    };
    GenerateContentResponse {
        candidates: vec![Candidate {
            content,
            index: Some(0),
            finish_reason,
            extra: BTreeMap::new(),
        }],
        ..GenerateContentResponse::default()
    }
}
