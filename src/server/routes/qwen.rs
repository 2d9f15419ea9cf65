use crate::dispatch::{DispatchRequest, RequestPayload, StreamEvent};
use crate::error::{DispatchError, HubError};
use crate::server::guards::auth::AuthedUser;
use crate::server::router::HubState;
use antihub_schema::ChatCompletionsRequest;
use axum::{
    body::Body,
    extract::State,
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Response},
};
use axum::Json;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::{StreamExt, wrappers::ReceiverStream};

pub async fn models_handler(
    State(state): State<HubState>,
    AuthedUser(_user): AuthedUser,
) -> Json<serde_json::Value> {
    let models: Vec<_> = state
        .providers
        .qwen_cfg
        .model_list
        .iter()
        .map(|id| serde_json::json!({ "id": id, "object": "model", "owned_by": "qwen" }))
        .collect();
    Json(serde_json::json!({ "object": "list", "data": models }))
}

/// Straight passthrough: the upstream body (JSON or SSE, per the request
/// `stream` flag) is relayed to the caller unchanged.
pub async fn chat_completions_handler(
    State(state): State<HubState>,
    AuthedUser(user): AuthedUser,
    Json(body): Json<ChatCompletionsRequest>,
) -> Result<Response, DispatchError> {
    let stream = body.stream;
    let request = DispatchRequest {
        user,
        model: body.model.clone(),
        stream,
        payload: RequestPayload::Qwen(body),
    };

    let (tx, rx) = mpsc::channel::<StreamEvent>(64);
    let engine = state.engine.clone();
    let transport = state.providers.qwen.clone();

    let handle =
        tokio::spawn(async move { engine.execute(transport.as_ref(), &request, &tx).await });

    if stream {
        let byte_stream = ReceiverStream::new(rx).filter_map(|event| match event {
            StreamEvent::Raw { chunk } => {
                Some(Ok::<_, std::convert::Infallible>(Bytes::from(chunk)))
            }
            StreamEvent::Error { kind, message } => {
                let frame = serde_json::json!({ "error": { "type": kind, "message": message } });
                Some(Ok(Bytes::from(format!("data: {frame}\n\n"))))
            }
            _ => None,
        });

        let mut response = Response::new(Body::from_stream(byte_stream));
        response.headers_mut().insert(
            CONTENT_TYPE,
            axum::http::HeaderValue::from_static("text/event-stream"),
        );
        return Ok(response);
    }

    let mut rx = rx;
    let mut buf = String::new();
    while let Some(event) = rx.recv().await {
        if let StreamEvent::Raw { chunk } = event {
            buf.push_str(&chunk);
        }
    }
    handle
        .await
        .map_err(|e| DispatchError::Upstream(HubError::Unexpected(e.to_string())))??;

    let mut response = Response::new(Body::from(buf));
    response.headers_mut().insert(
        CONTENT_TYPE,
        axum::http::HeaderValue::from_static("application/json"),
    );
    Ok(response)
}
