use antihub::config::{KiroConfig, ProviderDefaults};
use antihub::dispatch::{
    DispatchRequest, RequestPayload, StreamEvent, Transport, UpstreamBody,
};
use antihub::providers::build_client;
use antihub::providers::kiro::KiroTransport;
use antihub::store::{SharingPreference, User};
use antihub_schema::kiro::ConversationState;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Test-side frame builder mirroring the upstream layout:
/// `u32be total_len | u32be header_len | prelude crc | header | payload | crc`.
fn frame(payload: &str) -> Vec<u8> {
    let payload = payload.as_bytes();
    let total_len = 12 + payload.len() + 4;
    let mut out = Vec::with_capacity(total_len);
    out.extend_from_slice(&(total_len as u32).to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&[0u8; 4]);
    out.extend_from_slice(payload);
    out.extend_from_slice(&[0u8; 4]);
    out
}

fn transport() -> KiroTransport {
    let cfg = Arc::new(KiroConfig::default().resolve(&ProviderDefaults::default()));
    KiroTransport::new(cfg, build_client("test-agent", None, false))
}

fn request() -> DispatchRequest {
    DispatchRequest {
        user: User {
            id: "u1".to_string(),
            sharing: SharingPreference::PreferDedicated,
            status: true,
        },
        model: "claude-sonnet-4".to_string(),
        stream: true,
        payload: RequestPayload::Kiro(ConversationState::default()),
    }
}

async fn pump_chunks(chunks: Vec<Bytes>) -> Vec<StreamEvent> {
    let t = transport();
    let req = request();
    let (tx, mut rx) = mpsc::channel::<StreamEvent>(64);
    t.pump(UpstreamBody::from_chunks(chunks), &req, &tx)
        .await
        .expect("pump must succeed");
    drop(tx);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn text_and_usage_frames_become_events() {
    let mut stream = frame(r#"{"content":"hel"}"#);
    stream.extend(frame(r#"{"content":"lo"}"#));
    stream.extend(frame(r#"{"usage":1.5}"#));

    let events = pump_chunks(vec![Bytes::from(stream)]).await;
    assert_eq!(
        events,
        vec![
            StreamEvent::Text {
                text: "hel".to_string()
            },
            StreamEvent::Text {
                text: "lo".to_string()
            },
            StreamEvent::Usage { credits: 1.5 },
            StreamEvent::Finished { reason: None },
        ]
    );
}

#[tokio::test]
async fn byte_split_streams_decode_identically() {
    let mut stream = frame(r#"{"content":"first"}"#);
    stream.extend(frame(r#"{"content":"second"}"#));

    let single_shot = pump_chunks(vec![Bytes::from(stream.clone())]).await;

    for split in 1..stream.len() {
        let chunked = pump_chunks(vec![
            Bytes::copy_from_slice(&stream[..split]),
            Bytes::copy_from_slice(&stream[split..]),
        ])
        .await;
        assert_eq!(chunked, single_shot, "split at {split} diverged");
    }
}

#[tokio::test]
async fn malformed_prefix_between_frames_is_resynced() {
    let mut stream = frame(r#"{"content":"before"}"#);
    stream.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);
    stream.extend(frame(r#"{"content":"after"}"#));

    let events = pump_chunks(vec![Bytes::from(stream)]).await;
    assert_eq!(
        events,
        vec![
            StreamEvent::Text {
                text: "before".to_string()
            },
            StreamEvent::Text {
                text: "after".to_string()
            },
            StreamEvent::Finished { reason: None },
        ]
    );
}

#[tokio::test]
async fn tool_call_frames_emit_start_and_delta() {
    let mut stream = frame(r#"{"name":"fs_read","toolUseId":"t1","input":"{\"pa"}"#);
    stream.extend(frame(r#"{"toolUseId":"t1","input":"th\":1}"}"#));

    let events = pump_chunks(vec![Bytes::from(stream)]).await;
    assert_eq!(
        events,
        vec![
            StreamEvent::ToolCallStart {
                id: "t1".to_string(),
                name: "fs_read".to_string(),
            },
            StreamEvent::ToolCallDelta {
                id: "t1".to_string(),
                input: "{\"pa".to_string(),
            },
            StreamEvent::ToolCallDelta {
                id: "t1".to_string(),
                input: "th\":1}".to_string(),
            },
            StreamEvent::Finished { reason: None },
        ]
    );
}
