use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Google-style structured error body returned by Gemini-family upstreams:
/// `{"error": {"code": 429, "message": "...", "status": "RESOURCE_EXHAUSTED"}}`.
///
/// Deserialization is best effort; unknown fields land in `extra` so raw
/// information survives for diagnostics.
#[derive(Debug, Deserialize, Serialize)]
pub struct UpstreamErrorBody {
    #[serde(rename = "error")]
    pub inner: UpstreamErrorObject,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct UpstreamErrorObject {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Canonical status name, e.g. `RESOURCE_EXHAUSTED`, `PERMISSION_DENIED`,
    /// `INVALID_ARGUMENT`, `RESOURCE_PROJECT_INVALID`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<Value>>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl UpstreamErrorBody {
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    pub fn status_is(&self, status: &str) -> bool {
        self.inner.status.as_deref() == Some(status)
    }

    pub fn message_contains(&self, needle: &str) -> bool {
        self.inner
            .message
            .as_deref()
            .is_some_and(|m| m.contains(needle))
    }
}
