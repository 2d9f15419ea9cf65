use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// JSON payload of one binary event-stream frame.
///
/// A frame carries at most one of: a text delta (`content`), a tool-call
/// start (`name` + `tool_use_id`) possibly with an args delta (`input`), a
/// legacy tool call (`code_query`), or the final credit accounting (`usage`).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssistantEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,

    /// Incremental JSON-args text for the tool call announced by
    /// `name`/`tool_use_id`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_query: Option<Value>,

    /// Credits consumed by the request; present on the completion frame.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<f64>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl AssistantEvent {
    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.name.is_none()
            && self.tool_use_id.is_none()
            && self.input.is_none()
            && self.code_query.is_none()
            && self.usage.is_none()
    }
}
