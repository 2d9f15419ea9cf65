use serde::Serialize;
use serde_json::Value;

/// One model-output event relayed to the caller's channel.
///
/// A request produces a sequence of these in upstream order, ended by either
/// `Finished` or exactly one `Error`. Closed sum type so route code handles
/// every variant explicitly.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Text {
        text: String,
    },

    /// Thought output of thinking models; `signature` must be preserved for
    /// multi-turn tool calling.
    Reasoning {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },

    /// Inline media (image generation paths).
    InlineData {
        data: Value,
    },

    ToolCallStart {
        id: String,
        name: String,
    },

    /// Incremental JSON-args text for the announced tool call.
    ToolCallDelta {
        id: String,
        input: String,
    },

    /// Accumulated tool calls, emitted once at stream finish.
    ToolCalls {
        calls: Vec<ToolCall>,
    },

    /// Credits consumed (Kiro completion frame).
    Usage {
        credits: f64,
    },

    /// Raw passthrough chunk (Qwen).
    Raw {
        chunk: String,
    },

    Finished {
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Terminal error; `kind` is the dispatch taxonomy tag.
    Error {
        kind: String,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// What the parser learned from a completed stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamSummary {
    pub finish_reason: Option<String>,
    /// Credits reported by the upstream (Kiro `usage` field).
    pub usage_credits: Option<f64>,
}
