use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single conversation turn. Role is kept as a raw string for transparent
/// pass-through; `systemInstruction` content has no role at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(default)]
    pub parts: Vec<Part>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// One atomic piece of content inside a turn.
///
/// Exactly one of the data fields (`text`, `inline_data`, `function_call`,
/// `function_response`) is expected per part; unknown fields are preserved in
/// `extra` so the envelope survives a round trip.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    /// Model-thought marker; thought parts are routed as reasoning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,

    /// Opaque signature attached to thought parts. Must survive a multi-turn
    /// round trip for thinking models that issue tool calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Inline media (images), base64 payload under `data`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_response: Option<Value>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Part {
    pub fn is_thought(&self) -> bool {
        self.thought == Some(true)
    }

    /// Text part helper used when re-aggregating a stream locally.
    pub fn from_text(text: impl Into<String>) -> Self {
        Part {
            text: Some(text.into()),
            ..Part::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn part_roundtrips_with_signature_and_unknown_fields() {
        let input = json!({
            "thought": true,
            "thoughtSignature": "c2ln",
            "text": "pondering",
            "futureField": {"x": 1}
        });

        let part: Part = serde_json::from_value(input.clone()).unwrap();
        assert!(part.is_thought());
        assert_eq!(part.thought_signature.as_deref(), Some("c2ln"));
        assert_eq!(serde_json::to_value(&part).unwrap(), input);
    }

    #[test]
    fn content_without_role_serializes_bare() {
        let content = Content {
            role: None,
            parts: vec![Part::from_text("hi")],
            extra: BTreeMap::new(),
        };
        assert_eq!(
            serde_json::to_value(&content).unwrap(),
            json!({"parts": [{"text": "hi"}]})
        );
    }
}
