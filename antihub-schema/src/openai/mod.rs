use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// OpenAI-shaped chat-completions request. The gateway only reads `model`
/// and `stream`; everything else is forwarded untouched.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatCompletionsRequest {
    pub model: String,

    #[serde(default)]
    pub stream: bool,

    #[serde(default)]
    pub messages: Vec<Value>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn passthrough_preserves_unknown_fields() {
        let input = json!({
            "model": "qwen3-coder-plus",
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}],
            "temperature": 0.2,
            "tool_choice": "auto"
        });

        let req: ChatCompletionsRequest = serde_json::from_value(input.clone()).unwrap();
        assert_eq!(req.model, "qwen3-coder-plus");
        assert!(req.stream);
        assert_eq!(serde_json::to_value(&req).unwrap(), input);
    }
}
