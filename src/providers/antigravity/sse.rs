use crate::dispatch::{StreamEvent, StreamSummary, ToolCall};
use antihub_schema::gemini::{Candidate, Content, GenerateContentResponse, Part, SseEnvelope};
use serde_json::Value;
use std::collections::BTreeMap;

/// Line-buffering SSE reader.
///
/// Network chunks land in an internal buffer and only complete
/// `\n`-terminated lines are consumed, so a `data:` line split mid-JSON is
/// never handed to the JSON parser. Blank lines, `[DONE]` sentinels, and
/// non-`data:` lines are dropped.
#[derive(Debug, Default)]
pub struct SseParser {
    buf: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns the payloads of every complete `data:` line.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim_start();
            if data == "[DONE]" {
                continue;
            }
            out.push(data.to_string());
        }
        out
    }
}

/// Event extraction across one upstream stream: per-part emission, latched
/// finish reason, and tool calls accumulated for the finish flush.
#[derive(Debug, Default)]
pub struct GeminiStreamState {
    finish_reason: Option<String>,
    tool_calls: Vec<ToolCall>,
}

impl GeminiStreamState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ingest(&mut self, envelope: &SseEnvelope) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        let Some(response) = &envelope.response else {
            return out;
        };

        for candidate in &response.candidates {
            if let Some(reason) = &candidate.finish_reason {
                self.finish_reason = Some(reason.clone());
            }
            let Some(content) = &candidate.content else {
                continue;
            };
            for part in &content.parts {
                if let Some(event) = self.part_event(part) {
                    out.push(event);
                }
            }
        }
        out
    }

    fn part_event(&mut self, part: &Part) -> Option<StreamEvent> {
        if let Some(function_call) = &part.function_call {
            let name = function_call
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let args = function_call.get("args").cloned().unwrap_or(Value::Null);
            let id = format!("call_{}", self.tool_calls.len());
            self.tool_calls.push(ToolCall {
                id: id.clone(),
                name: name.clone(),
                args,
            });
            return Some(StreamEvent::ToolCallStart { id, name });
        }

        if let Some(data) = &part.inline_data {
            return Some(StreamEvent::InlineData { data: data.clone() });
        }

        if let Some(text) = &part.text {
            if part.is_thought() {
                return Some(StreamEvent::Reasoning {
                    text: text.clone(),
                    signature: part.thought_signature.clone(),
                });
            }
            // Empty non-thought text parts carry nothing.
            if text.is_empty() {
                return None;
            }
            return Some(StreamEvent::Text { text: text.clone() });
        }

        None
    }

    /// Trailing events (accumulated tool calls, then `Finished`) plus the
    /// stream summary.
    pub fn finish(self) -> (Vec<StreamEvent>, StreamSummary) {
        let mut out = Vec::new();
        if !self.tool_calls.is_empty() {
            out.push(StreamEvent::ToolCalls {
                calls: self.tool_calls,
            });
        }
        out.push(StreamEvent::Finished {
            reason: self.finish_reason.clone(),
        });

        (
            out,
            StreamSummary {
                finish_reason: self.finish_reason,
                usage_credits: None,
            },
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunKind {
    Text,
    Thought,
}

/// Stream → non-stream re-aggregation.
///
/// Runs of same-kind text/thought events coalesce into single parts; a kind
/// boundary, function call, or inline data flushes the current run. Used on
/// the force-SSE path when the caller asked for a plain JSON response.
#[derive(Debug, Default)]
pub struct Aggregator {
    parts: Vec<Part>,
    run: Option<(RunKind, String, Option<String>)>,
    finish_reason: Option<String>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Text { text } => self.append(RunKind::Text, text, None),
            StreamEvent::Reasoning { text, signature } => {
                self.append(RunKind::Thought, text, signature.clone());
            }
            StreamEvent::InlineData { data } => {
                self.flush();
                self.parts.push(Part {
                    inline_data: Some(data.clone()),
                    ..Part::default()
                });
            }
            StreamEvent::ToolCallStart { .. } => self.flush(),
            StreamEvent::ToolCalls { calls } => {
                self.flush();
                for call in calls {
                    self.parts.push(Part {
                        function_call: Some(serde_json::json!({
                            "name": call.name,
                            "args": call.args,
                        })),
                        ..Part::default()
                    });
                }
            }
            StreamEvent::Finished { reason } => {
                self.finish_reason.clone_from(reason);
            }
            _ => {}
        }
    }

    fn append(&mut self, kind: RunKind, text: &str, signature: Option<String>) {
        match &mut self.run {
            Some((run_kind, buf, sig)) if *run_kind == kind => {
                buf.push_str(text);
                if signature.is_some() {
                    *sig = signature;
                }
            }
            _ => {
                self.flush();
                self.run = Some((kind, text.to_string(), signature));
            }
        }
    }

    fn flush(&mut self) {
        if let Some((kind, buf, signature)) = self.run.take() {
            let mut part = Part::from_text(buf);
            if kind == RunKind::Thought {
                part.thought = Some(true);
                part.thought_signature = signature;
            }
            self.parts.push(part);
        }
    }

    pub fn finish(mut self) -> GenerateContentResponse {
        self.flush();
        GenerateContentResponse {
            candidates: vec![Candidate {
                content: Some(Content {
                    role: Some("model".to_string()),
                    parts: self.parts,
                    extra: BTreeMap::new(),
                }),
                index: Some(0),
                finish_reason: self.finish_reason,
                extra: BTreeMap::new(),
            }],
            ..GenerateContentResponse::default()
        }
    }
}
