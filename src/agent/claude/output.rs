//! LLM subprocess stream-json output parsing

use serde::{Deserialize, Serialize};

use crate::agent::cost::CostSample;

/// Usage metadata attached to result events
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default, alias = "cache_read_input_tokens")]
    pub cache_read_tokens: u64,
    #[serde(default, alias = "cache_creation_input_tokens")]
    pub cache_write_tokens: u64,
}

/// Events from the subprocess's stream-json output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// System message
    System {
        subtype: String,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },

    /// Assistant message (text or tool use)
    Assistant {
        #[serde(default)]
        message: AssistantMessage,
    },

    /// User message (usually tool results)
    User {
        #[serde(default)]
        message: UserMessage,
    },

    /// Final result with cost and duration
    Result {
        subtype: String,
        #[serde(default)]
        result: Option<String>,
        #[serde(default, alias = "total_cost_usd")]
        cost_usd: Option<f64>,
        #[serde(default)]
        duration_ms: Option<u64>,
        #[serde(default)]
        usage: Option<Usage>,
        #[serde(default)]
        session_id: Option<String>,
    },
}

/// Assistant message content
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

/// User message content
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

/// Content block (text, thinking, or tool use)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Text content
    Text { text: String },

    /// Extended thinking
    Thinking {
        #[serde(default)]
        thinking: String,
    },

    /// Tool use request
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Tool result
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
}

impl StreamEvent {
    /// Parse a JSON line into a stream event.
    pub fn parse(line: &str) -> Option<Self> {
        serde_json::from_str(line).ok()
    }

    /// Cost sample from a result event, when usage metadata was emitted.
    pub fn cost_sample(&self) -> Option<CostSample> {
        let StreamEvent::Result {
            cost_usd, usage, ..
        } = self
        else {
            return None;
        };
        if cost_usd.is_none() && usage.is_none() {
            return None;
        }
        let usage = usage.clone().unwrap_or_default();
        Some(CostSample {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cache_read_tokens: usage.cache_read_tokens,
            cache_write_tokens: usage.cache_write_tokens,
            cost_usd: cost_usd.unwrap_or(0.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_assistant_tool_use() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t1","name":"Read","input":{"file_path":"src/lib.rs"}}]}}"#;
        let event = StreamEvent::parse(line).expect("parse");
        let StreamEvent::Assistant { message } = event else {
            panic!("wrong variant");
        };
        let ContentBlock::ToolUse { name, input, .. } = &message.content[0] else {
            panic!("wrong block");
        };
        assert_eq!(name, "Read");
        assert_eq!(input["file_path"], "src/lib.rs");
    }

    #[test]
    fn parses_result_with_usage() {
        let line = r#"{"type":"result","subtype":"success","total_cost_usd":0.42,"duration_ms":1200,"usage":{"input_tokens":900,"output_tokens":120,"cache_read_input_tokens":4000}}"#;
        let event = StreamEvent::parse(line).expect("parse");
        let sample = event.cost_sample().expect("cost sample");
        assert_eq!(sample.input_tokens, 900);
        assert_eq!(sample.output_tokens, 120);
        assert_eq!(sample.cache_read_tokens, 4000);
        assert!((sample.cost_usd - 0.42).abs() < 1e-9);
    }

    #[test]
    fn unknown_lines_are_ignored() {
        assert!(StreamEvent::parse("not json").is_none());
        assert!(StreamEvent::parse(r#"{"type":"unknown_event"}"#).is_none());
    }

    #[test]
    fn result_without_usage_has_no_sample() {
        let line = r#"{"type":"result","subtype":"success"}"#;
        let event = StreamEvent::parse(line).expect("parse");
        assert!(event.cost_sample().is_none());
    }
}
