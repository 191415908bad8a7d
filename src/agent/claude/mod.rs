//! LLM subprocess adapter

mod adapter;
mod output;
mod tool_format;

#[cfg(test)]
mod adapter_tests;

pub use adapter::{ClaudeAdapter, LlmRequest, LlmResponse, OutputFormat};
pub use output::{ContentBlock, StreamEvent, Usage};
pub use tool_format::format_tool_call;
