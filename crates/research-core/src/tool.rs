//! The tool-executor capability interface: `Execute(ctx, toolName, args) ->
//! (text, error)` plus `ToolNames()`. Deliberately narrower than a full
//! protocol negotiation (connect/initialize/list_tools/...); this engine
//! only ever needs to name a tool and pass it a JSON argument bag.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// A parsed tool invocation from a model turn (see `wire` for the parser).
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub tool: String,
    pub args: HashMap<String, Value>,
}

/// The text result of executing one tool call, plus whatever error text
/// was produced (tool errors are recorded inline, never raised as a hard
/// failure; see `ResearchError::ToolFailure` for when a caller does want
/// to treat this as fatal).
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub text: String,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(text: impl Into<String>) -> Self {
        ToolResult {
            text: text.into(),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        ToolResult {
            text: String::new(),
            error: Some(message.into()),
        }
    }

    pub fn is_err(&self) -> bool {
        self.error.is_some()
    }
}

/// The minimum tool set a sub-researcher needs: web search and document
/// fetch, plus whatever else a deployment registers.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, tool_name: &str, args: &HashMap<String, Value>) -> ToolResult;

    fn tool_names(&self) -> Vec<String>;
}

pub const WEB_SEARCH: &str = "web_search";
pub const FETCH_DOCUMENT: &str = "fetch_document";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_ok_has_no_error() {
        let r = ToolResult::ok("some text");
        assert!(!r.is_err());
        assert_eq!(r.text, "some text");
    }

    #[test]
    fn tool_result_err_carries_message_and_empty_text() {
        let r = ToolResult::err("timed out");
        assert!(r.is_err());
        assert_eq!(r.text, "");
        assert_eq!(r.error.as_deref(), Some("timed out"));
    }
}
