//! In-memory test doubles for the two external capability interfaces,
//! following the in-memory `Mutex`-guarded mock pattern used elsewhere in
//! this codebase for trait impls backed by canned state rather than a real
//! network call.

use crate::cost::Usage;
use crate::error::ResearchError;
use crate::llm::{ChatClient, ChatChoice, ChatMessage, ChatResponse};
use crate::tool::{ToolExecutor, ToolResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

/// A `ChatClient` that replays a fixed script of responses in order,
/// looping the final entry once exhausted so long-running loops (e.g. the
/// supervisor hitting `maxIterations`) don't panic mid-test.
pub struct ScriptedChatClient {
    model: String,
    script: Mutex<Vec<String>>,
    cursor: Mutex<usize>,
}

impl ScriptedChatClient {
    pub fn new(model: impl Into<String>, script: Vec<String>) -> Self {
        ScriptedChatClient {
            model: model.into(),
            script: Mutex::new(script),
            cursor: Mutex::new(0),
        }
    }
}

#[async_trait]
impl ChatClient for ScriptedChatClient {
    async fn chat(&self, _messages: &[ChatMessage]) -> Result<ChatResponse, ResearchError> {
        let script = self.script.lock().unwrap();
        if script.is_empty() {
            return Err(ResearchError::llm("scripted client has an empty script"));
        }
        let mut cursor = self.cursor.lock().unwrap();
        let idx = (*cursor).min(script.len() - 1);
        let content = script[idx].clone();
        *cursor += 1;
        Ok(ChatResponse {
            choices: vec![ChatChoice {
                message: ChatMessage::assistant(content),
            }],
            usage: Usage::new(10, 10),
        })
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }
}

/// A `ToolExecutor` that returns a canned result for each registered tool
/// name and an error for anything unregistered.
pub struct ScriptedToolExecutor {
    results: HashMap<String, String>,
}

impl ScriptedToolExecutor {
    pub fn new(results: HashMap<String, String>) -> Self {
        ScriptedToolExecutor { results }
    }
}

#[async_trait]
impl ToolExecutor for ScriptedToolExecutor {
    async fn execute(&self, tool_name: &str, _args: &HashMap<String, Value>) -> ToolResult {
        match self.results.get(tool_name) {
            Some(text) => ToolResult::ok(text.clone()),
            None => ToolResult::err(format!("no scripted result for tool '{tool_name}'")),
        }
    }

    fn tool_names(&self) -> Vec<String> {
        self.results.keys().cloned().collect()
    }
}
