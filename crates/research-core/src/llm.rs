//! The LLM chat client capability interface the core consumes, plus
//! concrete HTTP-backed implementations for OpenAI- and Anthropic-shaped
//! APIs.

use crate::cost::Usage;
use crate::error::ResearchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatChoice {
    pub message: ChatMessage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub choices: Vec<ChatChoice>,
    pub usage: Usage,
}

impl ChatResponse {
    /// The content of the first choice, which is all any caller in this
    /// codebase ever needs (there is no multi-completion sampling here).
    pub fn content(&self) -> &str {
        self.choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or_default()
    }
}

/// The capability interface consumed by every agent: `Chat` must propagate
/// cancellation (a dropped future / `tokio::select!` around the call is
/// sufficient since every implementation is a single awaited HTTP call);
/// `get_model` returns the identifier used for cost computation.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse, ResearchError>;

    fn get_model(&self) -> String;
}

/// Shared HTTP plumbing for the concrete provider clients below.
#[derive(Debug, Clone)]
struct HttpChat {
    client: reqwest::Client,
}

impl HttpChat {
    fn new() -> Self {
        HttpChat {
            client: reqwest::Client::new(),
        }
    }
}

/// OpenAI chat-completions client.
pub struct OpenAiChatClient {
    http: HttpChat,
    model: String,
    api_key: String,
}

impl OpenAiChatClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        OpenAiChatClient {
            http: HttpChat::new(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self, ResearchError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ResearchError::Configuration("OPENAI_API_KEY not set".into()))?;
        Ok(Self::new(api_key, model))
    }
}

#[async_trait]
impl ChatClient for OpenAiChatClient {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse, ResearchError> {
        let body = serde_json::json!({
            "model": &self.model,
            "messages": messages,
            "stream": false,
        });

        let response = self
            .http
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| ResearchError::llm(format!("OpenAI request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ResearchError::llm(format!(
                "OpenAI API error: {status} - {error_body}"
            )));
        }

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ResearchError::llm(format!("failed to parse OpenAI response: {e}")))?;

        let content = result["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ResearchError::llm("invalid response structure from OpenAI"))?
            .to_string();

        let usage = Usage::new(
            result["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            result["usage"]["completion_tokens"].as_u64().unwrap_or(0),
        );

        Ok(ChatResponse {
            choices: vec![ChatChoice {
                message: ChatMessage::assistant(content),
            }],
            usage,
        })
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }
}

/// Anthropic messages-API client.
pub struct AnthropicChatClient {
    http: HttpChat,
    model: String,
    api_key: String,
}

impl AnthropicChatClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        AnthropicChatClient {
            http: HttpChat::new(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self, ResearchError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| ResearchError::Configuration("ANTHROPIC_API_KEY not set".into()))?;
        Ok(Self::new(api_key, model))
    }

    /// Anthropic's messages API takes `system` separately from the
    /// conversation; split the leading system message out if present.
    fn split_system(messages: &[ChatMessage]) -> (Option<&str>, Vec<&ChatMessage>) {
        let mut system = None;
        let mut rest = Vec::with_capacity(messages.len());
        for (i, m) in messages.iter().enumerate() {
            if i == 0 && m.role == "system" {
                system = Some(m.content.as_str());
            } else {
                rest.push(m);
            }
        }
        (system, rest)
    }
}

#[async_trait]
impl ChatClient for AnthropicChatClient {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse, ResearchError> {
        let (system, rest) = Self::split_system(messages);
        let mut body = serde_json::json!({
            "model": &self.model,
            "max_tokens": 4096,
            "messages": rest,
        });
        if let Some(system) = system {
            body["system"] = serde_json::Value::String(system.to_string());
        }

        let response = self
            .http
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ResearchError::llm(format!("Anthropic request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ResearchError::llm(format!(
                "Anthropic API error: {status} - {error_body}"
            )));
        }

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ResearchError::llm(format!("failed to parse Anthropic response: {e}")))?;

        let content = result["content"][0]["text"]
            .as_str()
            .ok_or_else(|| ResearchError::llm("invalid response structure from Anthropic"))?
            .to_string();

        let usage = Usage::new(
            result["usage"]["input_tokens"].as_u64().unwrap_or(0),
            result["usage"]["output_tokens"].as_u64().unwrap_or(0),
        );

        Ok(ChatResponse {
            choices: vec![ChatChoice {
                message: ChatMessage::assistant(content),
            }],
            usage,
        })
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }
}

/// Builds a provider-selected `ChatClient` from configuration.
pub fn client_from_provider(
    provider: &str,
    model: &str,
) -> Result<Arc<dyn ChatClient>, ResearchError> {
    match provider {
        "openai" => Ok(Arc::new(OpenAiChatClient::from_env(model)?)),
        "anthropic" => Ok(Arc::new(AnthropicChatClient::from_env(model)?)),
        other => Err(ResearchError::Configuration(format!(
            "unknown LLM_PROVIDER '{other}', expected 'openai' or 'anthropic'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_response_content_returns_first_choice() {
        let r = ChatResponse {
            choices: vec![ChatChoice {
                message: ChatMessage::assistant("hello"),
            }],
            usage: Usage::default(),
        };
        assert_eq!(r.content(), "hello");
    }

    #[test]
    fn chat_response_content_empty_with_no_choices() {
        let r = ChatResponse {
            choices: vec![],
            usage: Usage::default(),
        };
        assert_eq!(r.content(), "");
    }

    #[test]
    fn anthropic_splits_leading_system_message() {
        let messages = vec![
            ChatMessage::system("be terse"),
            ChatMessage::user("hi"),
        ];
        let (system, rest) = AnthropicChatClient::split_system(&messages);
        assert_eq!(system, Some("be terse"));
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].role, "user");
    }

    #[test]
    fn anthropic_no_system_message_present() {
        let messages = vec![ChatMessage::user("hi")];
        let (system, rest) = AnthropicChatClient::split_system(&messages);
        assert_eq!(system, None);
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn client_from_provider_rejects_unknown_provider() {
        let err = client_from_provider("cohere", "x").unwrap_err();
        assert!(matches!(err, ResearchError::Configuration(_)));
    }
}
