use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::error::EngineError;
use crate::models::mistral::MistralChatClient;
use crate::models::openai::OpenAIChatClient;

// ============================================================================
// Capability traits
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

/// A named capability the driving model may invoke. `parameters` is a JSON
/// schema in the function-calling format both providers accept.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// What the driving model produced: a final text or a tool invocation
/// request. The agent loop pattern-matches on this.
#[derive(Debug, Clone)]
pub enum ChatOutput {
    Content(String),
    ToolCall {
        name: String,
        arguments: serde_json::Value,
    },
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn generate(
        &self,
        system: &str,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<ChatOutput>;
}

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Identifier of the embedding model. Persisted with every index so a
    /// mismatched configuration is refused at load time.
    fn model_id(&self) -> &str;

    fn dimension(&self) -> usize;
}

// ============================================================================
// Provider factory
// ============================================================================

pub struct ChatClientFactory;

impl ChatClientFactory {
    pub fn create(
        provider: &str,
        model: &str,
        settings: &Settings,
    ) -> Result<Arc<dyn ChatClient>, EngineError> {
        match provider {
            "openai" => Ok(Arc::new(OpenAIChatClient::new(
                settings.openai_api_key.clone(),
                model.to_string(),
                settings.request_timeout_secs,
            ))),
            "mistral" => {
                let api_key = settings.mistral_api_key.clone().ok_or_else(|| {
                    EngineError::Config("MISTRAL_API_KEY not set".to_string())
                })?;
                Ok(Arc::new(MistralChatClient::new(
                    api_key,
                    model.to_string(),
                    settings.request_timeout_secs,
                )))
            }
            other => Err(EngineError::Config(format!(
                "unknown chat provider '{other}'"
            ))),
        }
    }
}

// ============================================================================
// Structured route decision
// ============================================================================

/// The two tokens the classifier model tier is instructed to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteLabel {
    Rag,
    Direct,
}

impl RouteLabel {
    /// Parse a model reply into a validated label plus its justification.
    /// Returns None for anything that does not start with one of the two
    /// tokens, so the caller can apply the ambiguous default explicitly.
    pub fn parse(reply: &str) -> Option<(Self, String)> {
        let trimmed = reply.trim();
        let first = trimmed
            .split_whitespace()
            .next()?
            .trim_matches(|c: char| !c.is_alphabetic());

        let label = match first.to_ascii_uppercase().as_str() {
            "RAG" => RouteLabel::Rag,
            "DIRECT" => RouteLabel::Direct,
            _ => return None,
        };

        let justification = trimmed
            .split_once(char::is_whitespace)
            .map(|(_, rest)| rest)
            .unwrap_or("")
            .trim_start_matches(|c: char| c.is_whitespace() || c == '-' || c == ':' || c == ',')
            .trim()
            .to_string();
        Some((label, justification))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rag_with_justification() {
        let (label, why) = RouteLabel::parse("RAG - asks for player stats").unwrap();
        assert_eq!(label, RouteLabel::Rag);
        assert_eq!(why, "asks for player stats");
    }

    #[test]
    fn test_parse_direct_colon_form() {
        let (label, why) = RouteLabel::parse("DIRECT: simple greeting").unwrap();
        assert_eq!(label, RouteLabel::Direct);
        assert_eq!(why, "simple greeting");
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        let (label, _) = RouteLabel::parse("rag, needs the rules corpus").unwrap();
        assert_eq!(label, RouteLabel::Rag);
    }

    #[test]
    fn test_parse_rejects_ambiguous_replies() {
        assert!(RouteLabel::parse("maybe RAG?").is_none());
        assert!(RouteLabel::parse("").is_none());
        assert!(RouteLabel::parse("I think you should retrieve").is_none());
    }
}
