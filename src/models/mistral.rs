use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::services::llm::{ChatClient, ChatMessage, ChatOutput, ToolSpec};

const MISTRAL_BASE_URL: &str = "https://api.mistral.ai/v1";

#[derive(Debug, Serialize)]
struct MistralChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<MistralTool>,
}

#[derive(Debug, Serialize)]
struct MistralTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: ToolSpec,
}

#[derive(Debug, Deserialize)]
struct MistralChatResponse {
    choices: Vec<MistralChoice>,
}

#[derive(Debug, Deserialize)]
struct MistralChoice {
    message: MistralResponseMessage,
}

#[derive(Debug, Deserialize)]
struct MistralResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<MistralToolCall>,
}

#[derive(Debug, Deserialize)]
struct MistralToolCall {
    function: MistralFunctionCall,
}

#[derive(Debug, Deserialize)]
struct MistralFunctionCall {
    name: String,
    arguments: String,
}

pub struct MistralChatClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl MistralChatClient {
    pub fn new(api_key: String, model: String, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("failed to create HTTP client");

        Self {
            client,
            api_key,
            base_url: MISTRAL_BASE_URL.to_string(),
            model,
        }
    }
}

#[async_trait]
impl ChatClient for MistralChatClient {
    async fn generate(
        &self,
        system: &str,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<ChatOutput> {
        let mut all_messages = vec![ChatMessage {
            role: "system".to_string(),
            content: system.to_string(),
        }];
        all_messages.extend_from_slice(messages);

        let payload = MistralChatRequest {
            model: self.model.clone(),
            messages: all_messages,
            // Low temperature keeps routing and tool selection consistent.
            temperature: 0.1,
            max_tokens: 1024,
            tools: tools
                .iter()
                .map(|t| MistralTool {
                    tool_type: "function",
                    function: t.clone(),
                })
                .collect(),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Mistral API error: {error_text}"));
        }

        let body: MistralChatResponse = response.json().await?;
        let message = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no choices returned from Mistral API"))?
            .message;

        if let Some(call) = message.tool_calls.into_iter().next() {
            let arguments = serde_json::from_str(&call.function.arguments)
                .unwrap_or(serde_json::Value::Null);
            return Ok(ChatOutput::ToolCall {
                name: call.function.name,
                arguments,
            });
        }

        Ok(ChatOutput::Content(message.content.unwrap_or_default()))
    }
}
