use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::services::llm::{ChatClient, ChatMessage, ChatOutput, EmbeddingClient, ToolSpec};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

// ============================================================================
// Embeddings
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAIEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

pub struct OpenAIEmbeddingClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
}

impl OpenAIEmbeddingClient {
    pub fn new(api_key: String, model: String, timeout_secs: u64) -> Result<Self> {
        let dimension = default_embedding_dimension(&model)
            .ok_or_else(|| anyhow!("unknown embedding model '{model}'"))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| anyhow!("failed to create HTTP client: {e}"))?;

        Ok(Self {
            client,
            api_key,
            base_url: OPENAI_BASE_URL.to_string(),
            model,
            dimension,
        })
    }

    async fn request_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = OpenAIEmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("OpenAI embeddings API error: {error_text}"));
        }

        let body: OpenAIEmbeddingResponse = response.json().await?;

        // The API may reorder entries; restore input order by index.
        let mut data = body.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingClient for OpenAIEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.request_embeddings(&[text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no embedding returned from OpenAI API"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = self.request_embeddings(texts).await?;
        if embeddings.len() != texts.len() {
            return Err(anyhow!(
                "OpenAI returned {} embeddings for {} inputs",
                embeddings.len(),
                texts.len()
            ));
        }
        Ok(embeddings)
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn default_embedding_dimension(model: &str) -> Option<usize> {
    match model {
        "text-embedding-3-large" => Some(3072),
        "text-embedding-3-small" => Some(1536),
        "text-embedding-ada-002" => Some(1536),
        _ => None,
    }
}

// ============================================================================
// Chat completions
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<FunctionTool>,
}

#[derive(Debug, Serialize)]
struct FunctionTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: ToolSpec,
}

#[derive(Debug, Deserialize)]
struct OpenAIChatResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OpenAIToolCall>,
}

#[derive(Debug, Deserialize)]
struct OpenAIToolCall {
    function: OpenAIFunctionCall,
}

#[derive(Debug, Deserialize)]
struct OpenAIFunctionCall {
    name: String,
    /// JSON-encoded arguments string, per the chat completions API.
    arguments: String,
}

pub struct OpenAIChatClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAIChatClient {
    pub fn new(api_key: String, model: String, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("failed to create HTTP client");

        Self {
            client,
            api_key,
            base_url: OPENAI_BASE_URL.to_string(),
            model,
        }
    }
}

#[async_trait]
impl ChatClient for OpenAIChatClient {
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

        let payload = OpenAIChatRequest {
            model: self.model.clone(),
            messages: all_messages,
            temperature: 0.0,
            max_tokens: Some(1024),
            tools: tools
                .iter()
                .map(|t| FunctionTool {
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
            return Err(anyhow!("OpenAI chat API error: {error_text}"));
        }

        let body: OpenAIChatResponse = response.json().await?;
        let message = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no choices returned from OpenAI API"))?
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
