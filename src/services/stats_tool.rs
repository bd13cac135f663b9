use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// The structured stats capability: a natural-language question in, a text
/// answer out. How the question becomes a query against the tabular store is
/// the stats service's concern, not ours.
#[async_trait]
pub trait StatsQueryTool: Send + Sync {
    async fn query(&self, question: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct StatsQueryRequest<'a> {
    question: &'a str,
}

#[derive(Debug, Deserialize)]
struct StatsQueryResponse {
    answer: String,
}

/// HTTP client for the external stats-query service.
pub struct HttpStatsTool {
    client: Client,
    base_url: String,
}

impl HttpStatsTool {
    pub fn new(base_url: String, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("failed to create HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl StatsQueryTool for HttpStatsTool {
    async fn query(&self, question: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/api/stats/query", self.base_url))
            .json(&StatsQueryRequest { question })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("stats service error ({status}): {error_text}"));
        }

        let body: StatsQueryResponse = response.json().await?;
        Ok(body.answer)
    }
}
