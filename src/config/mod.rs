use std::env;
use std::path::PathBuf;

use crate::error::EngineError;

/// Runtime configuration, loaded once at startup from environment variables.
///
/// Missing required credentials are a startup failure, never a per-request
/// failure.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,

    /// API key for the embedding provider (OpenAI). Always present; loading
    /// fails without it.
    pub openai_api_key: String,
    /// API key for the Mistral chat provider. Required when selected.
    pub mistral_api_key: Option<String>,

    /// Provider driving the hybrid agent: "openai" or "mistral".
    pub chat_provider: String,
    pub chat_model: String,

    /// Provider for the classifier model tier. None disables the tier.
    pub classifier_provider: Option<String>,
    pub classifier_model: String,

    pub embedding_model: String,

    pub index_path: PathBuf,
    pub corpus_path: PathBuf,
    /// Rebuild a missing index from the corpus instead of failing. Dev
    /// convenience only, off by default.
    pub index_auto_build: bool,

    pub stats_service_url: String,

    /// Retrieval fan-out for passage search.
    pub top_k: usize,
    /// Upper bound on agent tool iterations per turn.
    pub max_iterations: usize,
    /// Timeout applied to every outbound model/tool call.
    pub request_timeout_secs: u64,
}

impl Settings {
    pub fn from_env() -> Result<Self, EngineError> {
        let openai_api_key = env::var("OPENAI_API_KEY").ok();
        let mistral_api_key = env::var("MISTRAL_API_KEY").ok();

        let chat_provider =
            env::var("CHAT_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        match chat_provider.as_str() {
            "openai" if openai_api_key.is_none() => {
                return Err(EngineError::Config(
                    "CHAT_PROVIDER=openai requires OPENAI_API_KEY".to_string(),
                ));
            }
            "mistral" if mistral_api_key.is_none() => {
                return Err(EngineError::Config(
                    "CHAT_PROVIDER=mistral requires MISTRAL_API_KEY".to_string(),
                ));
            }
            "openai" | "mistral" => {}
            other => {
                return Err(EngineError::Config(format!(
                    "unknown CHAT_PROVIDER '{other}'"
                )));
            }
        }

        // Embeddings always go through OpenAI, whatever the chat provider.
        let openai_api_key = openai_api_key.ok_or_else(|| {
            EngineError::Config("OPENAI_API_KEY is required for query embeddings".to_string())
        })?;

        // The classifier model tier is optional: default to Mistral when its
        // key is present, otherwise the word-count fallback tier applies.
        let classifier_provider = match env::var("CLASSIFIER_PROVIDER") {
            Ok(p) if p == "none" => None,
            Ok(p) => Some(p),
            Err(_) => mistral_api_key.as_ref().map(|_| "mistral".to_string()),
        };

        Ok(Self {
            host: env::var("COURTSIDE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_env("COURTSIDE_PORT", 8090)?,
            openai_api_key,
            mistral_api_key,
            chat_provider,
            chat_model: env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
            classifier_provider,
            classifier_model: env::var("CLASSIFIER_MODEL")
                .unwrap_or_else(|_| "mistral-small-latest".to_string()),
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            index_path: env::var("INDEX_PATH")
                .unwrap_or_else(|_| "data/passage_index.bin".to_string())
                .into(),
            corpus_path: env::var("CORPUS_PATH")
                .unwrap_or_else(|_| "data/passages.jsonl".to_string())
                .into(),
            index_auto_build: env::var("INDEX_AUTO_BUILD")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            stats_service_url: env::var("STATS_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8091".to_string()),
            top_k: parse_env("RETRIEVAL_TOP_K", 4)?,
            max_iterations: parse_env("AGENT_MAX_ITERATIONS", 6)?,
            request_timeout_secs: parse_env("LLM_TIMEOUT_SECS", 60)?,
        })
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T, EngineError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| EngineError::Config(format!("invalid value for {name}: '{raw}'"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Environment variables are process-global, so both cases run in one
    // test to avoid interleaving with each other.
    #[test]
    fn test_embedding_key_is_required() {
        env::set_var("OPENAI_API_KEY", "sk-test");
        env::remove_var("MISTRAL_API_KEY");
        env::remove_var("CHAT_PROVIDER");

        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.openai_api_key, "sk-test");

        env::remove_var("OPENAI_API_KEY");
        let err = Settings::from_env().unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
