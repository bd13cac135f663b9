use actix_web::HttpResponse;
use thiserror::Error;

/// Turn-level and startup errors surfaced by the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("could not resolve the question within {0} tool iterations")]
    Exhausted(usize),
}

/// Errors from the passage index lifecycle (build, persist, load, search).
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("no passage index found at {0}")]
    NotFound(String),

    #[error("index was built with embedding model '{built_with}' but '{configured}' is configured")]
    ModelMismatch {
        built_with: String,
        configured: String,
    },

    #[error("unsupported index format version {0}")]
    UnsupportedVersion(u32),

    #[error("index artifact is corrupt: {0}")]
    Corrupt(String),

    #[error("corpus error: {0}")]
    Corpus(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("vector dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Stable machine-readable kind for error responses.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Config(_) => "config_error",
            EngineError::Generation(_) => "generation_error",
            EngineError::Index(_) => "index_error",
            EngineError::Exhausted(_) => "loop_exhausted",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::Index(IndexError::NotFound(_)) => 503,
            EngineError::Generation(_) => 502,
            _ => 500,
        }
    }
}

/// Build the JSON error body handlers return for a failed turn.
pub fn error_response(err: &EngineError) -> HttpResponse {
    let body = serde_json::json!({
        "error": err.kind(),
        "message": err.to_string(),
    });
    match err.status_code() {
        502 => HttpResponse::BadGateway().json(body),
        503 => HttpResponse::ServiceUnavailable().json(body),
        _ => HttpResponse::InternalServerError().json(body),
    }
}
