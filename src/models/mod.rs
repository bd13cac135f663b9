use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod mistral;
pub mod openai;

// ============================================================================
// API wire types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub processing_time: f64,
    pub mode: AnswerMode,
}

#[derive(Debug, Serialize)]
pub struct RebuildResponse {
    pub passages_indexed: usize,
    pub passages_rejected: usize,
    pub dimension: usize,
    pub build_time_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
}

/// How the answer was produced: a plain chat completion or the
/// retrieval-augmented tool loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnswerMode {
    #[serde(rename = "RAG")]
    Rag,
    #[serde(rename = "CHAT")]
    Chat,
}

// ============================================================================
// Domain types
// ============================================================================

/// A unit of retrievable text with its source metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    pub source: String,
    pub page: u32,
    pub category: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredPassage {
    pub passage: Passage,
    pub score: f32,
}

/// Routing decision for one query. Confidence and reason are advisory;
/// only `needs_retrieval` drives branching.
#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub needs_retrieval: bool,
    pub confidence: f32,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "content", rename_all = "snake_case")]
pub enum ToolOutcome {
    Result(String),
    Error(String),
}

/// One tool call issued by the driving model during a turn.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInvocation {
    pub tool: String,
    pub input: String,
    pub outcome: ToolOutcome,
}

/// The full resolution record for one user query. Discarded after the
/// response is returned; nothing is persisted across turns.
#[derive(Debug, Serialize)]
pub struct AgentTurn {
    pub id: Uuid,
    pub query: String,
    pub mode: AnswerMode,
    pub tool_calls: Vec<ToolInvocation>,
    pub answer: String,
    pub started_at: DateTime<Utc>,
}

impl AgentTurn {
    pub fn direct(query: &str, answer: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: query.to_string(),
            mode: AnswerMode::Chat,
            tool_calls: Vec::new(),
            answer,
            started_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_wire_values() {
        assert_eq!(serde_json::to_string(&AnswerMode::Rag).unwrap(), "\"RAG\"");
        assert_eq!(serde_json::to_string(&AnswerMode::Chat).unwrap(), "\"CHAT\"");
    }

    #[test]
    fn test_direct_turn_has_no_tool_calls() {
        let turn = AgentTurn::direct("Hello!", "Hi there".to_string());
        assert_eq!(turn.mode, AnswerMode::Chat);
        assert!(turn.tool_calls.is_empty());
    }
}
