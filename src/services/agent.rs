use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{AgentTurn, AnswerMode, ToolInvocation, ToolOutcome};
use crate::services::classifier::QueryClassifier;
use crate::services::llm::{ChatClient, ChatMessage, ChatOutput, ToolSpec};
use crate::services::prompt::{
    assemble_context, format_tool_result, AGENT_SYSTEM_PROMPT, DEFAULT_CONTEXT_BUDGET,
    DIRECT_SYSTEM_PROMPT,
};
use crate::services::retriever::PassageRetriever;
use crate::services::stats_tool::StatsQueryTool;

pub const STATS_TOOL: &str = "stats_db";
pub const PASSAGE_TOOL: &str = "passage_search";

const RETRY_BACKOFF_MS: u64 = 500;

/// Orchestrates one query end to end: classify, then either a single direct
/// completion or a bounded tool loop over the stats service and the passage
/// retriever, synthesizing a final answer.
pub struct HybridAgent {
    classifier: QueryClassifier,
    chat: Arc<dyn ChatClient>,
    retriever: Arc<PassageRetriever>,
    stats: Arc<dyn StatsQueryTool>,
    max_iterations: usize,
    top_k: usize,
}

impl HybridAgent {
    pub fn new(
        classifier: QueryClassifier,
        chat: Arc<dyn ChatClient>,
        retriever: Arc<PassageRetriever>,
        stats: Arc<dyn StatsQueryTool>,
        max_iterations: usize,
        top_k: usize,
    ) -> Self {
        Self {
            classifier,
            chat,
            retriever,
            stats,
            max_iterations,
            top_k,
        }
    }

    pub async fn resolve(&self, query: &str) -> Result<AgentTurn, EngineError> {
        let classification = self.classifier.classify(query).await;
        info!(
            needs_retrieval = classification.needs_retrieval,
            confidence = classification.confidence,
            reason = %classification.reason,
            "query classified"
        );

        if classification.needs_retrieval {
            self.resolve_rag(query).await
        } else {
            self.resolve_direct(query).await
        }
    }

    async fn resolve_direct(&self, query: &str) -> Result<AgentTurn, EngineError> {
        let messages = [ChatMessage::user(query)];
        match self
            .generate_with_retry(DIRECT_SYSTEM_PROMPT, &messages, &[])
            .await?
        {
            ChatOutput::Content(answer) if !answer.trim().is_empty() => {
                Ok(AgentTurn::direct(query, answer))
            }
            ChatOutput::Content(_) => Err(EngineError::Generation(
                "model returned an empty answer".to_string(),
            )),
            ChatOutput::ToolCall { name, .. } => Err(EngineError::Generation(format!(
                "model requested tool '{name}' but no tools were offered"
            ))),
        }
    }

    async fn resolve_rag(&self, query: &str) -> Result<AgentTurn, EngineError> {
        let specs = self.tool_specs();
        let mut transcript = vec![ChatMessage::user(query)];
        let mut tool_calls: Vec<ToolInvocation> = Vec::new();
        let started_at = Utc::now();

        for iteration in 0..self.max_iterations {
            let output = self
                .generate_with_retry(AGENT_SYSTEM_PROMPT, &transcript, &specs)
                .await?;

            match output {
                ChatOutput::Content(answer) if !answer.trim().is_empty() => {
                    info!(
                        iterations = iteration,
                        tools_used = tool_calls.len(),
                        "agent produced final answer"
                    );
                    return Ok(AgentTurn {
                        id: Uuid::new_v4(),
                        query: query.to_string(),
                        mode: AnswerMode::Rag,
                        tool_calls,
                        answer,
                        started_at,
                    });
                }
                ChatOutput::Content(_) => {
                    return Err(EngineError::Generation(
                        "model returned an empty answer".to_string(),
                    ));
                }
                ChatOutput::ToolCall { name, arguments } => {
                    let (input, outcome) = self.execute_tool(&name, &arguments, query).await;

                    let result_text = match &outcome {
                        ToolOutcome::Result(text) => text.clone(),
                        // Errors go back into the transcript so the model can
                        // retry, switch tools, or answer from what it has.
                        ToolOutcome::Error(message) => format!("ERROR: {message}"),
                    };
                    transcript.push(ChatMessage::assistant(format!(
                        "[tool_call:{name}] {input}"
                    )));
                    transcript.push(ChatMessage::user(format_tool_result(&name, &result_text)));

                    tool_calls.push(ToolInvocation {
                        tool: name,
                        input,
                        outcome,
                    });
                }
            }
        }

        warn!(
            max_iterations = self.max_iterations,
            tools_used = tool_calls.len(),
            "agent loop exhausted without a final answer"
        );
        Err(EngineError::Exhausted(self.max_iterations))
    }

    async fn generate_with_retry(
        &self,
        system: &str,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<ChatOutput, EngineError> {
        match self.chat.generate(system, messages, tools).await {
            Ok(output) => Ok(output),
            Err(first) => {
                warn!("generation failed, retrying once: {}", first);
                tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS)).await;
                self.chat
                    .generate(system, messages, tools)
                    .await
                    .map_err(|e| EngineError::Generation(e.to_string()))
            }
        }
    }

    async fn execute_tool(
        &self,
        name: &str,
        arguments: &serde_json::Value,
        original_query: &str,
    ) -> (String, ToolOutcome) {
        match name {
            STATS_TOOL => {
                let question = arguments
                    .get("question")
                    .and_then(|v| v.as_str())
                    .unwrap_or(original_query)
                    .to_string();
                info!(tool = STATS_TOOL, question = %question, "invoking tool");
                let outcome = match self.stats.query(&question).await {
                    Ok(answer) => ToolOutcome::Result(answer),
                    Err(e) => {
                        warn!(tool = STATS_TOOL, "tool failed: {}", e);
                        ToolOutcome::Error(e.to_string())
                    }
                };
                (question, outcome)
            }
            PASSAGE_TOOL => {
                let search_query = arguments
                    .get("query")
                    .and_then(|v| v.as_str())
                    .unwrap_or(original_query)
                    .to_string();
                let k = arguments
                    .get("k")
                    .and_then(|v| v.as_u64())
                    .map(|v| v as usize)
                    .filter(|&v| v >= 1)
                    .unwrap_or(self.top_k);
                info!(tool = PASSAGE_TOOL, query = %search_query, k, "invoking tool");
                let outcome = match self.retriever.search(&search_query, k).await {
                    Ok(passages) if passages.is_empty() => {
                        ToolOutcome::Result("no passages matched the query".to_string())
                    }
                    Ok(passages) => {
                        ToolOutcome::Result(assemble_context(&passages, DEFAULT_CONTEXT_BUDGET))
                    }
                    Err(e) => {
                        warn!(tool = PASSAGE_TOOL, "tool failed: {}", e);
                        ToolOutcome::Error(e.to_string())
                    }
                };
                (search_query, outcome)
            }
            other => (
                String::new(),
                ToolOutcome::Error(format!("unknown tool '{other}'")),
            ),
        }
    }

    fn tool_specs(&self) -> Vec<ToolSpec> {
        vec![
            ToolSpec {
                name: STATS_TOOL.to_string(),
                description: "Query quantitative NBA stats: player averages, game scores, \
                              standings. Input is a natural language question about stats."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "question": {
                            "type": "string",
                            "description": "Natural language question about stats"
                        }
                    },
                    "required": ["question"]
                }),
            },
            ToolSpec {
                name: PASSAGE_TOOL.to_string(),
                description: "Search qualitative basketball content: rules, fan discussions, \
                              history. Input is a search query; returns relevant passages."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "Search query for the passage archive"
                        },
                        "k": {
                            "type": "integer",
                            "description": "Number of passages to retrieve"
                        }
                    },
                    "required": ["query"]
                }),
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::services::vector_store::tests::{passage, StubEmbedder};

    enum Step {
        Content(&'static str),
        ToolCall(&'static str, serde_json::Value),
        Fail(&'static str),
    }

    struct ScriptedChat {
        steps: Mutex<VecDeque<Step>>,
        calls: AtomicUsize,
    }

    impl ScriptedChat {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ChatClient for ScriptedChat {
        async fn generate(
            &self,
            _system: &str,
            _messages: &[ChatMessage],
            _tools: &[ToolSpec],
        ) -> Result<ChatOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.steps.lock().unwrap().pop_front() {
                Some(Step::Content(text)) => Ok(ChatOutput::Content(text.to_string())),
                Some(Step::ToolCall(name, arguments)) => Ok(ChatOutput::ToolCall {
                    name: name.to_string(),
                    arguments,
                }),
                Some(Step::Fail(msg)) => Err(anyhow!(msg)),
                None => Ok(ChatOutput::Content("fallback answer".to_string())),
            }
        }
    }

    struct StubStats {
        answer: Result<&'static str, &'static str>,
        calls: AtomicUsize,
    }

    impl StubStats {
        fn ok(answer: &'static str) -> Arc<Self> {
            Arc::new(Self {
                answer: Ok(answer),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(message: &'static str) -> Arc<Self> {
            Arc::new(Self {
                answer: Err(message),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl StatsQueryTool for StubStats {
        async fn query(&self, _question: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.answer {
                Ok(text) => Ok(text.to_string()),
                Err(msg) => Err(anyhow!(msg)),
            }
        }
    }

    /// Retriever over a small auto-built corpus in a temp dir. The TempDir
    /// must stay alive for the duration of the test.
    fn test_retriever(dir: &tempfile::TempDir) -> Arc<PassageRetriever> {
        let corpus = dir.path().join("passages.jsonl");
        let mut f = std::fs::File::create(&corpus).unwrap();
        for p in [
            passage("foul rules changed in the 2001 season"),
            passage("curry shot fifty points against the kings"),
        ] {
            writeln!(f, "{}", serde_json::to_string(&p).unwrap()).unwrap();
        }
        Arc::new(PassageRetriever::new(
            Arc::new(StubEmbedder::new()),
            dir.path().join("index.bin"),
            corpus,
            true,
        ))
    }

    fn agent(
        chat: Arc<ScriptedChat>,
        stats: Arc<StubStats>,
        retriever: Arc<PassageRetriever>,
        max_iterations: usize,
    ) -> HybridAgent {
        HybridAgent::new(
            QueryClassifier::new(None),
            chat,
            retriever,
            stats,
            max_iterations,
            2,
        )
    }

    #[tokio::test]
    async fn test_greeting_takes_direct_path() {
        let dir = tempfile::tempdir().unwrap();
        let chat = ScriptedChat::new(vec![Step::Content("Hey! Ask me about the NBA.")]);
        let stats = StubStats::ok("unused");
        let turn = agent(chat.clone(), stats.clone(), test_retriever(&dir), 6)
            .resolve("Hello!")
            .await
            .unwrap();

        assert_eq!(turn.mode, AnswerMode::Chat);
        assert!(turn.tool_calls.is_empty());
        assert_eq!(turn.answer, "Hey! Ask me about the NBA.");
        assert_eq!(stats.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stats_question_invokes_stats_tool() {
        let dir = tempfile::tempdir().unwrap();
        let chat = ScriptedChat::new(vec![
            Step::ToolCall(STATS_TOOL, json!({"question": "LeBron points per game"})),
            Step::Content("He averaged 27.1 points per game."),
        ]);
        let stats = StubStats::ok("27.1 ppg over the season");
        let turn = agent(chat, stats.clone(), test_retriever(&dir), 6)
            .resolve("How many points did LeBron average?")
            .await
            .unwrap();

        assert_eq!(turn.mode, AnswerMode::Rag);
        assert!(stats.calls.load(Ordering::SeqCst) >= 1);
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].tool, STATS_TOOL);
        assert!(matches!(turn.tool_calls[0].outcome, ToolOutcome::Result(_)));
    }

    #[tokio::test]
    async fn test_mixed_question_uses_both_tools_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let chat = ScriptedChat::new(vec![
            Step::ToolCall(STATS_TOOL, json!({"question": "points comparison"})),
            Step::ToolCall(PASSAGE_TOOL, json!({"query": "foul rules"})),
            Step::Content("Combining the stats and the rules context..."),
        ]);
        let stats = StubStats::ok("A averaged more than B");
        let turn = agent(chat, stats, test_retriever(&dir), 6)
            .resolve("Compare their points and explain the foul rules involved")
            .await
            .unwrap();

        assert_eq!(turn.mode, AnswerMode::Rag);
        let tools: Vec<&str> = turn.tool_calls.iter().map(|t| t.tool.as_str()).collect();
        assert_eq!(tools, vec![STATS_TOOL, PASSAGE_TOOL]);
        assert!(matches!(turn.tool_calls[1].outcome, ToolOutcome::Result(_)));
    }

    #[tokio::test]
    async fn test_tool_failure_is_contained_within_the_turn() {
        let dir = tempfile::tempdir().unwrap();
        let chat = ScriptedChat::new(vec![
            Step::ToolCall(STATS_TOOL, json!({"question": "standings"})),
            Step::Content("The stats service is unavailable, but generally..."),
        ]);
        let stats = StubStats::failing("connection refused");
        let turn = agent(chat, stats, test_retriever(&dir), 6)
            .resolve("What are the current NBA standings?")
            .await
            .unwrap();

        assert!(!turn.answer.is_empty());
        assert_eq!(turn.tool_calls.len(), 1);
        assert!(matches!(turn.tool_calls[0].outcome, ToolOutcome::Error(_)));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_reported_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let chat = ScriptedChat::new(vec![
            Step::ToolCall("crystal_ball", json!({})),
            Step::Content("Let me answer without that."),
        ]);
        let turn = agent(chat, StubStats::ok("unused"), test_retriever(&dir), 6)
            .resolve("Who wins the next NBA game?")
            .await
            .unwrap();

        assert!(matches!(turn.tool_calls[0].outcome, ToolOutcome::Error(_)));
    }

    #[tokio::test]
    async fn test_zero_max_iterations_exhausts_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let chat = ScriptedChat::new(vec![Step::Content("never reached")]);
        let err = agent(chat, StubStats::ok("unused"), test_retriever(&dir), 0)
            .resolve("How many points did LeBron average?")
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Exhausted(0)));
    }

    #[tokio::test]
    async fn test_endless_tool_requests_hit_the_iteration_bound() {
        let dir = tempfile::tempdir().unwrap();
        let chat = ScriptedChat::new(vec![
            Step::ToolCall(STATS_TOOL, json!({"question": "a"})),
            Step::ToolCall(STATS_TOOL, json!({"question": "b"})),
            Step::ToolCall(STATS_TOOL, json!({"question": "c"})),
        ]);
        let err = agent(chat, StubStats::ok("partial"), test_retriever(&dir), 2)
            .resolve("How many points did LeBron average?")
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Exhausted(2)));
    }

    #[tokio::test]
    async fn test_transient_generation_failure_is_retried_once() {
        let dir = tempfile::tempdir().unwrap();
        let chat = ScriptedChat::new(vec![
            Step::Fail("transient network error"),
            Step::Content("Hi!"),
        ]);
        let turn = agent(chat.clone(), StubStats::ok("unused"), test_retriever(&dir), 6)
            .resolve("Hello!")
            .await
            .unwrap();

        assert_eq!(turn.answer, "Hi!");
        assert_eq!(chat.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_repeated_generation_failure_is_a_turn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let chat = ScriptedChat::new(vec![
            Step::Fail("network error"),
            Step::Fail("network error again"),
        ]);
        let err = agent(chat, StubStats::ok("unused"), test_retriever(&dir), 6)
            .resolve("Hello!")
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Generation(_)));
    }
}
