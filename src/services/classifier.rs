use std::sync::Arc;

use regex::Regex;
use tracing::{info, warn};

use crate::models::Classification;
use crate::services::llm::{ChatClient, ChatMessage, ChatOutput, RouteLabel};

/// Whole-string conversational patterns: greetings, thanks, farewells,
/// identity and help requests, in French and English. Anchored so a keyword
/// elsewhere in a longer query can never be shadowed by small talk.
const GENERAL_PATTERNS: &[&str] = &[
    r"^(bonjour|salut|hello|hi|hey|coucou|bonsoir|good (morning|evening))[\s\.,!]*$",
    r"^(merci|thanks|thank you|je te remercie)[\s\.,!]*$",
    r"^(comment ça va|ça va|how are you|comment vas-tu|comment allez-vous)[\s\.,!?]*$",
    r"^(au revoir|bye|goodbye|à bientôt|à plus tard|see you)[\s\.,!]*$",
    r"^(qui es[- ]tu|qu'es[- ]tu|who are you|what are you|what can you do|que fais[- ]tu)[\s\?]*$",
    r"^(aide|help|sos|besoin d'aide)[\s\.,!?]*$",
];

/// Domain vocabulary: entity types, statistical terms, and well-known player
/// names, in both French and anglicized forms.
const DOMAIN_KEYWORDS: &[&str] = &[
    "courtside",
    "nba",
    "basketball",
    "basket",
    "player",
    "joueur",
    "stats",
    "statistiques",
    "points",
    "rebounds",
    "rebonds",
    "assists",
    "passes décisives",
    "match",
    "game",
    "team",
    "équipe",
    "saison",
    "season",
    "règles",
    "rules",
    "arbitrage",
    "referee",
    "faute",
    "foul",
    "histoire",
    "history",
    "record",
    "champion",
    "playoffs",
    "lebron",
    "curry",
    "jordan",
    "kobe",
    "3pm",
    "fg%",
    "minutes",
];

const CLASSIFIER_SYSTEM_PROMPT: &str = "\
You are a query router for a basketball analytics assistant.
Decide whether a question needs a lookup in the knowledge base (player stats, \
game results, NBA rules, forum archives).

Answer with exactly \"RAG\" or \"DIRECT\" followed by a brief justification:
- \"RAG\" if the question is about stats, players, games, rules, or NBA history.
- \"DIRECT\" if it is small talk, a general question, or off-topic.

Examples:
Question: \"Hello, how are you?\"
Answer: DIRECT - simple greeting

Question: \"How many points did LeBron average?\"
Answer: RAG - asks for player stats

Question: \"What counts as a shooting foul?\"
Answer: RAG - asks about the rules";

/// Decides, per query, whether retrieval is needed. Deterministic tiers
/// evaluated in order; the first match wins. Classification never fails: any
/// model-tier error defaults to the retrieval-enabled path.
pub struct QueryClassifier {
    patterns: Vec<Regex>,
    chat: Option<Arc<dyn ChatClient>>,
}

impl QueryClassifier {
    pub fn new(chat: Option<Arc<dyn ChatClient>>) -> Self {
        let patterns = GENERAL_PATTERNS
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!("invalid conversational pattern '{}': {}", p, e);
                    None
                }
            })
            .collect();

        Self { patterns, chat }
    }

    pub async fn classify(&self, query: &str) -> Classification {
        let query_lower = query.trim().to_lowercase();

        // Tier 1: conversational whole-string patterns.
        if self.patterns.iter().any(|re| re.is_match(&query_lower)) {
            return Classification {
                needs_retrieval: false,
                confidence: 0.95,
                reason: "greeting or general conversation".to_string(),
            };
        }

        // Tier 2: domain keywords.
        let matched: Vec<&str> = DOMAIN_KEYWORDS
            .iter()
            .filter(|kw| query_lower.contains(*kw))
            .copied()
            .collect();
        if !matched.is_empty() {
            return Classification {
                needs_retrieval: true,
                confidence: 0.9,
                reason: format!("contains domain keywords: {}", matched.join(", ")),
            };
        }

        // Tier 3: model judgment for genuinely ambiguous phrasing.
        if let Some(chat) = &self.chat {
            return self.classify_with_model(chat.as_ref(), query).await;
        }

        // Tier 4: word-count heuristic when no model is configured.
        if query.split_whitespace().count() > 5 {
            Classification {
                needs_retrieval: true,
                confidence: 0.6,
                reason: "complex question (more than 5 words)".to_string(),
            }
        } else {
            Classification {
                needs_retrieval: false,
                confidence: 0.5,
                reason: "no signal".to_string(),
            }
        }
    }

    async fn classify_with_model(&self, chat: &dyn ChatClient, query: &str) -> Classification {
        let messages = [ChatMessage::user(query)];
        match chat.generate(CLASSIFIER_SYSTEM_PROMPT, &messages, &[]).await {
            Ok(ChatOutput::Content(reply)) => {
                info!("model classification for '{}': {}", query, reply);
                match RouteLabel::parse(&reply) {
                    // A bare label carries no justification; keep the reason
                    // non-empty for logs and traces.
                    Some((RouteLabel::Rag, why)) => Classification {
                        needs_retrieval: true,
                        confidence: 0.85,
                        reason: if why.is_empty() {
                            "model routed to retrieval".to_string()
                        } else {
                            why
                        },
                    },
                    Some((RouteLabel::Direct, why)) => Classification {
                        needs_retrieval: false,
                        confidence: 0.85,
                        reason: if why.is_empty() {
                            "model routed to direct answer".to_string()
                        } else {
                            why
                        },
                    },
                    None => Classification {
                        needs_retrieval: true,
                        confidence: 0.6,
                        reason: "ambiguous classification, defaulting to retrieval".to_string(),
                    },
                }
            }
            // A tool call here is malformed output; treat it as ambiguous.
            Ok(ChatOutput::ToolCall { .. }) => Classification {
                needs_retrieval: true,
                confidence: 0.6,
                reason: "ambiguous classification, defaulting to retrieval".to_string(),
            },
            Err(e) => {
                warn!("classification model call failed: {}", e);
                Classification {
                    needs_retrieval: true,
                    confidence: 0.5,
                    reason: format!("classification error, defaulting to retrieval: {e}"),
                }
            }
        }
    }
}
