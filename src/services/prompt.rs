use crate::models::ScoredPassage;

/// Byte budget for retrieved context handed to the driving model.
pub const DEFAULT_CONTEXT_BUDGET: usize = 6000;

pub const DIRECT_SYSTEM_PROMPT: &str = "\
You are Courtside, a helpful assistant for an NBA basketball analytics \
platform. Answer conversationally and briefly. If the user asks about stats, \
players, games, or rules, invite them to ask a specific question.";

pub const AGENT_SYSTEM_PROMPT: &str = "\
You are Courtside, an NBA basketball assistant. Use the stats_db tool for \
quantitative questions (player averages, game scores, standings). Use the \
passage_search tool for qualitative questions (rules, fan discussions, \
history). Combine both when a question needs them. Tool results appear in \
the conversation; when you have enough information, reply with the final \
answer instead of calling another tool.";

/// Format retrieved passages into a bounded context block. The budget is in
/// bytes; passages are appended in order until it would be exceeded. A first
/// passage that alone exceeds the budget is truncated on a char boundary
/// rather than dropped, so the model always sees something when retrieval
/// returned anything.
pub fn assemble_context(passages: &[ScoredPassage], budget_bytes: usize) -> String {
    let mut out = String::new();

    for scored in passages {
        let p = &scored.passage;
        let block = format!(
            "[{} p.{} ({})] {}",
            p.source, p.page, p.category, p.text.trim()
        );

        let separator_len = if out.is_empty() { 0 } else { 2 };
        if out.len() + separator_len + block.len() > budget_bytes {
            if out.is_empty() {
                let mut end = budget_bytes.min(block.len());
                while !block.is_char_boundary(end) {
                    end -= 1;
                }
                out.push_str(&block[..end]);
            }
            break;
        }

        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&block);
    }

    out
}

/// Render a tool result (or tool error) for the transcript.
pub fn format_tool_result(tool: &str, content: &str) -> String {
    format!("[tool_result:{tool}] {content}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Passage;

    fn scored(text: &str, score: f32) -> ScoredPassage {
        ScoredPassage {
            passage: Passage {
                text: text.to_string(),
                source: "rulebook.pdf".to_string(),
                page: 3,
                category: "rules".to_string(),
            },
            score,
        }
    }

    #[test]
    fn test_context_includes_source_metadata() {
        let ctx = assemble_context(&[scored("A shooting foul occurs when...", 0.9)], 500);
        assert!(ctx.contains("[rulebook.pdf p.3 (rules)]"));
        assert!(ctx.contains("shooting foul"));
    }

    #[test]
    fn test_context_respects_budget() {
        let passages: Vec<_> = (0..10).map(|_| scored(&"x".repeat(100), 0.5)).collect();
        let ctx = assemble_context(&passages, 300);
        assert!(ctx.len() <= 300);
        assert!(ctx.contains("[rulebook.pdf"));
    }

    #[test]
    fn test_oversized_first_passage_is_truncated_not_dropped() {
        let ctx = assemble_context(&[scored(&"y".repeat(1000), 0.5)], 200);
        assert_eq!(ctx.len(), 200);
    }

    #[test]
    fn test_truncation_stays_within_byte_budget_for_multibyte_text() {
        // "é" is two bytes; the cut must land on a char boundary and never
        // exceed the budget in bytes.
        let ctx = assemble_context(&[scored(&"é".repeat(500), 0.5)], 200);
        assert!(ctx.len() <= 200);
        assert!(!ctx.is_empty());
        assert!(ctx.ends_with('é') || ctx.ends_with(']') || ctx.ends_with(' '));
    }

    #[test]
    fn test_empty_passages_yield_empty_context() {
        assert!(assemble_context(&[], 500).is_empty());
    }
}
