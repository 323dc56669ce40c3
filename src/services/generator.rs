use crate::database::models::{ConversationMessage, MessageRole, SessionContextSnapshot};
use crate::database::vector_store::ScoredChunk;
use crate::models::chat::ResponseStrategy;
use crate::services::llm_service::{ChatMessage, LlmService};
use crate::utils::token_estimator;
use std::sync::Arc;
use tracing::warn;

const DOCUMENT_HEAVY_SCORE: f32 = 0.75;
const MAX_RECENT_MESSAGES: usize = 5;
const MAX_CONTEXT_DOCUMENTS: usize = 5;
/// Soft prompt budget independent of the completion's `max_tokens` (§5 cares
/// about call counts, not prompt size; this guards the LLM's context window).
const MAX_PROMPT_TOKENS: usize = 6000;

const HOW_TO_LEXEMES: &[&str] = &["how do i", "how to", "step by step", "instructions", "procedure for"];
const FOLLOW_UP_LEXEMES: &[&str] = &["also", "additionally", "what about", "and what", "one more thing"];

const DEFAULT_FOLLOW_UPS: &[&str] = &[
    "Want more detail on this topic?",
    "Should I pull up related sections from the documentation?",
    "Would a worked example help here?",
];

pub struct GenerationRequest<'a> {
    pub query: &'a str,
    pub chunks: &'a [ScoredChunk],
    pub recent_messages: &'a [ConversationMessage],
    pub document_context: &'a [SessionContextSnapshot],
    pub current_section: Option<&'a str>,
    pub is_clarifying: bool,
}

pub struct GenerationResult {
    pub response: String,
    pub follow_up_questions: Vec<String>,
    pub response_strategy: ResponseStrategy,
}

/// Produces the reply text and follow-up prompts (§4.7). Citation selection
/// is the separate `SourceFilter` concern.
pub struct Generator {
    llm: Arc<LlmService>,
    reply_language: String,
}

impl Generator {
    pub fn new(llm: Arc<LlmService>, reply_language: String) -> Self {
        Self { llm, reply_language }
    }

    pub async fn generate(&self, req: GenerationRequest<'_>) -> GenerationResult {
        let strategy = Self::classify_strategy(&req);
        let messages = self.build_messages(&req, strategy);

        let response = match self.llm.complete(messages.clone(), 0.7).await {
            Ok(text) => text,
            Err(first_error) => {
                warn!(error = %first_error, "generation failed, retrying once");
                match self.llm.complete(messages, 0.7).await {
                    Ok(text) => text,
                    Err(second_error) => {
                        warn!(error = %second_error, "generation failed twice, synthesizing fallback");
                        self.fallback_answer(&req, strategy)
                    }
                }
            }
        };

        let follow_up_questions = self.generate_follow_ups(&req, &response).await;

        GenerationResult {
            response,
            follow_up_questions,
            response_strategy: strategy,
        }
    }

    fn classify_strategy(req: &GenerationRequest<'_>) -> ResponseStrategy {
        if req.chunks.is_empty() {
            return ResponseStrategy::GeneralKnowledge;
        }

        let query_lower = req.query.to_lowercase();
        let has_how_to = HOW_TO_LEXEMES.iter().any(|l| query_lower.contains(l));
        let has_follow_up_lexeme = FOLLOW_UP_LEXEMES.iter().any(|l| query_lower.contains(l));
        let strong_and_topical = req.chunks.iter().any(|c| c.score > DOCUMENT_HEAVY_SCORE);

        if strong_and_topical && !req.is_clarifying && !has_follow_up_lexeme {
            ResponseStrategy::DocumentHeavy
        } else if has_how_to || req.is_clarifying || has_follow_up_lexeme {
            ResponseStrategy::Hybrid
        } else {
            ResponseStrategy::Hybrid
        }
    }

    fn build_messages(&self, req: &GenerationRequest<'_>, strategy: ResponseStrategy) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage {
            role: "system".into(),
            content: self.system_instructions(strategy),
        }];

        let memory_summary = self.session_memory_summary(req);
        if !memory_summary.is_empty() {
            messages.push(ChatMessage {
                role: "system".into(),
                content: memory_summary,
            });
        }

        for message in req.recent_messages.iter().rev().take(MAX_RECENT_MESSAGES).rev() {
            messages.push(ChatMessage {
                role: role_label(message.role).into(),
                content: message.content.clone(),
            });
        }

        if !req.chunks.is_empty() {
            messages.push(ChatMessage {
                role: "system".into(),
                content: self.chunk_context_block(req.chunks),
            });
        }

        messages.push(ChatMessage {
            role: "user".into(),
            content: req.query.to_string(),
        });

        trim_to_token_budget(messages)
    }

    fn system_instructions(&self, strategy: ResponseStrategy) -> String {
        let mode = match strategy {
            ResponseStrategy::DocumentHeavy => {
                "Answer primarily from the provided document excerpts; cite what you used."
            }
            ResponseStrategy::Hybrid => {
                "Combine the provided document excerpts with your general knowledge where the excerpts are partial."
            }
            ResponseStrategy::GeneralKnowledge => {
                "No document excerpts were found; answer helpfully from general knowledge and suggest related topics to search for."
            }
        };
        format!(
            "You are a kitchen and restaurant-operations assistant. Always reply in {}. {}",
            self.reply_language, mode
        )
    }

    fn session_memory_summary(&self, req: &GenerationRequest<'_>) -> String {
        if req.document_context.is_empty() && req.current_section.is_none() {
            return String::new();
        }

        let mut summary = String::from("Session memory: ");
        if let Some(section) = req.current_section {
            summary.push_str(&format!("current section = {section}. "));
        }
        let documents: Vec<String> = req
            .document_context
            .iter()
            .take(MAX_CONTEXT_DOCUMENTS)
            .map(|s| format!("document {} (section {})", s.document_id, s.section))
            .collect();
        if !documents.is_empty() {
            summary.push_str("recently referenced: ");
            summary.push_str(&documents.join(", "));
        }
        summary
    }

    fn chunk_context_block(&self, chunks: &[ScoredChunk]) -> String {
        let mut block = String::from("Relevant document excerpts:\n");
        for chunk in chunks {
            block.push_str(&format!(
                "[doc={} section={} score={:.2}] {}\n",
                chunk.document_id, chunk.section, chunk.score, chunk.content
            ));
        }
        block
    }

    fn fallback_answer(&self, req: &GenerationRequest<'_>, strategy: ResponseStrategy) -> String {
        match strategy {
            ResponseStrategy::GeneralKnowledge => {
                "I couldn't reach the generation service, but based on general practice I'd recommend checking the relevant standard operating procedure and consulting your shift lead.".to_string()
            }
            _ => format!(
                "I found {} relevant excerpt(s) for \"{}\" but couldn't generate a full answer right now. Please review the cited sources directly or try again shortly.",
                req.chunks.len(),
                req.query
            ),
        }
    }

    async fn generate_follow_ups(&self, req: &GenerationRequest<'_>, answer: &str) -> Vec<String> {
        let prompt = format!(
            "Based on this question: \"{}\" and this answer: \"{}\", propose 3 to 5 short follow-up questions the user might ask next, one per line, in {}.",
            req.query, answer, self.reply_language
        );
        let messages = vec![ChatMessage {
            role: "user".into(),
            content: prompt,
        }];

        match self.llm.complete(messages, 0.8).await {
            Ok(text) => {
                let questions: Vec<String> = text
                    .lines()
                    .map(|l| l.trim_start_matches(['-', '*', '•']).trim().to_string())
                    .filter(|l| !l.is_empty())
                    .take(5)
                    .collect();
                if questions.len() >= 3 {
                    questions
                } else {
                    default_follow_ups()
                }
            }
            Err(e) => {
                warn!(error = %e, "follow-up generation failed, using default list");
                default_follow_ups()
            }
        }
    }
}

/// Drops the oldest conversation-history turns (never the system instructions,
/// the document-excerpt block, or the final user query) until the estimated
/// prompt fits `MAX_PROMPT_TOKENS`, or no more history remains to drop.
fn trim_to_token_budget(mut messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let total_tokens = |msgs: &[ChatMessage]| -> usize {
        msgs.iter().map(|m| token_estimator::estimate_tokens(&m.content)).sum()
    };

    if messages.len() <= 2 {
        return messages;
    }

    while total_tokens(&messages) > MAX_PROMPT_TOKENS {
        let droppable = (1..messages.len() - 1).find(|&i| messages[i].role != "system");
        match droppable {
            Some(i) => {
                messages.remove(i);
            }
            None => break,
        }
    }

    messages
}

fn role_label(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::System => "system",
    }
}

fn default_follow_ups() -> Vec<String> {
    DEFAULT_FOLLOW_UPS.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: &str, content: String) -> ChatMessage {
        ChatMessage {
            role: role.into(),
            content,
        }
    }

    #[test]
    fn short_conversation_is_untouched() {
        let messages = vec![
            msg("system", "instructions".into()),
            msg("user", "a quick question".into()),
        ];
        let trimmed = trim_to_token_budget(messages.clone());
        assert_eq!(trimmed.len(), messages.len());
    }

    #[test]
    fn drops_oldest_non_system_messages_first() {
        let mut messages = vec![msg("system", "instructions".into())];
        for i in 0..20 {
            messages.push(msg("user", format!("turn {i} {}", "word ".repeat(400))));
        }
        messages.push(msg("user", "final question".into()));

        let trimmed = trim_to_token_budget(messages);

        let total: usize = trimmed.iter().map(|m| token_estimator::estimate_tokens(&m.content)).sum();
        assert!(total <= MAX_PROMPT_TOKENS);
        assert_eq!(trimmed.first().unwrap().role, "system");
        assert_eq!(trimmed.last().unwrap().content, "final question");
    }

    #[test]
    fn never_drops_system_messages() {
        let messages = vec![
            msg("system", "core instructions".into()),
            msg("system", "x".repeat(50_000)),
            msg("user", "final question".into()),
        ];
        let trimmed = trim_to_token_budget(messages);
        assert_eq!(trimmed.len(), 3);
    }
}
