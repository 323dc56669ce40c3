use crate::database::models::SessionContextSnapshot;
use once_cell::sync::Lazy;
use regex::Regex;

/// Cap on Conversation.document_context entries (§3, §4.6).
pub const N_CTX: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryStrategy {
    ContextReuse,
    HybridContext,
    NewSearch,
}

pub struct MemoryDecisionInput<'a> {
    pub new_query: &'a str,
    pub previous_user_message: Option<&'a str>,
    pub message_count: usize,
    pub document_context: &'a [SessionContextSnapshot],
    pub requested_section: Option<&'a str>,
    pub current_section: Option<&'a str>,
}

pub struct MemoryPolicy;

impl MemoryPolicy {
    /// Decision procedure (§4.6 steps 1-5). `similarity` is the cosine
    /// similarity between the new query and the previous user message,
    /// computed by the caller only when step 3/4 doesn't already resolve it.
    pub fn decide(input: &MemoryDecisionInput<'_>, similarity: Option<f32>) -> MemoryStrategy {
        if let Some(requested) = input.requested_section {
            let refreshes_focus = input.current_section.map(|c| c != requested).unwrap_or(true);
            if refreshes_focus {
                return MemoryStrategy::NewSearch;
            }
        }

        if input.document_context.is_empty() || input.message_count < 2 {
            return MemoryStrategy::NewSearch;
        }

        let Some(previous) = input.previous_user_message else {
            return MemoryStrategy::NewSearch;
        };

        if is_clarifying_question(input.new_query, previous) {
            return MemoryStrategy::ContextReuse;
        }

        match similarity {
            Some(sigma) if sigma > 0.6 => MemoryStrategy::ContextReuse,
            Some(sigma) if sigma > 0.3 => MemoryStrategy::HybridContext,
            _ => MemoryStrategy::NewSearch,
        }
    }

    /// Merges prior snapshots with fresh ones for the `hybrid_context` strategy:
    /// dedup by (document_id, first 100 chars), sort by (score desc, timestamp
    /// desc), cap to N_ctx.
    pub fn merge(
        existing: Vec<SessionContextSnapshot>,
        fresh: Vec<SessionContextSnapshot>,
    ) -> Vec<SessionContextSnapshot> {
        let mut seen = std::collections::HashSet::new();
        let mut merged = Vec::with_capacity(existing.len() + fresh.len());

        for snapshot in existing.into_iter().chain(fresh.into_iter()) {
            let key = (
                snapshot.document_id,
                snapshot.content_preview.chars().take(100).collect::<String>(),
            );
            if seen.insert(key) {
                merged.push(snapshot);
            }
        }

        merged.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
        });
        merged.truncate(N_CTX);
        merged
    }
}

const CLARIFYING_STARTERS: &[&str] = &[
    "what about",
    "what if",
    "how about",
    "and when",
    "and where",
    "and why",
    "and which",
    "and how much",
    "and how many",
    "tell me more",
    "explain",
    "what exactly",
    "what specifically",
    "clarify",
];

const CLARIFYING_PRONOUNS: &[&str] = &["this", "that", "these", "those", "it", "they", "them", "given"];

const INTERROGATIVES: &[&str] = &["what", "how", "why", "when", "where", "which"];

const STOPWORDS: &[&str] = &["what", "when", "where", "how", "why", "or", "for", "all", "still"];

static FOLLOW_UP_PATTERNS: Lazy<Vec<(Regex, Regex)>> = Lazy::new(|| {
    let pairs = [
        (r"minimum.*height", r"height.*ceiling"),
        (r"requirements.*room", r"height.*ceiling"),
        (r"food.*safety", r"hygiene.*practices"),
        (r"standards", r"specific.*practices"),
        (r"procedures", r"detailed.*steps"),
    ];
    pairs
        .iter()
        .map(|(a, b)| (Regex::new(a).unwrap(), Regex::new(b).unwrap()))
        .collect()
});

/// Clarifying-question rules (§4.6): any single rule triggers a match.
pub fn is_clarifying_question(new_query: &str, previous_query: &str) -> bool {
    let new_lower = new_query.to_lowercase();
    let new_lower = new_lower.trim();
    let prev_lower = previous_query.to_lowercase();

    if CLARIFYING_STARTERS.iter().any(|s| new_lower.starts_with(s)) {
        return true;
    }

    if CLARIFYING_PRONOUNS.iter().any(|p| new_lower.contains(p)) {
        return true;
    }

    let token_count = new_lower.split_whitespace().count();
    if token_count <= 3 && INTERROGATIVES.iter().any(|w| new_lower.contains(w)) {
        return true;
    }

    let shared_noun = prev_lower
        .split_whitespace()
        .filter(|w| w.len() > 3 && !STOPWORDS.contains(w))
        .take(5)
        .any(|noun| new_lower.contains(noun));
    if shared_noun {
        return true;
    }

    FOLLOW_UP_PATTERNS
        .iter()
        .any(|(prev_pat, new_pat)| prev_pat.is_match(&prev_lower) && new_pat.is_match(new_lower))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starter_triggers_clarifying() {
        assert!(is_clarifying_question("what about the storage room?", "what's the minimum ceiling height?"));
    }

    #[test]
    fn unrelated_query_is_not_clarifying() {
        assert!(!is_clarifying_question(
            "tell me about staff time tracking",
            "how to wash vegetables"
        ));
    }

    #[test]
    fn no_prior_context_forces_new_search() {
        let input = MemoryDecisionInput {
            new_query: "what about the storage room?",
            previous_user_message: Some("what's the minimum ceiling height?"),
            message_count: 2,
            document_context: &[],
            requested_section: None,
            current_section: None,
        };
        assert_eq!(MemoryPolicy::decide(&input, Some(0.9)), MemoryStrategy::NewSearch);
    }

    #[test]
    fn section_change_forces_new_search() {
        let snapshot = SessionContextSnapshot {
            document_id: 1,
            section: "procedures".into(),
            content_preview: "x".into(),
            query: "q".into(),
            score: 0.9,
            timestamp: chrono::Utc::now(),
        };
        let input = MemoryDecisionInput {
            new_query: "what about the storage room?",
            previous_user_message: Some("previous question"),
            message_count: 3,
            document_context: std::slice::from_ref(&snapshot),
            requested_section: Some("restaurant_ops"),
            current_section: Some("procedures"),
        };
        assert_eq!(MemoryPolicy::decide(&input, Some(0.9)), MemoryStrategy::NewSearch);
    }

    #[test]
    fn high_similarity_reuses_context() {
        let snapshot = SessionContextSnapshot {
            document_id: 1,
            section: "procedures".into(),
            content_preview: "x".into(),
            query: "q".into(),
            score: 0.9,
            timestamp: chrono::Utc::now(),
        };
        let input = MemoryDecisionInput {
            new_query: "unrelated query text",
            previous_user_message: Some("some other previous query"),
            message_count: 3,
            document_context: std::slice::from_ref(&snapshot),
            requested_section: None,
            current_section: None,
        };
        assert_eq!(MemoryPolicy::decide(&input, Some(0.7)), MemoryStrategy::ContextReuse);
    }

    #[test]
    fn medium_similarity_is_hybrid() {
        let snapshot = SessionContextSnapshot {
            document_id: 1,
            section: "procedures".into(),
            content_preview: "x".into(),
            query: "q".into(),
            score: 0.9,
            timestamp: chrono::Utc::now(),
        };
        let input = MemoryDecisionInput {
            new_query: "unrelated query text",
            previous_user_message: Some("some other previous query"),
            message_count: 3,
            document_context: std::slice::from_ref(&snapshot),
            requested_section: None,
            current_section: None,
        };
        assert_eq!(MemoryPolicy::decide(&input, Some(0.45)), MemoryStrategy::HybridContext);
    }
}
