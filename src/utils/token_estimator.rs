//! Word-count heuristic for estimating LLM token usage without calling out
//! to a real tokenizer. Cheap enough to run on every message when trimming
//! conversation history to a token budget (see `services::generator`).

/// ~1.3 tokens per word plus a small constant for punctuation/special
/// tokens the word count misses.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }

    let words = text.split_whitespace().count();
    ((words as f64 * 1.3) + 5.0).ceil() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales_roughly_with_word_count() {
        let text = "This is a test document containing information";
        let tokens = estimate_tokens(text);
        // 7 words * 1.3 + 5 = 14.1, ceil = 15
        assert!(tokens >= 13 && tokens <= 16);
    }

    #[test]
    fn empty_string_costs_nothing() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn whitespace_only_costs_nothing() {
        assert_eq!(estimate_tokens("   \n\t  "), 0);
    }

    #[test]
    fn longer_text_costs_more_tokens() {
        let short = estimate_tokens("a short message");
        let long = estimate_tokens(&"word ".repeat(200));
        assert!(long > short);
    }
}
