/// Canonical text cleaner (§9 redesign flag): the one place that normalizes
/// extracted text, called once per content block between parsing and chunking.
/// Strips C0 control bytes (except newline/tab), drops NULs, collapses
/// repeated whitespace, and truncates to a safe upper bound.
const MAX_BLOCK_CHARS: usize = 200_000;

pub fn clean_block_content(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_space = false;

    for ch in raw.chars() {
        if ch == '\u{0}' {
            continue;
        }
        if ch.is_control() && ch != '\n' && ch != '\t' {
            continue;
        }
        let is_space = ch.is_whitespace();
        if is_space {
            if last_was_space {
                continue;
            }
            out.push(' ');
        } else {
            out.push(ch);
        }
        last_was_space = is_space;
    }

    let cleaned = out.trim();
    if cleaned.chars().count() > MAX_BLOCK_CHARS {
        cleaned.chars().take(MAX_BLOCK_CHARS).collect()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_and_strips_controls() {
        let raw = "hello\u{0}  world\u{1}\n\n\nagain";
        let cleaned = clean_block_content(raw);
        assert_eq!(cleaned, "hello world again");
    }

    #[test]
    fn truncates_oversized_blocks() {
        let raw = "a".repeat(MAX_BLOCK_CHARS + 100);
        let cleaned = clean_block_content(&raw);
        assert_eq!(cleaned.chars().count(), MAX_BLOCK_CHARS);
    }

    #[test]
    fn trims_and_handles_empty() {
        assert_eq!(clean_block_content("   \u{0}  "), "");
    }
}
