use crate::database::models::ChunkType;
use crate::document::cleaner::clean_block_content;
use crate::document::parser::ContentBlock;
use tracing::warn;

/// Hard cap on chunks emitted per document (§4.2, §9), defeats pathological inputs.
pub const MAX_CHUNKS_PER_DOCUMENT: usize = 200;
const MAX_SPLIT_ITERATIONS: usize = 1000;
const BOUNDARY_LOOKBACK: usize = 100;

#[derive(Debug, Clone)]
pub struct Chunk {
    pub content: String,
    pub chunk_index: i32,
    pub kind: ChunkType,
    pub section_name: Option<String>,
    pub page: Option<i32>,
    pub sheet_name: Option<String>,
    pub sub_index: Option<i32>,
}

pub struct TextChunker {
    target_size: usize,
    overlap: usize,
}

impl TextChunker {
    pub fn new(target_size: usize, overlap: usize) -> Self {
        Self {
            target_size: target_size.max(1),
            overlap: overlap.min(target_size.saturating_sub(1)),
        }
    }

    /// Cleans each block exactly once (the canonical cleaner, §9), then slices
    /// it into chunks that inherit the block's metadata and a dense
    /// document-scoped index.
    pub fn chunk_blocks(&self, blocks: &[ContentBlock]) -> Vec<Chunk> {
        let mut chunks = Vec::new();

        'outer: for block in blocks {
            if block.kind == ChunkType::Error {
                continue;
            }
            let cleaned = clean_block_content(&block.content);
            if cleaned.is_empty() {
                continue;
            }

            for piece in self.split(&cleaned) {
                if piece.trim().is_empty() {
                    continue;
                }
                if chunks.len() >= MAX_CHUNKS_PER_DOCUMENT {
                    warn!(
                        cap = MAX_CHUNKS_PER_DOCUMENT,
                        "document hit max chunk cap, truncating remaining blocks"
                    );
                    break 'outer;
                }
                chunks.push(Chunk {
                    content: piece,
                    chunk_index: chunks.len() as i32,
                    kind: block.kind,
                    section_name: block.section_name.clone(),
                    page: block.page,
                    sheet_name: block.sheet_name.clone(),
                    sub_index: block.sub_index,
                });
            }
        }

        chunks
    }

    fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        if total == 0 {
            return Vec::new();
        }

        let mut pieces = Vec::new();
        let mut start = 0;
        let mut iterations = 0;

        while start < total {
            iterations += 1;
            if iterations > MAX_SPLIT_ITERATIONS {
                warn!(iterations, "chunk split loop aborted, minimal progress guard");
                break;
            }

            let target_end = (start + self.target_size).min(total);
            let end = if target_end >= total {
                total
            } else {
                self.find_boundary(&chars, start, target_end)
            };

            pieces.push(chars[start..end].iter().collect());

            if end >= total {
                break;
            }

            let next_start = end.saturating_sub(self.overlap);
            if next_start <= start {
                // Overlap would not advance the cursor; force minimal progress.
                start += 1;
            } else {
                start = next_start;
            }
        }

        pieces
    }

    /// Prefers a sentence terminator within the last `BOUNDARY_LOOKBACK` chars
    /// before the target; falls back to a paragraph break; else the raw cut.
    fn find_boundary(&self, chars: &[char], start: usize, target_end: usize) -> usize {
        let lookback_start = target_end.saturating_sub(BOUNDARY_LOOKBACK).max(start);

        for i in (lookback_start..target_end).rev() {
            if matches!(chars[i], '.' | '!' | '?') {
                return i + 1;
            }
        }

        for i in (lookback_start..target_end).rev() {
            if chars[i] == '\n' && i > lookback_start && chars[i - 1] == '\n' {
                return i + 1;
            }
        }

        target_end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_block(content: &str) -> ContentBlock {
        ContentBlock {
            kind: ChunkType::Text,
            content: content.to_string(),
            section_name: None,
            page: None,
            sheet_name: None,
            sub_index: None,
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn short_input_yields_one_chunk() {
        let chunker = TextChunker::new(500, 50);
        let chunks = chunker.chunk_blocks(&[text_block(&"a".repeat(499))]);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn long_input_yields_multiple_overlapping_chunks() {
        let chunker = TextChunker::new(500, 50);
        let chunks = chunker.chunk_blocks(&[text_block(&"a".repeat(1050))]);
        assert!(chunks.len() >= 3);
    }

    #[test]
    fn indices_are_dense_and_start_at_zero() {
        let chunker = TextChunker::new(500, 50);
        let chunks = chunker.chunk_blocks(&[text_block(&"a".repeat(1500))]);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i as i32);
        }
    }

    #[test]
    fn error_blocks_are_never_chunked() {
        let chunker = TextChunker::new(500, 50);
        let mut block = text_block("some content");
        block.kind = ChunkType::Error;
        let chunks = chunker.chunk_blocks(&[block]);
        assert!(chunks.is_empty());
    }

    #[test]
    fn respects_max_chunks_per_document_cap() {
        let chunker = TextChunker::new(10, 0);
        let chunks = chunker.chunk_blocks(&[text_block(&"a".repeat(10_000))]);
        assert!(chunks.len() <= MAX_CHUNKS_PER_DOCUMENT);
    }

    #[test]
    fn breaks_at_sentence_terminator_when_available() {
        let chunker = TextChunker::new(20, 0);
        let text = "Short sentence one. Short sentence two. Short sentence three.";
        let chunks = chunker.chunk_blocks(&[text_block(text)]);
        assert!(chunks[0].content.ends_with('.'));
    }
}
