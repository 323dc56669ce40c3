pub mod chunker;
pub mod cleaner;
pub mod parser;

pub use chunker::{Chunk, TextChunker, MAX_CHUNKS_PER_DOCUMENT};
pub use cleaner::clean_block_content;
pub use parser::{ContentBlock, DocumentParser, ParsedDocument, KNOWN_KINDS};
