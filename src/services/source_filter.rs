use crate::database::models::Document;
use crate::database::vector_store::ScoredChunk;
use crate::models::chat::SourceCitation;
use std::collections::HashMap;

const MATERIAL_SCORE_THRESHOLD: f32 = 0.7;
const SECONDARY_SCORE_THRESHOLD: f32 = 0.5;
const SECONDARY_LENGTH_THRESHOLD: usize = 200;

struct DocumentAggregate<'a> {
    chunks: Vec<&'a ScoredChunk>,
    max_score: f32,
    total_length: usize,
}

/// Picks which documents a generated answer may cite (§4.7 "Source filter").
pub struct SourceFilter;

impl SourceFilter {
    /// Groups chunks by document, keeps only "materially relevant" documents,
    /// and falls back to the single best document rather than emitting nothing.
    pub fn filter<'a>(chunks: &'a [ScoredChunk]) -> Vec<&'a ScoredChunk> {
        if chunks.is_empty() {
            return Vec::new();
        }

        let mut by_document: HashMap<i64, DocumentAggregate<'a>> = HashMap::new();
        for chunk in chunks {
            let entry = by_document.entry(chunk.document_id).or_insert_with(|| DocumentAggregate {
                chunks: Vec::new(),
                max_score: 0.0,
                total_length: 0,
            });
            entry.chunks.push(chunk);
            entry.max_score = entry.max_score.max(chunk.score);
            entry.total_length += chunk.content_length.max(0) as usize;
        }

        let mut retained: Vec<i64> = by_document
            .iter()
            .filter(|(_, agg)| {
                agg.max_score > MATERIAL_SCORE_THRESHOLD
                    || (agg.max_score > SECONDARY_SCORE_THRESHOLD
                        && agg.total_length > SECONDARY_LENGTH_THRESHOLD
                        && agg.chunks.len() > 1)
            })
            .map(|(document_id, _)| *document_id)
            .collect();

        if retained.is_empty() {
            if let Some((document_id, _)) = by_document
                .iter()
                .max_by(|a, b| a.1.max_score.partial_cmp(&b.1.max_score).unwrap_or(std::cmp::Ordering::Equal))
            {
                retained.push(*document_id);
            }
        }

        let retained_set: std::collections::HashSet<i64> = retained.into_iter().collect();
        chunks.iter().filter(|c| retained_set.contains(&c.document_id)).collect()
    }

    /// Emits one citation per retained document, carrying the chunk with the
    /// highest score as the representative preview.
    pub fn citations(
        retained_chunks: &[&ScoredChunk],
        documents: &HashMap<i64, Document>,
    ) -> Vec<SourceCitation> {
        let mut best_per_document: HashMap<i64, &ScoredChunk> = HashMap::new();
        for chunk in retained_chunks {
            best_per_document
                .entry(chunk.document_id)
                .and_modify(|existing| {
                    if chunk.score > existing.score {
                        *existing = chunk;
                    }
                })
                .or_insert(chunk);
        }

        let mut citations: Vec<SourceCitation> = best_per_document
            .into_iter()
            .map(|(document_id, chunk)| {
                let document = documents.get(&document_id);
                let document_name = document
                    .map(|d| d.resolve_title())
                    .unwrap_or_else(|| format!("Document {document_id}"));
                let kind = document
                    .map(|d| d.detected_content_kind.clone().unwrap_or_else(|| d.declared_content_kind.clone()))
                    .unwrap_or_default();

                SourceCitation {
                    document_id,
                    document_name,
                    chunk_id: chunk.chunk_id,
                    similarity: chunk.score,
                    page_number: chunk.page_number,
                    preview: chunk.content.chars().take(240).collect(),
                    download_url: format!("/api/documents/{document_id}/download"),
                    view_url: viewer_url(document_id, &kind),
                }
            })
            .collect();

        citations.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        citations
    }
}

fn viewer_url(document_id: i64, kind: &str) -> String {
    let normalized = kind.trim_start_matches('.').to_lowercase();
    let viewer = match normalized.as_str() {
        "pdf" => "pdf",
        "xlsx" | "xls" => "excel",
        "docx" | "doc" => "word",
        "pptx" | "ppt" => "powerpoint",
        _ => "generic",
    };
    format!("/viewer/public/{viewer}/{document_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::ChunkType;

    fn chunk(document_id: i64, chunk_id: i64, score: f32, length: i32) -> ScoredChunk {
        ScoredChunk {
            chunk_id,
            document_id,
            content: "some retrieved content".to_string(),
            score,
            section: "procedures".into(),
            access_level: "staff".into(),
            chunk_type: ChunkType::Text,
            page_number: Some(1),
            section_name: None,
            content_length: length,
            has_metadata: false,
        }
    }

    #[test]
    fn high_score_document_is_materially_relevant() {
        let chunks = vec![chunk(1, 1, 0.8, 50)];
        let retained = SourceFilter::filter(&chunks);
        assert_eq!(retained.len(), 1);
    }

    #[test]
    fn low_isolated_score_is_dropped_unless_sole_candidate() {
        let chunks = vec![chunk(1, 1, 0.4, 50)];
        let retained = SourceFilter::filter(&chunks);
        assert_eq!(retained.len(), 1, "fallback keeps the single best document");
    }

    #[test]
    fn secondary_threshold_requires_length_and_multiple_chunks() {
        let chunks = vec![chunk(1, 1, 0.55, 150), chunk(1, 2, 0.55, 150)];
        let retained = SourceFilter::filter(&chunks);
        assert_eq!(retained.len(), 2);
    }

    #[test]
    fn fallback_keeps_highest_scoring_document_when_nothing_qualifies() {
        let chunks = vec![chunk(1, 1, 0.2, 10), chunk(2, 2, 0.35, 10)];
        let retained = SourceFilter::filter(&chunks);
        assert!(retained.iter().all(|c| c.document_id == 2));
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(SourceFilter::filter(&[]).is_empty());
    }
}
