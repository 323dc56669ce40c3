/// Indexer & vector store adapter (SPEC_FULL.md §4.4, §4.5).
///
/// Adapter substrate decision: the "collection" is a Postgres table with a
/// `pgvector` column plus the VectorRecord payload columns; "payload indexes"
/// are ordinary btree indexes on those columns; "recreate the collection" is a
/// drop+recreate of that table when the configured dimension no longer matches
/// the column's declared dimension. See DESIGN.md for the rationale.
use crate::database::models::{ChunkType, VectorPayload};
use crate::database::pool::DbPool;
use anyhow::{Context, Result};
use pgvector::Vector;
use sqlx::Row;
use tracing::{info, warn};
use unicode_segmentation::UnicodeSegmentation;

/// Per-document safety clamp on points sent to the vector store (§4.4).
pub const MAX_CHUNKS_FOR_VECTOR_STORE: usize = 100;
const UPSERT_SUB_BATCH: usize = 100;

pub struct VectorStore {
    pool: DbPool,
    collection: String,
    dimension: usize,
}

#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub chunk_id: i64,
    pub vector: Vec<f32>,
    pub payload: VectorPayload,
}

#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk_id: i64,
    pub document_id: i64,
    pub content: String,
    pub score: f32,
    pub section: String,
    pub access_level: String,
    pub chunk_type: ChunkType,
    pub page_number: Option<i32>,
    pub section_name: Option<String>,
    pub content_length: i32,
    pub has_metadata: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub section: Option<String>,
    pub access_level: Option<String>,
    pub document_id: Option<i64>,
    pub chunk_type: Option<ChunkType>,
}

impl VectorStore {
    pub fn new(pool: DbPool, collection: String, dimension: usize) -> Self {
        Self {
            pool,
            collection,
            dimension,
        }
    }

    /// Ensures the collection table exists with the configured dimension; if a
    /// pre-existing table declares a different dimension, it is dropped and
    /// recreated (destructive, logged) along with its payload indexes.
    pub async fn ensure_collection(&self) -> Result<()> {
        let existing_dim: Option<i32> = sqlx::query_scalar(
            r#"SELECT atttypmod FROM pg_attribute
               JOIN pg_class ON pg_class.oid = pg_attribute.attrelid
               WHERE pg_class.relname = $1 AND attname = 'embedding'"#,
        )
        .bind(&self.collection)
        .fetch_optional(self.pool.get_pool())
        .await
        .unwrap_or(None);

        if let Some(dim) = existing_dim {
            if dim as usize != self.dimension {
                warn!(
                    collection = %self.collection,
                    old_dim = dim,
                    new_dim = self.dimension,
                    "vector dimension mismatch, recreating collection (destructive)"
                );
                sqlx::query(&format!("DROP TABLE IF EXISTS {}", self.collection))
                    .execute(self.pool.get_pool())
                    .await?;
            }
        }

        let create_table = format!(
            r#"CREATE TABLE IF NOT EXISTS {table} (
                chunk_id BIGINT PRIMARY KEY,
                document_id BIGINT NOT NULL,
                content TEXT NOT NULL,
                section TEXT NOT NULL,
                access_level TEXT NOT NULL,
                chunk_type TEXT NOT NULL,
                page_number INT,
                section_name TEXT,
                sheet_name TEXT,
                document_name TEXT NOT NULL,
                file_kind TEXT NOT NULL,
                chunk_index INT NOT NULL,
                content_length INT NOT NULL,
                has_images BOOLEAN NOT NULL DEFAULT FALSE,
                uploaded_at TIMESTAMPTZ NOT NULL,
                processed_at TIMESTAMPTZ,
                embedding VECTOR({dim}) NOT NULL
            )"#,
            table = self.collection,
            dim = self.dimension
        );
        sqlx::query(&create_table).execute(self.pool.get_pool()).await?;

        for (name, column) in [
            ("section", "section"),
            ("access_level", "access_level"),
            ("document_id", "document_id"),
            ("chunk_type", "chunk_type"),
        ] {
            let idx_name = format!("idx_{}_{}", self.collection, name);
            let sql = format!(
                "CREATE INDEX IF NOT EXISTS {idx_name} ON {table} ({column})",
                idx_name = idx_name,
                table = self.collection,
                column = column
            );
            sqlx::query(&sql).execute(self.pool.get_pool()).await?;
        }

        let cosine_idx = format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_embedding ON {table} USING ivfflat (embedding vector_cosine_ops)",
            table = self.collection
        );
        let _ = sqlx::query(&cosine_idx).execute(self.pool.get_pool()).await;

        info!(collection = %self.collection, dimension = self.dimension, "vector collection ready");
        Ok(())
    }

    /// Write path (§4.4): upsert in sub-batches of at most 100, clamped to
    /// MAX_CHUNKS_FOR_VECTOR_STORE points per document as a safety cap.
    pub async fn upsert_points(&self, points: Vec<VectorPoint>) -> Result<usize> {
        let clamped: Vec<_> = points.into_iter().take(MAX_CHUNKS_FOR_VECTOR_STORE).collect();
        let total = clamped.len();

        for batch in clamped.chunks(UPSERT_SUB_BATCH) {
            let mut tx = self.pool.get_pool().begin().await?;
            for point in batch {
                let sql = format!(
                    r#"INSERT INTO {table}
                        (chunk_id, document_id, content, section, access_level, chunk_type,
                         page_number, section_name, sheet_name, document_name, file_kind,
                         chunk_index, content_length, has_images, uploaded_at, processed_at, embedding)
                       VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17)
                       ON CONFLICT (chunk_id) DO UPDATE SET
                        content = EXCLUDED.content, embedding = EXCLUDED.embedding"#,
                    table = self.collection
                );
                sqlx::query(&sql)
                    .bind(point.chunk_id)
                    .bind(point.payload.document_id)
                    .bind(&point.payload.content)
                    .bind(&point.payload.section)
                    .bind(&point.payload.access_level)
                    .bind(chunk_type_str(point.payload.chunk_type))
                    .bind(point.payload.page_number)
                    .bind(&point.payload.section_name)
                    .bind(&point.payload.sheet_name)
                    .bind(&point.payload.document_name)
                    .bind(&point.payload.file_kind)
                    .bind(point.payload.chunk_index)
                    .bind(point.payload.content_length)
                    .bind(point.payload.has_images)
                    .bind(point.payload.uploaded_at)
                    .bind(point.payload.processed_at)
                    .bind(Vector::from(point.vector.clone()))
                    .execute(&mut *tx)
                    .await
                    .context("upsert vector point")?;
            }
            tx.commit().await?;
        }

        Ok(total)
    }

    /// Delete path (§4.4): scroll by payload filter and remove matching points;
    /// failure is logged, never propagated to block the caller.
    pub async fn delete_by_document(&self, document_id: i64) {
        let sql = format!("DELETE FROM {} WHERE document_id = $1", self.collection);
        if let Err(e) = sqlx::query(&sql)
            .bind(document_id)
            .execute(self.pool.get_pool())
            .await
        {
            warn!(document_id, error = %e, "vector delete failed, continuing");
        }
    }

    /// Raw filtered cosine search, pre-smart-filter. Returns up to `limit` rows
    /// above `threshold`, used as a building block by the retrieval engine's passes.
    pub async fn search(
        &self,
        query_vector: &[f32],
        filter: &SearchFilter,
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let mut sql = format!(
            r#"SELECT chunk_id, document_id, content, section, access_level, chunk_type,
                      page_number, section_name, content_length,
                      1 - (embedding <=> $1) AS score
               FROM {table} WHERE 1=1"#,
            table = self.collection
        );
        let mut idx = 2;
        let mut binds_section = None;
        let mut binds_access = None;
        let mut binds_doc = None;
        let mut binds_type = None;

        if filter.section.is_some() {
            sql.push_str(&format!(" AND section = ${}", idx));
            binds_section = filter.section.clone();
            idx += 1;
        }
        if filter.access_level.is_some() {
            sql.push_str(&format!(" AND access_level = ${}", idx));
            binds_access = filter.access_level.clone();
            idx += 1;
        }
        if filter.document_id.is_some() {
            sql.push_str(&format!(" AND document_id = ${}", idx));
            binds_doc = filter.document_id;
            idx += 1;
        }
        if filter.chunk_type.is_some() {
            sql.push_str(&format!(" AND chunk_type = ${}", idx));
            binds_type = filter.chunk_type.map(chunk_type_str);
            idx += 1;
        }

        sql.push_str(&format!(" ORDER BY embedding <=> $1 LIMIT ${}", idx));

        let mut query = sqlx::query(&sql).bind(Vector::from(query_vector.to_vec()));
        if let Some(v) = binds_section {
            query = query.bind(v);
        }
        if let Some(v) = binds_access {
            query = query.bind(v);
        }
        if let Some(v) = binds_doc {
            query = query.bind(v);
        }
        if let Some(v) = binds_type {
            query = query.bind(v);
        }
        query = query.bind(limit as i64);

        let rows = query.fetch_all(self.pool.get_pool()).await?;

        let chunks = rows
            .into_iter()
            .map(|row| ScoredChunk {
                chunk_id: row.get("chunk_id"),
                document_id: row.get("document_id"),
                content: row.get("content"),
                score: row.get::<f32, _>("score"),
                section: row.get("section"),
                access_level: row.get("access_level"),
                chunk_type: chunk_type_from_str(row.get("chunk_type")),
                page_number: row.get("page_number"),
                section_name: row.get("section_name"),
                content_length: row.get("content_length"),
                has_metadata: row.get::<i32, _>("content_length") > 0,
            })
            .filter(|c| c.score >= threshold)
            .collect();

        Ok(chunks)
    }

    /// Search followed by the smart-filter-and-rank pass (§4.5), the adapter's
    /// single implementation of the post-search quality gate.
    pub async fn search_and_rank(
        &self,
        query_vector: &[f32],
        filter: &SearchFilter,
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let raw = self.search(query_vector, filter, threshold, limit * 2).await?;
        Ok(smart_filter_and_rank(raw, threshold, limit))
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

fn chunk_type_str(t: ChunkType) -> &'static str {
    match t {
        ChunkType::Text => "text",
        ChunkType::Table => "table",
        ChunkType::Slide => "slide",
        ChunkType::Notes => "notes",
        ChunkType::ImageText => "image_text",
        ChunkType::Error => "error",
    }
}

fn chunk_type_from_str(s: String) -> ChunkType {
    match s.as_str() {
        "table" => ChunkType::Table,
        "slide" => ChunkType::Slide,
        "notes" => ChunkType::Notes,
        "image_text" => ChunkType::ImageText,
        "error" => ChunkType::Error,
        _ => ChunkType::Text,
    }
}

/// Smart filter and rank (§4.5), applied once, inside the adapter. The single
/// implementation resolves the duplicated-3-chunk-rule open question (§9).
pub fn smart_filter_and_rank(
    mut chunks: Vec<ScoredChunk>,
    requested_threshold: f32,
    limit: usize,
) -> Vec<ScoredChunk> {
    chunks.retain(|c| c.content_length >= 20);
    chunks.retain(|c| c.score >= requested_threshold * 0.9);
    chunks.retain(|c| special_char_ratio(&c.content) <= 0.30);

    chunks.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    use std::collections::HashMap;
    let mut per_document: HashMap<i64, usize> = HashMap::new();
    chunks.retain(|c| {
        let count = per_document.entry(c.document_id).or_insert(0);
        if *count >= 3 {
            false
        } else {
            *count += 1;
            true
        }
    });

    let mut scored: Vec<(f32, ScoredChunk)> = chunks
        .into_iter()
        .map(|c| {
            let length_bonus = if (100..=500).contains(&c.content_length) {
                0.10
            } else if c.content_length > 500 {
                -0.05
            } else {
                0.0
            };
            let type_bonus = if matches!(c.chunk_type, ChunkType::Text) { 0.05 } else { 0.0 };
            let metadata_bonus = if c.has_metadata { 0.02 } else { 0.0 };
            let quality = c.score + length_bonus + type_bonus + metadata_bonus;
            (quality, c)
        })
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().take(limit).map(|(_, c)| c).collect()
}

fn special_char_ratio(content: &str) -> f32 {
    let graphemes: Vec<&str> = content.graphemes(true).collect();
    if graphemes.is_empty() {
        return 0.0;
    }
    let special = graphemes
        .iter()
        .filter(|g| !g.chars().all(|c| c.is_alphanumeric() || c.is_whitespace()))
        .count();
    special as f32 / graphemes.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(doc: i64, score: f32, len: i32) -> ScoredChunk {
        ScoredChunk {
            chunk_id: doc * 100,
            document_id: doc,
            content: "x".repeat(len as usize),
            score,
            section: "procedures".into(),
            access_level: "full".into(),
            chunk_type: ChunkType::Text,
            page_number: None,
            section_name: None,
            content_length: len,
            has_metadata: false,
        }
    }

    #[test]
    fn drops_short_content() {
        let chunks = vec![chunk(1, 0.9, 5)];
        let out = smart_filter_and_rank(chunks, 0.5, 10);
        assert!(out.is_empty());
    }

    #[test]
    fn drops_below_threshold() {
        let chunks = vec![chunk(1, 0.4, 100)];
        let out = smart_filter_and_rank(chunks, 0.5, 10);
        assert!(out.is_empty());
    }

    #[test]
    fn caps_three_per_document() {
        let chunks = vec![
            chunk(1, 0.9, 100),
            chunk(1, 0.85, 100),
            chunk(1, 0.8, 100),
            chunk(1, 0.75, 100),
        ];
        let out = smart_filter_and_rank(chunks, 0.5, 10);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn special_char_ratio_filters_garbage() {
        let mut c = chunk(1, 0.9, 100);
        c.content = "!@#$%^&*()".repeat(10);
        let out = smart_filter_and_rank(vec![c], 0.5, 10);
        assert!(out.is_empty());
    }
}
