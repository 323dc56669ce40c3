use anyhow::Result;
use flume::{Sender, Receiver, bounded};
use sqlx::PgPool;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::types::ChatTurnLog;

/// Tuning for the background audit writer.
#[derive(Debug, Clone)]
pub struct AuditLoggerConfig {
    /// Max rows held in memory before `log` starts dropping instead of blocking.
    pub queue_capacity: usize,

    /// Rows per `INSERT ... VALUES` statement.
    pub batch_size: usize,

    /// Longest a partial batch waits for more rows before it flushes anyway.
    pub batch_timeout_ms: u64,

    /// Number of independent drain loops, each with its own batch.
    pub worker_count: usize,
}

impl Default for AuditLoggerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            batch_size: 100,
            batch_timeout_ms: 1000,
            worker_count: 2,
        }
    }
}

/// Fire-and-forget writer for per-turn audit rows. Turns never wait on a
/// database round trip for this: `log` enqueues and returns immediately,
/// and a pool of background workers batches rows into `chat_turn_log`.
#[derive(Clone)]
pub struct TurnAuditLogger {
    sender: Sender<ChatTurnLog>,
}

impl TurnAuditLogger {
    pub fn new(pool: PgPool, config: AuditLoggerConfig) -> Self {
        let (sender, receiver) = bounded(config.queue_capacity);

        info!(
            queue_capacity = config.queue_capacity,
            batch_size = config.batch_size,
            batch_timeout_ms = config.batch_timeout_ms,
            worker_count = config.worker_count,
            "starting turn audit logger"
        );

        for worker_id in 0..config.worker_count {
            let pool = pool.clone();
            let receiver = receiver.clone();
            let config = config.clone();

            tokio::spawn(async move {
                Self::worker_loop(worker_id, pool, receiver, config).await;
            });
        }

        Self { sender }
    }

    /// Enqueues a row. Drops it (with a warning) if the queue is full rather
    /// than applying backpressure to the request path.
    pub fn log(&self, entry: ChatTurnLog) {
        if let Err(e) = self.sender.try_send(entry) {
            warn!("audit queue full, dropping turn log: {}", e);
        }
    }

    async fn worker_loop(worker_id: usize, pool: PgPool, receiver: Receiver<ChatTurnLog>, config: AuditLoggerConfig) {
        info!(worker_id, "audit worker started");

        let mut batch: Vec<ChatTurnLog> = Vec::with_capacity(config.batch_size);
        let batch_timeout = Duration::from_millis(config.batch_timeout_ms);

        loop {
            let deadline = tokio::time::Instant::now() + batch_timeout;

            while batch.len() < config.batch_size {
                match tokio::time::timeout_at(deadline, receiver.recv_async()).await {
                    Ok(Ok(entry)) => batch.push(entry),
                    Ok(Err(_)) => {
                        if !batch.is_empty() {
                            Self::flush_batch(&pool, &batch, worker_id).await;
                        }
                        info!(worker_id, "audit worker shutting down, queue closed");
                        return;
                    }
                    Err(_) => break,
                }
            }

            if !batch.is_empty() {
                Self::flush_batch(&pool, &batch, worker_id).await;
                batch.clear();
            } else {
                sleep(Duration::from_millis(100)).await;
            }
        }
    }

    async fn flush_batch(pool: &PgPool, batch: &[ChatTurnLog], worker_id: usize) {
        let start = std::time::Instant::now();
        let batch_len = batch.len();

        match Self::insert_batch(pool, batch).await {
            Ok(inserted) => {
                debug!(
                    worker_id,
                    inserted,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "flushed turn audit batch"
                );
            }
            Err(e) => error!(worker_id, batch_len, error = %e, "failed to insert turn audit batch"),
        }
    }

    async fn insert_batch(pool: &PgPool, logs: &[ChatTurnLog]) -> Result<usize> {
        let mut query_builder = sqlx::QueryBuilder::new(
            r#"
            INSERT INTO chat_turn_log (
                conversation_id, user_id, status, processing_time_ms,
                token_count, similarity_score, error_message, error_type, created_at
            )
            "#,
        );

        query_builder.push_values(logs, |mut b, log| {
            b.push_bind(log.conversation_id)
                .push_bind(log.user_id)
                .push_bind(log.status.as_str())
                .push_bind(log.processing_time_ms)
                .push_bind(log.token_count)
                .push_bind(log.similarity_score)
                .push_bind(&log.error_message)
                .push_bind(&log.error_type)
                .push_bind(log.created_at);
        });

        let query = query_builder.build();
        let result = query.execute(pool).await?;

        Ok(result.rows_affected() as usize)
    }

    pub fn queue_len(&self) -> usize {
        self.sender.len()
    }

    pub fn is_queue_full(&self) -> bool {
        self.sender.is_full()
    }
}
