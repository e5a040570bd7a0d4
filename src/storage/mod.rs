//! Postgres + pgvector storage adapter.
//!
//! `PgStore` implements the three storage-facing ports:
//! [`ConversationStore`], [`ChunkStore`], and [`VectorSearch`]. It is
//! the only place row shapes appear — entity construction stays
//! explicit, and every query goes through the shared connection pool.
//!
//! Aggregate saves are transactional: the conversation row and all of
//! its chunk rows commit together or not at all. Deletes cascade to
//! chunks through the foreign key.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use crate::config::StorageConfig;
use crate::domain::{
    AuthorInfo, AuthorType, ChunkId, ChunkText, Conversation, ConversationChunk, ConversationId,
    Embedding, RelevanceScore, SearchHit, SearchResults,
};
use crate::error::{Error, Result};
use crate::ports::{ChunkStore, ConversationStore, VectorSearch};

/// Upper bound accepted for `list` page sizes.
pub const MAX_LIST_LIMIT: u64 = 1000;

/// IVFFlat list count; suitable for corpora up to about a million
/// vectors.
const IVFFLAT_LISTS: u32 = 100;

/// Storage adapter over a shared Postgres pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    dimension: usize,
}

impl PgStore {
    /// Connects the pool.
    ///
    /// The pool is sized `pool_size + overflow`: sqlx exposes a single
    /// upper bound, so the configured overflow is folded into it while
    /// `pool_size` becomes the kept-warm minimum.
    pub async fn connect(config: &StorageConfig, dimension: usize) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size + config.overflow)
            .min_connections(config.pool_size.min(2))
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect(&config.url)
            .await?;
        info!(
            max_connections = config.pool_size + config.overflow,
            "storage pool connected"
        );
        Ok(Self { pool, dimension })
    }

    /// Wraps an existing pool (tests, composition root reuse).
    #[must_use]
    pub fn from_pool(pool: PgPool, dimension: usize) -> Self {
        Self { pool, dimension }
    }

    /// Applies the schema. Idempotent.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS conversations (
                id             SERIAL PRIMARY KEY,
                scenario_title TEXT,
                original_title TEXT,
                url            TEXT,
                created_at     TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS conversation_chunks (
                id              SERIAL PRIMARY KEY,
                conversation_id INT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                order_index     INT NOT NULL,
                chunk_text      TEXT NOT NULL,
                embedding       VECTOR({dimension}),
                author_name     TEXT,
                author_type     VARCHAR(16),
                "timestamp"     TIMESTAMPTZ,
                UNIQUE(conversation_id, order_index)
            )
            "#,
            dimension = self.dimension
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS ix_chunks_conversation_id
             ON conversation_chunks(conversation_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS ix_chunks_embedding
             ON conversation_chunks USING ivfflat (embedding vector_l2_ops)
             WITH (lists = {IVFFLAT_LISTS})"
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS ix_conversations_created
             ON conversations(created_at)",
        )
        .execute(&self.pool)
        .await?;

        info!(dimension = self.dimension, "schema migrated");
        Ok(())
    }

    /// Round-trip connectivity probe for health checks.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Closes the pool, waiting for checked-out connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn vector_of(&self, embedding: &Embedding) -> Result<Vector> {
        if embedding.dimension() != self.dimension {
            return Err(Error::EmbeddingDimension {
                expected: self.dimension,
                actual: embedding.dimension(),
            });
        }
        Ok(Vector::from(embedding.as_slice().to_vec()))
    }
}

/// Maps a chunk row. The embedding column is nullable; a stored vector
/// that fails validation indicates corruption and surfaces as
/// `Internal`.
fn chunk_from_row(row: &PgRow) -> Result<ConversationChunk> {
    let id: i64 = row.try_get::<i32, _>("id").map(i64::from)?;
    let conversation_id: i64 = row.try_get::<i32, _>("conversation_id").map(i64::from)?;
    let order_index: i32 = row.try_get("order_index")?;
    let text: String = row.try_get("chunk_text")?;
    let raw_embedding: Option<Vector> = row.try_get("embedding")?;
    let author_name: Option<String> = row.try_get("author_name")?;
    let author_type: Option<String> = row.try_get("author_type")?;
    let timestamp: Option<DateTime<Utc>> = row.try_get("timestamp")?;

    let embedding = raw_embedding
        .map(|v| {
            Embedding::new(v.to_vec())
                .map_err(|e| Error::internal(format!("stored embedding for chunk {id} invalid: {e}")))
        })
        .transpose()?;

    let order_index = u32::try_from(order_index)
        .map_err(|_| Error::internal(format!("chunk {id} has negative order_index")))?;

    Ok(ConversationChunk {
        id: Some(ChunkId(id)),
        conversation_id: Some(ConversationId(conversation_id)),
        order_index,
        text: ChunkText::new(text)
            .map_err(|e| Error::internal(format!("stored text for chunk {id} invalid: {e}")))?,
        embedding,
        author: AuthorInfo::new(
            author_name.unwrap_or_default(),
            AuthorType::parse(author_type.as_deref().unwrap_or("system")),
        ),
        timestamp,
    })
}

const CHUNK_COLUMNS: &str = r#"id, conversation_id, order_index, chunk_text, embedding,
    author_name, author_type, "timestamp""#;

#[async_trait]
impl ConversationStore for PgStore {
    async fn save(&self, conversation: Conversation) -> Result<Conversation> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "INSERT INTO conversations (scenario_title, original_title, url)
             VALUES ($1, $2, $3)
             RETURNING id, created_at",
        )
        .bind(&conversation.scenario_title)
        .bind(&conversation.original_title)
        .bind(&conversation.url)
        .fetch_one(&mut *tx)
        .await?;
        let conversation_id: i32 = row.try_get("id")?;
        let created_at: DateTime<Utc> = row.try_get("created_at")?;

        let scenario_title = conversation.scenario_title.clone();
        let original_title = conversation.original_title.clone();
        let url = conversation.url.clone();

        let mut saved_chunks = Vec::with_capacity(conversation.chunk_count());
        for chunk in conversation.into_chunks() {
            let vector = chunk
                .embedding
                .as_ref()
                .map(|e| self.vector_of(e))
                .transpose()?;

            let chunk_row = sqlx::query(
                r#"INSERT INTO conversation_chunks
                   (conversation_id, order_index, chunk_text, embedding,
                    author_name, author_type, "timestamp")
                   VALUES ($1, $2, $3, $4, $5, $6, $7)
                   RETURNING id"#,
            )
            .bind(conversation_id)
            .bind(i32::try_from(chunk.order_index).map_err(|_| {
                Error::validation(format!("order_index {} out of range", chunk.order_index))
            })?)
            .bind(chunk.text.as_str())
            .bind(vector)
            .bind(&chunk.author.name)
            .bind(chunk.author.kind.as_str())
            .bind(chunk.timestamp)
            .fetch_one(&mut *tx)
            .await?;
            let chunk_id: i32 = chunk_row.try_get("id")?;

            saved_chunks.push(ConversationChunk {
                id: Some(ChunkId(i64::from(chunk_id))),
                conversation_id: Some(ConversationId(i64::from(conversation_id))),
                ..chunk
            });
        }

        tx.commit().await?;
        debug!(
            conversation_id,
            chunks = saved_chunks.len(),
            "conversation persisted"
        );

        Conversation::from_store(
            ConversationId(i64::from(conversation_id)),
            scenario_title,
            original_title,
            url,
            created_at,
            saved_chunks,
        )
    }

    async fn get_by_id(&self, id: ConversationId) -> Result<Option<Conversation>> {
        let Some(row) = sqlx::query(
            "SELECT id, scenario_title, original_title, url, created_at
             FROM conversations WHERE id = $1",
        )
        .bind(i32::try_from(id.0).map_err(|_| Error::not_found(format!("conversation {id}")))?)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let chunks = self.get_by_conversation(id).await?;

        Conversation::from_store(
            id,
            row.try_get("scenario_title")?,
            row.try_get("original_title")?,
            row.try_get("url")?,
            row.try_get("created_at")?,
            chunks,
        )
        .map(Some)
    }

    async fn list(&self, skip: u64, limit: u64) -> Result<Vec<Conversation>> {
        if limit == 0 || limit > MAX_LIST_LIMIT {
            return Err(Error::validation(format!(
                "limit must be in [1, {MAX_LIST_LIMIT}]"
            )));
        }

        let rows = sqlx::query(
            "SELECT id, scenario_title, original_title, url, created_at
             FROM conversations
             ORDER BY created_at DESC, id DESC
             OFFSET $1 LIMIT $2",
        )
        .bind(i64::try_from(skip).map_err(|_| Error::validation("skip out of range"))?)
        .bind(i64::try_from(limit).map_err(|_| Error::validation("limit out of range"))?)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        // One query for every page's chunks instead of N+1.
        let ids: Vec<i32> = rows
            .iter()
            .map(|r| r.try_get::<i32, _>("id"))
            .collect::<std::result::Result<_, _>>()?;
        let chunk_rows = sqlx::query(&format!(
            "SELECT {CHUNK_COLUMNS}
             FROM conversation_chunks
             WHERE conversation_id = ANY($1)
             ORDER BY conversation_id, order_index"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_conversation: std::collections::HashMap<i64, Vec<ConversationChunk>> =
            std::collections::HashMap::new();
        for row in &chunk_rows {
            let chunk = chunk_from_row(row)?;
            let conversation_id = chunk
                .conversation_id
                .ok_or_else(|| Error::internal("chunk row without conversation_id"))?;
            by_conversation.entry(conversation_id.0).or_default().push(chunk);
        }

        let mut conversations = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i32 = row.try_get("id")?;
            let chunks = by_conversation.remove(&i64::from(id)).unwrap_or_default();
            if chunks.is_empty() {
                // A conversation without chunks violates the aggregate
                // invariant; skip it rather than failing the page.
                debug!(conversation_id = id, "skipping chunkless conversation row");
                continue;
            }
            conversations.push(Conversation::from_store(
                ConversationId(i64::from(id)),
                row.try_get("scenario_title")?,
                row.try_get("original_title")?,
                row.try_get("url")?,
                row.try_get("created_at")?,
                chunks,
            )?);
        }
        Ok(conversations)
    }

    async fn delete(&self, id: ConversationId) -> Result<bool> {
        let Ok(id) = i32::try_from(id.0) else {
            return Ok(false);
        };
        let result = sqlx::query("DELETE FROM conversations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn exists(&self, id: ConversationId) -> Result<bool> {
        let Ok(id) = i32::try_from(id.0) else {
            return Ok(false);
        };
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM conversations WHERE id = $1) AS present")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("present")?)
    }

    async fn count(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM conversations")
            .fetch_one(&self.pool)
            .await?;
        let total: i64 = row.try_get("total")?;
        Ok(u64::try_from(total).unwrap_or(0))
    }
}

#[async_trait]
impl ChunkStore for PgStore {
    async fn get_by_conversation(&self, id: ConversationId) -> Result<Vec<ConversationChunk>> {
        let Ok(conversation_id) = i32::try_from(id.0) else {
            return Ok(Vec::new());
        };
        let rows = sqlx::query(&format!(
            "SELECT {CHUNK_COLUMNS}
             FROM conversation_chunks
             WHERE conversation_id = $1
             ORDER BY order_index"
        ))
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(chunk_from_row).collect()
    }

    async fn update_embedding(&self, chunk_id: ChunkId, embedding: &Embedding) -> Result<bool> {
        let vector = self.vector_of(embedding)?;
        let Ok(id) = i32::try_from(chunk_id.0) else {
            return Ok(false);
        };
        let result = sqlx::query("UPDATE conversation_chunks SET embedding = $2 WHERE id = $1")
            .bind(id)
            .bind(vector)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_chunks_missing_embeddings(&self) -> Result<Vec<ConversationChunk>> {
        let rows = sqlx::query(&format!(
            "SELECT {CHUNK_COLUMNS}
             FROM conversation_chunks
             WHERE embedding IS NULL
             ORDER BY conversation_id, order_index"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(chunk_from_row).collect()
    }
}

#[async_trait]
impl VectorSearch for PgStore {
    async fn similarity_search(&self, query: &Embedding, k: usize) -> Result<SearchResults> {
        let vector = self.vector_of(query)?;
        let rows = sqlx::query(&format!(
            "SELECT {CHUNK_COLUMNS}, embedding <-> $1 AS distance
             FROM conversation_chunks
             WHERE embedding IS NOT NULL
             ORDER BY embedding <-> $1
             LIMIT $2"
        ))
        .bind(&vector)
        .bind(i64::try_from(k).map_err(|_| Error::validation("k out of range"))?)
        .fetch_all(&self.pool)
        .await?;

        rows_to_hits(&rows).map(SearchResults::ranked)
    }

    async fn similarity_search_with_threshold(
        &self,
        query: &Embedding,
        threshold: f64,
        k: usize,
    ) -> Result<SearchResults> {
        if threshold <= 0.0 {
            return self.similarity_search(query, k).await;
        }
        // score = 1/(1+d) >= t  <=>  d <= 1/t - 1
        let max_distance = 1.0 / threshold - 1.0;
        let vector = self.vector_of(query)?;
        let rows = sqlx::query(&format!(
            "SELECT {CHUNK_COLUMNS}, embedding <-> $1 AS distance
             FROM conversation_chunks
             WHERE embedding IS NOT NULL AND embedding <-> $1 <= $3
             ORDER BY embedding <-> $1
             LIMIT $2"
        ))
        .bind(&vector)
        .bind(i64::try_from(k).map_err(|_| Error::validation("k out of range"))?)
        .bind(max_distance)
        .fetch_all(&self.pool)
        .await?;

        rows_to_hits(&rows).map(SearchResults::ranked)
    }
}

/// Converts raw distance rows into scored hits.
fn rows_to_hits(rows: &[PgRow]) -> Result<Vec<SearchHit>> {
    rows.iter()
        .map(|row| {
            let chunk = chunk_from_row(row)?;
            let distance: f64 = row.try_get("distance")?;
            let score = RelevanceScore::from_distance(distance)
                .map_err(|e| Error::internal(format!("bad distance from store: {e}")))?;
            Ok(SearchHit { chunk, score })
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_pushdown_bound() {
        // score >= 0.7 corresponds to distance <= 3/7.
        let threshold: f64 = 0.7;
        let bound = 1.0 / threshold - 1.0;
        assert!((bound - 3.0 / 7.0).abs() < 1e-12);
        let boundary_score = RelevanceScore::from_distance(bound).unwrap();
        assert!(boundary_score.meets(threshold - 1e-9));
    }

}
