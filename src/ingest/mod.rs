//! Ingestion orchestrator.
//!
//! End-to-end pipeline for one transcript: validate → chunk → embed
//! (batched) → persist atomically → invalidate search caches. A failed
//! embed batch fails the whole ingest unless `partial_embeddings` is
//! configured, in which case chunks that could not be embedded are
//! persisted with a null embedding and enumerated in the response for
//! later backfill.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::cache::{NS_SEARCH, namespace_pattern};
use crate::chunking::{ChunkParams, Message, chunk_messages};
use crate::domain::{Conversation, Embedding};
use crate::error::{Error, Result};
use crate::ports::{Cache, ConversationStore, EmbeddingProvider};

/// An ingestion request.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    /// Scenario label from the ingesting application.
    #[serde(default)]
    pub scenario_title: Option<String>,
    /// Title of the original transcript.
    #[serde(default)]
    pub original_title: Option<String>,
    /// Link back to the transcript source.
    #[serde(default)]
    pub url: Option<String>,
    /// Ordered transcript messages.
    pub messages: Vec<Message>,
}

/// An ingestion response.
#[derive(Debug, Clone, Serialize)]
pub struct IngestResponse {
    /// Store-assigned conversation id.
    pub conversation_id: i64,
    /// Number of chunks persisted.
    pub chunk_count: usize,
    /// Number of chunks persisted with an embedding.
    pub embedding_count: usize,
    /// Wall-clock time spent.
    pub duration_ms: u64,
    /// Order indices of chunks persisted without an embedding
    /// (partial-embeddings mode only).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_chunks: Vec<u32>,
}

/// Ingest orchestrator.
pub struct IngestService {
    store: Arc<dyn ConversationStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    cache: Arc<dyn Cache>,
    chunk_params: ChunkParams,
    partial_embeddings: bool,
    io_timeout: Duration,
}

impl IngestService {
    /// Wires the orchestrator.
    #[must_use]
    pub fn new(
        store: Arc<dyn ConversationStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        cache: Arc<dyn Cache>,
        chunk_params: ChunkParams,
        partial_embeddings: bool,
        io_timeout: Duration,
    ) -> Self {
        Self {
            store,
            embedder,
            cache,
            chunk_params,
            partial_embeddings,
            io_timeout,
        }
    }

    /// Ingests one transcript.
    ///
    /// Not idempotent: ingesting the same transcript twice creates two
    /// conversations. Callers deduplicate externally.
    #[instrument(skip(self, request), fields(messages = request.messages.len()))]
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestResponse> {
        let started = Instant::now();
        metrics::counter!("recollect_ingest_requests_total").increment(1);

        if request.messages.is_empty() {
            return Err(Error::validation("messages must not be empty"));
        }

        // Chunking validates message texts and produces contiguous
        // indices; the aggregate constructor re-checks count bounds.
        let drafts = chunk_messages(&request.messages, &self.chunk_params)?;
        let texts: Vec<String> = drafts
            .iter()
            .map(|c| c.text.as_str().to_string())
            .collect();

        let (embeddings, failed_chunks) = self.embed_texts(&texts).await?;

        let chunks = drafts
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| match embedding {
                Some(e) => chunk.with_embedding(e),
                None => chunk,
            })
            .collect();

        let conversation = Conversation::new(
            request.scenario_title,
            request.original_title,
            request.url,
            chrono::Utc::now(),
            chunks,
        )?;

        let saved = tokio::time::timeout(self.io_timeout, self.store.save(conversation))
            .await
            .map_err(|_| Error::storage_transient("conversation save timed out"))??;

        let conversation_id = saved
            .id
            .ok_or_else(|| Error::internal("store returned conversation without id"))?;

        // Search results are stale the moment the corpus grows.
        // Invalidation problems are logged, never surfaced: the cache
        // is advisory and entries expire on their own.
        let invalidated = self
            .cache
            .delete_matching(&namespace_pattern(NS_SEARCH))
            .await;
        debug!(invalidated, "search cache invalidated after ingest");

        let response = IngestResponse {
            conversation_id: conversation_id.0,
            chunk_count: saved.chunk_count(),
            embedding_count: saved.embedded_count(),
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            failed_chunks,
        };
        info!(
            conversation_id = response.conversation_id,
            chunks = response.chunk_count,
            embedded = response.embedding_count,
            "transcript ingested"
        );
        Ok(response)
    }

    /// Embeds the chunk texts. The whole batch either succeeds, or —
    /// in partial mode — degrades to per-text embedding with failures
    /// recorded by chunk index.
    async fn embed_texts(
        &self,
        texts: &[String],
    ) -> Result<(Vec<Option<Embedding>>, Vec<u32>)> {
        let outcome = tokio::time::timeout(self.io_timeout, self.embedder.embed_batch(texts)).await;

        let error = match outcome {
            Ok(Ok(embeddings)) => {
                if embeddings.len() != texts.len() {
                    return Err(Error::Embedding(format!(
                        "provider returned {} embeddings for {} chunks",
                        embeddings.len(),
                        texts.len()
                    )));
                }
                return Ok((embeddings.into_iter().map(Some).collect(), Vec::new()));
            }
            Ok(Err(e)) => e,
            Err(_) => Error::Embedding("batch embedding timed out".to_string()),
        };

        if self.partial_embeddings {
            warn!(error = %error, "batch embedding failed, degrading to per-chunk embedding");
            self.embed_individually(texts).await
        } else {
            Err(error)
        }
    }

    async fn embed_individually(
        &self,
        texts: &[String],
    ) -> Result<(Vec<Option<Embedding>>, Vec<u32>)> {
        let mut embeddings = Vec::with_capacity(texts.len());
        let mut failed = Vec::new();
        for (index, text) in texts.iter().enumerate() {
            let outcome = tokio::time::timeout(self.io_timeout, self.embedder.embed(text)).await;
            match outcome {
                Ok(Ok(embedding)) => embeddings.push(Some(embedding)),
                Ok(Err(e)) => {
                    warn!(chunk = index, error = %e, "chunk embedding failed, persisting without");
                    embeddings.push(None);
                    failed.push(u32::try_from(index).unwrap_or(u32::MAX));
                }
                Err(_) => {
                    warn!(chunk = index, "chunk embedding timed out, persisting without");
                    embeddings.push(None);
                    failed.push(u32::try_from(index).unwrap_or(u32::MAX));
                }
            }
        }
        Ok((embeddings, failed))
    }
}
