//! Port interfaces: the abstract contracts orchestrators depend on.
//!
//! Concrete adapters (Postgres store, embedding providers, LLM
//! providers, cache backends) implement these traits and translate
//! their infrastructure failures into the [`crate::error::Error`]
//! taxonomy at this boundary — no infrastructure-specific error type
//! ever crosses a port.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};

use crate::domain::{
    ChunkId, Conversation, ConversationChunk, ConversationId, Embedding, SearchResults,
};
use crate::error::Result;
use crate::llm::message::{ChatRequest, ChatResponse};

/// Conversation aggregate persistence.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Persists the aggregate (conversation row plus all chunk rows)
    /// in one transaction and returns it with store-assigned ids.
    /// Partial success is impossible.
    async fn save(&self, conversation: Conversation) -> Result<Conversation>;

    /// Loads the aggregate with its chunks eagerly (no N+1).
    async fn get_by_id(&self, id: ConversationId) -> Result<Option<Conversation>>;

    /// Pages conversations by `created_at` descending. `limit` is
    /// capped at 1000 by the caller's validation.
    async fn list(&self, skip: u64, limit: u64) -> Result<Vec<Conversation>>;

    /// Deletes the conversation and, via cascade, its chunks. Returns
    /// `false` when the id did not exist.
    async fn delete(&self, id: ConversationId) -> Result<bool>;

    /// Whether the conversation exists.
    async fn exists(&self, id: ConversationId) -> Result<bool>;

    /// Total number of conversations.
    async fn count(&self) -> Result<u64>;
}

/// Chunk-level persistence, used for embedding backfill.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Loads a conversation's chunks ordered by `order_index`.
    async fn get_by_conversation(&self, id: ConversationId) -> Result<Vec<ConversationChunk>>;

    /// Fills a chunk's embedding in place. Returns `false` when the
    /// chunk does not exist.
    async fn update_embedding(&self, chunk_id: ChunkId, embedding: &Embedding) -> Result<bool>;

    /// Chunks persisted without an embedding (candidates for retry).
    async fn get_chunks_missing_embeddings(&self) -> Result<Vec<ConversationChunk>>;
}

/// Approximate nearest-neighbour search over chunk embeddings.
#[async_trait]
pub trait VectorSearch: Send + Sync {
    /// Returns the `k` nearest chunks with scores, ordered by score
    /// descending with deterministic tie-breaks.
    async fn similarity_search(&self, query: &Embedding, k: usize) -> Result<SearchResults>;

    /// Same, with the threshold pushed into the store as a distance
    /// bound `d <= 1/threshold - 1`.
    async fn similarity_search_with_threshold(
        &self,
        query: &Embedding,
        threshold: f64,
        k: usize,
    ) -> Result<SearchResults>;
}

/// Text-to-vector embedding generation.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name (e.g., `"fastembed"`, `"openai"`).
    fn name(&self) -> &'static str;

    /// Model identifier, part of cache keys.
    fn model(&self) -> &str;

    /// Output dimension after any configured padding.
    fn dimension(&self) -> usize;

    /// Embeds a single text.
    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// Embeds a batch, preserving input-to-output positional
    /// correspondence regardless of internal sub-batching.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>>;
}

/// A stream of text deltas from a generating LLM.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Chat-completion generation.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name (e.g., `"openai"`, `"azure"`).
    fn name(&self) -> &'static str;

    /// Configured model identifier.
    fn model(&self) -> &str;

    /// Cheap configuration check used by health probes; makes no call.
    fn validate_config(&self) -> Result<()>;

    /// Executes a chat completion request.
    async fn generate(&self, request: &ChatRequest) -> Result<ChatResponse>;

    /// Executes a streaming chat completion request.
    async fn generate_stream(&self, request: &ChatRequest) -> Result<TextStream>;
}

/// Cache operation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups that found a live entry.
    pub hits: u64,
    /// Lookups that found nothing (or an expired entry).
    pub misses: u64,
    /// Entries currently held.
    pub size: u64,
    /// Entries evicted by capacity pressure.
    pub evictions: u64,
}

/// Advisory byte cache.
///
/// Methods are infallible by contract: backend failures are logged by
/// the adapter and reported as misses / no-ops, never as errors. Every
/// cached value must be recomputable by the caller.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Looks up a value. Expired entries count as misses.
    async fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Stores a value. `None` TTL means no expiry.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>);

    /// Removes one key. Returns whether it was present.
    async fn delete(&self, key: &str) -> bool;

    /// Removes keys matching a glob pattern (e.g. `"search:*"`).
    /// Returns the number removed.
    async fn delete_matching(&self, pattern: &str) -> u64;

    /// Drops every entry.
    async fn clear(&self);

    /// Current counters.
    async fn stats(&self) -> CacheStats;
}
