//! Semantic search orchestrator.
//!
//! Pipeline per request: validate → cache lookup → embed query → ANN
//! search (oversampled when filters are present) → score threshold and
//! filter → deterministic ranking → truncate → cache store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::cache::{NS_SEARCH, cache_key};
use crate::domain::{AuthorInfo, AuthorType, SearchHit};
use crate::error::{Error, Result};
use crate::ports::{Cache, EmbeddingProvider, VectorSearch};

/// Maximum characters accepted in a query.
pub const MAX_QUERY_CHARS: usize = 1000;
/// Maximum `top_k` accepted.
pub const MAX_TOP_K: usize = 50;
/// Relevance threshold applied when the request does not set one.
pub const DEFAULT_MIN_SCORE: f64 = 0.7;

/// Optional post-retrieval filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Overrides the default relevance threshold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
    /// Keep only chunks by this author name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    /// Keep only chunks by this author kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_type: Option<AuthorType>,
    /// Keep only chunks timestamped within `[from, to]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_from: Option<DateTime<Utc>>,
    /// Upper bound of the date filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_to: Option<DateTime<Utc>>,
}

impl SearchFilters {
    fn matches(&self, hit: &SearchHit) -> bool {
        if let Some(name) = &self.author_name
            && hit.chunk.author.name != *name
        {
            return false;
        }
        if let Some(kind) = self.author_type
            && hit.chunk.author.kind != kind
        {
            return false;
        }
        if let Some(from) = self.date_from {
            match hit.chunk.timestamp {
                Some(ts) if ts >= from => {}
                _ => return false,
            }
        }
        if let Some(to) = self.date_to {
            match hit.chunk.timestamp {
                Some(ts) if ts <= to => {}
                _ => return false,
            }
        }
        true
    }
}

fn default_top_k() -> usize {
    5
}

/// A search request.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    /// Query text, 1..=1000 characters after trimming.
    pub query: String,
    /// Number of results wanted, 1..=50. Defaults to 5.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Optional filters.
    #[serde(default)]
    pub filters: Option<SearchFilters>,
    /// Skip both cache read and write.
    #[serde(default)]
    pub cache_bypass: bool,
}

/// One result row, flattened for transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultItem {
    /// Owning conversation.
    pub conversation_id: i64,
    /// Chunk identifier.
    pub chunk_id: i64,
    /// Chunk text.
    pub text: String,
    /// Relevance score in [0, 1].
    pub score: f64,
    /// Chunk author.
    pub author: AuthorInfo,
    /// Chunk timestamp, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A search response.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    /// Ranked results.
    pub results: Vec<SearchResultItem>,
    /// Number of results.
    pub result_count: usize,
    /// Wall-clock time spent.
    pub duration_ms: u64,
    /// Whether the response came from cache.
    pub cache_hit: bool,
}

/// Validates and normalizes a query string.
///
/// # Errors
///
/// Returns [`Error::Validation`] when empty after trimming or longer
/// than [`MAX_QUERY_CHARS`].
pub fn validate_query(query: &str) -> Result<String> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("query must not be empty"));
    }
    let chars = trimmed.chars().count();
    if chars > MAX_QUERY_CHARS {
        return Err(Error::validation(format!(
            "query is {chars} characters, maximum is {MAX_QUERY_CHARS}"
        )));
    }
    Ok(trimmed.to_string())
}

/// Search orchestrator.
pub struct SearchService {
    embedder: Arc<dyn EmbeddingProvider>,
    vector_search: Arc<dyn VectorSearch>,
    cache: Arc<dyn Cache>,
    cache_ttl: Duration,
    io_timeout: Duration,
}

impl SearchService {
    /// Wires the orchestrator.
    #[must_use]
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        vector_search: Arc<dyn VectorSearch>,
        cache: Arc<dyn Cache>,
        cache_ttl: Duration,
        io_timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            vector_search,
            cache,
            cache_ttl,
            io_timeout,
        }
    }

    /// Executes a search.
    #[instrument(skip(self, request), fields(top_k = request.top_k))]
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        let started = Instant::now();
        metrics::counter!("recollect_search_requests_total").increment(1);

        let query = validate_query(&request.query)?;
        if request.top_k == 0 || request.top_k > MAX_TOP_K {
            return Err(Error::validation(format!(
                "top_k must be in [1, {MAX_TOP_K}]"
            )));
        }

        let key = self.request_key(&query, &request)?;
        if !request.cache_bypass
            && let Some(bytes) = self.cache.get(&key).await
        {
            if let Ok(results) = serde_json::from_slice::<Vec<SearchResultItem>>(&bytes) {
                metrics::counter!("recollect_search_cache_hits_total").increment(1);
                return Ok(SearchResponse {
                    result_count: results.len(),
                    results,
                    duration_ms: duration_ms(started),
                    cache_hit: true,
                });
            }
            debug!("undecodable search cache entry treated as miss");
        }

        let embedding = tokio::time::timeout(self.io_timeout, self.embedder.embed(&query))
            .await
            .map_err(|_| Error::Embedding("query embedding timed out".to_string()))??;

        // Oversample when filters will drop results post-retrieval.
        let fetch_k = if request.filters.is_some() {
            (request.top_k * 2).max(request.top_k + 10)
        } else {
            request.top_k
        };

        let hits = tokio::time::timeout(
            self.io_timeout,
            self.vector_search.similarity_search(&embedding, fetch_k),
        )
        .await
        .map_err(|_| Error::storage_transient("vector search timed out"))??;

        let filters = request.filters.clone().unwrap_or_default();
        let min_score = filters.min_score.unwrap_or(DEFAULT_MIN_SCORE);

        let results: Vec<SearchResultItem> = hits
            .above(min_score)
            .into_hits()
            .into_iter()
            .filter(|hit| filters.matches(hit))
            .take(request.top_k)
            .map(item_from_hit)
            .collect::<Result<_>>()?;

        if !request.cache_bypass
            && let Ok(bytes) = serde_json::to_vec(&results)
        {
            self.cache.set(&key, bytes, Some(self.cache_ttl)).await;
        }

        Ok(SearchResponse {
            result_count: results.len(),
            results,
            duration_ms: duration_ms(started),
            cache_hit: false,
        })
    }

    /// Cache key over the full logical input, including the embedding
    /// model so a model change invalidates naturally.
    fn request_key(&self, query: &str, request: &SearchRequest) -> Result<String> {
        let filters = serde_json::to_string(&request.filters)
            .map_err(|e| Error::internal(format!("filters serialization failed: {e}")))?;
        Ok(cache_key(
            NS_SEARCH,
            &[
                query,
                &request.top_k.to_string(),
                &filters,
                self.embedder.name(),
                self.embedder.model(),
            ],
        ))
    }
}

fn item_from_hit(hit: SearchHit) -> Result<SearchResultItem> {
    let conversation_id = hit
        .chunk
        .conversation_id
        .ok_or_else(|| Error::internal("search hit without conversation_id"))?;
    let chunk_id = hit
        .chunk
        .id
        .ok_or_else(|| Error::internal("search hit without chunk id"))?;
    Ok(SearchResultItem {
        conversation_id: conversation_id.0,
        chunk_id: chunk_id.0,
        text: hit.chunk.text.as_str().to_string(),
        score: hit.score.value(),
        author: hit.chunk.author,
        timestamp: hit.chunk.timestamp,
    })
}

fn duration_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
