//! Embedding provider adapters.
//!
//! Two variants behind [`EmbeddingProvider`](crate::ports::EmbeddingProvider):
//! an in-process ONNX model ([`local::FastembedProvider`]) and an
//! OpenAI-compatible API ([`remote::OpenAiEmbeddingProvider`]). The
//! factory selects by configuration. [`CachedEmbeddingProvider`] wraps
//! either with per-text caching so identical texts across requests are
//! embedded once.
//!
//! Shared batch semantics, regardless of variant:
//! - input-to-output positional correspondence is preserved
//! - identical text within one batch is embedded once and the result
//!   replicated for the duplicate positions
//! - a native dimension smaller than the configured storage dimension
//!   is zero-padded up; truncation is forbidden

#[cfg(feature = "local-embeddings")]
pub mod local;
pub mod remote;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::cache::{NS_EMBEDDING, cache_key};
use crate::config::{EmbeddingConfig, EmbeddingProviderKind};
use crate::domain::Embedding;
use crate::error::{Error, Result};
use crate::ports::{Cache, EmbeddingProvider};

pub use remote::OpenAiEmbeddingProvider;

/// Builds the configured embedding provider.
///
/// # Errors
///
/// Returns [`Error::Validation`] for an unknown local model or a remote
/// configuration without an API key, and [`Error::Embedding`] when the
/// local model fails to initialize.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider {
        EmbeddingProviderKind::Local => {
            #[cfg(feature = "local-embeddings")]
            {
                Ok(Arc::new(local::FastembedProvider::new(config)?))
            }
            #[cfg(not(feature = "local-embeddings"))]
            {
                Err(Error::validation(
                    "local embedding provider requires the 'local-embeddings' feature",
                ))
            }
        }
        EmbeddingProviderKind::Remote => Ok(Arc::new(OpenAiEmbeddingProvider::new(config)?)),
    }
}

/// Wraps a provider with the embedding cache.
#[must_use]
pub fn with_cache(
    inner: Arc<dyn EmbeddingProvider>,
    cache: Arc<dyn Cache>,
    ttl: Duration,
) -> Arc<dyn EmbeddingProvider> {
    Arc::new(CachedEmbeddingProvider { inner, cache, ttl })
}

/// Deduplicates a batch, preserving first-occurrence order.
///
/// Returns the unique texts and, for each original position, the index
/// of its unique text.
#[must_use]
pub(crate) fn dedup_batch(texts: &[String]) -> (Vec<String>, Vec<usize>) {
    let mut unique: Vec<String> = Vec::new();
    let mut seen: HashMap<&str, usize> = HashMap::new();
    let mut positions = Vec::with_capacity(texts.len());
    for text in texts {
        let index = *seen.entry(text.as_str()).or_insert_with(|| {
            unique.push(text.clone());
            unique.len() - 1
        });
        positions.push(index);
    }
    (unique, positions)
}

/// Expands per-unique results back to the original batch positions.
pub(crate) fn replicate(unique: &[Embedding], positions: &[usize]) -> Result<Vec<Embedding>> {
    positions
        .iter()
        .map(|&i| {
            unique
                .get(i)
                .cloned()
                .ok_or_else(|| Error::internal("embedding batch reassembly index out of range"))
        })
        .collect()
}

/// Validates a provider result against the configured storage dimension,
/// zero-padding a smaller native dimension.
pub(crate) fn adapt_dimension(embedding: Embedding, dimension: usize) -> Result<Embedding> {
    embedding.zero_padded(dimension)
}

/// Caching decorator: per-text lookup, misses forwarded to the inner
/// provider as one batch, results reassembled in original order.
///
/// Cache values are the raw `Vec<f32>` JSON-encoded; a decode failure
/// is treated as a miss.
pub struct CachedEmbeddingProvider {
    inner: Arc<dyn EmbeddingProvider>,
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl CachedEmbeddingProvider {
    fn key(&self, text: &str) -> String {
        cache_key(NS_EMBEDDING, &[self.inner.name(), self.inner.model(), text])
    }

    async fn lookup(&self, text: &str) -> Option<Embedding> {
        let bytes = self.cache.get(&self.key(text)).await?;
        match serde_json::from_slice::<Vec<f32>>(&bytes).map(Embedding::new) {
            Ok(Ok(embedding)) if embedding.dimension() == self.inner.dimension() => Some(embedding),
            _ => {
                debug!("undecodable embedding cache entry treated as miss");
                None
            }
        }
    }

    async fn store(&self, text: &str, embedding: &Embedding) {
        if let Ok(bytes) = serde_json::to_vec(embedding.as_slice()) {
            self.cache.set(&self.key(text), bytes, Some(self.ttl)).await;
        }
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbeddingProvider {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        if let Some(hit) = self.lookup(text).await {
            return Ok(hit);
        }
        let embedding = self.inner.embed(text).await?;
        self.store(text, &embedding).await;
        Ok(embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut resolved: Vec<Option<Embedding>> = Vec::with_capacity(texts.len());
        let mut miss_texts: Vec<String> = Vec::new();
        for text in texts {
            let hit = self.lookup(text).await;
            if hit.is_none() {
                miss_texts.push(text.clone());
            }
            resolved.push(hit);
        }

        if !miss_texts.is_empty() {
            let fresh = self.inner.embed_batch(&miss_texts).await?;
            if fresh.len() != miss_texts.len() {
                return Err(Error::Embedding(format!(
                    "provider returned {} embeddings for {} texts",
                    fresh.len(),
                    miss_texts.len()
                )));
            }
            let mut fresh_iter = miss_texts.iter().zip(fresh);
            for slot in &mut resolved {
                if slot.is_none() {
                    let (text, embedding) = fresh_iter
                        .next()
                        .ok_or_else(|| Error::internal("embedding cache merge underflow"))?;
                    self.store(text, &embedding).await;
                    *slot = Some(embedding);
                }
            }
        }

        resolved
            .into_iter()
            .map(|slot| slot.ok_or_else(|| Error::internal("unresolved embedding slot")))
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic fake provider counting how many texts it embeds.
    struct CountingProvider {
        dimension: usize,
        embedded: AtomicUsize,
    }

    impl CountingProvider {
        fn new(dimension: usize) -> Self {
            Self {
                dimension,
                embedded: AtomicUsize::new(0),
            }
        }

        fn vector_for(&self, text: &str) -> Embedding {
            let mut values = vec![0.0f32; self.dimension];
            for (i, byte) in text.bytes().enumerate() {
                values[i % self.dimension] += f32::from(byte) / 255.0;
            }
            Embedding::new(values).unwrap()
        }
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn model(&self) -> &str {
            "counting-model"
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        async fn embed(&self, text: &str) -> Result<Embedding> {
            self.embedded.fetch_add(1, Ordering::SeqCst);
            Ok(self.vector_for(text))
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
            self.embedded.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts.iter().map(|t| self.vector_for(t)).collect())
        }
    }

    #[test]
    fn test_dedup_preserves_positions() {
        let texts = vec![
            "a".to_string(),
            "b".to_string(),
            "a".to_string(),
            "c".to_string(),
            "b".to_string(),
        ];
        let (unique, positions) = dedup_batch(&texts);
        assert_eq!(unique, vec!["a", "b", "c"]);
        assert_eq!(positions, vec![0, 1, 0, 2, 1]);

        let embeddings: Vec<Embedding> = unique
            .iter()
            .enumerate()
            .map(|(i, _)| Embedding::new(vec![i as f32 + 1.0]).unwrap())
            .collect();
        let replicated = replicate(&embeddings, &positions).unwrap();
        assert_eq!(replicated[0], replicated[2]);
        assert_eq!(replicated[1], replicated[4]);
        assert_ne!(replicated[0], replicated[3]);
    }

    #[tokio::test]
    async fn test_cached_embed_hits_second_time() {
        let provider = Arc::new(CountingProvider::new(4));
        let cache = Arc::new(MemoryCache::new(100));
        let cached = with_cache(provider.clone(), cache, Duration::from_secs(60));

        let first = cached.embed("hello world").await.unwrap();
        let second = cached.embed("hello world").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(provider.embedded.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cached_batch_only_forwards_misses() {
        let provider = Arc::new(CountingProvider::new(4));
        let cache = Arc::new(MemoryCache::new(100));
        let cached = with_cache(provider.clone(), cache, Duration::from_secs(60));

        cached.embed("warm").await.unwrap();
        let batch = vec!["warm".to_string(), "cold".to_string(), "warm".to_string()];
        let result = cached.embed_batch(&batch).await.unwrap();

        assert_eq!(result.len(), 3);
        assert_eq!(result[0], result[2]);
        // "warm" was served from cache; only "cold" reached the provider.
        assert_eq!(provider.embedded.load(Ordering::SeqCst), 2);
    }
}
