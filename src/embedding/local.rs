//! In-process embedding provider backed by fastembed ONNX models.
//!
//! The model is loaded once at startup. Inference is CPU-bound and
//! serialized per model instance behind a mutex; encode calls run on
//! the blocking thread pool so the async scheduler keeps making
//! progress while a batch encodes.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use crate::config::EmbeddingConfig;
use crate::domain::Embedding;
use crate::error::{Error, Result};
use crate::ports::EmbeddingProvider;

use super::{adapt_dimension, dedup_batch, replicate};

/// Maps a configured model name onto a fastembed model.
fn parse_model(name: &str) -> Result<EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "all-minilm-l12-v2" => Ok(EmbeddingModel::AllMiniLML12V2),
        "bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1.5" => Ok(EmbeddingModel::NomicEmbedTextV15),
        other => Err(Error::validation(format!(
            "unknown local embedding model '{other}'"
        ))),
    }
}

/// Local embedding adapter.
pub struct FastembedProvider {
    model: Arc<Mutex<TextEmbedding>>,
    model_name: String,
    native_dimension: usize,
    dimension: usize,
}

impl std::fmt::Debug for FastembedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastembedProvider")
            .field("model", &self.model_name)
            .field("native_dimension", &self.native_dimension)
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl FastembedProvider {
    /// Loads the configured model.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an unknown model name, an
    /// [`Error::EmbeddingDimension`] when the model's native dimension
    /// exceeds the configured storage dimension (padding widens, it
    /// never truncates), or [`Error::Embedding`] when model
    /// initialization fails.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_kind = parse_model(&config.model)?;

        let native_dimension = TextEmbedding::list_supported_models()
            .into_iter()
            .find(|info| info.model == model_kind)
            .map(|info| info.dim)
            .ok_or_else(|| {
                Error::Embedding(format!("no model metadata for '{}'", config.model))
            })?;

        if native_dimension > config.dimension {
            return Err(Error::EmbeddingDimension {
                expected: config.dimension,
                actual: native_dimension,
            });
        }

        let model =
            TextEmbedding::try_new(InitOptions::new(model_kind).with_show_download_progress(false))
                .map_err(|e| Error::Embedding(format!("failed to load local model: {e}")))?;

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            model_name: config.model.clone(),
            native_dimension,
            dimension: config.dimension,
        })
    }

    /// Runs one encode batch on the blocking pool.
    async fn encode(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let model = Arc::clone(&self.model);
        tokio::task::spawn_blocking(move || {
            let mut guard = model
                .lock()
                .map_err(|_| Error::Embedding("embedding model mutex poisoned".to_string()))?;
            guard
                .embed(texts, None)
                .map_err(|e| Error::Embedding(format!("local inference failed: {e}")))
        })
        .await
        .map_err(|e| Error::internal(format!("embedding task join failed: {e}")))?
    }
}

#[async_trait]
impl EmbeddingProvider for FastembedProvider {
    fn name(&self) -> &'static str {
        "fastembed"
    }

    fn model(&self) -> &str {
        &self.model_name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let mut vectors = self.encode(vec![text.to_string()]).await?;
        let raw = vectors
            .pop()
            .ok_or_else(|| Error::Embedding("empty inference output".to_string()))?;
        let embedding = Embedding::new(raw)
            .map_err(|e| Error::Embedding(format!("model produced invalid vector: {e}")))?;
        adapt_dimension(embedding, self.dimension)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let (unique, positions) = dedup_batch(texts);
        let vectors = self.encode(unique.clone()).await?;
        if vectors.len() != unique.len() {
            return Err(Error::Embedding(format!(
                "model returned {} vectors for {} inputs",
                vectors.len(),
                unique.len()
            )));
        }

        let embeddings: Vec<Embedding> = vectors
            .into_iter()
            .map(|raw| {
                let embedding = Embedding::new(raw)
                    .map_err(|e| Error::Embedding(format!("model produced invalid vector: {e}")))?;
                adapt_dimension(embedding, self.dimension)
            })
            .collect::<Result<_>>()?;

        replicate(&embeddings, &positions)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_known_model_names_parse() {
        assert!(parse_model("all-minilm-l6-v2").is_ok());
        assert!(parse_model("bge-small-en-v1.5").is_ok());
        assert!(parse_model("made-up-model").is_err());
    }
}
