//! OpenAI-compatible remote embedding provider.
//!
//! Batches are split into sub-batches below the provider maximum and
//! issued with bounded parallelism; result order is reassembled to
//! match input order. Transport errors and rate-limit signals are
//! retried with exponential backoff and jitter; authentication and
//! validation failures are not.

use std::sync::Arc;
use std::time::Duration;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_trait::async_trait;
use rand::Rng;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::config::EmbeddingConfig;
use crate::domain::Embedding;
use crate::error::{Error, Result};
use crate::ports::EmbeddingProvider;

use super::{adapt_dimension, dedup_batch, replicate};

/// Provider-side limit on texts per request.
const MAX_SUB_BATCH: usize = 2048;
/// Retry attempts per sub-batch.
const MAX_ATTEMPTS: u32 = 3;
/// First backoff delay.
const BACKOFF_BASE: Duration = Duration::from_secs(1);
/// Backoff ceiling.
const BACKOFF_CAP: Duration = Duration::from_secs(10);

/// Remote embedding adapter over the `async-openai` client.
pub struct OpenAiEmbeddingProvider {
    client: Client<OpenAIConfig>,
    model: String,
    dimension: usize,
    concurrency: usize,
}

impl std::fmt::Debug for OpenAiEmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbeddingProvider")
            .field("model", &self.model)
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl OpenAiEmbeddingProvider {
    /// Creates the provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when no API key is configured.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .ok_or_else(|| Error::validation("remote embedding provider requires an API key"))?;

        let mut openai_config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(base_url) = &config.base_url {
            openai_config = openai_config.with_api_base(base_url);
        }

        Ok(Self {
            client: Client::with_config(openai_config),
            model: config.model.clone(),
            dimension: config.dimension,
            concurrency: config.concurrency.max(1),
        })
    }

    /// Whether the failure is worth retrying: transport errors and
    /// rate-limit / server-side signals, never authentication or
    /// request validation failures.
    fn is_retryable(error: &OpenAIError) -> bool {
        match error {
            OpenAIError::Reqwest(_) => true,
            OpenAIError::ApiError(api) => {
                let type_retryable = matches!(
                    api.r#type.as_deref(),
                    Some("server_error" | "rate_limit_error" | "overloaded_error")
                );
                let code_retryable =
                    matches!(api.code.as_deref(), Some("rate_limit_exceeded" | "server_error"));
                type_retryable || code_retryable
            }
            _ => false,
        }
    }

    /// Backoff before retry `attempt` (1-based): doubling from 1 s,
    /// capped at 10 s, plus up to 50% uniform jitter.
    fn backoff(attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        let capped = BACKOFF_BASE.saturating_mul(factor).min(BACKOFF_CAP);
        let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 2);
        capped + Duration::from_millis(jitter_ms)
    }

    /// Issues one sub-batch with retry.
    async fn embed_sub_batch(&self, texts: Vec<String>) -> Result<Vec<Embedding>> {
        let expected = texts.len();
        let request = CreateEmbeddingRequestArgs::default()
            .model(self.model.clone())
            .input(EmbeddingInput::StringArray(texts))
            .build()
            .map_err(|e| Error::Embedding(format!("embedding request build failed: {e}")))?;

        let mut attempt: u32 = 0;
        let response = loop {
            attempt += 1;
            match self.client.embeddings().create(request.clone()).await {
                Ok(response) => break response,
                Err(e) if attempt < MAX_ATTEMPTS && Self::is_retryable(&e) => {
                    let delay = Self::backoff(attempt);
                    warn!(
                        attempt,
                        max_attempts = MAX_ATTEMPTS,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "embedding request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(Error::Embedding(format!(
                        "embedding request failed after {attempt} attempt(s): {e}"
                    )));
                }
            }
        };

        if response.data.len() != expected {
            return Err(Error::Embedding(format!(
                "provider returned {} embeddings for {expected} inputs",
                response.data.len()
            )));
        }

        // The API tags each vector with its input index; order by it
        // rather than trusting response order.
        let mut ordered: Vec<Option<Embedding>> = vec![None; expected];
        for item in response.data {
            let index = item.index as usize;
            let slot = ordered
                .get_mut(index)
                .ok_or_else(|| Error::Embedding(format!("embedding index {index} out of range")))?;
            let embedding = Embedding::new(item.embedding)
                .map_err(|e| Error::Embedding(format!("provider returned invalid vector: {e}")))?;
            *slot = Some(adapt_dimension(embedding, self.dimension)?);
        }
        ordered
            .into_iter()
            .map(|slot| slot.ok_or_else(|| Error::Embedding("missing embedding index".to_string())))
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let mut batch = self.embed_sub_batch(vec![text.to_string()]).await?;
        batch
            .pop()
            .ok_or_else(|| Error::Embedding("empty embedding response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let (unique, positions) = dedup_batch(texts);

        // Sub-batches run in parallel, bounded by the configured
        // concurrency; results land at fixed offsets so ordering is
        // independent of completion order.
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::new();
        for (batch_index, sub) in unique.chunks(MAX_SUB_BATCH).enumerate() {
            let offset = batch_index * MAX_SUB_BATCH;
            let sub = sub.to_vec();
            let semaphore = Arc::clone(&semaphore);
            handles.push(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|e| Error::internal(format!("semaphore closed: {e}")))?;
                let embeddings = self.embed_sub_batch(sub).await?;
                Ok::<_, Error>((offset, embeddings))
            });
        }

        let mut unique_embeddings: Vec<Option<Embedding>> = vec![None; unique.len()];
        for outcome in futures_util::future::join_all(handles).await {
            let (offset, embeddings) = outcome?;
            for (i, embedding) in embeddings.into_iter().enumerate() {
                let slot = unique_embeddings
                    .get_mut(offset + i)
                    .ok_or_else(|| Error::internal("sub-batch offset out of range"))?;
                *slot = Some(embedding);
            }
        }

        let unique_embeddings: Vec<Embedding> = unique_embeddings
            .into_iter()
            .map(|slot| slot.ok_or_else(|| Error::internal("unfilled sub-batch slot")))
            .collect::<Result<_>>()?;

        replicate(&unique_embeddings, &positions)
    }
}
