//! Composition root: explicit wiring, lifecycle, health checks.
//!
//! No DI container — adapters are built once from configuration,
//! threaded into the orchestrators, and the assembled [`AppContext`]
//! is handed to the transports by reference.

use std::sync::Arc;
use std::time::Instant;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use tracing::{info, warn};

use crate::cache::create_cache;
use crate::config::{AppConfig, EmbeddingProviderKind};
use crate::embedding::{create_embedder, with_cache};
use crate::error::{Error, Result};
use crate::ingest::IngestService;
use crate::llm::create_provider;
use crate::ports::{Cache, ChunkStore, ConversationStore, EmbeddingProvider, LlmProvider};
use crate::rag::RagService;
use crate::search::SearchService;
use crate::storage::PgStore;

/// Health of one component.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    /// Whether the probe succeeded.
    pub healthy: bool,
    /// Probe round-trip time.
    pub latency_ms: u64,
    /// Failure detail, when unhealthy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ComponentHealth {
    fn from_result(started: Instant, result: Result<()>) -> Self {
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match result {
            Ok(()) => Self {
                healthy: true,
                latency_ms,
                detail: None,
            },
            Err(e) => Self {
                healthy: false,
                latency_ms,
                detail: Some(e.to_string()),
            },
        }
    }
}

/// Component-wise health report.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Overall status: every critical component healthy.
    pub healthy: bool,
    /// Store connectivity (round-trip query).
    pub storage: ComponentHealth,
    /// Embedding provider (cheap probe; config-only for remote).
    pub embedding: ComponentHealth,
    /// LLM provider (configuration validation, no call).
    pub llm: ComponentHealth,
    /// Cache set/get round-trip.
    pub cache: ComponentHealth,
}

/// The assembled application.
pub struct AppContext {
    /// Resolved configuration.
    pub config: AppConfig,
    store: Arc<PgStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LlmProvider>,
    cache: Arc<dyn Cache>,
    /// Ingest orchestrator.
    pub ingest: Arc<IngestService>,
    /// Search orchestrator.
    pub search: Arc<SearchService>,
    /// RAG orchestrator.
    pub rag: Arc<RagService>,
    metrics_handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("embedder", &self.embedder.name())
            .field("llm", &self.llm.name())
            .finish()
    }
}

impl AppContext {
    /// Builds every adapter and orchestrator from configuration,
    /// connects the store, and applies the schema.
    ///
    /// # Errors
    ///
    /// Fails on misconfiguration, an unreachable store, or a local
    /// embedding model that cannot be loaded. An unreachable
    /// distributed cache is not fatal (falls back to in-process).
    pub async fn init(config: AppConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let metrics_handle = match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                // A second init in the same process (tests) hits this;
                // metrics just stay on the first recorder.
                warn!(error = %e, "prometheus recorder not installed");
                None
            }
        };

        let store = Arc::new(PgStore::connect(&config.storage, config.embedding.dimension).await?);
        store.migrate().await?;

        let cache = create_cache(&config.cache).await;

        let base_embedder = create_embedder(&config.embedding)?;
        let embedder = with_cache(
            base_embedder,
            Arc::clone(&cache),
            config.cache.ttl_embedding,
        );

        let llm = create_provider(&config.llm)?;

        let conversation_store: Arc<dyn ConversationStore> = store.clone();

        let ingest = Arc::new(IngestService::new(
            Arc::clone(&conversation_store),
            Arc::clone(&embedder),
            Arc::clone(&cache),
            crate::chunking::ChunkParams::default(),
            config.partial_embeddings,
            config.request_timeout,
        ));

        let search = Arc::new(SearchService::new(
            Arc::clone(&embedder),
            store.clone(),
            Arc::clone(&cache),
            config.cache.ttl_search,
            config.request_timeout,
        ));

        let rag = Arc::new(RagService::new(
            Arc::clone(&search),
            Arc::clone(&llm),
            Arc::clone(&cache),
            config.rag,
            config.llm.clone(),
            config.cache.ttl_rag,
            config.request_timeout,
        ));

        info!(
            embedder = embedder.name(),
            llm = llm.name(),
            dimension = config.embedding.dimension,
            "application context initialized"
        );

        Ok(Arc::new(Self {
            config,
            store,
            embedder,
            llm,
            cache,
            ingest,
            search,
            rag,
            metrics_handle,
        }))
    }

    /// The conversation store port.
    #[must_use]
    pub fn conversations(&self) -> Arc<dyn ConversationStore> {
        self.store.clone()
    }

    /// The chunk store port.
    #[must_use]
    pub fn chunks(&self) -> Arc<dyn ChunkStore> {
        self.store.clone()
    }

    /// Rendered Prometheus metrics, when the recorder owns this
    /// process's metrics.
    #[must_use]
    pub fn render_metrics(&self) -> String {
        self.metrics_handle
            .as_ref()
            .map(PrometheusHandle::render)
            .unwrap_or_default()
    }

    /// Probes every component.
    pub async fn health(&self) -> HealthReport {
        let started = Instant::now();
        let storage = ComponentHealth::from_result(started, self.store.ping().await);

        let started = Instant::now();
        let embedding_result = match self.config.embedding.provider {
            // Remote probes are config-only to avoid paid calls.
            EmbeddingProviderKind::Remote => {
                if self.embedder.model().is_empty() {
                    Err(Error::validation("embedding model is not configured"))
                } else {
                    Ok(())
                }
            }
            EmbeddingProviderKind::Local => self.embedder.embed("health probe").await.map(|_| ()),
        };
        let embedding = ComponentHealth::from_result(started, embedding_result);

        let started = Instant::now();
        let llm = ComponentHealth::from_result(started, self.llm.validate_config());

        let started = Instant::now();
        let cache_result = if self.config.cache.enabled {
            let key = "health:v1:probe";
            self.cache
                .set(key, b"ok".to_vec(), Some(std::time::Duration::from_secs(5)))
                .await;
            match self.cache.get(key).await.as_deref() {
                Some(b"ok") => Ok(()),
                _ => Err(Error::Cache("set/get round-trip failed".to_string())),
            }
        } else {
            // Disabled cache is healthy by definition.
            Ok(())
        };
        let cache = ComponentHealth::from_result(started, cache_result);

        HealthReport {
            healthy: storage.healthy && embedding.healthy && llm.healthy && cache.healthy,
            storage,
            embedding,
            llm,
            cache,
        }
    }

    /// Drains in-flight work and closes connections.
    pub async fn shutdown(&self) {
        info!("shutting down");
        self.store.close().await;
    }
}
