//! Application configuration with environment variable resolution.
//!
//! Configuration is resolved in order: explicit values → `RECOLLECT_*`
//! environment variables → defaults. Misconfiguration is caught at
//! startup and surfaces as a `Validation` error.

use std::time::Duration;

use crate::error::{Error, Result};

/// Default connection pool size.
const DEFAULT_POOL_SIZE: u32 = 10;
/// Default connection pool overflow on top of the base size.
const DEFAULT_POOL_OVERFLOW: u32 = 20;
/// Default storage dimension `D` for embeddings.
const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;
/// Default local embedding model.
const DEFAULT_LOCAL_EMBEDDING_MODEL: &str = "all-minilm-l6-v2";
/// Default remote embedding model.
const DEFAULT_REMOTE_EMBEDDING_MODEL: &str = "text-embedding-3-small";
/// Default LLM model.
const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";
/// Default sampling temperature.
const DEFAULT_TEMPERATURE: f32 = 0.7;
/// Default generation token budget.
const DEFAULT_MAX_TOKENS: u32 = 1024;
/// Default retrieval depth for RAG.
const DEFAULT_RAG_TOP_K: usize = 5;
/// Default relevance threshold.
const DEFAULT_MIN_SCORE: f64 = 0.7;
/// Default prompt budget for the source block.
const DEFAULT_MAX_CONTEXT_CHARS: usize = 8000;
/// Default in-process cache capacity.
const DEFAULT_CACHE_MAX_SIZE: usize = 10_000;
/// Default embedding cache TTL.
const DEFAULT_TTL_EMBEDDING: Duration = Duration::from_secs(24 * 60 * 60);
/// Default search cache TTL.
const DEFAULT_TTL_SEARCH: Duration = Duration::from_secs(30 * 60);
/// Default RAG answer cache TTL.
const DEFAULT_TTL_RAG: Duration = Duration::from_secs(60 * 60);
/// Default per-call I/O deadline.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
/// Default parallel embedding sub-batches per request.
const DEFAULT_EMBED_CONCURRENCY: usize = 4;

/// Embedding adapter selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingProviderKind {
    /// In-process ONNX model via fastembed.
    Local,
    /// OpenAI-compatible embeddings API.
    Remote,
}

impl EmbeddingProviderKind {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => Err(Error::validation(format!(
                "unknown embedding provider '{other}' (expected 'local' or 'remote')"
            ))),
        }
    }
}

/// LLM adapter selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProviderKind {
    /// OpenAI API.
    OpenAi,
    /// Azure OpenAI deployment.
    Azure,
}

impl LlmProviderKind {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "openai" => Ok(Self::OpenAi),
            "azure" => Ok(Self::Azure),
            "local" => Err(Error::validation(
                "local LLM provider is not supported; configure 'openai' or 'azure'",
            )),
            other => Err(Error::validation(format!(
                "unknown llm provider '{other}' (expected 'openai' or 'azure')"
            ))),
        }
    }
}

/// Cache backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    /// In-process LRU.
    Memory,
    /// Redis-backed distributed cache.
    Distributed,
}

impl CacheBackend {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "memory" => Ok(Self::Memory),
            "distributed" => Ok(Self::Distributed),
            other => Err(Error::validation(format!(
                "unknown cache backend '{other}' (expected 'memory' or 'distributed')"
            ))),
        }
    }
}

/// Relational vector store settings.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Postgres connection string.
    pub url: String,
    /// Base pool size.
    pub pool_size: u32,
    /// Additional connections allowed under load.
    pub overflow: u32,
}

/// Embedding provider settings.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Which adapter to build.
    pub provider: EmbeddingProviderKind,
    /// Model identifier for the selected provider.
    pub model: String,
    /// Storage dimension `D`; smaller native dimensions are zero-padded.
    pub dimension: usize,
    /// API key (remote provider only).
    pub api_key: Option<String>,
    /// Base URL override (remote provider only).
    pub base_url: Option<String>,
    /// Parallel sub-batches per `embed_batch` call.
    pub concurrency: usize,
}

/// LLM provider settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Which adapter to build.
    pub provider: LlmProviderKind,
    /// Model (or Azure deployment) identifier.
    pub model: String,
    /// API key.
    pub api_key: Option<String>,
    /// Base URL override (proxies, Azure endpoint).
    pub base_url: Option<String>,
    /// Default sampling temperature.
    pub temperature: f32,
    /// Default generation token budget.
    pub max_tokens: u32,
}

/// RAG orchestrator defaults.
#[derive(Debug, Clone, Copy)]
pub struct RagConfig {
    /// Sources retrieved per question.
    pub top_k: usize,
    /// Relevance threshold for grounding.
    pub min_score: f64,
    /// Character budget for the source block.
    pub max_context_chars: usize,
}

/// Cache layer settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Master switch; disabled means a no-op cache.
    pub enabled: bool,
    /// Which backend to build.
    pub backend: CacheBackend,
    /// Redis URL (distributed backend only).
    pub url: Option<String>,
    /// Embedding namespace TTL. Zero means no expiry.
    pub ttl_embedding: Duration,
    /// Search namespace TTL. Zero means no expiry.
    pub ttl_search: Duration,
    /// RAG namespace TTL. Zero means no expiry.
    pub ttl_rag: Duration,
    /// In-process LRU capacity in entries.
    pub max_size: usize,
}

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Store settings.
    pub storage: StorageConfig,
    /// Embedding settings.
    pub embedding: EmbeddingConfig,
    /// LLM settings.
    pub llm: LlmConfig,
    /// RAG defaults.
    pub rag: RagConfig,
    /// Cache settings.
    pub cache: CacheConfig,
    /// Persist chunks with null embeddings when a batch partially
    /// fails, instead of failing the whole ingest.
    pub partial_embeddings: bool,
    /// Deadline applied to each provider / store I/O call.
    pub request_timeout: Duration,
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env_string(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| Error::validation(format!("cannot parse {key}='{raw}'"))),
    }
}

fn env_duration_secs(key: &str, default: Duration) -> Result<Duration> {
    Ok(env_parse::<u64>(key)?.map_or(default, Duration::from_secs))
}

impl AppConfig {
    /// Builds configuration from `RECOLLECT_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] on a missing database URL, an
    /// unknown provider/backend name, an unparsable value, or a
    /// remote provider without an API key.
    pub fn from_env() -> Result<Self> {
        let storage = StorageConfig {
            url: env_string("RECOLLECT_DATABASE_URL")
                .ok_or_else(|| Error::validation("RECOLLECT_DATABASE_URL is required"))?,
            pool_size: env_parse("RECOLLECT_POOL_SIZE")?.unwrap_or(DEFAULT_POOL_SIZE),
            overflow: env_parse("RECOLLECT_POOL_OVERFLOW")?.unwrap_or(DEFAULT_POOL_OVERFLOW),
        };

        let embedding_provider = match env_string("RECOLLECT_EMBEDDING_PROVIDER") {
            Some(raw) => EmbeddingProviderKind::parse(&raw)?,
            None => EmbeddingProviderKind::Local,
        };
        let embedding = EmbeddingConfig {
            provider: embedding_provider,
            model: env_string("RECOLLECT_EMBEDDING_MODEL").unwrap_or_else(|| {
                match embedding_provider {
                    EmbeddingProviderKind::Local => DEFAULT_LOCAL_EMBEDDING_MODEL.to_string(),
                    EmbeddingProviderKind::Remote => DEFAULT_REMOTE_EMBEDDING_MODEL.to_string(),
                }
            }),
            dimension: env_parse("RECOLLECT_EMBEDDING_DIMENSION")?
                .unwrap_or(DEFAULT_EMBEDDING_DIMENSION),
            api_key: env_string("RECOLLECT_EMBEDDING_API_KEY")
                .or_else(|| env_string("OPENAI_API_KEY")),
            base_url: env_string("RECOLLECT_EMBEDDING_BASE_URL"),
            concurrency: env_parse("RECOLLECT_EMBED_CONCURRENCY")?
                .unwrap_or(DEFAULT_EMBED_CONCURRENCY),
        };

        let llm = LlmConfig {
            provider: match env_string("RECOLLECT_LLM_PROVIDER") {
                Some(raw) => LlmProviderKind::parse(&raw)?,
                None => LlmProviderKind::OpenAi,
            },
            model: env_string("RECOLLECT_LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            api_key: env_string("RECOLLECT_LLM_API_KEY").or_else(|| env_string("OPENAI_API_KEY")),
            base_url: env_string("RECOLLECT_LLM_BASE_URL"),
            temperature: env_parse("RECOLLECT_LLM_TEMPERATURE")?.unwrap_or(DEFAULT_TEMPERATURE),
            max_tokens: env_parse("RECOLLECT_LLM_MAX_TOKENS")?.unwrap_or(DEFAULT_MAX_TOKENS),
        };

        let rag = RagConfig {
            top_k: env_parse("RECOLLECT_RAG_TOP_K")?.unwrap_or(DEFAULT_RAG_TOP_K),
            min_score: env_parse("RECOLLECT_RAG_MIN_SCORE")?.unwrap_or(DEFAULT_MIN_SCORE),
            max_context_chars: env_parse("RECOLLECT_RAG_MAX_CONTEXT_CHARS")?
                .unwrap_or(DEFAULT_MAX_CONTEXT_CHARS),
        };

        let cache = CacheConfig {
            enabled: env_parse("RECOLLECT_CACHE_ENABLED")?.unwrap_or(true),
            backend: match env_string("RECOLLECT_CACHE_BACKEND") {
                Some(raw) => CacheBackend::parse(&raw)?,
                None => CacheBackend::Memory,
            },
            url: env_string("RECOLLECT_CACHE_URL"),
            ttl_embedding: env_duration_secs(
                "RECOLLECT_CACHE_TTL_EMBEDDING_SECS",
                DEFAULT_TTL_EMBEDDING,
            )?,
            ttl_search: env_duration_secs("RECOLLECT_CACHE_TTL_SEARCH_SECS", DEFAULT_TTL_SEARCH)?,
            ttl_rag: env_duration_secs("RECOLLECT_CACHE_TTL_RAG_SECS", DEFAULT_TTL_RAG)?,
            max_size: env_parse("RECOLLECT_CACHE_MAX_SIZE")?.unwrap_or(DEFAULT_CACHE_MAX_SIZE),
        };

        let config = Self {
            storage,
            embedding,
            llm,
            rag,
            cache,
            partial_embeddings: env_parse("RECOLLECT_PARTIAL_EMBEDDINGS")?.unwrap_or(false),
            request_timeout: env_duration_secs(
                "RECOLLECT_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks shared by `from_env` and tests.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] on inconsistent settings.
    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimension == 0 {
            return Err(Error::validation("embedding dimension must be positive"));
        }
        if self.embedding.provider == EmbeddingProviderKind::Remote
            && self.embedding.api_key.is_none()
        {
            return Err(Error::validation(
                "remote embedding provider requires RECOLLECT_EMBEDDING_API_KEY",
            ));
        }
        if self.llm.api_key.is_none() {
            return Err(Error::validation(
                "llm provider requires RECOLLECT_LLM_API_KEY",
            ));
        }
        if self.cache.enabled
            && self.cache.backend == CacheBackend::Distributed
            && self.cache.url.is_none()
        {
            return Err(Error::validation(
                "distributed cache backend requires RECOLLECT_CACHE_URL",
            ));
        }
        if !(0.0..=1.0).contains(&self.rag.min_score) {
            return Err(Error::validation("rag.min_score must be in [0.0, 1.0]"));
        }
        if self.storage.pool_size == 0 {
            return Err(Error::validation("pool_size must be positive"));
        }
        Ok(())
    }

    /// A configuration suitable for tests: memory cache, small pools,
    /// dummy keys.
    #[must_use]
    pub fn for_tests(dimension: usize) -> Self {
        Self {
            storage: StorageConfig {
                url: "postgres://localhost/recollect_test".to_string(),
                pool_size: 2,
                overflow: 2,
            },
            embedding: EmbeddingConfig {
                provider: EmbeddingProviderKind::Local,
                model: "test-embedder".to_string(),
                dimension,
                api_key: None,
                base_url: None,
                concurrency: 2,
            },
            llm: LlmConfig {
                provider: LlmProviderKind::OpenAi,
                model: "test-model".to_string(),
                api_key: Some("test-key".to_string()),
                base_url: None,
                temperature: DEFAULT_TEMPERATURE,
                max_tokens: DEFAULT_MAX_TOKENS,
            },
            rag: RagConfig {
                top_k: DEFAULT_RAG_TOP_K,
                min_score: DEFAULT_MIN_SCORE,
                max_context_chars: DEFAULT_MAX_CONTEXT_CHARS,
            },
            cache: CacheConfig {
                enabled: true,
                backend: CacheBackend::Memory,
                url: None,
                ttl_embedding: DEFAULT_TTL_EMBEDDING,
                ttl_search: DEFAULT_TTL_SEARCH,
                ttl_rag: DEFAULT_TTL_RAG,
                max_size: 100,
            },
            partial_embeddings: false,
            request_timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parsing() {
        assert_eq!(
            EmbeddingProviderKind::parse("local").unwrap(),
            EmbeddingProviderKind::Local
        );
        assert!(EmbeddingProviderKind::parse("cloud").is_err());
        assert_eq!(LlmProviderKind::parse("azure").unwrap(), LlmProviderKind::Azure);
        assert!(LlmProviderKind::parse("local").is_err());
        assert_eq!(CacheBackend::parse("distributed").unwrap(), CacheBackend::Distributed);
    }

    #[test]
    fn test_test_config_is_valid() {
        AppConfig::for_tests(8).validate().unwrap();
    }

    #[test]
    fn test_validation_catches_inconsistencies() {
        let mut config = AppConfig::for_tests(8);
        config.embedding.dimension = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::for_tests(8);
        config.embedding.provider = EmbeddingProviderKind::Remote;
        config.embedding.api_key = None;
        assert!(config.validate().is_err());

        let mut config = AppConfig::for_tests(8);
        config.cache.backend = CacheBackend::Distributed;
        assert!(config.validate().is_err());

        let mut config = AppConfig::for_tests(8);
        config.rag.min_score = 1.5;
        assert!(config.validate().is_err());
    }
}
