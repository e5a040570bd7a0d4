//! Error taxonomy for the whole pipeline.
//!
//! Adapters translate infrastructure failures into these kinds at the
//! adapter boundary; orchestrators enrich context and re-raise; only the
//! transport layer maps kinds to HTTP status codes.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed error carried across every port and orchestrator.
///
/// Each variant corresponds to one surface-visible kind. Messages are
/// human-readable and never contain secrets, stack traces, or raw
/// infrastructure error text beyond what the adapter chose to keep.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed request or out-of-range parameter. Surfaces as 400.
    #[error("validation: {0}")]
    Validation(String),

    /// Referenced entity does not exist. Surfaces as 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// Store failure. `transient` distinguishes retryable conditions
    /// (connection, pool timeout) from permanent ones (constraint
    /// violation). Surfaces as 503 when transient, 500 otherwise.
    #[error("storage: {message}")]
    Storage {
        /// What failed.
        message: String,
        /// Whether a retry is likely to succeed.
        transient: bool,
    },

    /// Embedding provider unavailable or rate-limited. Surfaces as 503.
    #[error("embedding: {0}")]
    Embedding(String),

    /// Embedding dimension does not match the configured storage
    /// dimension. Surfaces as 503.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingDimension {
        /// Configured storage dimension `D`.
        expected: usize,
        /// Dimension actually produced.
        actual: usize,
    },

    /// LLM provider failure. Surfaces as 503.
    #[error("llm: {0}")]
    Llm(String),

    /// Cache failure. Never surfaces to callers; logged and treated as
    /// a miss. The variant exists so cache adapters can report internal
    /// problems to their own logging path.
    #[error("cache: {0}")]
    Cache(String),

    /// Programmer error or invariant violation. Surfaces as 500.
    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// Builds a `Validation` error from anything displayable.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Builds a `NotFound` error from anything displayable.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Builds a transient `Storage` error.
    pub fn storage_transient(msg: impl Into<String>) -> Self {
        Self::Storage {
            message: msg.into(),
            transient: true,
        }
    }

    /// Builds a permanent `Storage` error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage {
            message: msg.into(),
            transient: false,
        }
    }

    /// Builds an `Internal` error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable kind label used in logs and error payloads.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Storage { .. } => "storage",
            Self::Embedding(_) => "embedding",
            Self::EmbeddingDimension { .. } => "embedding_dimension",
            Self::Llm(_) => "llm",
            Self::Cache(_) => "cache",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        let transient = matches!(
            e,
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
        );
        match e {
            sqlx::Error::RowNotFound => Self::NotFound("row not found".to_string()),
            other => Self::Storage {
                message: other.to_string(),
                transient,
            },
        }
    }
}
