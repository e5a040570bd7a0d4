//! Pluggable LLM providers.
//!
//! Implementations translate the provider-agnostic
//! [`ChatRequest`](message::ChatRequest)/[`ChatResponse`](message::ChatResponse)
//! into provider-specific SDK calls, keeping the RAG orchestrator
//! decoupled from any particular vendor.

pub mod message;
pub mod openai;

use std::sync::Arc;

use crate::config::{LlmConfig, LlmProviderKind};
use crate::error::Result;
use crate::ports::LlmProvider;

pub use message::{ChatMessage, ChatRequest, ChatResponse, Role, TokenUsage};
pub use openai::{AzureOpenAiProvider, OpenAiProvider};

/// Creates an [`LlmProvider`] based on the configured provider kind.
///
/// # Supported providers
///
/// - `openai` — OpenAI-compatible APIs via `async-openai`
/// - `azure` — Azure OpenAI deployments
///
/// # Errors
///
/// Returns [`crate::error::Error::Validation`] on incomplete provider
/// configuration (missing key or endpoint).
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>> {
    match config.provider {
        LlmProviderKind::OpenAi => Ok(Arc::new(OpenAiProvider::new(config)?)),
        LlmProviderKind::Azure => Ok(Arc::new(AzureOpenAiProvider::new(config)?)),
    }
}
