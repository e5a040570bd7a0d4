//! MCP tool parameter types.
//!
//! Input schemas for MCP tools, using `schemars` for the JSON Schema
//! generation the protocol requires. These mirror the HTTP DTOs but
//! stay independent so the tool surface can evolve separately.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `search_conversations` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchParams {
    /// Search query text.
    pub query: String,

    /// Number of results to return (1–50, default 5).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,

    /// Minimum relevance score (0.0–1.0, default 0.7).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
}

/// One transcript message within an ingested conversation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MessageParam {
    /// Author display name.
    pub author_name: String,

    /// Author kind: `"human"`, `"assistant"`, or `"system"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_type: Option<String>,

    /// Message text.
    pub text: String,

    /// RFC 3339 timestamp, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Parameters for the `ingest_conversation` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IngestParams {
    /// Scenario label for the conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_title: Option<String>,

    /// Title of the original transcript.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_title: Option<String>,

    /// Link back to the transcript source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Ordered transcript messages.
    pub messages: Vec<MessageParam>,
}

/// Parameters for the `get_conversations` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ListParams {
    /// Number of conversations to skip.
    #[serde(default)]
    pub skip: Option<u64>,

    /// Page size (1–1000, default 100).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

/// Parameters for the `get_conversation` and `delete_conversation`
/// tools.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GetConversationParams {
    /// Conversation id.
    pub id: i64,
}

/// Parameters for the `rag_ask` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RagAskParams {
    /// The question to answer from ingested conversations.
    pub query: String,

    /// Number of sources to retrieve (default 5).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,

    /// Minimum relevance score for sources (default 0.7).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
}
