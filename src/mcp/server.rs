//! MCP server implementation.
//!
//! Each tool is a thin translation layer: parameters in, orchestrator
//! call, JSON out. All pipeline logic stays in the orchestrators.

use std::sync::Arc;

use chrono::DateTime;
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{
    CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo,
};
use rmcp::{ErrorData as McpError, ServerHandler, tool, tool_handler, tool_router};
use serde_json::json;

use crate::app::AppContext;
use crate::chunking::Message;
use crate::domain::{AuthorInfo, AuthorType, Conversation, ConversationId};
use crate::error::Error;
use crate::ingest::IngestRequest;
use crate::rag::AskRequest;
use crate::search::{SearchFilters, SearchRequest};

use super::params::{
    GetConversationParams, IngestParams, ListParams, MessageParam, RagAskParams, SearchParams,
};

/// Maps pipeline errors onto MCP error data. Validation and not-found
/// map to invalid-params; everything else is internal.
fn mcp_error(e: Error) -> McpError {
    match e {
        Error::Validation(_) | Error::NotFound(_) => McpError::invalid_params(e.to_string(), None),
        other => McpError::internal_error(other.to_string(), None),
    }
}

fn json_result(value: &impl serde::Serialize) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(format!("serialization error: {e}"), None))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

/// Trims a conversation aggregate for tool output: chunk embeddings are
/// reported by presence, never by value.
fn conversation_json(conversation: &Conversation) -> serde_json::Value {
    json!({
        "id": conversation.id.map(|id| id.0),
        "scenario_title": conversation.scenario_title,
        "original_title": conversation.original_title,
        "url": conversation.url,
        "created_at": conversation.created_at,
        "chunk_count": conversation.chunk_count(),
        "chunks": conversation.chunks().iter().map(|chunk| json!({
            "id": chunk.id.map(|id| id.0),
            "order_index": chunk.order_index,
            "text": chunk.text.as_str(),
            "author": chunk.author,
            "timestamp": chunk.timestamp,
            "has_embedding": chunk.embedding.is_some(),
        })).collect::<Vec<_>>(),
    })
}

fn message_from_param(param: MessageParam, position: usize) -> Result<Message, McpError> {
    let timestamp = param
        .timestamp
        .as_deref()
        .map(|raw| {
            DateTime::parse_from_rfc3339(raw)
                .map(|ts| ts.to_utc())
                .map_err(|e| {
                    McpError::invalid_params(
                        format!("message {position} has invalid timestamp: {e}"),
                        None,
                    )
                })
        })
        .transpose()?;

    Ok(Message {
        author: AuthorInfo::new(
            param.author_name,
            AuthorType::parse(param.author_type.as_deref().unwrap_or("human")),
        ),
        text: param.text,
        timestamp,
    })
}

/// Recollect MCP server.
#[derive(Clone)]
pub struct RecollectMcpServer {
    tool_router: ToolRouter<Self>,
    ctx: Arc<AppContext>,
}

impl RecollectMcpServer {
    /// Creates a new MCP server over an initialized application
    /// context.
    #[must_use]
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self {
            tool_router: Self::tool_router(),
            ctx,
        }
    }

    /// Returns the application context (used by the HTTP transport
    /// factory).
    #[must_use]
    pub fn context(&self) -> Arc<AppContext> {
        Arc::clone(&self.ctx)
    }
}

#[tool_router]
impl RecollectMcpServer {
    #[tool(
        name = "search_conversations",
        description = "Semantic search over ingested conversations. Returns chunks ranked by relevance score with conversation ids, authors, and timestamps."
    )]
    async fn search_conversations(
        &self,
        Parameters(params): Parameters<SearchParams>,
    ) -> Result<CallToolResult, McpError> {
        let filters = params.min_score.map(|min_score| SearchFilters {
            min_score: Some(min_score),
            ..SearchFilters::default()
        });
        let response = self
            .ctx
            .search
            .search(SearchRequest {
                query: params.query,
                top_k: params.top_k.unwrap_or(5),
                filters,
                cache_bypass: false,
            })
            .await
            .map_err(mcp_error)?;
        json_result(&response)
    }

    #[tool(
        name = "ingest_conversation",
        description = "Ingest a transcripted conversation: chunks the messages, generates embeddings, and persists everything atomically. Returns the new conversation id and chunk counts."
    )]
    async fn ingest_conversation(
        &self,
        Parameters(params): Parameters<IngestParams>,
    ) -> Result<CallToolResult, McpError> {
        let messages = params
            .messages
            .into_iter()
            .enumerate()
            .map(|(i, m)| message_from_param(m, i))
            .collect::<Result<Vec<_>, _>>()?;

        let response = self
            .ctx
            .ingest
            .ingest(IngestRequest {
                scenario_title: params.scenario_title,
                original_title: params.original_title,
                url: params.url,
                messages,
            })
            .await
            .map_err(mcp_error)?;
        json_result(&response)
    }

    #[tool(
        name = "get_conversations",
        description = "List ingested conversations, newest first, with pagination."
    )]
    async fn get_conversations(
        &self,
        Parameters(params): Parameters<ListParams>,
    ) -> Result<CallToolResult, McpError> {
        let store = self.ctx.conversations();
        let page = store
            .list(params.skip.unwrap_or(0), params.limit.unwrap_or(100))
            .await
            .map_err(mcp_error)?;
        let total = store.count().await.map_err(mcp_error)?;
        let listing = json!({
            "total": total,
            "conversations": page.iter().map(conversation_json).collect::<Vec<_>>(),
        });
        json_result(&listing)
    }

    #[tool(
        name = "get_conversation",
        description = "Fetch one conversation with all of its chunks by id."
    )]
    async fn get_conversation(
        &self,
        Parameters(params): Parameters<GetConversationParams>,
    ) -> Result<CallToolResult, McpError> {
        let conversation = self
            .ctx
            .conversations()
            .get_by_id(ConversationId(params.id))
            .await
            .map_err(mcp_error)?
            .ok_or_else(|| {
                McpError::invalid_params(format!("conversation {} not found", params.id), None)
            })?;
        json_result(&conversation_json(&conversation))
    }

    #[tool(
        name = "delete_conversation",
        description = "Delete a conversation and all of its chunks by id."
    )]
    async fn delete_conversation(
        &self,
        Parameters(params): Parameters<GetConversationParams>,
    ) -> Result<CallToolResult, McpError> {
        let deleted = self
            .ctx
            .conversations()
            .delete(ConversationId(params.id))
            .await
            .map_err(mcp_error)?;
        json_result(&json!({ "deleted": deleted, "id": params.id }))
    }

    #[tool(
        name = "rag_ask",
        description = "Answer a question grounded in ingested conversations. Retrieves relevant chunks, asks the LLM with [Source N] citation instructions, and returns the answer with sources and a confidence score."
    )]
    async fn rag_ask(
        &self,
        Parameters(params): Parameters<RagAskParams>,
    ) -> Result<CallToolResult, McpError> {
        let answer = self
            .ctx
            .rag
            .ask(AskRequest {
                query: params.query,
                top_k: params.top_k,
                min_score: params.min_score,
                max_context_chars: None,
                temperature: None,
                max_tokens: None,
                conversation_id: None,
            })
            .await
            .map_err(mcp_error)?;
        json_result(&answer)
    }
}

#[tool_handler]
impl ServerHandler for RecollectMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "recollect".to_string(),
                title: Some("Recollect Conversation Memory".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Recollect: conversation memory with semantic search and grounded \
                 answering. Use `ingest_conversation` to store transcripts, \
                 `search_conversations` for similarity search, and `rag_ask` for \
                 cited answers over everything ingested."
                    .to_string(),
            ),
        }
    }
}
