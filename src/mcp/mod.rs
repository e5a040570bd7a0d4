//! MCP (Model Context Protocol) server.
//!
//! Exposes the ingestion, search, and RAG orchestrators as MCP tools so
//! LLM clients can store and query conversation memory directly. The
//! tools delegate to the same [`AppContext`](crate::app::AppContext)
//! the HTTP transport uses.
//!
//! # Architecture
//!
//! ```text
//! MCP Client
//!   ↓ search_conversations / ingest_conversation / rag_ask / ...
//! RecollectMcpServer
//!   ↓
//! AppContext orchestrators (ingest → chunk → embed → store,
//!                           search → embed → ANN → rank,
//!                           ask → search → prompt → LLM → cite)
//! ```

pub mod params;
pub mod server;
pub mod transport;

pub use params::{GetConversationParams, IngestParams, ListParams, RagAskParams, SearchParams};
pub use server::RecollectMcpServer;
pub use transport::{serve_http, serve_stdio};
