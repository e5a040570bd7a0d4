//! HTTP transport over axum.
//!
//! The single place where error kinds map to HTTP status codes and
//! where domain aggregates are flattened into transport DTOs. Handlers
//! delegate to the orchestrators on [`AppContext`] and own no logic.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::app::AppContext;
use crate::domain::{Conversation, ConversationId};
use crate::error::Error;
use crate::ingest::IngestRequest;
use crate::rag::{AskRequest, RagStreamEvent};
use crate::search::{SearchFilters, SearchRequest};

/// Default page size for conversation listing.
const DEFAULT_LIST_LIMIT: u64 = 100;
/// Default `top_k` for GET searches.
const DEFAULT_SEARCH_TOP_K: usize = 5;

/// Error payload; carries a correlation id instead of internals.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    correlation_id: String,
}

/// Maps error kinds to status codes — the only such mapping in the
/// crate.
fn status_of(error: &Error) -> StatusCode {
    match error {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Storage { transient, .. } => {
            if *transient {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
        Error::Embedding(_) | Error::EmbeddingDimension { .. } | Error::Llm(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        Error::Cache(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Wrapper so handlers can return `crate::error::Result` directly.
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let correlation_id: String = {
            let mut rng = rand::thread_rng();
            (0..16)
                .map(|_| format!("{:x}", rng.gen_range(0..16u8)))
                .collect()
        };
        let status = status_of(&self.0);
        error!(
            correlation_id,
            kind = self.0.kind(),
            status = status.as_u16(),
            error = %self.0,
            "request failed"
        );
        let body = ErrorBody {
            error: self.0.kind(),
            message: self.0.to_string(),
            correlation_id,
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Chunk DTO: embeddings are reported by presence, never by value.
#[derive(Debug, Serialize)]
struct ChunkDto {
    id: i64,
    order_index: u32,
    text: String,
    author: crate::domain::AuthorInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<DateTime<Utc>>,
    has_embedding: bool,
}

/// Conversation DTO for list and detail responses.
#[derive(Debug, Serialize)]
struct ConversationDto {
    id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    scenario_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    original_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    created_at: DateTime<Utc>,
    chunk_count: usize,
    chunks: Vec<ChunkDto>,
}

fn conversation_dto(conversation: Conversation) -> Result<ConversationDto, Error> {
    let id = conversation
        .id
        .ok_or_else(|| Error::internal("persisted conversation without id"))?;
    let scenario_title = conversation.scenario_title.clone();
    let original_title = conversation.original_title.clone();
    let url = conversation.url.clone();
    let created_at = conversation.created_at;
    let chunk_count = conversation.chunk_count();

    let chunks = conversation
        .into_chunks()
        .into_iter()
        .map(|chunk| {
            let chunk_id = chunk
                .id
                .ok_or_else(|| Error::internal("persisted chunk without id"))?;
            Ok(ChunkDto {
                id: chunk_id.0,
                order_index: chunk.order_index,
                text: chunk.text.as_str().to_string(),
                author: chunk.author,
                timestamp: chunk.timestamp,
                has_embedding: chunk.embedding.is_some(),
            })
        })
        .collect::<Result<_, Error>>()?;

    Ok(ConversationDto {
        id: id.0,
        scenario_title,
        original_title,
        url,
        created_at,
        chunk_count,
        chunks,
    })
}

/// Builds the router.
#[must_use]
pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/ingest", post(ingest))
        .route("/search", get(search_get).post(search_post))
        .route("/conversations", get(list_conversations))
        .route(
            "/conversations/{id}",
            get(get_conversation).delete(delete_conversation),
        )
        .route("/rag/ask", post(rag_ask))
        .route("/rag/ask-stream", post(rag_ask_stream))
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .with_state(ctx)
}

/// Serves until ctrl-c.
pub async fn serve(ctx: Arc<AppContext>, host: &str, port: u16) -> anyhow::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr, "http server listening");

    let shutdown_ctx = Arc::clone(&ctx);
    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown_ctx.shutdown().await;
        })
        .await?;
    Ok(())
}

async fn ingest(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<IngestRequest>,
) -> ApiResult<impl IntoResponse> {
    let response = ctx.ingest.ingest(request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: String,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    min_score: Option<f64>,
    #[serde(default)]
    cache_bypass: Option<bool>,
}

async fn search_get(
    State(ctx): State<Arc<AppContext>>,
    Query(params): Query<SearchQuery>,
) -> ApiResult<impl IntoResponse> {
    let filters = params.min_score.map(|min_score| SearchFilters {
        min_score: Some(min_score),
        ..SearchFilters::default()
    });
    let response = ctx
        .search
        .search(SearchRequest {
            query: params.q,
            top_k: params.top_k.unwrap_or(DEFAULT_SEARCH_TOP_K),
            filters,
            cache_bypass: params.cache_bypass.unwrap_or(false),
        })
        .await?;
    Ok(Json(response))
}

async fn search_post(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<SearchRequest>,
) -> ApiResult<impl IntoResponse> {
    let response = ctx.search.search(request).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default)]
    skip: Option<u64>,
    #[serde(default)]
    limit: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ListResponse {
    conversations: Vec<ConversationDto>,
    total: u64,
}

async fn list_conversations(
    State(ctx): State<Arc<AppContext>>,
    Query(params): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    let store = ctx.conversations();
    let page = store
        .list(
            params.skip.unwrap_or(0),
            params.limit.unwrap_or(DEFAULT_LIST_LIMIT),
        )
        .await?;
    let total = store.count().await?;
    let conversations = page
        .into_iter()
        .map(conversation_dto)
        .collect::<Result<_, Error>>()?;
    Ok(Json(ListResponse {
        conversations,
        total,
    }))
}

async fn get_conversation(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let conversation = ctx
        .conversations()
        .get_by_id(ConversationId(id))
        .await?
        .ok_or_else(|| Error::not_found(format!("conversation {id}")))?;
    Ok(Json(conversation_dto(conversation)?))
}

async fn delete_conversation(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let deleted = ctx.conversations().delete(ConversationId(id)).await?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(Error::not_found(format!("conversation {id}")).into())
    }
}

async fn rag_ask(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<AskRequest>,
) -> ApiResult<impl IntoResponse> {
    let answer = ctx.rag.ask(request).await?;
    Ok(Json(answer))
}

async fn rag_ask_stream(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<AskRequest>,
) -> ApiResult<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let stream = Arc::clone(&ctx.rag).ask_stream(request).await?;
    let events = stream.map(|event: RagStreamEvent| {
        let event_name = match &event {
            RagStreamEvent::Delta { .. } => "delta",
            RagStreamEvent::Final { .. } => "final",
            RagStreamEvent::Error { .. } => "error",
        };
        let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok(Event::default().event(event_name).data(data))
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn health(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    let report = ctx.health().await;
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

async fn metrics_endpoint(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        ctx.render_metrics(),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_of(&Error::validation("x")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(&Error::not_found("x")), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(&Error::storage_transient("x")),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(&Error::storage("x")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(&Error::Llm("x".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(&Error::EmbeddingDimension {
                expected: 2,
                actual: 3
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(&Error::Internal("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
