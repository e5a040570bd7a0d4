//! RAG orchestrator: retrieval-grounded question answering.
//!
//! `ask` runs search → prompt assembly → LLM call → citation
//! extraction → confidence scoring. `ask_stream` emits text deltas as
//! they arrive and a final event carrying the fully assembled answer.
//!
//! Multi-turn sessions are held in an in-process map keyed by the
//! caller's `conversation_id`; answers produced inside a session are
//! never cached so prior turns cannot leak across callers.

pub mod prompt;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, instrument, warn};

use crate::cache::{NS_RAG, cache_key};
use crate::config::{LlmConfig, RagConfig};
use crate::error::{Error, Result};
use crate::llm::message::{ChatMessage, ChatRequest, assistant_message, system_message, user_message};
use crate::ports::{Cache, LlmProvider};
use crate::search::{SearchFilters, SearchRequest, SearchService};

use prompt::{
    NO_CONTEXT_ANSWER, PromptSource, SYSTEM_PROMPT, build_source_block, confidence,
    extract_citations, snippet_summary,
};

/// Turns of prior conversation inserted into the prompt.
const MAX_HISTORY_TURNS: usize = 10;
/// Turns retained per session before the oldest are dropped.
const MAX_STORED_TURNS: usize = 50;
/// Answers below this confidence are not cached.
const CACHE_CONFIDENCE_FLOOR: f64 = 0.5;
/// Snippets included in the empty-response fallback summary.
const FALLBACK_SNIPPETS: usize = 3;
/// Confidence assigned to the empty-response fallback.
const FALLBACK_CONFIDENCE: f64 = 0.3;

/// A question with optional parameter overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct AskRequest {
    /// The question, 1..=1000 characters after trimming.
    pub query: String,
    /// Overrides the configured retrieval depth.
    #[serde(default)]
    pub top_k: Option<usize>,
    /// Overrides the configured relevance threshold.
    #[serde(default)]
    pub min_score: Option<f64>,
    /// Overrides the configured prompt budget.
    #[serde(default)]
    pub max_context_chars: Option<usize>,
    /// Overrides the configured sampling temperature.
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Overrides the configured generation token budget.
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Session key for multi-turn conversations.
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// One cited source in an answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    /// Conversation the source chunk belongs to.
    pub conversation_id: i64,
    /// Source chunk id.
    pub chunk_id: i64,
    /// Chunk text as offered to the model.
    pub snippet: String,
    /// Relevance score of the chunk.
    pub score: f64,
    /// 1-based `[Source N]` number.
    pub citation_index: usize,
}

/// A grounded answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    /// Answer text with valid citation markers retained.
    pub text: String,
    /// Sources offered to the model, in citation order.
    pub sources: Vec<SourceRef>,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Prompt tokens consumed.
    pub tokens_in: u32,
    /// Completion tokens generated.
    pub tokens_out: u32,
    /// Wall-clock time spent.
    pub duration_ms: u64,
    /// Whether the answer came from cache.
    pub cache_hit: bool,
}

/// Event emitted by the streaming variant.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RagStreamEvent {
    /// A text fragment as it arrives from the model.
    Delta {
        /// Fragment text.
        text: String,
    },
    /// The fully assembled answer; always the last event on success.
    Final {
        /// Assembled answer with sources and confidence.
        answer: Box<Answer>,
    },
    /// Terminal failure; always the last event on error.
    Error {
        /// Error kind label.
        kind: String,
        /// Human-readable message.
        message: String,
    },
}

/// One prior exchange in a session.
#[derive(Debug, Clone)]
struct Turn {
    question: String,
    answer: String,
}

/// Parameters resolved against configuration defaults.
#[derive(Debug, Clone, Copy)]
struct ResolvedParams {
    top_k: usize,
    min_score: f64,
    max_context_chars: usize,
    temperature: f32,
    max_tokens: u32,
}

/// RAG orchestrator.
pub struct RagService {
    search: Arc<SearchService>,
    llm: Arc<dyn LlmProvider>,
    cache: Arc<dyn Cache>,
    rag_config: RagConfig,
    llm_config: LlmConfig,
    cache_ttl: Duration,
    io_timeout: Duration,
    sessions: Mutex<HashMap<String, Vec<Turn>>>,
}

impl RagService {
    /// Wires the orchestrator.
    #[must_use]
    pub fn new(
        search: Arc<SearchService>,
        llm: Arc<dyn LlmProvider>,
        cache: Arc<dyn Cache>,
        rag_config: RagConfig,
        llm_config: LlmConfig,
        cache_ttl: Duration,
        io_timeout: Duration,
    ) -> Self {
        Self {
            search,
            llm,
            cache,
            rag_config,
            llm_config,
            cache_ttl,
            io_timeout,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn resolve(&self, request: &AskRequest) -> ResolvedParams {
        ResolvedParams {
            top_k: request.top_k.unwrap_or(self.rag_config.top_k),
            min_score: request.min_score.unwrap_or(self.rag_config.min_score),
            max_context_chars: request
                .max_context_chars
                .unwrap_or(self.rag_config.max_context_chars),
            temperature: request.temperature.unwrap_or(self.llm_config.temperature),
            max_tokens: request.max_tokens.unwrap_or(self.llm_config.max_tokens),
        }
    }

    fn answer_key(&self, query: &str, params: ResolvedParams) -> String {
        cache_key(
            NS_RAG,
            &[
                query,
                &params.top_k.to_string(),
                &format!("{:.4}", params.min_score),
                self.llm.name(),
                self.llm.model(),
                &format!("{:.2}", params.temperature),
            ],
        )
    }

    fn session_turns(&self, conversation_id: Option<&str>) -> Vec<Turn> {
        let Some(id) = conversation_id else {
            return Vec::new();
        };
        let sessions = match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sessions.get(id).cloned().unwrap_or_default()
    }

    fn record_turn(&self, conversation_id: Option<&str>, question: &str, answer: &str) {
        let Some(id) = conversation_id else { return };
        let mut sessions = match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let turns = sessions.entry(id.to_string()).or_default();
        turns.push(Turn {
            question: question.to_string(),
            answer: answer.to_string(),
        });
        if turns.len() > MAX_STORED_TURNS {
            let excess = turns.len() - MAX_STORED_TURNS;
            turns.drain(..excess);
        }
    }

    /// Answers a question, grounded in retrieved conversation chunks.
    #[instrument(skip(self, request))]
    pub async fn ask(&self, request: AskRequest) -> Result<Answer> {
        let started = Instant::now();
        metrics::counter!("recollect_rag_requests_total").increment(1);

        let query = crate::search::validate_query(&request.query)?;
        let params = self.resolve(&request);
        let history = self.session_turns(request.conversation_id.as_deref());
        let cacheable = history.is_empty();
        let key = self.answer_key(&query, params);

        if cacheable
            && let Some(bytes) = self.cache.get(&key).await
        {
            if let Ok(mut answer) = serde_json::from_slice::<Answer>(&bytes) {
                metrics::counter!("recollect_rag_cache_hits_total").increment(1);
                answer.cache_hit = true;
                answer.duration_ms = elapsed_ms(started);
                self.record_turn(request.conversation_id.as_deref(), &query, &answer.text);
                return Ok(answer);
            }
            debug!("undecodable rag cache entry treated as miss");
        }

        let sources = self.retrieve(&query, params).await?;

        if sources.is_empty() {
            // Nothing above threshold: answer canonically, skip the LLM.
            let answer = Answer {
                text: NO_CONTEXT_ANSWER.to_string(),
                sources: Vec::new(),
                confidence: 0.0,
                tokens_in: 0,
                tokens_out: 0,
                duration_ms: elapsed_ms(started),
                cache_hit: false,
            };
            self.record_turn(request.conversation_id.as_deref(), &query, &answer.text);
            return Ok(answer);
        }

        let (block, kept) = build_source_block(&sources, params.max_context_chars);
        let messages = assemble_messages(&block, &history, &query);

        let chat_request = ChatRequest {
            model: self.llm.model().to_string(),
            messages,
            temperature: Some(params.temperature),
            max_tokens: Some(params.max_tokens),
            stream: false,
        };

        let response = tokio::time::timeout(self.io_timeout, self.llm.generate(&chat_request))
            .await
            .map_err(|_| Error::Llm("generation timed out".to_string()))??;

        let mut answer = assemble_answer(&kept, response.content);
        answer.tokens_in = response.usage.prompt_tokens;
        answer.tokens_out = response.usage.completion_tokens;
        answer.duration_ms = elapsed_ms(started);

        if cacheable && answer.confidence >= CACHE_CONFIDENCE_FLOOR {
            if let Ok(bytes) = serde_json::to_vec(&answer) {
                self.cache.set(&key, bytes, Some(self.cache_ttl)).await;
            }
        }

        self.record_turn(request.conversation_id.as_deref(), &query, &answer.text);
        Ok(answer)
    }

    /// Streaming variant: deltas as they arrive, then a final event
    /// with the assembled answer. A mid-stream provider failure ends
    /// the stream with an error event; nothing is cached in that case.
    #[instrument(skip(self, request))]
    pub async fn ask_stream(
        self: Arc<Self>,
        request: AskRequest,
    ) -> Result<ReceiverStream<RagStreamEvent>> {
        let started = Instant::now();
        let query = crate::search::validate_query(&request.query)?;
        let params = self.resolve(&request);
        let history = self.session_turns(request.conversation_id.as_deref());
        let cacheable = history.is_empty();
        let key = self.answer_key(&query, params);

        let (tx, rx) = tokio::sync::mpsc::channel::<RagStreamEvent>(32);

        // Cached answers replay as a single delta plus the final event.
        if cacheable
            && let Some(bytes) = self.cache.get(&key).await
            && let Ok(mut answer) = serde_json::from_slice::<Answer>(&bytes)
        {
            answer.cache_hit = true;
            answer.duration_ms = elapsed_ms(started);
            self.record_turn(request.conversation_id.as_deref(), &query, &answer.text);
            let _ = tx
                .send(RagStreamEvent::Delta {
                    text: answer.text.clone(),
                })
                .await;
            let _ = tx
                .send(RagStreamEvent::Final {
                    answer: Box::new(answer),
                })
                .await;
            return Ok(ReceiverStream::new(rx));
        }

        let sources = self.retrieve(&query, params).await?;

        if sources.is_empty() {
            let answer = Answer {
                text: NO_CONTEXT_ANSWER.to_string(),
                sources: Vec::new(),
                confidence: 0.0,
                tokens_in: 0,
                tokens_out: 0,
                duration_ms: elapsed_ms(started),
                cache_hit: false,
            };
            self.record_turn(request.conversation_id.as_deref(), &query, &answer.text);
            let _ = tx
                .send(RagStreamEvent::Delta {
                    text: answer.text.clone(),
                })
                .await;
            let _ = tx
                .send(RagStreamEvent::Final {
                    answer: Box::new(answer),
                })
                .await;
            return Ok(ReceiverStream::new(rx));
        }

        let (block, kept) = build_source_block(&sources, params.max_context_chars);
        let messages = assemble_messages(&block, &history, &query);
        let chat_request = ChatRequest {
            model: self.llm.model().to_string(),
            messages,
            temperature: Some(params.temperature),
            max_tokens: Some(params.max_tokens),
            stream: true,
        };

        let mut stream = self.llm.generate_stream(&chat_request).await?;

        let service = Arc::clone(&self);
        let conversation_id = request.conversation_id.clone();
        tokio::spawn(async move {
            let mut accumulated = String::new();
            while let Some(item) = stream.next().await {
                match item {
                    Ok(delta) => {
                        if delta.is_empty() {
                            continue;
                        }
                        accumulated.push_str(&delta);
                        if tx.send(RagStreamEvent::Delta { text: delta }).await.is_err() {
                            // Receiver gone: the request was cancelled.
                            // Do not cache a truncated answer.
                            debug!("rag stream cancelled by receiver");
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "rag stream failed mid-generation");
                        let _ = tx
                            .send(RagStreamEvent::Error {
                                kind: e.kind().to_string(),
                                message: e.to_string(),
                            })
                            .await;
                        return;
                    }
                }
            }

            let mut answer = assemble_answer(&kept, accumulated);
            // Token usage is not reported on the stream path.
            answer.duration_ms = elapsed_ms(started);

            if cacheable && answer.confidence >= CACHE_CONFIDENCE_FLOOR {
                if let Ok(bytes) = serde_json::to_vec(&answer) {
                    service.cache.set(&key, bytes, Some(service.cache_ttl)).await;
                }
            }
            service.record_turn(conversation_id.as_deref(), &query, &answer.text);

            let _ = tx
                .send(RagStreamEvent::Final {
                    answer: Box::new(answer),
                })
                .await;
        });

        Ok(ReceiverStream::new(rx))
    }

    /// Retrieves grounding context through the search orchestrator.
    async fn retrieve(
        &self,
        query: &str,
        params: ResolvedParams,
    ) -> Result<Vec<crate::search::SearchResultItem>> {
        let response = self
            .search
            .search(SearchRequest {
                query: query.to_string(),
                top_k: params.top_k,
                filters: Some(SearchFilters {
                    min_score: Some(params.min_score),
                    ..SearchFilters::default()
                }),
                cache_bypass: false,
            })
            .await?;
        Ok(response.results)
    }
}

/// Orders the prompt: system instructions + source block, prior turns,
/// then the user query.
fn assemble_messages(block: &str, history: &[Turn], query: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(2 + history.len() * 2);
    messages.push(system_message(&format!("{SYSTEM_PROMPT}\n\n{block}")));
    let recent = history.len().saturating_sub(MAX_HISTORY_TURNS);
    for turn in &history[recent..] {
        messages.push(user_message(&turn.question));
        messages.push(assistant_message(&turn.answer));
    }
    messages.push(user_message(query));
    messages
}

/// Builds the answer from generated text: citation extraction, invalid
/// marker stripping, confidence, and the empty-response fallback.
fn assemble_answer(kept: &[PromptSource], content: String) -> Answer {
    let sources: Vec<SourceRef> = kept
        .iter()
        .map(|s| SourceRef {
            conversation_id: s.item.conversation_id,
            chunk_id: s.item.chunk_id,
            snippet: s.item.text.clone(),
            score: s.item.score,
            citation_index: s.citation_index,
        })
        .collect();

    if content.trim().is_empty() {
        return Answer {
            text: snippet_summary(kept, FALLBACK_SNIPPETS),
            sources,
            confidence: FALLBACK_CONFIDENCE,
            tokens_in: 0,
            tokens_out: 0,
            duration_ms: 0,
            cache_hit: false,
        };
    }

    let (text, cited) = extract_citations(&content, kept.len());
    let confidence = confidence(&cited, kept);

    Answer {
        text,
        sources,
        confidence,
        tokens_in: 0,
        tokens_out: 0,
        duration_ms: 0,
        cache_hit: false,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{AuthorInfo, AuthorType};
    use crate::search::SearchResultItem;

    fn source(index: usize, score: f64, text: &str) -> PromptSource {
        PromptSource {
            citation_index: index,
            item: SearchResultItem {
                conversation_id: 1,
                chunk_id: index as i64,
                text: text.to_string(),
                score,
                author: AuthorInfo::new("alice", AuthorType::Human),
                timestamp: None,
            },
        }
    }

    #[test]
    fn test_assemble_answer_with_citations() {
        let kept = vec![source(1, 0.9, "API keys rotate every 90 days.")];
        let answer = assemble_answer(&kept, "Every 90 days [Source 1].".to_string());
        assert!(answer.text.contains("[Source 1]"));
        assert_eq!(answer.sources.len(), 1);
        assert!((answer.confidence - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_assemble_answer_strips_invalid_markers() {
        let kept = vec![source(1, 0.8, "text")];
        let answer = assemble_answer(&kept, "Claim [Source 3] and [Source 1].".to_string());
        assert!(!answer.text.contains("[Source 3]"));
        assert!(answer.text.contains("[Source 1]"));
    }

    #[test]
    fn test_assemble_answer_empty_content_falls_back() {
        let kept = vec![source(1, 0.8, "important excerpt")];
        let answer = assemble_answer(&kept, "   ".to_string());
        assert!(answer.text.contains("important excerpt"));
        assert!((answer.confidence - FALLBACK_CONFIDENCE).abs() < 1e-12);
    }

    #[test]
    fn test_history_truncated_to_last_ten_turns() {
        let history: Vec<Turn> = (0..15)
            .map(|i| Turn {
                question: format!("q{i}"),
                answer: format!("a{i}"),
            })
            .collect();
        let messages = assemble_messages("Sources:", &history, "final question");
        // 1 system + 10 turns * 2 + 1 user.
        assert_eq!(messages.len(), 22);
        assert!(messages[1].content.contains("q5"));
        assert!(!messages.iter().any(|m| m.content.contains("q4")));
    }

    #[test]
    fn test_every_marker_maps_to_a_source() {
        let kept = vec![
            source(1, 0.9, "a"),
            source(2, 0.8, "b"),
            source(3, 0.7, "c"),
        ];
        let answer = assemble_answer(
            &kept,
            "One [Source 1], two [Source 2], ghost [Source 9].".to_string(),
        );
        let re = regex::Regex::new(r"\[Source (\d+)\]").unwrap();
        for caps in re.captures_iter(&answer.text) {
            let n: usize = caps[1].parse().unwrap();
            assert!(answer.sources.iter().any(|s| s.citation_index == n));
        }
    }
}
