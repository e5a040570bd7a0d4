//! In-memory fakes implementing the ports, so the orchestrators can be
//! exercised end-to-end without Postgres or network providers.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use recollect::domain::{
    ChunkId, Conversation, ConversationChunk, ConversationId, Embedding, RelevanceScore,
    SearchHit, SearchResults,
};
use recollect::error::{Error, Result};
use recollect::llm::message::{ChatRequest, ChatResponse, TokenUsage};
use recollect::ports::{
    ChunkStore, ConversationStore, EmbeddingProvider, LlmProvider, TextStream, VectorSearch,
};

/// Deterministic embedder: hashes text into a fixed-dimension unit-ish
/// vector, with an optional synonym table mapping one text onto
/// another's vector (to simulate semantic closeness on demand).
pub struct FakeEmbedder {
    dimension: usize,
    synonyms: Mutex<HashMap<String, String>>,
    pub calls: AtomicUsize,
}

impl FakeEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            synonyms: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Makes `query` embed to the same vector as `target`.
    pub fn alias(&self, query: &str, target: &str) {
        self.synonyms
            .lock()
            .unwrap()
            .insert(query.to_string(), target.to_string());
    }

    fn vector_for(&self, text: &str) -> Embedding {
        let resolved = {
            let synonyms = self.synonyms.lock().unwrap();
            synonyms.get(text).cloned().unwrap_or_else(|| text.to_string())
        };

        // FNV-style rolling hash spread across the dimensions.
        let mut values = vec![0.0f32; self.dimension];
        let mut state: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in resolved.bytes() {
            state ^= u64::from(byte);
            state = state.wrapping_mul(0x0000_0100_0000_01b3);
            let slot = (state % self.dimension as u64) as usize;
            values[slot] += ((state >> 32) as f32 / u32::MAX as f32) - 0.5;
        }
        let norm: f32 = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut values {
                *v /= norm;
            }
        } else {
            values[0] = 1.0;
        }
        Embedding::new(values).unwrap()
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn model(&self) -> &str {
        "fake-embedder"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        self.calls.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

/// Embedder that always fails; for partial-embedding ingest tests.
pub struct FailingEmbedder {
    pub dimension: usize,
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn model(&self) -> &str {
        "failing-embedder"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, _text: &str) -> Result<Embedding> {
        Err(Error::Embedding("provider down".to_string()))
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Embedding>> {
        Err(Error::Embedding("provider down".to_string()))
    }
}

#[derive(Default)]
struct StoreInner {
    next_conversation: i64,
    next_chunk: i64,
    conversations: BTreeMap<i64, Conversation>,
}

/// In-memory store implementing all three storage ports with exact L2
/// distance (brute force over every embedded chunk).
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<StoreInner>,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn l2(a: &[f32], b: &[f32]) -> f64 {
        a.iter()
            .zip(b)
            .map(|(x, y)| {
                let d = f64::from(x - y);
                d * d
            })
            .sum::<f64>()
            .sqrt()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn save(&self, conversation: Conversation) -> Result<Conversation> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_conversation += 1;
        let id = ConversationId(inner.next_conversation);

        let scenario_title = conversation.scenario_title.clone();
        let original_title = conversation.original_title.clone();
        let url = conversation.url.clone();
        let created_at = conversation.created_at;

        let chunks: Vec<ConversationChunk> = conversation
            .into_chunks()
            .into_iter()
            .map(|chunk| {
                inner.next_chunk += 1;
                ConversationChunk {
                    id: Some(ChunkId(inner.next_chunk)),
                    conversation_id: Some(id),
                    ..chunk
                }
            })
            .collect();

        let saved = Conversation::from_store(
            id,
            scenario_title,
            original_title,
            url,
            created_at,
            chunks,
        )?;
        inner.conversations.insert(id.0, saved.clone());
        Ok(saved)
    }

    async fn get_by_id(&self, id: ConversationId) -> Result<Option<Conversation>> {
        Ok(self.inner.lock().unwrap().conversations.get(&id.0).cloned())
    }

    async fn list(&self, skip: u64, limit: u64) -> Result<Vec<Conversation>> {
        let inner = self.inner.lock().unwrap();
        let mut all: Vec<Conversation> = inner.conversations.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all
            .into_iter()
            .skip(usize::try_from(skip).unwrap())
            .take(usize::try_from(limit).unwrap())
            .collect())
    }

    async fn delete(&self, id: ConversationId) -> Result<bool> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .conversations
            .remove(&id.0)
            .is_some())
    }

    async fn exists(&self, id: ConversationId) -> Result<bool> {
        Ok(self.inner.lock().unwrap().conversations.contains_key(&id.0))
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.inner.lock().unwrap().conversations.len() as u64)
    }
}

#[async_trait]
impl ChunkStore for InMemoryStore {
    async fn get_by_conversation(&self, id: ConversationId) -> Result<Vec<ConversationChunk>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .conversations
            .get(&id.0)
            .map(|c| c.chunks().to_vec())
            .unwrap_or_default())
    }

    async fn update_embedding(&self, chunk_id: ChunkId, embedding: &Embedding) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        for conversation in inner.conversations.values_mut() {
            let mut chunks = conversation.chunks().to_vec();
            let mut touched = false;
            for chunk in &mut chunks {
                if chunk.id == Some(chunk_id) {
                    chunk.embedding = Some(embedding.clone());
                    touched = true;
                }
            }
            if touched {
                let rebuilt = Conversation::from_store(
                    conversation.id.unwrap(),
                    conversation.scenario_title.clone(),
                    conversation.original_title.clone(),
                    conversation.url.clone(),
                    conversation.created_at,
                    chunks,
                )?;
                *conversation = rebuilt;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn get_chunks_missing_embeddings(&self) -> Result<Vec<ConversationChunk>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .conversations
            .values()
            .flat_map(|c| c.chunks().iter().cloned())
            .filter(|chunk| chunk.embedding.is_none())
            .collect())
    }
}

#[async_trait]
impl VectorSearch for InMemoryStore {
    async fn similarity_search(&self, query: &Embedding, k: usize) -> Result<SearchResults> {
        let inner = self.inner.lock().unwrap();
        let hits: Vec<SearchHit> = inner
            .conversations
            .values()
            .flat_map(|c| c.chunks().iter())
            .filter_map(|chunk| {
                let embedding = chunk.embedding.as_ref()?;
                let distance = Self::l2(query.as_slice(), embedding.as_slice());
                let score = RelevanceScore::from_distance(distance).ok()?;
                Some(SearchHit {
                    chunk: chunk.clone(),
                    score,
                })
            })
            .collect();
        Ok(SearchResults::ranked(hits).top(k))
    }

    async fn similarity_search_with_threshold(
        &self,
        query: &Embedding,
        threshold: f64,
        k: usize,
    ) -> Result<SearchResults> {
        Ok(self
            .similarity_search(query, k)
            .await?
            .above(threshold))
    }
}

/// Scripted LLM: returns queued responses (or a default), counts calls,
/// and records the prompts it saw.
pub struct FakeLlm {
    responses: Mutex<Vec<String>>,
    pub prompts: Mutex<Vec<String>>,
    pub calls: AtomicUsize,
}

impl FakeLlm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    /// Queues the next response (FIFO).
    pub fn respond_with(&self, text: &str) {
        self.responses.lock().unwrap().push(text.to_string());
    }

    fn next_response(&self) -> String {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            "scripted answer".to_string()
        } else {
            responses.remove(0)
        }
    }
}

#[async_trait]
impl LlmProvider for FakeLlm {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn model(&self) -> &str {
        "fake-llm"
    }

    fn validate_config(&self) -> Result<()> {
        Ok(())
    }

    async fn generate(&self, request: &ChatRequest) -> Result<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().extend(
            request
                .messages
                .iter()
                .map(|m| m.content.clone()),
        );
        Ok(ChatResponse {
            content: self.next_response(),
            usage: TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 50,
                total_tokens: 150,
            },
            finish_reason: Some("stop".to_string()),
        })
    }

    async fn generate_stream(&self, request: &ChatRequest) -> Result<TextStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().extend(
            request
                .messages
                .iter()
                .map(|m| m.content.clone()),
        );
        let response = self.next_response();
        // Stream in small word-ish fragments.
        let fragments: Vec<Result<String>> = response
            .split_inclusive(' ')
            .map(|piece| Ok(piece.to_string()))
            .collect();
        Ok(Box::pin(futures_util::stream::iter(fragments)))
    }
}
