//! Conversation aggregate root.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::chunk::ConversationChunk;
use crate::error::{Error, Result};

/// Maximum chunks a single conversation may carry on persist.
pub const MAX_CHUNKS_PER_CONVERSATION: usize = 10_000;

/// Store-assigned conversation identifier (opaque positive integer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub i64);

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Aggregate of ordered chunks with metadata.
///
/// Invariants enforced by [`Conversation::new`]:
/// - at least one chunk, at most [`MAX_CHUNKS_PER_CONVERSATION`]
/// - chunk `order_index` values form the contiguous sequence `0..N`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Store-assigned identifier.
    pub id: Option<ConversationId>,
    /// Scenario label from the ingesting application.
    pub scenario_title: Option<String>,
    /// Title of the original transcript.
    pub original_title: Option<String>,
    /// Link back to the transcript source.
    pub url: Option<String>,
    /// Creation time (store-assigned on persist).
    pub created_at: DateTime<Utc>,
    chunks: Vec<ConversationChunk>,
}

impl Conversation {
    /// Validates and assembles the aggregate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the chunk list is empty, too
    /// large, or its indices are not the contiguous sequence `0..N`.
    pub fn new(
        scenario_title: Option<String>,
        original_title: Option<String>,
        url: Option<String>,
        created_at: DateTime<Utc>,
        chunks: Vec<ConversationChunk>,
    ) -> Result<Self> {
        Self::validate_chunks(&chunks)?;
        Ok(Self {
            id: None,
            scenario_title,
            original_title,
            url,
            created_at,
            chunks,
        })
    }

    /// Reassembles an aggregate read back from the store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] when persisted chunk indices are not
    /// contiguous; a store that violates this has corrupted state, which
    /// is a different failure than a bad request.
    pub fn from_store(
        id: ConversationId,
        scenario_title: Option<String>,
        original_title: Option<String>,
        url: Option<String>,
        created_at: DateTime<Utc>,
        chunks: Vec<ConversationChunk>,
    ) -> Result<Self> {
        Self::validate_chunks(&chunks).map_err(|e| {
            Error::internal(format!("conversation {id} read back inconsistent: {e}"))
        })?;
        Ok(Self {
            id: Some(id),
            scenario_title,
            original_title,
            url,
            created_at,
            chunks,
        })
    }

    fn validate_chunks(chunks: &[ConversationChunk]) -> Result<()> {
        if chunks.is_empty() {
            return Err(Error::validation(
                "conversation must carry at least one chunk",
            ));
        }
        if chunks.len() > MAX_CHUNKS_PER_CONVERSATION {
            return Err(Error::validation(format!(
                "conversation has {} chunks, maximum is {MAX_CHUNKS_PER_CONVERSATION}",
                chunks.len()
            )));
        }
        for (position, chunk) in chunks.iter().enumerate() {
            if chunk.order_index as usize != position {
                return Err(Error::validation(format!(
                    "chunk at position {position} has order_index {}, expected {position}",
                    chunk.order_index
                )));
            }
        }
        Ok(())
    }

    /// Ordered chunk view.
    #[must_use]
    pub fn chunks(&self) -> &[ConversationChunk] {
        &self.chunks
    }

    /// Number of chunks.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Number of chunks that carry an embedding.
    #[must_use]
    pub fn embedded_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.embedding.is_some()).count()
    }

    /// A conversation is searchable iff every chunk carries an
    /// embedding of the configured dimension.
    #[must_use]
    pub fn is_searchable(&self, dimension: usize) -> bool {
        self.chunks.iter().all(|c| c.has_embedding_of(dimension))
    }

    /// Consumes the aggregate, returning its chunks.
    #[must_use]
    pub fn into_chunks(self) -> Vec<ConversationChunk> {
        self.chunks
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::author::{AuthorInfo, AuthorType};
    use crate::domain::chunk::ChunkText;
    use crate::domain::embedding::Embedding;

    fn chunk(index: u32) -> ConversationChunk {
        ConversationChunk::draft(
            index,
            ChunkText::new(format!("chunk number {index}")).unwrap(),
            AuthorInfo::new("alice", AuthorType::Human),
            None,
        )
    }

    fn conversation(chunks: Vec<ConversationChunk>) -> Result<Conversation> {
        Conversation::new(Some("title".into()), None, None, Utc::now(), chunks)
    }

    #[test]
    fn test_requires_at_least_one_chunk() {
        assert!(conversation(vec![]).is_err());
    }

    #[test]
    fn test_accepts_contiguous_indices() {
        let conv = conversation(vec![chunk(0), chunk(1), chunk(2)]).unwrap();
        assert_eq!(conv.chunk_count(), 3);
    }

    #[test]
    fn test_rejects_gap_in_indices() {
        assert!(conversation(vec![chunk(0), chunk(2)]).is_err());
    }

    #[test]
    fn test_rejects_nonzero_start() {
        assert!(conversation(vec![chunk(1), chunk(2)]).is_err());
    }

    #[test]
    fn test_searchable_requires_every_chunk_embedded() {
        let embedded = chunk(0).with_embedding(Embedding::new(vec![1.0, 0.0]).unwrap());
        let bare = chunk(1);
        let conv = conversation(vec![embedded.clone(), bare]).unwrap();
        assert!(!conv.is_searchable(2));
        assert_eq!(conv.embedded_count(), 1);

        let full = conversation(vec![
            embedded,
            chunk(1).with_embedding(Embedding::new(vec![0.0, 1.0]).unwrap()),
        ])
        .unwrap();
        assert!(full.is_searchable(2));
        assert!(!full.is_searchable(3));
    }

    #[test]
    fn test_from_store_flags_corruption_as_internal() {
        let result = Conversation::from_store(
            ConversationId(7),
            None,
            None,
            None,
            Utc::now(),
            vec![chunk(0), chunk(5)],
        );
        match result {
            Err(Error::Internal(msg)) => assert!(msg.contains('7')),
            other => panic!("expected internal error, got {other:?}"),
        }
    }
}
