//! Conversation chunk entity and its validated text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::author::AuthorInfo;
use super::conversation::ConversationId;
use super::embedding::Embedding;
use crate::error::{Error, Result};

/// Maximum characters a single chunk may carry.
pub const MAX_CHUNK_CHARS: usize = 10_000;

/// Store-assigned chunk identifier (opaque positive integer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(pub i64);

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Chunk text: non-empty after trimming, at most [`MAX_CHUNK_CHARS`]
/// characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChunkText(String);

impl ChunkText {
    /// Validates chunk text. The stored value keeps its original
    /// whitespace; only the emptiness check trims.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when empty after trimming or longer
    /// than [`MAX_CHUNK_CHARS`] characters.
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(Error::validation("chunk text must not be empty"));
        }
        let chars = text.chars().count();
        if chars > MAX_CHUNK_CHARS {
            return Err(Error::validation(format!(
                "chunk text is {chars} characters, maximum is {MAX_CHUNK_CHARS}"
            )));
        }
        Ok(Self(text))
    }

    /// Text content.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Character count.
    #[must_use]
    pub fn char_count(&self) -> usize {
        self.0.chars().count()
    }
}

impl TryFrom<String> for ChunkText {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl From<ChunkText> for String {
    fn from(t: ChunkText) -> Self {
        t.0
    }
}

impl std::fmt::Display for ChunkText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A contiguous slice of a conversation carrying at most one embedding.
///
/// `id` and `conversation_id` are absent until the store assigns them;
/// `embedding` is absent until a provider generates it (which may happen
/// after the initial persist when embedding retries are in play).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationChunk {
    /// Store-assigned identifier.
    pub id: Option<ChunkId>,
    /// Owning conversation, once persisted.
    pub conversation_id: Option<ConversationId>,
    /// Position within the conversation, contiguous from 0.
    pub order_index: u32,
    /// Validated chunk text.
    pub text: ChunkText,
    /// Embedding vector, once generated.
    pub embedding: Option<Embedding>,
    /// Dominant author of the chunk.
    pub author: AuthorInfo,
    /// Timestamp of the earliest message in the chunk, when known.
    pub timestamp: Option<DateTime<Utc>>,
}

impl ConversationChunk {
    /// Creates an unpersisted chunk draft.
    #[must_use]
    pub const fn draft(
        order_index: u32,
        text: ChunkText,
        author: AuthorInfo,
        timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: None,
            conversation_id: None,
            order_index,
            text,
            embedding: None,
            author,
            timestamp,
        }
    }

    /// Attaches an embedding, consuming self.
    #[must_use]
    pub fn with_embedding(mut self, embedding: Embedding) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Whether this chunk carries an embedding of the given dimension.
    #[must_use]
    pub fn has_embedding_of(&self, dimension: usize) -> bool {
        self.embedding
            .as_ref()
            .is_some_and(|e| e.dimension() == dimension)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::author::AuthorType;

    fn author() -> AuthorInfo {
        AuthorInfo::new("alice", AuthorType::Human)
    }

    #[test]
    fn test_chunk_text_rejects_whitespace_only() {
        assert!(ChunkText::new("   \n\t ").is_err());
    }

    #[test]
    fn test_chunk_text_boundary_lengths() {
        let at_limit: String = "a".repeat(MAX_CHUNK_CHARS);
        assert!(ChunkText::new(at_limit).is_ok());

        let over_limit: String = "a".repeat(MAX_CHUNK_CHARS + 1);
        assert!(ChunkText::new(over_limit).is_err());
    }

    #[test]
    fn test_char_count_is_chars_not_bytes() {
        let text = ChunkText::new("héllo").unwrap();
        assert_eq!(text.char_count(), 5);
    }

    #[test]
    fn test_draft_has_no_ids() {
        let chunk = ConversationChunk::draft(0, ChunkText::new("hi there").unwrap(), author(), None);
        assert!(chunk.id.is_none());
        assert!(chunk.conversation_id.is_none());
        assert!(chunk.embedding.is_none());
    }

    #[test]
    fn test_with_embedding_marks_searchable_dimension() {
        let chunk = ConversationChunk::draft(0, ChunkText::new("hi there").unwrap(), author(), None)
            .with_embedding(Embedding::new(vec![0.5, 0.5, 0.0]).unwrap());
        assert!(chunk.has_embedding_of(3));
        assert!(!chunk.has_embedding_of(4));
    }
}
