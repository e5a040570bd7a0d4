//! Splits ordered messages into size-bounded, speaker-aware chunks.
//!
//! The chunker is deterministic and pure: the same messages with the
//! same parameters always produce byte-identical chunk boundaries. No
//! characters are ever dropped — an overlong message is split at word
//! boundaries with all whitespace preserved, so the concatenation of
//! the emitted chunks still contains every message text verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use crate::domain::{AuthorInfo, ChunkText, ConversationChunk};
use crate::error::{Error, Result};

/// Separator placed between messages accumulated into one chunk.
const MESSAGE_SEPARATOR: &str = "\n";

/// One transcript message handed to the chunker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Who wrote the message.
    pub author: AuthorInfo,
    /// Message text.
    pub text: String,
    /// When it was written, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Chunking parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkParams {
    /// Upper bound on chunk length in characters.
    pub max_chunk_chars: usize,
    /// Size-driven boundaries avoid emitting chunks shorter than this.
    /// Speaker boundaries and the final chunk may still be shorter.
    pub min_chunk_chars: usize,
    /// Start a new chunk when the speaker changes.
    pub split_on_speaker_change: bool,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            max_chunk_chars: 1000,
            min_chunk_chars: 50,
            split_on_speaker_change: true,
        }
    }
}

impl ChunkParams {
    /// Validates parameter consistency.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the bounds are zero, inverted,
    /// or exceed the chunk text limit.
    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_chars == 0 {
            return Err(Error::validation("max_chunk_chars must be positive"));
        }
        if self.max_chunk_chars > crate::domain::chunk::MAX_CHUNK_CHARS {
            return Err(Error::validation(format!(
                "max_chunk_chars {} exceeds the chunk text limit {}",
                self.max_chunk_chars,
                crate::domain::chunk::MAX_CHUNK_CHARS
            )));
        }
        if self.min_chunk_chars > self.max_chunk_chars {
            return Err(Error::validation(
                "min_chunk_chars must not exceed max_chunk_chars",
            ));
        }
        Ok(())
    }
}

/// Accumulator for the chunk currently being built.
#[derive(Debug, Default)]
struct Accumulator {
    text: String,
    char_len: usize,
    /// Per-author character contributions in first-seen order.
    authors: Vec<(AuthorInfo, usize)>,
    timestamp: Option<DateTime<Utc>>,
}

impl Accumulator {
    fn is_empty(&self) -> bool {
        self.char_len == 0
    }

    fn push(&mut self, piece: &str, author: &AuthorInfo, timestamp: Option<DateTime<Utc>>) {
        if !self.is_empty() {
            self.text.push_str(MESSAGE_SEPARATOR);
            self.char_len += MESSAGE_SEPARATOR.chars().count();
        }
        self.text.push_str(piece);
        let piece_chars = piece.chars().count();
        self.char_len += piece_chars;
        if self.timestamp.is_none() {
            self.timestamp = timestamp;
        }
        match self.authors.iter_mut().find(|(a, _)| a.name == author.name) {
            Some((_, chars)) => *chars += piece_chars,
            None => self.authors.push((author.clone(), piece_chars)),
        }
    }

    /// Author with the largest character contribution; ties go to the
    /// earliest seen so the result is deterministic.
    fn dominant_author(&self) -> Option<AuthorInfo> {
        let mut best: Option<(&AuthorInfo, usize)> = None;
        for (author, chars) in &self.authors {
            // Strict comparison keeps the earliest author on a tie.
            if best.is_none_or(|(_, best_chars)| *chars > best_chars) {
                best = Some((author, *chars));
            }
        }
        best.map(|(author, _)| author.clone())
    }

    fn take(&mut self, order_index: u32) -> Result<ConversationChunk> {
        let author = self
            .dominant_author()
            .ok_or_else(|| Error::internal("emitting an empty chunk"))?;
        let text = ChunkText::new(std::mem::take(&mut self.text))?;
        let timestamp = self.timestamp.take();
        self.char_len = 0;
        self.authors.clear();
        Ok(ConversationChunk::draft(order_index, text, author, timestamp))
    }
}

/// Splits messages into chunk drafts with contiguous `order_index`
/// starting at 0.
///
/// # Errors
///
/// Returns [`Error::Validation`] on bad parameters, an empty message
/// list, or a message whose text is empty after trimming.
pub fn chunk_messages(messages: &[Message], params: &ChunkParams) -> Result<Vec<ConversationChunk>> {
    params.validate()?;
    if messages.is_empty() {
        return Err(Error::validation("messages must not be empty"));
    }
    for (i, message) in messages.iter().enumerate() {
        if message.text.trim().is_empty() {
            return Err(Error::validation(format!(
                "message {i} has empty text"
            )));
        }
    }

    let mut chunks: Vec<ConversationChunk> = Vec::new();
    let mut accum = Accumulator::default();

    let mut emit = |accum: &mut Accumulator, chunks: &mut Vec<ConversationChunk>| -> Result<()> {
        let index = u32::try_from(chunks.len())
            .map_err(|_| Error::validation("too many chunks for one conversation"))?;
        chunks.push(accum.take(index)?);
        Ok(())
    };

    for message in messages {
        // Speaker change closes the current chunk. This boundary wins
        // over the minimum length: a speaker turn is never merged into
        // another speaker's chunk.
        if params.split_on_speaker_change
            && !accum.is_empty()
            && accum
                .dominant_author()
                .is_some_and(|a| a.name != message.author.name)
        {
            emit(&mut accum, &mut chunks)?;
        }

        let mut remaining = message.text.as_str();
        while !remaining.is_empty() {
            let sep_cost = if accum.is_empty() {
                0
            } else {
                MESSAGE_SEPARATOR.chars().count()
            };
            let budget = params.max_chunk_chars.saturating_sub(accum.char_len + sep_cost);
            let remaining_chars = remaining.chars().count();

            if remaining_chars <= budget {
                accum.push(remaining, &message.author, message.timestamp);
                break;
            }

            // The piece does not fit. Close a sufficiently long chunk
            // and retry with a full budget; otherwise fill the chunk
            // with a word-boundary split of the text.
            if !accum.is_empty() && accum.char_len >= params.min_chunk_chars {
                emit(&mut accum, &mut chunks)?;
                continue;
            }
            if budget == 0 {
                // Accumulator is under-minimum but full; emitting short
                // is the only move that cannot drop content.
                emit(&mut accum, &mut chunks)?;
                continue;
            }
            let (piece, rest) = split_at_word_boundary(remaining, budget);
            if piece.trim().is_empty() {
                // A whitespace run longer than the budget carries no
                // content; skip it rather than emitting an empty chunk.
                remaining = rest;
                continue;
            }
            accum.push(piece, &message.author, message.timestamp);
            remaining = rest;
            emit(&mut accum, &mut chunks)?;
        }
    }

    if !accum.is_empty() {
        emit(&mut accum, &mut chunks)?;
    }

    Ok(chunks)
}

/// Splits `text` into a head of at most `limit` characters ending at a
/// word boundary, and the rest. Whitespace at the split point stays
/// with the head so no character is lost. Falls back to a hard split
/// when the first word alone exceeds the limit.
fn split_at_word_boundary(text: &str, limit: usize) -> (&str, &str) {
    debug_assert!(limit > 0);
    let mut cut_bytes = 0;
    let mut cut_chars = 0;

    for (offset, segment) in text.split_word_bound_indices() {
        let segment_chars = segment.chars().count();
        if cut_chars + segment_chars > limit {
            break;
        }
        cut_bytes = offset + segment.len();
        cut_chars += segment_chars;
    }

    if cut_bytes == 0 {
        // First segment alone exceeds the limit: hard split at `limit`
        // characters rather than dropping anything.
        cut_bytes = text
            .char_indices()
            .nth(limit)
            .map_or(text.len(), |(byte, _)| byte);
    }

    text.split_at(cut_bytes)
}
