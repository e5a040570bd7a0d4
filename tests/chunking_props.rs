//! Property tests for the chunking invariants: no content loss,
//! contiguous indices, size bounds, and determinism.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use proptest::prelude::*;

use recollect::chunking::{ChunkParams, Message, chunk_messages};
use recollect::domain::{AuthorInfo, AuthorType};

fn arb_author() -> impl Strategy<Value = AuthorInfo> {
    prop_oneof![
        Just(AuthorInfo::new("alice", AuthorType::Human)),
        Just(AuthorInfo::new("bob", AuthorType::Human)),
        Just(AuthorInfo::new("helper", AuthorType::Assistant)),
    ]
}

fn arb_message() -> impl Strategy<Value = Message> {
    // Space-separated words whose total length crosses the chunk
    // bounds; single spaces keep the no-content-loss property exact.
    (arb_author(), prop::collection::vec("[a-zA-Z0-9]{1,12}", 1..40))
        .prop_map(|(author, words)| Message {
            author,
            text: words.join(" "),
            timestamp: None,
        })
}

fn arb_params() -> impl Strategy<Value = ChunkParams> {
    (50usize..=300, 0usize..=40, any::<bool>()).prop_map(
        |(max_chunk_chars, min_chunk_chars, split_on_speaker_change)| ChunkParams {
            max_chunk_chars,
            min_chunk_chars,
            split_on_speaker_change,
        },
    )
}

proptest! {
    /// Every message's text survives chunking verbatim: concatenating
    /// the chunk texts in order contains each message as a substring
    /// (splits preserve all characters, so split pieces reassemble
    /// across adjacent chunks).
    #[test]
    fn no_content_loss(messages in prop::collection::vec(arb_message(), 1..20), params in arb_params()) {
        let chunks = chunk_messages(&messages, &params).unwrap();
        let concatenated: String = chunks.iter().map(|c| c.text.as_str()).collect();
        for message in &messages {
            prop_assert!(
                concatenated.contains(&message.text),
                "message {:?} lost from chunk stream",
                message.text
            );
        }
    }

    /// Chunk indices are contiguous from zero and each chunk respects
    /// the maximum size.
    #[test]
    fn indices_contiguous_and_size_bounded(
        messages in prop::collection::vec(arb_message(), 1..20),
        params in arb_params(),
    ) {
        let chunks = chunk_messages(&messages, &params).unwrap();
        prop_assert!(!chunks.is_empty());
        for (i, chunk) in chunks.iter().enumerate() {
            prop_assert_eq!(chunk.order_index as usize, i);
            prop_assert!(
                chunk.text.char_count() <= params.max_chunk_chars,
                "chunk {} has {} chars, max {}",
                i,
                chunk.text.char_count(),
                params.max_chunk_chars
            );
        }
    }

    /// Same input and parameters produce byte-identical boundaries.
    #[test]
    fn chunking_is_deterministic(
        messages in prop::collection::vec(arb_message(), 1..20),
        params in arb_params(),
    ) {
        let first = chunk_messages(&messages, &params).unwrap();
        let second = chunk_messages(&messages, &params).unwrap();
        prop_assert_eq!(first, second);
    }

    /// Every chunk's dominant author is one of the input authors.
    #[test]
    fn dominant_author_comes_from_input(
        messages in prop::collection::vec(arb_message(), 1..20),
        params in arb_params(),
    ) {
        let chunks = chunk_messages(&messages, &params).unwrap();
        for chunk in &chunks {
            prop_assert!(
                messages.iter().any(|m| m.author.name == chunk.author.name),
                "unknown author {:?}",
                chunk.author.name
            );
        }
    }
}
