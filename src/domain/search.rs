//! Search result types with deterministic ordering.

use serde::{Deserialize, Serialize};

use super::chunk::ConversationChunk;
use super::score::RelevanceScore;

/// One retrieved chunk with its relevance score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// The retrieved chunk.
    pub chunk: ConversationChunk,
    /// Score derived from the raw vector distance.
    pub score: RelevanceScore,
}

impl SearchHit {
    /// Whether this hit meets a relevance threshold.
    #[must_use]
    pub fn is_relevant(&self, threshold: f64) -> bool {
        self.score.meets(threshold)
    }
}

/// Ranked collection of hits.
///
/// Sorted by score descending; ties broken by `(conversation_id asc,
/// order_index asc)` so the same query over the same corpus always
/// yields the same ordering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResults {
    hits: Vec<SearchHit>,
}

impl SearchResults {
    /// Ranks raw hits into canonical order.
    #[must_use]
    pub fn ranked(mut hits: Vec<SearchHit>) -> Self {
        hits.sort_by(|a, b| {
            b.score
                .value()
                .partial_cmp(&a.score.value())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.conversation_id.cmp(&b.chunk.conversation_id))
                .then_with(|| a.chunk.order_index.cmp(&b.chunk.order_index))
        });
        Self { hits }
    }

    /// Keeps only hits meeting the threshold, preserving order.
    #[must_use]
    pub fn above(mut self, threshold: f64) -> Self {
        self.hits.retain(|h| h.is_relevant(threshold));
        self
    }

    /// Keeps at most `k` top hits.
    #[must_use]
    pub fn top(mut self, k: usize) -> Self {
        self.hits.truncate(k);
        self
    }

    /// Ordered view of the hits.
    #[must_use]
    pub fn hits(&self) -> &[SearchHit] {
        &self.hits
    }

    /// Number of hits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// Whether the result set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Consumes the collection, returning the ordered hits.
    #[must_use]
    pub fn into_hits(self) -> Vec<SearchHit> {
        self.hits
    }
}

impl IntoIterator for SearchResults {
    type Item = SearchHit;
    type IntoIter = std::vec::IntoIter<SearchHit>;

    fn into_iter(self) -> Self::IntoIter {
        self.hits.into_iter()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::author::{AuthorInfo, AuthorType};
    use crate::domain::chunk::{ChunkId, ChunkText};
    use crate::domain::conversation::ConversationId;

    fn hit(conversation: i64, index: u32, score: f64) -> SearchHit {
        let mut chunk = ConversationChunk::draft(
            index,
            ChunkText::new("some text").unwrap(),
            AuthorInfo::new("bob", AuthorType::Human),
            None,
        );
        chunk.id = Some(ChunkId(i64::from(index) + conversation * 100));
        chunk.conversation_id = Some(ConversationId(conversation));
        SearchHit {
            chunk,
            score: RelevanceScore::new(score).unwrap(),
        }
    }

    #[test]
    fn test_sorted_by_score_descending() {
        let results = SearchResults::ranked(vec![hit(1, 0, 0.3), hit(2, 0, 0.9), hit(3, 0, 0.6)]);
        let scores: Vec<f64> = results.hits().iter().map(|h| h.score.value()).collect();
        assert_eq!(scores, vec![0.9, 0.6, 0.3]);
    }

    #[test]
    fn test_ties_broken_by_conversation_then_index() {
        let results = SearchResults::ranked(vec![
            hit(2, 1, 0.5),
            hit(1, 3, 0.5),
            hit(2, 0, 0.5),
            hit(1, 1, 0.5),
        ]);
        let order: Vec<(i64, u32)> = results
            .hits()
            .iter()
            .map(|h| (h.chunk.conversation_id.unwrap().0, h.chunk.order_index))
            .collect();
        assert_eq!(order, vec![(1, 1), (1, 3), (2, 0), (2, 1)]);
    }

    #[test]
    fn test_threshold_filter_and_truncation() {
        let results = SearchResults::ranked(vec![hit(1, 0, 0.9), hit(1, 1, 0.8), hit(1, 2, 0.2)]);
        let filtered = results.above(0.7);
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered.top(1).len(), 1);
    }

    #[test]
    fn test_prefix_property_under_growing_k() {
        let hits = vec![hit(1, 0, 0.9), hit(2, 0, 0.7), hit(3, 0, 0.5), hit(4, 0, 0.3)];
        let ranked = SearchResults::ranked(hits);
        for k in 1..4 {
            let smaller: Vec<_> = ranked
                .clone()
                .top(k)
                .into_hits()
                .iter()
                .map(|h| h.chunk.id)
                .collect();
            let larger: Vec<_> = ranked
                .clone()
                .top(k + 1)
                .into_hits()
                .iter()
                .map(|h| h.chunk.id)
                .collect();
            assert_eq!(&larger[..k], &smaller[..]);
        }
    }
}
