//! Relevance scores derived from raw vector distances.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Similarity score in `[0.0, 1.0]`; `1.0` means identical.
///
/// Scores are derived from raw L2 distance `d` as `1 / (1 + d)`, which
/// is monotonically decreasing in distance. Construction outside the
/// unit interval is a `Validation` error — never a silent clamp.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct RelevanceScore(f64);

impl RelevanceScore {
    /// Validates a raw score.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the value is not a finite
    /// number in `[0.0, 1.0]`.
    pub fn new(value: f64) -> Result<Self> {
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return Err(Error::validation(format!(
                "relevance score must be in [0.0, 1.0], got {value}"
            )));
        }
        Ok(Self(value))
    }

    /// Converts a raw L2 distance into a score via `1 / (1 + d)`.
    ///
    /// Negative distances cannot occur with a real metric; they are
    /// rejected rather than papered over.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the distance is negative or
    /// non-finite.
    pub fn from_distance(distance: f64) -> Result<Self> {
        if !distance.is_finite() || distance < 0.0 {
            return Err(Error::validation(format!(
                "distance must be a non-negative finite number, got {distance}"
            )));
        }
        Self::new(1.0 / (1.0 + distance))
    }

    /// Raw value.
    #[must_use]
    pub const fn value(self) -> f64 {
        self.0
    }

    /// Whether this score meets a minimum threshold.
    #[must_use]
    pub fn meets(self, threshold: f64) -> bool {
        self.0 >= threshold
    }
}

impl TryFrom<f64> for RelevanceScore {
    type Error = Error;

    fn try_from(value: f64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<RelevanceScore> for f64 {
    fn from(s: RelevanceScore) -> Self {
        s.0
    }
}

impl std::fmt::Display for RelevanceScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0.0, 1.0; "zero distance is a perfect score")]
    #[test_case(1.0, 0.5; "unit distance halves the score")]
    #[test_case(3.0, 0.25; "distance three quarters the score")]
    fn test_from_distance(distance: f64, expected: f64) {
        let score = RelevanceScore::from_distance(distance).unwrap();
        assert!((score.value() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_monotone_in_distance() {
        let near = RelevanceScore::from_distance(0.2).unwrap();
        let far = RelevanceScore::from_distance(5.0).unwrap();
        assert!(near.value() > far.value());
    }

    #[test]
    fn test_rejects_out_of_range() {
        assert!(RelevanceScore::new(-0.1).is_err());
        assert!(RelevanceScore::new(1.1).is_err());
        assert!(RelevanceScore::new(f64::NAN).is_err());
    }

    #[test]
    fn test_rejects_negative_distance() {
        assert!(RelevanceScore::from_distance(-1.0).is_err());
    }

    #[test]
    fn test_threshold() {
        let s = RelevanceScore::new(0.7).unwrap();
        assert!(s.meets(0.7));
        assert!(!s.meets(0.71));
    }
}
