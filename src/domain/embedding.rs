//! Fixed-dimension embedding vector with construction-time validation.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An immutable embedding vector.
///
/// Invariants, enforced at construction:
/// - non-empty
/// - every component is finite
/// - at least one component is non-zero (an all-zero vector carries no
///   signal and would make every L2 distance meaningless)
///
/// The *storage* dimension check (`len == D`) belongs to the adapters
/// that know the configured dimension; this type only guarantees the
/// vector is well-formed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    /// Validates and wraps a raw vector.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the vector is empty, contains
    /// a non-finite component, or is entirely zero.
    pub fn new(values: Vec<f32>) -> Result<Self> {
        if values.is_empty() {
            return Err(Error::validation("embedding must not be empty"));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(Error::validation(
                "embedding contains a non-finite component",
            ));
        }
        if values.iter().all(|v| *v == 0.0) {
            return Err(Error::validation(
                "embedding must have at least one non-zero component",
            ));
        }
        Ok(Self { values })
    }

    /// Number of components.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Read-only view of the components.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Consumes the embedding, returning the raw vector.
    #[must_use]
    pub fn into_vec(self) -> Vec<f32> {
        self.values
    }

    /// Returns a copy zero-padded to `target` components.
    ///
    /// Padding widens a smaller native dimension up to the configured
    /// storage dimension. Truncation is forbidden: a vector already
    /// wider than `target` is an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmbeddingDimension`] when `self.dimension() > target`.
    pub fn zero_padded(&self, target: usize) -> Result<Self> {
        if self.values.len() > target {
            return Err(Error::EmbeddingDimension {
                expected: target,
                actual: self.values.len(),
            });
        }
        if self.values.len() == target {
            return Ok(self.clone());
        }
        let mut values = self.values.clone();
        values.resize(target, 0.0);
        Ok(Self { values })
    }
}

impl TryFrom<Vec<f32>> for Embedding {
    type Error = Error;

    fn try_from(values: Vec<f32>) -> Result<Self> {
        Self::new(values)
    }
}

impl From<Embedding> for Vec<f32> {
    fn from(e: Embedding) -> Self {
        e.values
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_valid_vector() {
        let e = Embedding::new(vec![0.1, 0.0, -0.3]).unwrap();
        assert_eq!(e.dimension(), 3);
    }

    #[test]
    fn test_rejects_empty() {
        assert!(Embedding::new(vec![]).is_err());
    }

    #[test]
    fn test_rejects_all_zeros() {
        assert!(Embedding::new(vec![0.0, 0.0, 0.0]).is_err());
    }

    #[test]
    fn test_rejects_nan_and_infinity() {
        assert!(Embedding::new(vec![0.1, f32::NAN]).is_err());
        assert!(Embedding::new(vec![0.1, f32::INFINITY]).is_err());
    }

    #[test]
    fn test_zero_padding_widens() {
        let e = Embedding::new(vec![1.0, 2.0]).unwrap();
        let padded = e.zero_padded(4).unwrap();
        assert_eq!(padded.as_slice(), &[1.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn test_zero_padding_same_dimension_is_identity() {
        let e = Embedding::new(vec![1.0, 2.0]).unwrap();
        assert_eq!(e.zero_padded(2).unwrap(), e);
    }

    #[test]
    fn test_truncation_is_forbidden() {
        let e = Embedding::new(vec![1.0, 2.0, 3.0]).unwrap();
        match e.zero_padded(2) {
            Err(Error::EmbeddingDimension { expected, actual }) => {
                assert_eq!(expected, 2);
                assert_eq!(actual, 3);
            }
            other => panic!("expected dimension error, got {other:?}"),
        }
    }
}
