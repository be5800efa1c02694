//! Fixed-length face embedding vector and its similarity/distance primitives.

use serde::{Deserialize, Serialize};

use crate::error::MatchError;

/// Face embedding vector of fixed, model-dependent length (128 for the
/// default deployment).
///
/// Serializes as a bare JSON array of decimal numbers in index order.
/// Vectors are not required to be unit-normalized by construction; the
/// matcher assumes normalized inputs for cosine similarity to span [-1, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn check_len(&self, other: &Embedding) -> Result<(), MatchError> {
        if self.values.len() != other.values.len() {
            return Err(MatchError::LengthMismatch {
                expected: self.values.len(),
                actual: other.values.len(),
            });
        }
        Ok(())
    }

    /// Cosine similarity in [-1, 1]. Higher = more alike.
    ///
    /// Degrades to 0 when either operand has zero norm (defined behavior,
    /// not an error). Fails fast on mismatched lengths.
    pub fn cosine_similarity(&self, other: &Embedding) -> Result<f32, MatchError> {
        self.check_len(other)?;

        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        Ok(if denom > 0.0 { dot / denom } else { 0.0 })
    }

    /// Euclidean distance. Lower = more alike.
    pub fn euclidean_distance(&self, other: &Embedding) -> Result<f32, MatchError> {
        self.check_len(other)?;

        let sum: f32 = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum();
        Ok(sum.sqrt())
    }

    /// Divide every element by the vector's L2 norm. A zero vector is
    /// returned unchanged.
    pub fn l2_normalize(mut self) -> Embedding {
        let norm: f32 = self.values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in self.values.iter_mut() {
                *v /= norm;
            }
        }
        self
    }

    /// Element-wise mean over a non-empty set of equal-length samples.
    pub fn average(samples: &[Embedding]) -> Result<Embedding, MatchError> {
        let first = samples.first().ok_or(MatchError::EmptyCapture)?;
        let dim = first.len();

        let mut acc = vec![0.0f32; dim];
        for sample in samples {
            if sample.len() != dim {
                return Err(MatchError::LengthMismatch {
                    expected: dim,
                    actual: sample.len(),
                });
            }
            for (slot, v) in acc.iter_mut().zip(sample.values.iter()) {
                *slot += v;
            }
        }

        let count = samples.len() as f32;
        for slot in acc.iter_mut() {
            *slot /= count;
        }
        Ok(Embedding::new(acc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[test]
    fn test_cosine_similarity_symmetric() {
        let a = emb(&[0.3, -0.7, 0.2]);
        let b = emb(&[0.1, 0.9, -0.4]);
        let ab = a.cosine_similarity(&b).unwrap();
        let ba = b.cosine_similarity(&a).unwrap();
        assert!((ab - ba).abs() < 1e-7);
    }

    #[test]
    fn test_cosine_similarity_self_is_one() {
        let a = emb(&[0.6, 0.8]);
        assert!((a.cosine_similarity(&a).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = emb(&[1.0, 0.0]);
        let b = emb(&[0.0, 1.0]);
        assert!(a.cosine_similarity(&b).unwrap().abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_norm_is_zero() {
        let a = emb(&[0.0, 0.0]);
        let b = emb(&[1.0, 0.0]);
        assert_eq!(a.cosine_similarity(&b).unwrap(), 0.0);
    }

    #[test]
    fn test_cosine_similarity_length_mismatch() {
        let a = emb(&[1.0, 0.0]);
        let b = emb(&[1.0, 0.0, 0.0]);
        assert_eq!(
            a.cosine_similarity(&b),
            Err(MatchError::LengthMismatch {
                expected: 2,
                actual: 3
            })
        );
    }

    #[test]
    fn test_euclidean_distance_self_is_zero() {
        let a = emb(&[0.2, -0.5, 0.9]);
        assert_eq!(a.euclidean_distance(&a).unwrap(), 0.0);
    }

    #[test]
    fn test_euclidean_distance_triangle_inequality() {
        let a = emb(&[1.0, 0.0, 0.0]);
        let b = emb(&[0.0, 1.0, 0.0]);
        let c = emb(&[0.0, 0.0, 1.0]);
        let ab = a.euclidean_distance(&b).unwrap();
        let bc = b.euclidean_distance(&c).unwrap();
        let ac = a.euclidean_distance(&c).unwrap();
        assert!(ac <= ab + bc + 1e-6);
    }

    #[test]
    fn test_euclidean_distance_length_mismatch() {
        let a = emb(&[1.0]);
        let b = emb(&[1.0, 2.0]);
        assert!(a.euclidean_distance(&b).is_err());
    }

    #[test]
    fn test_average_single_sample_unchanged() {
        let a = emb(&[0.25, -0.75, 0.5]);
        assert_eq!(Embedding::average(&[a.clone()]).unwrap(), a);
    }

    #[test]
    fn test_average_elementwise_mean() {
        let avg = Embedding::average(&[emb(&[1.0, 0.0]), emb(&[0.0, 1.0]), emb(&[0.5, 0.5])])
            .unwrap();
        assert!((avg.values[0] - 0.5).abs() < 1e-6);
        assert!((avg.values[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_average_empty_is_error() {
        assert_eq!(Embedding::average(&[]), Err(MatchError::EmptyCapture));
    }

    #[test]
    fn test_average_mixed_lengths_is_error() {
        let err = Embedding::average(&[emb(&[1.0, 0.0]), emb(&[1.0])]).unwrap_err();
        assert_eq!(
            err,
            MatchError::LengthMismatch {
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_l2_normalize_unit_norm() {
        let n = emb(&[3.0, 4.0]).l2_normalize();
        let norm: f32 = n.values.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((n.values[0] - 0.6).abs() < 1e-6);
        assert!((n.values[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector_unchanged() {
        let z = emb(&[0.0, 0.0, 0.0]);
        assert_eq!(z.clone().l2_normalize(), z);
    }
}
