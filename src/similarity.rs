//! Cosine pre-filter
//!
//! Cheap similarity check run before the deep comparison. It only narrows
//! the candidate set; passing it never means a match.

use thiserror::Error;

use crate::fingerprint::FeatureVector;

/// Default minimum cosine similarity for a candidate to be compared
pub const DEFAULT_THRESHOLD: f64 = 0.8;

/// Two feature vectors of different length were compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("feature vectors differ in length ({left} vs {right})")]
pub struct DimensionMismatch {
    pub left: usize,
    pub right: usize,
}

/// Cosine similarity of two count vectors
///
/// Zero when either vector is all zeros.
pub fn cosine(a: &FeatureVector, b: &FeatureVector) -> Result<f64, DimensionMismatch> {
    if a.len() != b.len() {
        return Err(DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.as_slice().iter().zip(b.as_slice()) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok((dot / (norm_a.sqrt() * norm_b.sqrt())).min(1.0))
}

/// Whether `b` is similar enough to `a` to be compared in depth
pub fn passes_prefilter(
    a: &FeatureVector,
    b: &FeatureVector,
    threshold: f64,
) -> Result<bool, DimensionMismatch> {
    Ok(cosine(a, b)? >= threshold)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(values: &[u32]) -> FeatureVector {
        FeatureVector::from(values.to_vec())
    }

    #[test]
    fn test_self_similarity() {
        let a = v(&[3, 0, 1, 7, 2]);
        let sim = cosine(&a, &a).unwrap();
        assert!((sim - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_vectors() {
        let zero = FeatureVector::zeros(4);
        assert_eq!(cosine(&zero, &zero).unwrap(), 0.0);
        assert_eq!(cosine(&zero, &v(&[1, 2, 3, 4])).unwrap(), 0.0);
        assert!(!cosine(&zero, &zero).unwrap().is_nan());
    }

    #[test]
    fn test_orthogonal_and_scaled() {
        assert_eq!(cosine(&v(&[1, 0]), &v(&[0, 5])).unwrap(), 0.0);
        let sim = cosine(&v(&[1, 2, 3]), &v(&[2, 4, 6])).unwrap();
        assert!((sim - 1.0).abs() < 1e-9);
        let sim = cosine(&v(&[1, 1]), &v(&[1, 0])).unwrap();
        assert!((sim - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-9);
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = cosine(&v(&[1, 2]), &v(&[1, 2, 3])).unwrap_err();
        assert_eq!(err, DimensionMismatch { left: 2, right: 3 });
        assert!(passes_prefilter(&v(&[1]), &v(&[]), 0.5).is_err());
    }

    #[test]
    fn test_threshold() {
        let a = v(&[1, 1]);
        let b = v(&[1, 0]);
        assert!(passes_prefilter(&a, &b, 0.7).unwrap());
        assert!(!passes_prefilter(&a, &b, DEFAULT_THRESHOLD).unwrap());
        assert!(passes_prefilter(&b, &b, 1.0).unwrap());
    }
}
