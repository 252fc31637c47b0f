//! Candidate lookup
//!
//! The pipeline asks a [`CandidateIndex`] for the corpus entries whose
//! fingerprints lie closest to the query's. [`FlatIndex`] answers exactly
//! by brute force; an approximate or remote index only has to implement the
//! same single call.

use thiserror::Error;

use crate::fingerprint::FeatureVector;

/// Position of an entry in the corpus
pub type CandidateId = usize;

/// Error from an index lookup or while building an index
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    #[error("index holds {expected}-dimensional vectors, got {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("index backend failed: {0}")]
    Backend(String),
}

/// Nearest-neighbour lookup over corpus fingerprints
pub trait CandidateIndex: Send + Sync {
    /// Up to `top_k` candidate ids, closest first
    fn lookup(&self, query: &FeatureVector, top_k: usize) -> Result<Vec<CandidateId>, IndexError>;
}

impl<F> CandidateIndex for F
where
    F: Fn(&FeatureVector, usize) -> Result<Vec<CandidateId>, IndexError> + Send + Sync,
{
    fn lookup(&self, query: &FeatureVector, top_k: usize) -> Result<Vec<CandidateId>, IndexError> {
        self(query, top_k)
    }
}

/// Exact index ranking by squared Euclidean distance
///
/// Ties are broken by candidate id, so lookups are deterministic.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dimension: usize,
    ids: Vec<CandidateId>,
    vectors: Vec<FeatureVector>,
}

impl FlatIndex {
    /// Create an empty index for vectors of length `dimension`
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ids: Vec::new(),
            vectors: Vec::new(),
        }
    }

    /// Build an index from `(id, vector)` rows
    pub fn from_rows<I>(dimension: usize, rows: I) -> Result<Self, IndexError>
    where
        I: IntoIterator<Item = (CandidateId, FeatureVector)>,
    {
        let mut index = Self::new(dimension);
        for (id, vector) in rows {
            index.add(id, vector)?;
        }
        Ok(index)
    }

    /// Build an index whose ids are the vectors' positions
    pub fn from_vectors(dimension: usize, vectors: Vec<FeatureVector>) -> Result<Self, IndexError> {
        Self::from_rows(dimension, vectors.into_iter().enumerate())
    }

    pub fn add(&mut self, id: CandidateId, vector: FeatureVector) -> Result<(), IndexError> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                found: vector.len(),
            });
        }
        self.ids.push(id);
        self.vectors.push(vector);
        Ok(())
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

fn squared_distance(a: &[u32], b: &[u32]) -> u64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = u64::from(x.abs_diff(y));
            d * d
        })
        .sum()
}

impl CandidateIndex for FlatIndex {
    fn lookup(&self, query: &FeatureVector, top_k: usize) -> Result<Vec<CandidateId>, IndexError> {
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                found: query.len(),
            });
        }
        if top_k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(u64, CandidateId)> = self
            .ids
            .iter()
            .zip(&self.vectors)
            .map(|(&id, vector)| (squared_distance(query.as_slice(), vector.as_slice()), id))
            .collect();

        if top_k < scored.len() {
            scored.select_nth_unstable(top_k - 1);
            scored.truncate(top_k);
        }
        scored.sort_unstable();

        Ok(scored.into_iter().map(|(_, id)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(values: &[u32]) -> FeatureVector {
        FeatureVector::from(values.to_vec())
    }

    fn create_test_index() -> FlatIndex {
        FlatIndex::from_vectors(
            3,
            vec![v(&[0, 0, 0]), v(&[5, 5, 5]), v(&[1, 0, 0]), v(&[0, 1, 0]), v(&[9, 9, 9])],
        )
        .unwrap()
    }

    #[test]
    fn test_lookup_orders_by_distance() {
        let index = create_test_index();
        assert_eq!(index.len(), 5);
        let ids = index.lookup(&v(&[1, 0, 0]), 10).unwrap();
        // distances: 1, 66, 0, 2, 226
        assert_eq!(ids, vec![2, 0, 3, 1, 4]);
    }

    #[test]
    fn test_lookup_top_k_and_ties() {
        let index = create_test_index();
        // ids 2 and 3 are both at distance 1 from the origin
        let ids = index.lookup(&v(&[0, 0, 0]), 3).unwrap();
        assert_eq!(ids, vec![0, 2, 3]);
        assert!(index.lookup(&v(&[0, 0, 0]), 0).unwrap().is_empty());
    }

    #[test]
    fn test_custom_ids() {
        let index = FlatIndex::from_rows(2, vec![(40, v(&[3, 3])), (7, v(&[0, 0]))]).unwrap();
        assert_eq!(index.lookup(&v(&[0, 1]), 1).unwrap(), vec![7]);
    }

    #[test]
    fn test_dimension_checks() {
        let mut index = FlatIndex::new(2);
        assert_eq!(
            index.add(0, v(&[1, 2, 3])),
            Err(IndexError::DimensionMismatch {
                expected: 2,
                found: 3
            })
        );
        assert!(index.is_empty());
        assert!(matches!(
            create_test_index().lookup(&v(&[1]), 5),
            Err(IndexError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_closure_index() {
        let index = |_: &FeatureVector, top_k: usize| -> Result<Vec<CandidateId>, IndexError> {
            Ok((0..top_k).rev().collect())
        };
        assert_eq!(index.lookup(&v(&[]), 3).unwrap(), vec![2, 1, 0]);
    }
}
