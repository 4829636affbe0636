//! In-memory vector index with cosine similarity search.
//!
//! Stores incident embeddings keyed by record id and answers top-k queries.
//! Cosine similarity is used instead of Euclidean distance because embedding
//! magnitude carries no signal for these text models, only direction does.

use std::collections::HashMap;

/// Two similarities within this distance are considered tied and ordered by
/// ascending record id, so repeated queries return a stable ranking.
const TIE_EPSILON: f32 = 1e-9;

/// In-memory vector index for incident similarity search.
pub struct VectorIndex {
    /// Record id -> embedding
    entries: HashMap<u64, Vec<f32>>,
    /// Expected embedding dimensions
    dimensions: usize,
}

/// Search result from the vector index.
#[derive(Debug, Clone)]
pub struct ScoredId {
    /// Record id
    pub id: u64,
    /// Cosine similarity against the query
    pub similarity: f32,
}

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot store or search with zero-norm vector")]
    ZeroNormVector,
}

impl VectorIndex {
    /// Create a new empty vector index with specified dimensions.
    pub fn new(dimensions: usize) -> Self {
        Self {
            entries: HashMap::new(),
            dimensions,
        }
    }

    /// Create an index with pre-allocated capacity.
    pub fn with_capacity(dimensions: usize, capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            dimensions,
        }
    }

    /// Get the expected embedding dimensions.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Get the number of entries in the index.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert an entry into the index.
    ///
    /// Rejects embeddings of the wrong dimension and zero-norm embeddings
    /// (which cannot participate in cosine similarity).
    pub fn insert(&mut self, id: u64, embedding: Vec<f32>) -> Result<(), IndexError> {
        if embedding.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: embedding.len(),
            });
        }

        let norm = l2_norm(&embedding);
        if norm < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        self.entries.insert(id, embedding);

        Ok(())
    }

    /// Search for similar vectors using cosine similarity.
    ///
    /// Scans every stored vector (O(n * d)), filters entries below
    /// `min_similarity`, sorts descending by similarity with ties broken by
    /// ascending id, and truncates to `k`. An empty result is a valid
    /// outcome, not an error.
    ///
    /// A zero-norm query is rejected with `IndexError::ZeroNormVector`; the
    /// embedder's empty-input validation should make that unreachable in
    /// practice.
    ///
    /// # Arguments
    /// * `query` - The query embedding vector
    /// * `candidate_ids` - Optional set of ids to search within (filters results)
    /// * `min_similarity` - Minimum similarity score to include
    /// * `k` - Maximum number of results to return
    pub fn search(
        &self,
        query: &[f32],
        candidate_ids: Option<&[u64]>,
        min_similarity: f32,
        k: usize,
    ) -> Result<Vec<ScoredId>, IndexError> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        let query_norm = l2_norm(query);
        if query_norm < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        let mut results: Vec<ScoredId> = self
            .entries
            .iter()
            .filter(|(id, _)| candidate_ids.map(|ids| ids.contains(*id)).unwrap_or(true))
            .filter_map(|(id, embedding)| {
                let similarity = cosine_similarity(query, embedding, query_norm);
                if similarity >= min_similarity {
                    Some(ScoredId {
                        id: *id,
                        similarity,
                    })
                } else {
                    None
                }
            })
            .collect();

        // Sort by similarity descending, ties by ascending id
        results.sort_by(|a, b| {
            if (a.similarity - b.similarity).abs() <= TIE_EPSILON {
                a.id.cmp(&b.id)
            } else {
                b.similarity
                    .partial_cmp(&a.similarity)
                    .unwrap_or(std::cmp::Ordering::Equal)
            }
        });

        results.truncate(k);

        Ok(results)
    }
}

/// Compute L2 norm of a vector.
fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Compute cosine similarity between two vectors.
/// Assumes query_norm is precomputed for efficiency.
fn cosine_similarity(query: &[f32], target: &[f32], query_norm: f32) -> f32 {
    let target_norm = l2_norm(target);
    if target_norm < f32::EPSILON {
        return 0.0;
    }

    let dot_product: f32 = query.iter().zip(target.iter()).map(|(a, b)| a * b).sum();
    dot_product / (query_norm * target_norm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_index() {
        let index = VectorIndex::new(384);
        assert_eq!(index.dimensions(), 384);
        assert!(index.is_empty());
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_insert_grows_index() {
        let mut index = VectorIndex::new(3);
        index.insert(1, vec![1.0, 0.0, 0.0]).unwrap();

        assert_eq!(index.len(), 1);
        assert!(!index.is_empty());
    }

    #[test]
    fn test_insert_dimension_mismatch() {
        let mut index = VectorIndex::new(3);
        let wrong_dims = vec![1.0, 0.0, 0.0, 0.0]; // 4 dims

        let result = index.insert(1, wrong_dims);
        assert!(matches!(result, Err(IndexError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_insert_zero_norm_rejected() {
        let mut index = VectorIndex::new(3);
        let result = index.insert(1, vec![0.0, 0.0, 0.0]);
        assert!(matches!(result, Err(IndexError::ZeroNormVector)));
    }

    #[test]
    fn test_search_zero_norm_query_rejected() {
        let mut index = VectorIndex::new(3);
        index.insert(1, vec![1.0, 0.0, 0.0]).unwrap();

        let result = index.search(&[0.0, 0.0, 0.0], None, 0.0, 10);
        assert!(matches!(result, Err(IndexError::ZeroNormVector)));
    }

    #[test]
    fn test_search_ranks_by_similarity() {
        let mut index = VectorIndex::new(3);

        index.insert(1, vec![1.0, 0.0, 0.0]).unwrap();
        index.insert(2, vec![0.0, 1.0, 0.0]).unwrap();

        let query = vec![1.0, 0.1, 0.0];
        let results = index.search(&query, None, 0.0, 10).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, 1); // Should be most similar
        assert!(results[0].similarity > results[1].similarity);
    }

    #[test]
    fn test_search_self_similarity_is_one() {
        let mut index = VectorIndex::new(3);
        let v = vec![0.3, 0.4, 0.5];
        index.insert(7, v.clone()).unwrap();

        let results = index.search(&v, None, 0.0, 1).unwrap();
        assert_eq!(results[0].id, 7);
        assert!((results[0].similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_search_threshold_filters() {
        let mut index = VectorIndex::new(3);

        index.insert(1, vec![1.0, 0.0, 0.0]).unwrap();
        index.insert(2, vec![0.0, 1.0, 0.0]).unwrap();

        let query = vec![1.0, 0.0, 0.0];
        let results = index.search(&query, None, 0.9, 10).unwrap();

        // Only the exact match clears the threshold
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, 1);
    }

    #[test]
    fn test_search_respects_k() {
        let mut index = VectorIndex::new(3);

        for i in 0..10 {
            index.insert(i, vec![1.0, i as f32 * 0.1, 0.0]).unwrap();
        }

        let query = vec![1.0, 0.0, 0.0];
        let results = index.search(&query, None, 0.0, 3).unwrap();

        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_ties_broken_by_ascending_id() {
        let mut index = VectorIndex::new(3);

        // Identical vectors under different ids produce identical similarities
        index.insert(9, vec![1.0, 0.0, 0.0]).unwrap();
        index.insert(2, vec![1.0, 0.0, 0.0]).unwrap();
        index.insert(5, vec![1.0, 0.0, 0.0]).unwrap();

        let results = index.search(&[1.0, 0.0, 0.0], None, 0.0, 10).unwrap();
        let ids: Vec<u64> = results.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 5, 9]);
    }

    #[test]
    fn test_search_empty_index_returns_empty() {
        let index = VectorIndex::new(3);
        let results = index.search(&[1.0, 0.0, 0.0], None, 0.0, 10).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_search_with_candidate_filter() {
        let mut index = VectorIndex::new(3);

        index.insert(1, vec![1.0, 0.0, 0.0]).unwrap();
        index.insert(2, vec![0.9, 0.1, 0.0]).unwrap();
        index.insert(3, vec![0.8, 0.2, 0.0]).unwrap();

        let candidates = vec![2, 3];
        let query = vec![1.0, 0.0, 0.0];
        let results = index.search(&query, Some(&candidates), 0.0, 10).unwrap();

        assert!(!results.iter().any(|r| r.id == 1));
        assert!(results.iter().any(|r| r.id == 2));
        assert!(results.iter().any(|r| r.id == 3));
    }
}
