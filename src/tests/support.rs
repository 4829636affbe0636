//! Shared test helpers.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::engine::embeddings::{Embedder, EmbeddingError};

/// Deterministic bag-of-words embedder for tests that must not download a
/// model. Each lowercase whitespace token is hashed into one of the vector's
/// buckets, so texts sharing tokens get high cosine similarity and identical
/// texts embed identically.
pub struct StubEmbedder {
    dimensions: usize,
}

impl StubEmbedder {
    pub fn new() -> Self {
        Self { dimensions: 32 }
    }
}

impl Embedder for StubEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let mut vector = vec![0.0f32; self.dimensions];
        for token in text.to_lowercase().split_whitespace() {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let bucket = (hasher.finish() as usize) % self.dimensions;
            vector[bucket] += 1.0;
        }

        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stub_is_deterministic() {
        let embedder = StubEmbedder::new();
        let a = embedder.embed("database connection refused").unwrap();
        let b = embedder.embed("database connection refused").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), embedder.dimensions());
    }

    #[test]
    fn test_stub_rejects_empty_input() {
        let embedder = StubEmbedder::new();
        assert!(matches!(
            embedder.embed("  \t"),
            Err(EmbeddingError::EmptyInput)
        ));
    }
}
