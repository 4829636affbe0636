//! Persisted collection of incident records.
//!
//! Owns the records and the vector index over their embeddings. Ids are
//! assigned strictly increasing and never reused; records are immutable once
//! inserted and are never deleted by the engine.

use std::collections::BTreeMap;

use chrono::Utc;

use crate::engine::embeddings::{Embedder, EmbeddingError};
use crate::engine::index::{IndexError, VectorIndex};
use crate::incidents::{IncidentDraft, IncidentRecord, MatchSet, QueryResult};

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// The embedder produced a vector of the wrong length. This is an
    /// invariant violation (embedder misconfiguration), never tolerated:
    /// the record is rejected, not stored with a bad vector.
    #[error("Corrupt embedding: expected dimension {expected}, got {got}")]
    CorruptEmbedding { expected: usize, got: usize },

    #[error("Index error: {0}")]
    Index(#[from] IndexError),
}

/// In-memory incident store backed by a vector index.
///
/// BTreeMap keeps iteration ordered by id, which makes persistence output
/// and `iter()` deterministic.
pub struct IncidentStore {
    records: BTreeMap<u64, IncidentRecord>,
    index: VectorIndex,
    next_id: u64,
}

impl IncidentStore {
    pub fn new(dimensions: usize) -> Self {
        Self {
            records: BTreeMap::new(),
            index: VectorIndex::new(dimensions),
            next_id: 1,
        }
    }

    pub fn with_capacity(dimensions: usize, capacity: usize) -> Self {
        Self {
            records: BTreeMap::new(),
            index: VectorIndex::with_capacity(dimensions, capacity),
            next_id: 1,
        }
    }

    /// The store-wide embedding dimension.
    pub fn dimensions(&self) -> usize {
        self.index.dimensions()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Embed the draft's description and commit it as a new record.
    ///
    /// Fails with `Validation` on an empty description, propagates embedding
    /// failures unchanged, and rejects wrong-dimension vectors with
    /// `CorruptEmbedding`. Rows failing any of these are never stored.
    pub fn insert(
        &mut self,
        draft: IncidentDraft,
        embedder: &dyn Embedder,
    ) -> Result<IncidentRecord, StoreError> {
        let description = draft.description.trim().to_string();
        if description.is_empty() {
            return Err(StoreError::Validation(
                "incident description must not be empty".to_string(),
            ));
        }

        let embedding = embedder.embed(&description)?;
        self.insert_embedded(description, draft.resolution.trim().to_string(), embedding)
    }

    /// Commit a record whose description was already embedded. The ingestion
    /// pipeline uses this to reuse the vector it just searched with.
    pub fn insert_embedded(
        &mut self,
        description: String,
        resolution: String,
        embedding: Vec<f32>,
    ) -> Result<IncidentRecord, StoreError> {
        if embedding.len() != self.dimensions() {
            return Err(StoreError::CorruptEmbedding {
                expected: self.dimensions(),
                got: embedding.len(),
            });
        }

        let record = IncidentRecord {
            id: self.next_id,
            description,
            resolution,
            embedding,
            created_at: Utc::now(),
        };

        self.index.insert(record.id, record.embedding.clone())?;
        self.records.insert(record.id, record.clone());
        self.next_id += 1;

        Ok(record)
    }

    /// Re-insert an already-embedded record, used when loading from disk.
    /// Keeps the id counter ahead of every loaded id.
    pub fn insert_record(&mut self, record: IncidentRecord) -> Result<(), StoreError> {
        if record.embedding.len() != self.dimensions() {
            return Err(StoreError::CorruptEmbedding {
                expected: self.dimensions(),
                got: record.embedding.len(),
            });
        }

        self.index.insert(record.id, record.embedding.clone())?;
        self.next_id = self.next_id.max(record.id + 1);
        self.records.insert(record.id, record);

        Ok(())
    }

    /// Lookup by id. Absence is an expected outcome, not an error.
    pub fn get(&self, id: u64) -> Option<&IncidentRecord> {
        self.records.get(&id)
    }

    /// Snapshot of all record ids at call time, ascending.
    pub fn ids(&self) -> Vec<u64> {
        self.records.keys().copied().collect()
    }

    /// Iterate records in id order.
    pub fn iter(&self) -> impl Iterator<Item = &IncidentRecord> {
        self.records.values()
    }

    /// Top-k cosine similarity search over stored embeddings.
    ///
    /// `candidate_ids` restricts the scan to a subset of records; the
    /// ingestion pipeline uses it to match rows against the pre-batch
    /// snapshot only.
    pub fn search(
        &self,
        query: &[f32],
        candidate_ids: Option<&[u64]>,
        min_similarity: f32,
        k: usize,
    ) -> Result<MatchSet, IndexError> {
        let scored = self.index.search(query, candidate_ids, min_similarity, k)?;

        Ok(scored
            .into_iter()
            .filter_map(|hit| {
                self.records.get(&hit.id).map(|record| QueryResult {
                    record: record.clone(),
                    similarity: hit.similarity,
                })
            })
            .collect())
    }
}
