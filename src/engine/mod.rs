//! Incident matching engine.
//!
//! Turns incident descriptions into fixed-size embeddings, keeps them
//! alongside their source records, and answers nearest-neighbor queries with
//! thresholding, ranking and top-k selection.
//!
//! # Architecture
//!
//! - `embeddings`: Wraps fastembed for embedding generation
//! - `index`: In-memory vector index with cosine similarity search
//! - `store`: Incident records plus the index over their embeddings
//! - `persist`: Binary file I/O for incidents.bin
//! - `ingest`: Batch ingestion pipeline with pre-batch baseline matching
//! - `resolve`: Resolution selection over ranked matches
//! - `service`: High-level service the CLI and HTTP layer call into

pub mod embeddings;
mod index;
pub mod ingest;
mod persist;
pub mod resolve;
mod service;
mod store;

pub use embeddings::{Embedder, EmbeddingModel};
pub use index::IndexError;
pub use persist::{PersistError, RecordFile};
pub use service::{EngineError, IncidentService};
pub use store::{IncidentStore, StoreError};

/// Default embedding model, matching the reference 384-dimension setup
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";

/// Default minimum similarity for a match to count
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.5;

/// Default number of matches returned per query
pub const DEFAULT_TOP_K: usize = 5;
