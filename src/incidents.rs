use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A resolved (or reference) incident as stored by the engine.
///
/// Records are created by ingestion and never mutated or deleted afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub id: u64,

    pub description: String,
    pub resolution: String,

    /// Embedding of `description`. Fixed length for every record in a store
    /// (384 for the default all-MiniLM-L6-v2 model). Not serialized in API
    /// responses; use the debug embed endpoint to inspect vectors.
    #[serde(default, skip_serializing)]
    pub embedding: Vec<f32>,

    pub created_at: DateTime<Utc>,
}

/// An incident row as supplied by an upload: text only, not yet embedded.
///
/// Column-name normalization (mapping "Short description" and friends onto
/// `description`) happens in the upload parser; the engine only ever sees
/// canonical drafts.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct IncidentDraft {
    pub description: String,
    #[serde(default)]
    pub resolution: String,
}

/// A single search hit: matched record plus its cosine similarity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    #[serde(flatten)]
    pub record: IncidentRecord,
    pub similarity: f32,
}

/// Ranked search hits, descending by similarity, at most k entries, every
/// entry at or above the query's minimum similarity.
pub type MatchSet = Vec<QueryResult>;

/// Outcome of one ingested row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestStatus {
    /// Row was embedded and committed under this id.
    Ingested { id: u64 },
    /// Row failed validation and was not stored.
    Skipped { reason: String },
    /// Embedding the row failed; earlier rows of the batch stay committed.
    Failed { error: String },
}

/// Per-row ingestion report: what happened to the row, plus the matches it
/// produced against the store state from before the batch began.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResult {
    pub description: String,
    #[serde(flatten)]
    pub status: IngestStatus,
    pub matches: MatchSet,
    pub best_solution: Option<String>,
}

/// Response for a single query: the authoritative best solution (if any match
/// cleared the threshold) and the full ranked match set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub description: String,
    pub solution: Option<String>,
    pub matches: MatchSet,
}
