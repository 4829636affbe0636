//! Batch ingestion pipeline.
//!
//! Every row is matched against the store state from before the batch began,
//! so a row can never match itself or rows inserted earlier in the same
//! batch. Rows are committed independently: a failure on row five leaves
//! rows one through four stored.

use crate::engine::embeddings::Embedder;
use crate::engine::resolve;
use crate::engine::store::IncidentStore;
use crate::incidents::{IncidentDraft, IngestResult, IngestStatus};

/// Ingest a batch of incident rows in input order.
///
/// Per row: validate the description, embed it, match against the pre-batch
/// baseline, then commit. Invalid rows are skipped and embedding failures
/// reported per row; the batch always runs to completion. Rows with an empty
/// resolution are still stored as reference data but never offered as a
/// solution.
pub fn ingest(
    store: &mut IncidentStore,
    embedder: &dyn Embedder,
    rows: Vec<IncidentDraft>,
    k: usize,
    min_similarity: f32,
) -> Vec<IngestResult> {
    // Snapshot of ids before any row of this batch is inserted
    let baseline = store.ids();

    rows.into_iter()
        .map(|row| ingest_row(store, embedder, &baseline, row, k, min_similarity))
        .collect()
}

fn ingest_row(
    store: &mut IncidentStore,
    embedder: &dyn Embedder,
    baseline: &[u64],
    row: IncidentDraft,
    k: usize,
    min_similarity: f32,
) -> IngestResult {
    let description = row.description.trim().to_string();

    if description.is_empty() {
        return IngestResult {
            description,
            status: IngestStatus::Skipped {
                reason: "empty description".to_string(),
            },
            matches: vec![],
            best_solution: None,
        };
    }

    let embedding = match embedder.embed(&description) {
        Ok(embedding) => embedding,
        Err(err) => {
            return IngestResult {
                description,
                status: IngestStatus::Failed {
                    error: err.to_string(),
                },
                matches: vec![],
                best_solution: None,
            }
        }
    };

    let matches = match store.search(&embedding, Some(baseline), min_similarity, k) {
        Ok(matches) => matches,
        Err(err) => {
            return IngestResult {
                description,
                status: IngestStatus::Failed {
                    error: err.to_string(),
                },
                matches: vec![],
                best_solution: None,
            }
        }
    };

    let best_solution = resolve::best_solution(&matches);

    let status = match store.insert_embedded(
        description.clone(),
        row.resolution.trim().to_string(),
        embedding,
    ) {
        Ok(record) => IngestStatus::Ingested { id: record.id },
        Err(err) => IngestStatus::Failed {
            error: err.to_string(),
        },
    };

    IngestResult {
        description,
        status,
        matches,
        best_solution,
    }
}
