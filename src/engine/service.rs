//! High-level incident matching service.
//!
//! Coordinates the embedding model, the incident store and the record file:
//! - Lazy single-shot initialization (the model load is expensive and must
//!   happen once per process, never concurrently)
//! - Batch ingestion, single-query search and the debug embedding dump
//! - Persistence after every committed batch and on shutdown

use std::path::PathBuf;
use std::sync::Mutex;

use crate::config::EngineConfig;
use crate::engine::embeddings::{Embedder, EmbeddingError, EmbeddingModel};
use crate::engine::index::IndexError;
use crate::engine::ingest;
use crate::engine::persist::{PersistError, RecordFile};
use crate::engine::resolve;
use crate::engine::store::{IncidentStore, StoreError};
use crate::incidents::{IncidentDraft, IncidentRecord, IngestResult, SearchResponse};

/// Errors surfaced by the service.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether the caller can fix this by correcting their input.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            EngineError::Embedding(EmbeddingError::EmptyInput)
                | EngineError::Store(StoreError::Validation(_))
        )
    }
}

/// Lazily-initialized engine internals.
struct EngineState {
    model: EmbeddingModel,
    store: IncidentStore,
    file: RecordFile,
}

/// Service for matching incident descriptions against the historical corpus.
///
/// Lazily loads the embedding model and record file on first use.
/// Thread-safe through interior mutability.
pub struct IncidentService {
    config: EngineConfig,
    base_path: PathBuf,
    /// Lazily-initialized state. Uses Mutex<Option<_>> instead of OnceLock
    /// because get_or_try_init is unstable.
    state: Mutex<Option<EngineState>>,
}

impl IncidentService {
    /// Create the service in an uninitialized state. The model and record
    /// file load on first use (or via `initialize`).
    ///
    /// # Arguments
    /// * `config` - Engine configuration, validated at startup
    /// * `base_path` - Base directory for data files (incidents.bin, models/)
    pub fn new(config: EngineConfig, base_path: PathBuf) -> Self {
        Self {
            config,
            base_path,
            state: Mutex::new(None),
        }
    }

    pub fn default_top_k(&self) -> usize {
        self.config.default_top_k
    }

    pub fn default_min_similarity(&self) -> f32 {
        self.config.default_min_similarity
    }

    pub fn model_name(&self) -> &str {
        &self.config.model
    }

    /// Number of stored incidents. Returns 0 if not yet initialized.
    pub fn incident_count(&self) -> usize {
        self.state
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|s| s.store.len()))
            .unwrap_or(0)
    }

    pub fn is_initialized(&self) -> bool {
        self.state
            .lock()
            .ok()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Force initialization. Normally it happens lazily on first call.
    pub fn initialize(&self) -> Result<(), EngineError> {
        self.with_state(|_| Ok(()))
    }

    /// Ingest a batch of rows and persist the store afterwards.
    ///
    /// Per-row failures are captured in the returned results and never abort
    /// the batch; a persistence failure after the batch is an error, but the
    /// in-memory store keeps the committed rows either way.
    pub fn ingest_batch(&self, rows: Vec<IncidentDraft>) -> Result<Vec<IngestResult>, EngineError> {
        let k = self.config.default_top_k;
        let min_similarity = self.config.default_min_similarity;

        self.with_state(|state| {
            let results = ingest::ingest(&mut state.store, &state.model, rows, k, min_similarity);

            let model_id = state.model.model_id_hash();
            state.file.save(&state.store, &model_id)?;

            log::info!(
                "ingested batch of {} rows, store now holds {} incidents",
                results.len(),
                state.store.len()
            );

            Ok(results)
        })
    }

    /// Match a single query against the corpus.
    ///
    /// No match is a valid outcome: the response carries `solution: None`
    /// and an empty match set.
    pub fn search_one(
        &self,
        query: &str,
        k: Option<usize>,
        min_similarity: Option<f32>,
    ) -> Result<SearchResponse, EngineError> {
        let k = k.unwrap_or(self.config.default_top_k);
        let min_similarity = min_similarity.unwrap_or(self.config.default_min_similarity);

        self.with_state(|state| {
            let embedding = state.model.embed(query)?;
            let matches = state.store.search(&embedding, None, min_similarity, k)?;
            let resolution = resolve::select(matches);

            Ok(SearchResponse {
                description: query.trim().to_string(),
                solution: resolution.solution,
                matches: resolution.matches,
            })
        })
    }

    /// Diagnostic pass-through to the embedder.
    pub fn debug_embed(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        self.with_state(|state| Ok(state.model.embed(text)?))
    }

    /// Lookup a stored incident. Absence is reported as `None`, not an error.
    pub fn get(&self, id: u64) -> Result<Option<IncidentRecord>, EngineError> {
        self.with_state(|state| Ok(state.store.get(id).cloned()))
    }

    /// Persist the current store state.
    pub fn save(&self) -> Result<(), EngineError> {
        self.with_state(|state| {
            let model_id = state.model.model_id_hash();
            state.file.save(&state.store, &model_id)?;
            Ok(())
        })
    }

    /// Run `f` against the initialized state, initializing first if needed.
    /// The single lock both guards lazy init against concurrent first calls
    /// and serializes id assignment across concurrent ingests.
    fn with_state<F, R>(&self, f: F) -> Result<R, EngineError>
    where
        F: FnOnce(&mut EngineState) -> Result<R, EngineError>,
    {
        let mut guard = self
            .state
            .lock()
            .map_err(|e| EngineError::Internal(format!("Lock poisoned: {}", e)))?;

        if guard.is_none() {
            *guard = Some(self.do_init()?);
        }

        let state = guard
            .as_mut()
            .expect("state initialized directly above");

        f(state)
    }

    /// Perform actual initialization: load the model, then the record file.
    fn do_init(&self) -> Result<EngineState, EngineError> {
        log::info!("initializing incident engine with model '{}'", self.config.model);

        let model = EmbeddingModel::new(&self.config.model, self.base_path.clone())?;

        let model_id = model.model_id_hash();
        let dimensions = model.dimensions();

        let file = RecordFile::new(self.base_path.join("incidents.bin"));

        let store = if file.exists() {
            match file.load(&model_id, dimensions) {
                Ok(records) => {
                    log::info!("loaded {} incidents from {:?}", records.len(), file.path());
                    Self::build_store(dimensions, records)?
                }
                Err(PersistError::ModelMismatch) => {
                    log::warn!(
                        "record file was written with a different model, re-embedding with '{}'",
                        self.config.model
                    );
                    let records = file.load_any_model()?;
                    let store = Self::reembed(dimensions, records, &model)?;
                    file.save(&store, &model_id)?;
                    store
                }
                // Unreadable file (unknown version, corruption, io): refuse to
                // run. The record file is the only copy of the records and the
                // next batch save would overwrite it.
                Err(e) => {
                    log::error!("failed to load incidents: {}", e);
                    return Err(e.into());
                }
            }
        } else {
            log::info!("no existing record file, starting fresh");
            IncidentStore::new(dimensions)
        };

        Ok(EngineState { model, store, file })
    }

    fn build_store(
        dimensions: usize,
        records: Vec<IncidentRecord>,
    ) -> Result<IncidentStore, EngineError> {
        let mut store = IncidentStore::with_capacity(dimensions, records.len());
        for record in records {
            store.insert_record(record)?;
        }
        Ok(store)
    }

    /// Rebuild every embedding with the active model. Ids, texts and
    /// timestamps are preserved; the record file is the source of truth, so
    /// records are never dropped on a model change.
    fn reembed(
        dimensions: usize,
        records: Vec<IncidentRecord>,
        model: &EmbeddingModel,
    ) -> Result<IncidentStore, EngineError> {
        let mut store = IncidentStore::with_capacity(dimensions, records.len());
        for mut record in records {
            record.embedding = model.embed(&record.description)?;
            store.insert_record(record)?;
        }
        log::info!("re-embedded {} incidents", store.len());
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DEFAULT_MODEL;

    fn test_config() -> EngineConfig {
        EngineConfig {
            model: DEFAULT_MODEL.to_string(),
            default_top_k: 5,
            default_min_similarity: 0.5,
        }
    }

    #[test]
    fn test_not_initialized_initially() {
        let service = IncidentService::new(test_config(), PathBuf::from("/tmp"));

        assert!(!service.is_initialized());
        assert_eq!(service.incident_count(), 0);
    }

    #[test]
    fn test_config_accessors() {
        let service = IncidentService::new(test_config(), PathBuf::from("/tmp"));

        assert_eq!(service.default_top_k(), 5);
        assert!((service.default_min_similarity() - 0.5).abs() < f32::EPSILON);
        assert_eq!(service.model_name(), DEFAULT_MODEL);
    }

    #[test]
    fn test_invalid_model_fails_initialization() {
        let mut config = test_config();
        config.model = "no-such-model".to_string();
        let service = IncidentService::new(config, PathBuf::from("/tmp"));

        let result = service.initialize();
        assert!(matches!(
            result,
            Err(EngineError::Embedding(EmbeddingError::InvalidModel(_)))
        ));
    }

    // Integration tests require model download
    #[test]
    #[ignore = "requires model download"]
    fn test_ingest_then_search_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let service = IncidentService::new(test_config(), dir.path().to_path_buf());

        let results = service
            .ingest_batch(vec![IncidentDraft {
                description: "Laptop won't turn on".to_string(),
                resolution: "Check power cable and battery connection".to_string(),
            }])
            .unwrap();
        assert_eq!(results.len(), 1);

        // Semantically close query clears the 0.5 threshold
        let response = service.search_one("laptop not starting", None, None).unwrap();
        assert_eq!(response.matches.len(), 1);
        assert!(response.matches[0].similarity > 0.5);
        assert_eq!(
            response.solution.as_deref(),
            Some("Check power cable and battery connection")
        );

        // Unrelated text falls below the threshold
        let response = service
            .search_one("purple elephant migration patterns", None, None)
            .unwrap();
        assert!(response.matches.is_empty());
        assert!(response.solution.is_none());
    }

    #[test]
    #[ignore = "requires model download"]
    fn test_store_survives_restart() {
        let dir = tempfile::tempdir().unwrap();

        {
            let service = IncidentService::new(test_config(), dir.path().to_path_buf());
            service
                .ingest_batch(vec![IncidentDraft {
                    description: "Screen stays black after login".to_string(),
                    resolution: "Update the display driver".to_string(),
                }])
                .unwrap();
        }

        {
            let service = IncidentService::new(test_config(), dir.path().to_path_buf());
            service.initialize().unwrap();
            assert_eq!(service.incident_count(), 1);

            let record = service.get(1).unwrap().expect("record should persist");
            assert_eq!(record.resolution, "Update the display driver");
        }
    }

    #[test]
    #[ignore = "requires model download"]
    fn test_unreadable_record_file_refuses_to_initialize() {
        let dir = tempfile::tempdir().unwrap();

        // A record file from a future format version must not be silently
        // replaced by an empty store: the file is the only copy of the records
        // and the next batch save would overwrite it.
        let mut contents = vec![0u8; 47];
        contents[0] = 99; // format version far ahead of ours
        let original = contents.clone();
        std::fs::write(dir.path().join("incidents.bin"), &contents).unwrap();

        let service = IncidentService::new(test_config(), dir.path().to_path_buf());
        let result = service.initialize();
        assert!(matches!(
            result,
            Err(EngineError::Persist(PersistError::VersionMismatch(99, _)))
        ));

        // File left untouched for the operator to migrate
        let after = std::fs::read(dir.path().join("incidents.bin")).unwrap();
        assert_eq!(after, original);
    }

    #[test]
    #[ignore = "requires model download"]
    fn test_debug_embed_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let service = IncidentService::new(test_config(), dir.path().to_path_buf());

        let vector = service.debug_embed("healthcheck").unwrap();
        assert_eq!(vector.len(), 384);
    }
}
