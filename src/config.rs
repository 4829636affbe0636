use crate::engine::{DEFAULT_MIN_SIMILARITY, DEFAULT_MODEL, DEFAULT_TOP_K};
use crate::storage::{self, StorageManager};
use serde::{Deserialize, Serialize};

/// Default daemon listen address
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Configuration for the matching engine
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Model name for embeddings (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_model")]
    pub model: String,

    /// Default number of matches returned per query
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Default minimum similarity [0.0, 1.0] for a match to count
    #[serde(default = "default_min_similarity")]
    pub default_min_similarity: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            default_top_k: DEFAULT_TOP_K,
            default_min_similarity: DEFAULT_MIN_SIMILARITY,
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_min_similarity() -> f32 {
    DEFAULT_MIN_SIMILARITY
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            base_path: String::new(),
        }
    }
}

impl Config {
    /// Validated once at startup; engine code never re-reads these per call.
    fn validate(&mut self) {
        let engine = &self.engine;

        if engine.model.trim().is_empty() {
            panic!("engine.model must not be empty");
        }

        if engine.default_top_k == 0 {
            panic!("engine.default_top_k must be greater than 0");
        }

        if !(0.0..=1.0).contains(&engine.default_min_similarity) {
            panic!(
                "engine.default_min_similarity must be between 0.0 and 1.0, got {}",
                engine.default_min_similarity
            );
        }

        if self.listen_addr.trim().is_empty() {
            panic!("listen_addr must not be empty");
        }
    }

    pub fn load_with(base_path: &str) -> anyhow::Result<Self> {
        let store = storage::BackendLocal::new(base_path)?;

        // create new if does not exist
        if !store.exists("config.yaml") {
            store.write(
                "config.yaml",
                serde_yml::to_string(&Self::default()).unwrap().as_bytes(),
            )?;
        }

        let config_str =
            String::from_utf8(store.read("config.yaml")?).expect("config file is not valid utf8");
        let mut config: Self = serde_yml::from_str(&config_str).expect("config is malformed");

        config.base_path = base_path.to_string();

        config.validate();

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config).unwrap() {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let store = storage::BackendLocal::new(&self.base_path)?;

        let config_str = serde_yml::to_string(&self).unwrap();
        store.write("config.yaml", config_str.as_bytes())?;
        Ok(())
    }
}
