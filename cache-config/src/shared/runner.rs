use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::Config;
use crate::shared::{CacheConfig, ValidationError};

/// Configuration of the cache runner process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RunnerConfig {
    /// Analytical store the runner opens.
    #[serde(default)]
    pub store: StoreConfig,
    /// Cache job executed by the runner.
    pub cache: CacheConfig,
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.cache.validate()
    }
}

impl Config for RunnerConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &["cache.fts_tables", "cache.patient_filter"];
}

/// Location of the analytical store database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StoreConfig {
    /// Database file holding the job table. An in-memory database is used when absent.
    #[serde(default)]
    pub path: Option<PathBuf>,
}
