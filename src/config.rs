//! Run configuration
//!
//! Loaded from YAML; every field has a default, so an empty file (or no
//! file at all) is a valid configuration.

use crate::storage::MergePolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors. Always fatal at entry.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be within [0, 1], got {value}")]
    InvalidThreshold { name: &'static str, value: f64 },

    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },

    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DedupConfig {
    /// Minimum cosine similarity for two categories to share a community
    pub similarity_cutoff: f64,
    /// Minimum name similarity, as a fraction (0.05 = score 5 of 100)
    pub word_similarity: f64,
    /// Neighbours retrieved per node by the similarity search
    pub top_k: usize,
    /// Resolver calls in flight at once
    pub adjudication_concurrency: usize,
    pub adjudication_timeout_secs: u64,
    /// Merge groups per store transaction
    pub merge_batch_size: usize,
    /// Relationships deleted per sanitizer batch
    pub sanitize_batch_size: usize,
    /// Restrict the sanitizer to one relationship type
    pub sanitize_relationship_type: Option<String>,
    pub merge_policy: MergePolicy,
    pub projection_name: String,
    /// Embedding width; inferred from the first candidate when unset
    pub embedding_dimensions: Option<usize>,
    /// llm-orc ensemble used as the semantic resolver
    pub ensemble: String,
    /// Directory with the llm-orc project (`.llm-orc/`)
    pub llm_orc_project_dir: Option<PathBuf>,
    /// Cancel the run after this many seconds
    pub deadline_secs: Option<u64>,
    /// Merge what was adjudicated before a cancellation
    pub merge_on_cancel: bool,
    pub log_level: String,
    /// On-disk KNN index (needs the `vector-index` feature); in-memory when unset
    pub vector_index_path: Option<PathBuf>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_cutoff: 0.955,
            word_similarity: 0.05,
            top_k: 10,
            adjudication_concurrency: 10,
            adjudication_timeout_secs: 120,
            merge_batch_size: 20,
            sanitize_batch_size: 1000,
            sanitize_relationship_type: None,
            merge_policy: MergePolicy::Discard,
            projection_name: "entities".to_string(),
            embedding_dimensions: None,
            ensemble: "entity-resolution".to_string(),
            llm_orc_project_dir: None,
            deadline_secs: None,
            merge_on_cancel: false,
            log_level: "info".to_string(),
            vector_index_path: None,
        }
    }
}

impl DedupConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Load `path` if given, else the default location if it exists, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => match default_config_path() {
                Some(path) if path.exists() => Self::load(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_threshold("similarity_cutoff", self.similarity_cutoff)?;
        check_threshold("word_similarity", self.word_similarity)?;
        for (name, value) in [
            ("top_k", self.top_k),
            ("adjudication_concurrency", self.adjudication_concurrency),
            ("merge_batch_size", self.merge_batch_size),
            ("sanitize_batch_size", self.sanitize_batch_size),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    name,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.adjudication_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                name: "adjudication_timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.embedding_dimensions == Some(0) {
            return Err(ConfigError::InvalidValue {
                name: "embedding_dimensions",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.projection_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "projection_name",
                reason: "must not be empty".to_string(),
            });
        }
        if self.ensemble.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "ensemble",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn adjudication_timeout(&self) -> Duration {
        Duration::from_secs(self.adjudication_timeout_secs)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

/// Reject NaN and values outside `[0, 1]`.
pub fn check_threshold(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::InvalidThreshold { name, value });
    }
    Ok(())
}

/// `~/.config/coalesce/config.yaml` (platform equivalent)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("coalesce").join("config.yaml"))
}

/// Get the default database path (~/.local/share/coalesce/coalesce.db)
pub fn default_db_path() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    data_dir.join("coalesce").join("coalesce.db")
}
