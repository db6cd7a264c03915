//! JSON graph dumps
//!
//! The shape the `import` command reads: category nodes, any other upstream
//! nodes (documents, chunks) under their own label, and relationships
//! between them. Category ids are kept as given so relationships in the same
//! dump can refer to them.

use crate::graph::{CategoryNode, Relationship};
use crate::storage::{GraphStore, StorageError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid graph dump: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid graph dump: {0}")]
    Invalid(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A node stored under a label other than `Category`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabeledNode {
    pub label: String,
    #[serde(flatten)]
    pub node: CategoryNode,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphDump {
    pub categories: Vec<CategoryNode>,
    pub nodes: Vec<LabeledNode>,
    pub relationships: Vec<Relationship>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub categories: usize,
    pub nodes: usize,
    pub relationships: usize,
}

impl GraphDump {
    pub fn from_json_str(json: &str) -> Result<Self, ImportError> {
        let dump: Self = serde_json::from_str(json)?;
        dump.validate()?;
        Ok(dump)
    }

    pub fn load(path: &Path) -> Result<Self, ImportError> {
        let json = std::fs::read_to_string(path).map_err(|source| ImportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Check names and labels before anything is written.
    pub fn validate(&self) -> Result<(), ImportError> {
        for node in &self.categories {
            if node.name.trim().is_empty() {
                return Err(ImportError::Invalid(format!(
                    "category {} has an empty name",
                    node.id
                )));
            }
        }
        for labeled in &self.nodes {
            if labeled.label.trim().is_empty() {
                return Err(ImportError::Invalid(format!(
                    "node {} has an empty label",
                    labeled.node.id
                )));
            }
            if labeled.node.name.trim().is_empty() {
                return Err(ImportError::Invalid(format!(
                    "node {} has an empty name",
                    labeled.node.id
                )));
            }
        }
        if let Some(rel) = self.relationships.iter().find(|r| r.rel_type.trim().is_empty()) {
            return Err(ImportError::Invalid(format!(
                "relationship {} -> {} has an empty type",
                rel.source, rel.target
            )));
        }
        Ok(())
    }

    /// Write every node, then every relationship.
    ///
    /// Nodes are upserted, so importing the same dump twice does not
    /// duplicate them. Relationships get fresh ids on every import.
    pub fn write_to(&self, store: &dyn GraphStore) -> Result<ImportReport, ImportError> {
        for node in &self.categories {
            store.save_node(node)?;
        }
        for labeled in &self.nodes {
            store.save_labeled_node(&labeled.label, &labeled.node)?;
        }
        for relationship in &self.relationships {
            store.save_relationship(relationship)?;
        }

        let report = ImportReport {
            categories: self.categories.len(),
            nodes: self.nodes.len(),
            relationships: self.relationships.len(),
        };
        info!(
            categories = report.categories,
            nodes = report.nodes,
            relationships = report.relationships,
            "imported graph dump"
        );
        Ok(report)
    }
}
