//! Relationship representation

use super::node::{NodeId, Properties};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Relationship type written by the extraction pipeline.
pub const MENTIONS: &str = "MENTIONS";

/// Store-assigned relationship identifier.
///
/// Monotonically increasing: a lower id means the relationship was created
/// earlier, which is what the reciprocal-duplicate pass keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(i64);

impl EdgeId {
    pub fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A directed relationship between two nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    /// Assigned by the store on insert; `None` until saved
    #[serde(default)]
    pub id: Option<EdgeId>,
    /// Source node
    pub source: NodeId,
    /// Target node
    pub target: NodeId,
    /// Type of relationship (e.g., "MENTIONS")
    #[serde(default = "default_rel_type")]
    pub rel_type: String,
    /// Additional properties (relevance, description)
    #[serde(default)]
    pub properties: Properties,
    /// When the relationship was created
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_rel_type() -> String {
    MENTIONS.to_string()
}

impl Relationship {
    /// Create an unsaved relationship
    pub fn new(source: NodeId, target: NodeId, rel_type: impl Into<String>) -> Self {
        Self {
            id: None,
            source,
            target,
            rel_type: rel_type.into(),
            properties: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Create an unsaved `MENTIONS` relationship
    pub fn mentions(source: NodeId, target: NodeId) -> Self {
        Self::new(source, target, MENTIONS)
    }

    pub fn is_self_loop(&self) -> bool {
        self.source == self.target
    }
}
