//! Category node representation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Label carried by every node this engine deduplicates.
pub const CATEGORY_LABEL: &str = "Category";

/// Unique identifier for a node
///
/// Serializes as a plain string. Upstream extraction assigns UUIDs, but any
/// opaque string is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a new random NodeId
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a NodeId from an existing string
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Typed property values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Array(Vec<PropertyValue>),
    Object(HashMap<String, PropertyValue>),
}

impl PropertyValue {
    /// Whether the value carries information worth keeping in a merge.
    pub fn is_populated(&self) -> bool {
        match self {
            PropertyValue::String(s) => !s.trim().is_empty(),
            PropertyValue::Array(a) => !a.is_empty(),
            PropertyValue::Object(o) => !o.is_empty(),
            _ => true,
        }
    }
}

/// Properties collection
pub type Properties = HashMap<String, PropertyValue>;

/// A concept node subject to deduplication
///
/// `name` is never empty once a node is created; it only changes through a
/// merge. `community` is `None` until the connectivity stage has run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryNode {
    /// Unique identifier
    pub id: NodeId,
    /// Display label
    pub name: String,
    /// Pre-computed embedding of the name; empty when upstream has not embedded it yet
    #[serde(default)]
    pub embedding: Vec<f32>,
    /// Optional free text
    #[serde(default)]
    pub description: Option<String>,
    /// Weakly-connected component tag from the last pipeline run
    #[serde(default)]
    pub community: Option<i64>,
    /// Any other scalar properties written by the extraction pipeline
    #[serde(default)]
    pub properties: Properties,
    /// When the node was created
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl CategoryNode {
    /// Create a node with a fresh id and no embedding
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(),
            name: name.into(),
            embedding: Vec::new(),
            description: None,
            community: None,
            properties: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = NodeId::from_string(id);
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn has_embedding(&self) -> bool {
        !self.embedding.is_empty()
    }

    /// Number of populated properties, including the description.
    ///
    /// Used to pick the survivor of a merge: the richest node wins.
    pub fn richness(&self) -> usize {
        let description = self
            .description
            .as_deref()
            .map_or(0, |d| usize::from(!d.trim().is_empty()));
        description + self.properties.values().filter(|v| v.is_populated()).count()
    }
}
