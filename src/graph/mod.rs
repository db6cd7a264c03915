//! Core graph data structures

mod edge;
mod node;

pub use edge::{EdgeId, Relationship, MENTIONS};
pub use node::{CategoryNode, NodeId, Properties, PropertyValue, CATEGORY_LABEL};
