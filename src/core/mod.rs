//! Core data structures for the community GraphRAG system.
//!
//! This module contains the property-graph data model (nodes, edges, typed
//! property bags) and the identifiers shared by every component. Anything
//! that crosses a component boundary lives here.

pub mod error;

pub use error::{GraphRagError, Result};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Unique identifier for graph nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    /// Creates a new NodeId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
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

/// Unique identifier for graph edges.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId(pub String);

impl EdgeId {
    /// Creates a new EdgeId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EdgeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of a community within one detection run.
///
/// Dense integers assigned in first-member order. Stable within a run, not
/// across runs with different parameters.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct CommunityId(pub u64);

impl std::fmt::Display for CommunityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Version of a graph snapshot.
///
/// A content hash over the snapshot's node and edge identity, so re-reading
/// an unchanged graph yields the same version and keeps summary caches warm.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphVersion(pub String);

impl GraphVersion {
    /// Creates a version from a precomputed string.
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }
}

impl std::fmt::Display for GraphVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scalar property value.
///
/// The service layer feeding this core is loosely typed; property bags are
/// narrowed to this closed set of scalar kinds at ingestion rather than left
/// as open dynamic values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// Text value.
    String(String),
    /// Numeric value (integers are widened to f64).
    Number(f64),
    /// Boolean value.
    Bool(bool),
}

impl PropertyValue {
    /// The value as a display string, for prompt building.
    pub fn as_text(&self) -> String {
        match self {
            PropertyValue::String(s) => s.clone(),
            PropertyValue::Number(n) => n.to_string(),
            PropertyValue::Bool(b) => b.to_string(),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.to_string())
    }
}

impl From<f64> for PropertyValue {
    fn from(n: f64) -> Self {
        PropertyValue::Number(n)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Bool(b)
    }
}

/// Property bag: name to scalar value, insertion order preserved.
pub type Properties = IndexMap<String, PropertyValue>;

/// A graph node (entity). Immutable within one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Stable unique identifier.
    pub id: NodeId,
    /// Label, e.g. "Person" or "Organization".
    pub node_type: String,
    /// Validated scalar properties.
    #[serde(default)]
    pub properties: Properties,
}

impl Node {
    /// Creates a node with an empty property bag.
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(id),
            node_type: node_type.into(),
            properties: Properties::new(),
        }
    }

    /// Human-readable name: the "name" property when present, else the id.
    pub fn display_name(&self) -> String {
        match self.properties.get("name") {
            Some(PropertyValue::String(name)) => name.clone(),
            _ => self.id.0.clone(),
        }
    }
}

/// A directed graph edge (relation).
///
/// Multiple edges between the same node pair are permitted when their types
/// differ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Stable unique identifier.
    pub id: EdgeId,
    /// Source node id; must resolve within the snapshot.
    pub source_id: NodeId,
    /// Target node id; must resolve within the snapshot.
    pub target_id: NodeId,
    /// Relation label, e.g. "WORKS_FOR".
    pub edge_type: String,
    /// Validated scalar properties.
    #[serde(default)]
    pub properties: Properties,
}

impl Edge {
    /// Creates an edge with an empty property bag.
    pub fn new(
        id: impl Into<String>,
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        edge_type: impl Into<String>,
    ) -> Self {
        Self {
            id: EdgeId::new(id),
            source_id: NodeId::new(source_id),
            target_id: NodeId::new(target_id),
            edge_type: edge_type.into(),
            properties: Properties::new(),
        }
    }
}
