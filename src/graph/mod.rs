//! Immutable graph snapshots.
//!
//! A [`GraphSnapshot`] is the in-memory view of the property graph that one
//! analysis run operates on. It is pulled from the storage collaborator once,
//! validated, versioned by content hash, and never mutated afterwards; a new
//! run builds a new snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use sha2::{Digest, Sha256};

use crate::core::{Edge, EdgeId, GraphRagError, GraphVersion, Node, NodeId, Result};
use crate::storage::GraphStorage;

/// Immutable, validated view of the graph at one point in time.
#[derive(Debug, Clone)]
pub struct GraphSnapshot {
    version: GraphVersion,
    nodes: IndexMap<NodeId, Node>,
    edges: IndexMap<EdgeId, Edge>,
    /// Undirected adjacency: node -> neighbors (community structure ignores
    /// edge direction, matching how the partition algorithms treat the graph).
    adjacency: HashMap<NodeId, Vec<NodeId>>,
}

impl GraphSnapshot {
    /// Builds a snapshot from explicit node and edge lists.
    ///
    /// Fails with a storage error when an edge references a node that is not
    /// in the node set, or when a node or edge id occurs twice.
    pub fn build(nodes: Vec<Node>, edges: Vec<Edge>) -> Result<Self> {
        let mut node_map = IndexMap::with_capacity(nodes.len());
        for node in nodes {
            if node_map.insert(node.id.clone(), node).is_some() {
                return Err(GraphRagError::Storage {
                    message: "duplicate node id in snapshot".to_string(),
                });
            }
        }

        let mut edge_map = IndexMap::with_capacity(edges.len());
        let mut adjacency: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for edge in edges {
            if !node_map.contains_key(&edge.source_id) || !node_map.contains_key(&edge.target_id) {
                return Err(GraphRagError::Storage {
                    message: format!(
                        "edge {} references missing endpoint ({} -> {})",
                        edge.id, edge.source_id, edge.target_id
                    ),
                });
            }
            adjacency
                .entry(edge.source_id.clone())
                .or_default()
                .push(edge.target_id.clone());
            if edge.source_id != edge.target_id {
                adjacency
                    .entry(edge.target_id.clone())
                    .or_default()
                    .push(edge.source_id.clone());
            }
            if edge_map.insert(edge.id.clone(), edge).is_some() {
                return Err(GraphRagError::Storage {
                    message: "duplicate edge id in snapshot".to_string(),
                });
            }
        }

        let version = content_version(&node_map, &edge_map);
        Ok(Self {
            version,
            nodes: node_map,
            edges: edge_map,
            adjacency,
        })
    }

    /// Pulls the current graph from the storage collaborator.
    pub async fn from_storage(storage: &dyn GraphStorage) -> Result<Arc<Self>> {
        let nodes = storage.get_nodes().await?;
        let edges = storage.get_edges().await?;
        let snapshot = Self::build(nodes, edges)?;
        tracing::info!(
            version = %snapshot.version,
            nodes = snapshot.node_count(),
            edges = snapshot.edge_count(),
            "graph snapshot built"
        );
        Ok(Arc::new(snapshot))
    }

    /// The snapshot's content-hash version.
    pub fn version(&self) -> &GraphVersion {
        &self.version
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// All nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// All edges in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    /// Looks up a node by id.
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// All node ids in insertion order.
    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    /// Undirected neighbors of a node. Empty for isolated nodes.
    pub fn neighbors(&self, id: &NodeId) -> &[NodeId] {
        self.adjacency.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Undirected degree of a node, counting parallel edges.
    pub fn degree(&self, id: &NodeId) -> usize {
        self.neighbors(id).len()
    }

    /// Edges whose endpoints both lie in the given member set.
    pub fn edges_within<'a>(
        &'a self,
        members: &'a std::collections::BTreeSet<NodeId>,
    ) -> impl Iterator<Item = &'a Edge> {
        self.edges
            .values()
            .filter(move |e| members.contains(&e.source_id) && members.contains(&e.target_id))
    }
}

/// SHA-256 over the sorted node/edge identity of the snapshot.
///
/// Property values are deliberately excluded: community structure depends on
/// topology and labels only, so a property-only change must not invalidate
/// summaries.
fn content_version(
    nodes: &IndexMap<NodeId, Node>,
    edges: &IndexMap<EdgeId, Edge>,
) -> GraphVersion {
    let mut node_lines: Vec<String> = nodes
        .values()
        .map(|n| format!("n:{}:{}", n.id, n.node_type))
        .collect();
    node_lines.sort();

    let mut edge_lines: Vec<String> = edges
        .values()
        .map(|e| format!("e:{}:{}:{}:{}", e.id, e.source_id, e.target_id, e.edge_type))
        .collect();
    edge_lines.sort();

    let mut hasher = Sha256::new();
    for line in node_lines.iter().chain(edge_lines.iter()) {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    let digest = hasher.finalize();
    GraphVersion::new(format!("{digest:x}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Edge, Node};

    fn sample() -> (Vec<Node>, Vec<Edge>) {
        let nodes = vec![
            Node::new("a", "Person"),
            Node::new("b", "Person"),
            Node::new("c", "Organization"),
        ];
        let edges = vec![
            Edge::new("e1", "a", "b", "KNOWS"),
            Edge::new("e2", "b", "c", "WORKS_FOR"),
        ];
        (nodes, edges)
    }

    #[test]
    fn builds_and_indexes_adjacency() {
        let (nodes, edges) = sample();
        let snapshot = GraphSnapshot::build(nodes, edges).unwrap();
        assert_eq!(snapshot.node_count(), 3);
        assert_eq!(snapshot.edge_count(), 2);
        assert_eq!(snapshot.degree(&NodeId::from("b")), 2);
        assert_eq!(snapshot.degree(&NodeId::from("a")), 1);
    }

    #[test]
    fn rejects_dangling_edge() {
        let nodes = vec![Node::new("a", "Person")];
        let edges = vec![Edge::new("e1", "a", "ghost", "KNOWS")];
        let err = GraphSnapshot::build(nodes, edges).unwrap_err();
        assert!(matches!(err, GraphRagError::Storage { .. }));
    }

    #[test]
    fn version_is_content_addressed() {
        let (nodes, edges) = sample();
        let first = GraphSnapshot::build(nodes.clone(), edges.clone()).unwrap();
        // Same content in a different insertion order hashes identically.
        let mut reordered = nodes;
        reordered.reverse();
        let second = GraphSnapshot::build(reordered, edges).unwrap();
        assert_eq!(first.version(), second.version());

        // Adding an edge changes the version.
        let (nodes, mut edges) = sample();
        edges.push(Edge::new("e3", "a", "c", "KNOWS"));
        let third = GraphSnapshot::build(nodes, edges).unwrap();
        assert_ne!(first.version(), third.version());
    }
}
