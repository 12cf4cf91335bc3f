//! Graph storage collaborators.
//!
//! The core never talks to a database directly; it pulls nodes and edges
//! through the [`GraphStorage`] trait and builds an immutable snapshot from
//! them. [`MemoryGraphStorage`] is the in-process implementation used by the
//! engine's tests and by embedders that manage the graph themselves.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::core::{Edge, EdgeId, GraphRagError, GraphVersion, Node, NodeId, Result};

/// Source of graph data for snapshot construction.
///
/// Implementations are inside the trust boundary: errors propagate to the
/// caller without implicit retry.
#[async_trait]
pub trait GraphStorage: Send + Sync {
    /// All nodes currently in the store.
    async fn get_nodes(&self) -> Result<Vec<Node>>;

    /// All edges currently in the store.
    async fn get_edges(&self) -> Result<Vec<Edge>>;

    /// The store's own version marker, advancing on every mutation.
    ///
    /// Snapshots carry a content-hash version derived from the data itself;
    /// this is the storage-side counterpart for callers that want to poll
    /// for change without rebuilding a snapshot.
    async fn current_version(&self) -> Result<GraphVersion>;
}

#[derive(Default)]
struct MemoryState {
    nodes: IndexMap<NodeId, Node>,
    edges: IndexMap<EdgeId, Edge>,
}

/// In-memory graph store.
///
/// Writes validate referential integrity eagerly so a snapshot built from
/// this store never fails validation.
#[derive(Default)]
pub struct MemoryGraphStorage {
    state: RwLock<MemoryState>,
    version: AtomicU64,
}

impl MemoryGraphStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn bump_version(&self) {
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    /// Inserts or replaces a node.
    pub fn upsert_node(&self, node: Node) {
        self.state.write().nodes.insert(node.id.clone(), node);
        self.bump_version();
    }

    /// Inserts or replaces an edge. Both endpoints must already exist.
    pub fn upsert_edge(&self, edge: Edge) -> Result<()> {
        let mut state = self.state.write();
        if !state.nodes.contains_key(&edge.source_id) {
            return Err(GraphRagError::Storage {
                message: format!("edge {} references missing source {}", edge.id, edge.source_id),
            });
        }
        if !state.nodes.contains_key(&edge.target_id) {
            return Err(GraphRagError::Storage {
                message: format!("edge {} references missing target {}", edge.id, edge.target_id),
            });
        }
        state.edges.insert(edge.id.clone(), edge);
        drop(state);
        self.bump_version();
        Ok(())
    }

    /// Removes a node and every edge incident to it.
    pub fn remove_node(&self, id: &NodeId) -> bool {
        let mut state = self.state.write();
        let removed = state.nodes.shift_remove(id).is_some();
        if removed {
            state
                .edges
                .retain(|_, e| e.source_id != *id && e.target_id != *id);
            drop(state);
            self.bump_version();
        }
        removed
    }

    /// Removes an edge.
    pub fn remove_edge(&self, id: &EdgeId) -> bool {
        let removed = self.state.write().edges.shift_remove(id).is_some();
        if removed {
            self.bump_version();
        }
        removed
    }

    /// Current node count.
    pub fn node_count(&self) -> usize {
        self.state.read().nodes.len()
    }

    /// Current edge count.
    pub fn edge_count(&self) -> usize {
        self.state.read().edges.len()
    }
}

#[async_trait]
impl GraphStorage for MemoryGraphStorage {
    async fn get_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.state.read().nodes.values().cloned().collect())
    }

    async fn get_edges(&self) -> Result<Vec<Edge>> {
        Ok(self.state.read().edges.values().cloned().collect())
    }

    async fn current_version(&self) -> Result<GraphVersion> {
        Ok(GraphVersion::new(format!(
            "mem-{}",
            self.version.load(Ordering::SeqCst)
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_dangling_edges_on_write() {
        let storage = MemoryGraphStorage::new();
        storage.upsert_node(Node::new("a", "Person"));
        let err = storage
            .upsert_edge(Edge::new("e1", "a", "ghost", "KNOWS"))
            .unwrap_err();
        assert!(matches!(err, GraphRagError::Storage { .. }));

        storage.upsert_node(Node::new("b", "Person"));
        storage
            .upsert_edge(Edge::new("e1", "a", "b", "KNOWS"))
            .unwrap();
        assert_eq!(storage.get_edges().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn removing_a_node_drops_incident_edges() {
        let storage = MemoryGraphStorage::new();
        storage.upsert_node(Node::new("a", "Person"));
        storage.upsert_node(Node::new("b", "Person"));
        storage
            .upsert_edge(Edge::new("e1", "a", "b", "KNOWS"))
            .unwrap();

        assert!(storage.remove_node(&NodeId::from("a")));
        assert_eq!(storage.node_count(), 1);
        assert_eq!(storage.edge_count(), 0);
    }

    #[tokio::test]
    async fn version_advances_on_mutation() {
        let storage = MemoryGraphStorage::new();
        let before = storage.current_version().await.unwrap();
        storage.upsert_node(Node::new("a", "Person"));
        let after = storage.current_version().await.unwrap();
        assert_ne!(before, after);

        // Reads leave the version alone.
        storage.get_nodes().await.unwrap();
        assert_eq!(storage.current_version().await.unwrap(), after);
    }
}
