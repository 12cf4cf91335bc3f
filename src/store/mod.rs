//! Versioned community store.
//!
//! Detection results are installed here under monotonically increasing store
//! versions. Installation swaps an `Arc` pointer under a short write lock, so
//! readers either see the complete previous partition or the complete new one,
//! never a half-installed state. History is retained for diffing.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::{CommunityId, GraphRagError, NodeId, Result};
use crate::detection::{Community, PartitionResult};

/// Monotonic version of the store, bumped on every install.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct StoreVersion(pub u64);

impl std::fmt::Display for StoreVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A partition as installed: the detection result plus install metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledPartition {
    /// Store version assigned at install time.
    pub store_version: StoreVersion,
    /// The detection result.
    pub partition: PartitionResult,
    /// Wall-clock install time.
    pub installed_at: DateTime<Utc>,
}

/// Membership movement between two installed partitions.
///
/// Communities are matched by member set, not by id, since ids are only
/// stable within a single detection run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartitionDiff {
    /// New communities with no member overlap against the old partition.
    pub added: Vec<CommunityId>,
    /// Old communities none of whose members appear in the new partition.
    pub removed: Vec<CommunityId>,
    /// New communities that overlap an old community without matching it.
    pub changed: Vec<CommunityId>,
    /// New communities whose member set is identical to an old one.
    pub unchanged: Vec<CommunityId>,
}

#[derive(Default)]
struct StoreInner {
    active: Option<Arc<InstalledPartition>>,
    history: Vec<Arc<InstalledPartition>>,
}

/// Single-writer, multi-reader store for community partitions.
#[derive(Default)]
pub struct CommunityStore {
    inner: RwLock<StoreInner>,
}

impl CommunityStore {
    /// Creates an empty store with no active partition.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a partition as the new active version.
    pub fn install(&self, partition: PartitionResult) -> StoreVersion {
        let mut inner = self.inner.write();
        let version = StoreVersion(inner.history.len() as u64 + 1);
        let installed = Arc::new(InstalledPartition {
            store_version: version,
            partition,
            installed_at: Utc::now(),
        });
        inner.history.push(Arc::clone(&installed));
        inner.active = Some(installed);
        tracing::info!(
            store_version = %version,
            communities = inner.history.last().map(|p| p.partition.communities.len()).unwrap_or(0),
            "partition installed"
        );
        version
    }

    /// The active partition. Fails until the first install.
    pub fn active(&self) -> Result<Arc<InstalledPartition>> {
        self.inner
            .read()
            .active
            .clone()
            .ok_or(GraphRagError::NotReady)
    }

    /// The active store version, if any.
    pub fn current_version(&self) -> Option<StoreVersion> {
        self.inner.read().active.as_ref().map(|p| p.store_version)
    }

    /// A specific installed version.
    pub fn version(&self, version: StoreVersion) -> Result<Arc<InstalledPartition>> {
        self.inner
            .read()
            .history
            .iter()
            .find(|p| p.store_version == version)
            .cloned()
            .ok_or_else(|| GraphRagError::NotFound {
                resource: "store version".to_string(),
                id: version.to_string(),
            })
    }

    /// A community from the active partition.
    pub fn get_community(&self, id: CommunityId) -> Result<Community> {
        let active = self.active()?;
        active
            .partition
            .communities
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| GraphRagError::NotFound {
                resource: "community".to_string(),
                id: id.to_string(),
            })
    }

    /// Active communities ordered by size descending, then id ascending.
    pub fn communities(&self) -> Result<Vec<Community>> {
        let active = self.active()?;
        let mut communities = active.partition.communities.clone();
        communities.sort_by(|a, b| b.size().cmp(&a.size()).then(a.id.cmp(&b.id)));
        Ok(communities)
    }

    /// Membership movement from one installed version to another.
    pub fn diff(&self, from: StoreVersion, to: StoreVersion) -> Result<PartitionDiff> {
        let old = self.version(from)?;
        let new = self.version(to)?;
        Ok(diff_partitions(&old.partition, &new.partition))
    }
}

fn diff_partitions(old: &PartitionResult, new: &PartitionResult) -> PartitionDiff {
    let old_sets: Vec<&BTreeSet<NodeId>> =
        old.communities.iter().map(|c| &c.member_node_ids).collect();
    let new_members: BTreeSet<&NodeId> = new
        .communities
        .iter()
        .flat_map(|c| c.member_node_ids.iter())
        .collect();

    let mut diff = PartitionDiff::default();
    for community in &new.communities {
        if old_sets.contains(&&community.member_node_ids) {
            diff.unchanged.push(community.id);
        } else if old_sets
            .iter()
            .any(|set| !set.is_disjoint(&community.member_node_ids))
        {
            diff.changed.push(community.id);
        } else {
            diff.added.push(community.id);
        }
    }
    for community in &old.communities {
        if community
            .member_node_ids
            .iter()
            .all(|id| !new_members.contains(id))
        {
            diff.removed.push(community.id);
        }
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Algorithm;
    use crate::core::GraphVersion;

    fn community(id: u64, members: &[&str]) -> Community {
        let member_node_ids: BTreeSet<NodeId> =
            members.iter().map(|m| NodeId::from(*m)).collect();
        let n = member_node_ids.len();
        Community {
            id: CommunityId(id),
            member_node_ids,
            internal_edge_count: n.saturating_sub(1),
            external_edge_count: 0,
            density: if n > 1 { 1.0 } else { 0.0 },
        }
    }

    fn partition(version: &str, communities: Vec<Community>) -> PartitionResult {
        PartitionResult {
            algorithm: Algorithm::Louvain,
            resolution: 1.0,
            communities,
            modularity: 0.3,
            graph_version: GraphVersion::new(version),
            degraded: false,
        }
    }

    #[test]
    fn empty_store_is_not_ready() {
        let store = CommunityStore::new();
        assert!(matches!(store.active(), Err(GraphRagError::NotReady)));
        assert!(store.current_version().is_none());
    }

    #[test]
    fn install_bumps_version_and_swaps_active() {
        let store = CommunityStore::new();
        let v1 = store.install(partition("g1", vec![community(0, &["a", "b"])]));
        let v2 = store.install(partition("g2", vec![community(0, &["a"])]));
        assert!(v2 > v1);
        assert_eq!(store.current_version(), Some(v2));
        // History keeps the older version reachable.
        assert_eq!(store.version(v1).unwrap().store_version, v1);
    }

    #[test]
    fn get_community_reports_missing_ids() {
        let store = CommunityStore::new();
        store.install(partition("g1", vec![community(0, &["a"])]));
        assert!(store.get_community(CommunityId(0)).is_ok());
        assert!(matches!(
            store.get_community(CommunityId(9)),
            Err(GraphRagError::NotFound { .. })
        ));
    }

    #[test]
    fn communities_sorted_by_size_then_id() {
        let store = CommunityStore::new();
        store.install(partition(
            "g1",
            vec![
                community(0, &["a"]),
                community(1, &["b", "c", "d"]),
                community(2, &["e", "f"]),
            ],
        ));
        let ordered = store.communities().unwrap();
        let ids: Vec<u64> = ordered.iter().map(|c| c.id.0).collect();
        assert_eq!(ids, vec![1, 2, 0]);
    }

    #[test]
    fn diff_classifies_membership_movement() {
        let store = CommunityStore::new();
        let v1 = store.install(partition(
            "g1",
            vec![community(0, &["a", "b"]), community(1, &["c"])],
        ));
        let v2 = store.install(partition(
            "g2",
            vec![
                community(0, &["a", "b"]),      // identical
                community(1, &["c", "x"]),      // grew
                community(2, &["y", "z"]),      // brand new
            ],
        ));
        let diff = store.diff(v1, v2).unwrap();
        assert_eq!(diff.unchanged, vec![CommunityId(0)]);
        assert_eq!(diff.changed, vec![CommunityId(1)]);
        assert_eq!(diff.added, vec![CommunityId(2)]);
        assert!(diff.removed.is_empty());
    }
}
