//! Community detection over graph snapshots.
//!
//! Partitions a [`GraphSnapshot`] into disjoint communities under a chosen
//! algorithm and resolution, and scores the result with Newman modularity.
//! The three algorithms share one contract and are selected by a tagged enum:
//!
//! - **Louvain**: greedy local moving to a modularity optimum.
//! - **Leiden**: Louvain plus a refinement phase that splits internally
//!   disconnected communities (Traag, Waltman & van Eck, 2019).
//! - **Label propagation**: iterative majority-label adoption.
//!
//! Determinism is a property of quality, not identity: repeated runs on the
//! same snapshot agree on modularity within a small tolerance, but randomized
//! visit orders may produce different (equally good) memberships.

use std::collections::{BTreeSet, HashMap, HashSet};

use petgraph::graph::{NodeIndex, UnGraph};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::core::{CommunityId, GraphRagError, GraphVersion, NodeId, Result};
use crate::graph::GraphSnapshot;

/// Community detection algorithm, selected by name.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Greedy modularity optimization by local moving.
    Louvain,
    /// Iterative majority-label adoption.
    LabelPropagation,
    /// Louvain with a connectivity refinement phase.
    Leiden,
}

impl Algorithm {
    /// Parses an algorithm name, mapping failure to a configuration error.
    pub fn parse(name: &str) -> Result<Self> {
        name.parse().map_err(|_| {
            GraphRagError::config(format!(
                "unsupported algorithm '{name}' (expected louvain, label_propagation, or leiden)"
            ))
        })
    }
}

/// One cell of a partition: a set of densely interconnected nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Community {
    /// Identifier, stable within this detection run only.
    pub id: CommunityId,
    /// Member node ids; non-empty, disjoint from every other community.
    pub member_node_ids: BTreeSet<NodeId>,
    /// Edges with both endpoints inside the community.
    pub internal_edge_count: usize,
    /// Edges with exactly one endpoint inside the community.
    pub external_edge_count: usize,
    /// internal_edge_count / max possible internal edges; 0 for singletons.
    pub density: f64,
}

impl Community {
    /// Number of member nodes.
    pub fn size(&self) -> usize {
        self.member_node_ids.len()
    }
}

/// Outcome of one detection run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionResult {
    /// Algorithm that produced the partition.
    pub algorithm: Algorithm,
    /// Resolution the algorithm ran with.
    pub resolution: f64,
    /// The partition cells, ordered by community id.
    pub communities: Vec<Community>,
    /// Newman modularity of the partition, in [-1, 1].
    pub modularity: f64,
    /// Snapshot version the partition was computed from.
    pub graph_version: GraphVersion,
    /// True when the algorithm failed to converge and the result fell back
    /// to a single community containing every node.
    pub degraded: bool,
}

impl PartitionResult {
    /// Membership lookup: node id to community id.
    pub fn membership(&self) -> HashMap<NodeId, CommunityId> {
        let mut map = HashMap::new();
        for community in &self.communities {
            for node in &community.member_node_ids {
                map.insert(node.clone(), community.id);
            }
        }
        map
    }

    /// The community with the given id, if present.
    pub fn community(&self, id: CommunityId) -> Option<&Community> {
        self.communities.iter().find(|c| c.id == id)
    }

    /// The community containing the given node, if any.
    pub fn community_of(&self, node: &NodeId) -> Option<&Community> {
        self.communities
            .iter()
            .find(|c| c.member_node_ids.contains(node))
    }
}

/// Detector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Random seed for reproducible visit orders. None uses entropy.
    pub seed: Option<u64>,
    /// Iteration cap for the convergence loops.
    pub max_iterations: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            seed: None,
            max_iterations: 100,
        }
    }
}

/// Community detector.
///
/// Detection is a single synchronous, CPU-bound operation per snapshot; the
/// sequential convergence loop is atomic from the system's perspective.
#[derive(Debug, Clone, Default)]
pub struct CommunityDetector {
    config: DetectionConfig,
}

impl CommunityDetector {
    /// Creates a detector with the given configuration.
    pub fn new(config: DetectionConfig) -> Self {
        Self { config }
    }

    /// Partitions the snapshot and scores the result.
    ///
    /// Fails with a configuration error for non-positive resolution and with
    /// an empty-graph error for a snapshot without nodes. Non-convergence is
    /// not an error: the result degrades to a single all-nodes community and
    /// sets the `degraded` flag.
    pub fn detect(
        &self,
        snapshot: &GraphSnapshot,
        algorithm: Algorithm,
        resolution: f64,
    ) -> Result<PartitionResult> {
        if resolution <= 0.0 || !resolution.is_finite() {
            return Err(GraphRagError::config(format!(
                "resolution must be > 0, got {resolution}"
            )));
        }
        if snapshot.node_count() == 0 {
            return Err(GraphRagError::EmptyGraph {
                version: snapshot.version().to_string(),
            });
        }

        tracing::info!(
            %algorithm,
            resolution,
            nodes = snapshot.node_count(),
            edges = snapshot.edge_count(),
            "community detection started"
        );

        let working = WorkingGraph::from_snapshot(snapshot);
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let max_iterations = self.config.max_iterations;
        let outcome = match algorithm {
            Algorithm::Louvain => working.louvain(resolution, max_iterations, &mut rng),
            // Leiden: local moving, split disconnected communities, then a
            // second local-moving pass over the refined partition.
            Algorithm::Leiden => working
                .louvain(resolution, max_iterations, &mut rng)
                .and_then(|labels| {
                    let refined = working.refine(labels);
                    working.local_moving(refined, resolution, max_iterations, &mut rng)
                }),
            Algorithm::LabelPropagation => working.label_propagation(max_iterations, &mut rng),
        };

        let (labels, degraded) = match outcome {
            Some(labels) => (labels, false),
            None => {
                // Documented fallback: a degraded-but-present partition is
                // more useful than none.
                tracing::warn!(%algorithm, "detection did not converge; falling back to a single community");
                (working.single_community(), true)
            }
        };

        // Partition validity: a community never spans disconnected parts of
        // the graph. The degraded fallback is the documented exception.
        let labels = if degraded {
            labels
        } else {
            working.refine(labels)
        };

        let communities = assemble_communities(snapshot, &working, &labels);
        let modularity = modularity(snapshot, &communities);

        tracing::info!(
            communities = communities.len(),
            modularity,
            degraded,
            "community detection finished"
        );

        Ok(PartitionResult {
            algorithm,
            resolution,
            communities,
            modularity,
            graph_version: snapshot.version().clone(),
            degraded,
        })
    }
}

/// Undirected working graph with stable node indexing.
struct WorkingGraph {
    graph: UnGraph<NodeId, f64>,
    indices: Vec<NodeIndex>,
}

impl WorkingGraph {
    fn from_snapshot(snapshot: &GraphSnapshot) -> Self {
        let mut graph = UnGraph::new_undirected();
        let mut index_of: HashMap<NodeId, NodeIndex> = HashMap::new();
        let mut indices = Vec::with_capacity(snapshot.node_count());

        for id in snapshot.node_ids() {
            let idx = graph.add_node(id.clone());
            index_of.insert(id.clone(), idx);
            indices.push(idx);
        }
        for edge in snapshot.edges() {
            // Self-loops carry no community-structure signal; they still
            // count in the per-community edge stats computed later.
            if edge.source_id == edge.target_id {
                continue;
            }
            graph.add_edge(index_of[&edge.source_id], index_of[&edge.target_id], 1.0);
        }

        Self { graph, indices }
    }

    fn singletons(&self) -> HashMap<NodeIndex, usize> {
        self.indices
            .iter()
            .enumerate()
            .map(|(i, &idx)| (idx, i))
            .collect()
    }

    /// Greedy local moving from singletons.
    fn louvain(
        &self,
        resolution: f64,
        max_iterations: usize,
        rng: &mut StdRng,
    ) -> Option<HashMap<NodeIndex, usize>> {
        self.local_moving(self.singletons(), resolution, max_iterations, rng)
    }

    /// Greedy local moving from an initial partition. Returns None when the
    /// iteration cap was hit while moves were still improving, i.e. the loop
    /// failed to converge.
    fn local_moving(
        &self,
        mut communities: HashMap<NodeIndex, usize>,
        resolution: f64,
        max_iterations: usize,
        rng: &mut StdRng,
    ) -> Option<HashMap<NodeIndex, usize>> {
        if self.graph.edge_count() == 0 {
            return Some(communities);
        }

        let mut order: Vec<NodeIndex> = self.indices.clone();
        let mut improved = true;
        let mut iteration = 0;

        while improved && iteration < max_iterations {
            improved = false;
            order.shuffle(rng);
            for &node in &order {
                let best = self.best_community(node, resolution, &communities);
                if best != communities[&node] {
                    communities.insert(node, best);
                    improved = true;
                }
            }
            iteration += 1;
        }

        if improved {
            return None;
        }
        Some(communities)
    }

    /// Best community for a node among its neighbors, by modularity delta.
    fn best_community(
        &self,
        node: NodeIndex,
        resolution: f64,
        communities: &HashMap<NodeIndex, usize>,
    ) -> usize {
        let current = communities[&node];
        let mut best = current;
        let mut best_delta = 0.0;

        let neighbor_communities: HashSet<usize> = self
            .graph
            .neighbors(node)
            .map(|n| communities[&n])
            .collect();

        for &candidate in &neighbor_communities {
            if candidate == current {
                continue;
            }
            let delta = self.modularity_delta(node, current, candidate, resolution, communities);
            if delta > best_delta {
                best_delta = delta;
                best = candidate;
            }
        }
        best
    }

    /// Modularity gain of moving `node` from one community to another.
    /// The resolution parameter scales the null-model term, so higher values
    /// bias toward more, smaller communities.
    fn modularity_delta(
        &self,
        node: NodeIndex,
        from: usize,
        to: usize,
        resolution: f64,
        communities: &HashMap<NodeIndex, usize>,
    ) -> f64 {
        let degree = self.graph.edges(node).count() as f64;
        let m = self.graph.edge_count() as f64;

        let k_in_to = self.edges_to_community(node, to, communities) as f64;
        let k_in_from = self.edges_to_community(node, from, communities) as f64;

        let sigma_to = self.community_degree(to, communities);
        let sigma_from = self.community_degree(from, communities) - degree;

        (k_in_to - k_in_from) / m
            - resolution * degree * (sigma_to - sigma_from) / (2.0 * m * m)
    }

    fn edges_to_community(
        &self,
        node: NodeIndex,
        community: usize,
        communities: &HashMap<NodeIndex, usize>,
    ) -> usize {
        self.graph
            .neighbors(node)
            .filter(|n| communities[n] == community)
            .count()
    }

    fn community_degree(&self, community: usize, communities: &HashMap<NodeIndex, usize>) -> f64 {
        communities
            .iter()
            .filter(|(_, &c)| c == community)
            .map(|(&n, _)| self.graph.edges(n).count() as f64)
            .sum()
    }

    /// Leiden refinement: split every community that is not internally
    /// connected into its connected components. Guarantees no community
    /// spans disjoint parts of the graph.
    fn refine(&self, mut communities: HashMap<NodeIndex, usize>) -> HashMap<NodeIndex, usize> {
        let ids: HashSet<usize> = communities.values().copied().collect();
        let mut next_id = communities.values().max().copied().unwrap_or(0) + 1;

        for id in ids {
            let members: Vec<NodeIndex> = communities
                .iter()
                .filter(|(_, &c)| c == id)
                .map(|(&n, _)| n)
                .collect();
            let components = self.components_within(&members);
            if components.len() <= 1 {
                continue;
            }
            // Keep the first component under the original id, renumber the rest.
            for component in components.into_iter().skip(1) {
                for node in component {
                    communities.insert(node, next_id);
                }
                next_id += 1;
            }
        }
        communities
    }

    /// Connected components of the subgraph induced by `members`.
    fn components_within(&self, members: &[NodeIndex]) -> Vec<Vec<NodeIndex>> {
        let member_set: HashSet<NodeIndex> = members.iter().copied().collect();
        let mut unvisited = member_set.clone();
        let mut components = Vec::new();

        while let Some(&start) = unvisited.iter().next() {
            let mut component = Vec::new();
            let mut stack = vec![start];
            while let Some(node) = stack.pop() {
                if !unvisited.remove(&node) {
                    continue;
                }
                component.push(node);
                for neighbor in self.graph.neighbors(node) {
                    if unvisited.contains(&neighbor) && member_set.contains(&neighbor) {
                        stack.push(neighbor);
                    }
                }
            }
            components.push(component);
        }
        components
    }

    /// Majority-label adoption. Returns None on non-convergence.
    fn label_propagation(
        &self,
        max_iterations: usize,
        rng: &mut StdRng,
    ) -> Option<HashMap<NodeIndex, usize>> {
        let mut labels: HashMap<NodeIndex, usize> = self
            .indices
            .iter()
            .enumerate()
            .map(|(i, &idx)| (idx, i))
            .collect();

        if self.graph.edge_count() == 0 {
            return Some(labels);
        }

        let mut order: Vec<NodeIndex> = self.indices.clone();
        let mut changed = true;
        let mut iteration = 0;

        while changed && iteration < max_iterations {
            changed = false;
            order.shuffle(rng);
            for &node in &order {
                let mut counts: HashMap<usize, usize> = HashMap::new();
                for neighbor in self.graph.neighbors(node) {
                    *counts.entry(labels[&neighbor]).or_insert(0) += 1;
                }
                if counts.is_empty() {
                    continue; // isolated node keeps its own label
                }
                // Most frequent neighbor label; ties broken by the smaller
                // label for a deterministic choice under a fixed seed.
                let best = counts
                    .into_iter()
                    .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
                    .map(|(label, _)| label)
                    .unwrap_or(labels[&node]);
                if best != labels[&node] {
                    labels.insert(node, best);
                    changed = true;
                }
            }
            iteration += 1;
        }

        if changed {
            return None;
        }
        Some(labels)
    }

    /// Fallback partition: every node in one community.
    fn single_community(&self) -> HashMap<NodeIndex, usize> {
        self.indices.iter().map(|&idx| (idx, 0)).collect()
    }
}

/// Turns a raw index-to-label map into ordered [`Community`] values with
/// per-community edge statistics, renumbering ids densely in first-member
/// order over the snapshot's node ordering.
fn assemble_communities(
    snapshot: &GraphSnapshot,
    working: &WorkingGraph,
    labels: &HashMap<NodeIndex, usize>,
) -> Vec<Community> {
    let mut dense_ids: HashMap<usize, u64> = HashMap::new();
    let mut members: Vec<BTreeSet<NodeId>> = Vec::new();

    for &idx in &working.indices {
        let label = labels[&idx];
        let next = members.len() as u64;
        let dense = *dense_ids.entry(label).or_insert(next);
        if dense as usize == members.len() {
            members.push(BTreeSet::new());
        }
        members[dense as usize].insert(working.graph[idx].clone());
    }

    let membership: HashMap<&NodeId, u64> = members
        .iter()
        .enumerate()
        .flat_map(|(i, set)| set.iter().map(move |id| (id, i as u64)))
        .collect();

    let mut internal = vec![0usize; members.len()];
    let mut external = vec![0usize; members.len()];
    for edge in snapshot.edges() {
        let source = membership[&edge.source_id] as usize;
        let target = membership[&edge.target_id] as usize;
        if source == target {
            internal[source] += 1;
        } else {
            // A crossing edge is external to both sides, matching how the
            // per-community stats are reported to callers.
            external[source] += 1;
            external[target] += 1;
        }
    }

    members
        .into_iter()
        .enumerate()
        .map(|(i, member_node_ids)| {
            let n = member_node_ids.len();
            let max_edges = n * n.saturating_sub(1) / 2;
            let density = if max_edges > 0 {
                internal[i] as f64 / max_edges as f64
            } else {
                0.0
            };
            Community {
                id: CommunityId(i as u64),
                member_node_ids,
                internal_edge_count: internal[i],
                external_edge_count: external[i],
                density,
            }
        })
        .collect()
}

/// Newman modularity of a partition: observed intra-community edge fraction
/// minus the expectation under a random graph with the same degree sequence.
pub fn modularity(snapshot: &GraphSnapshot, communities: &[Community]) -> f64 {
    let m = snapshot
        .edges()
        .filter(|e| e.source_id != e.target_id)
        .count() as f64;
    if m == 0.0 {
        return 0.0;
    }
    let two_m = 2.0 * m;

    communities
        .iter()
        .map(|community| {
            let internal = snapshot
                .edges_within(&community.member_node_ids)
                .filter(|e| e.source_id != e.target_id)
                .count() as f64;
            let degree_sum: f64 = community
                .member_node_ids
                .iter()
                .map(|id| snapshot.degree(id) as f64)
                .sum();
            internal / m - (degree_sum / two_m).powi(2)
        })
        .sum()
}
