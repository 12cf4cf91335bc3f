//! Community-centric GraphRAG core.
//!
//! Turns a property graph into an answerable knowledge base in three steps:
//! partition the graph into communities, summarize each community with a
//! language model (cached per graph version), and route questions to the
//! community summaries most likely to answer them.
//!
//! [`GraphRagEngine`] is the front door. It owns the snapshot lifecycle, the
//! versioned community store, the summary cache, and the QA routing; the
//! individual modules stay usable on their own for embedders that want less.
//!
//! ```no_run
//! use std::sync::Arc;
//! use graphrag_communities::config::Config;
//! use graphrag_communities::core::{Edge, Node};
//! use graphrag_communities::ollama::{OllamaClient, OllamaConfig};
//! use graphrag_communities::storage::MemoryGraphStorage;
//! use graphrag_communities::GraphRagEngine;
//!
//! # async fn run() -> graphrag_communities::core::Result<()> {
//! let storage = Arc::new(MemoryGraphStorage::new());
//! storage.upsert_node(Node::new("ada", "Person"));
//! storage.upsert_node(Node::new("acme", "Organization"));
//! storage.upsert_edge(Edge::new("e1", "ada", "acme", "WORKS_FOR"))?;
//!
//! let llm = Arc::new(OllamaClient::new(OllamaConfig::default()));
//! let engine = GraphRagEngine::new(storage, llm, Config::default())?;
//!
//! let report = engine.detect_communities(None, None).await?;
//! println!("{} communities at {}", report.community_count, report.store_version);
//! let answer = engine.answer("Where does Ada work?", None).await?;
//! println!("{}", answer.answer_text);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod detection;
pub mod generation;
pub mod graph;
pub mod ollama;
pub mod query;
pub mod storage;
pub mod store;
pub mod summarize;

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::core::{CommunityId, GraphRagError, GraphVersion, Result};
use crate::detection::{Algorithm, Community, CommunityDetector, PartitionResult};
use crate::generation::LanguageModel;
use crate::graph::GraphSnapshot;
use crate::query::{Answer, QaEngine, Strategy};
use crate::storage::GraphStorage;
use crate::store::{CommunityStore, InstalledPartition, PartitionDiff, StoreVersion};
use crate::summarize::{BatchReport, CommunitySummarizer, Summary, SummaryLevel};

/// Commonly used types in one import.
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::core::{
        CommunityId, Edge, GraphRagError, GraphVersion, Node, NodeId, Result,
    };
    pub use crate::detection::{Algorithm, Community, PartitionResult};
    pub use crate::query::{Answer, RelevantCommunity, Strategy};
    pub use crate::storage::{GraphStorage, MemoryGraphStorage};
    pub use crate::store::StoreVersion;
    pub use crate::summarize::{BatchReport, Summary, SummaryLevel};
    pub use crate::{DetectionReport, GraphRagEngine};
}

/// Outcome of one [`GraphRagEngine::detect_communities`] run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionReport {
    /// Store version the partition was installed under.
    pub store_version: StoreVersion,
    /// Snapshot version the partition was computed from.
    pub graph_version: GraphVersion,
    /// Algorithm that ran.
    pub algorithm: Algorithm,
    /// Number of communities found.
    pub community_count: usize,
    /// Modularity of the partition.
    pub modularity: f64,
    /// True when the result is the single-community convergence fallback.
    pub degraded: bool,
    /// Movement against the previously installed partition, when one exists.
    pub diff: Option<PartitionDiff>,
}

/// Orchestrates snapshotting, detection, summarization, and QA.
///
/// Cheap to share behind an `Arc`; every method takes `&self`. Detection is
/// the single writer of the snapshot and the store; everything else reads.
pub struct GraphRagEngine {
    storage: Arc<dyn GraphStorage>,
    config: Config,
    detector: CommunityDetector,
    store: CommunityStore,
    summarizer: CommunitySummarizer,
    qa: QaEngine,
    snapshot: RwLock<Option<Arc<GraphSnapshot>>>,
}

impl GraphRagEngine {
    /// Creates an engine over the given storage and model backends.
    pub fn new(
        storage: Arc<dyn GraphStorage>,
        llm: Arc<dyn LanguageModel>,
        config: Config,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            storage,
            detector: CommunityDetector::new(config.detection.tuning.clone()),
            store: CommunityStore::new(),
            summarizer: CommunitySummarizer::new(Arc::clone(&llm), config.summarizer.clone()),
            qa: QaEngine::new(llm, config.qa.clone()),
            config,
            snapshot: RwLock::new(None),
        })
    }

    /// Pulls a fresh snapshot from storage and makes it current.
    pub async fn refresh_snapshot(&self) -> Result<Arc<GraphSnapshot>> {
        let snapshot = GraphSnapshot::from_storage(self.storage.as_ref()).await?;
        *self.snapshot.write() = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Detects communities on a fresh snapshot and installs the result.
    ///
    /// `algorithm` and `resolution` fall back to the configured defaults.
    /// Old summaries are not purged; their cache keys carry the old graph
    /// version and simply stop matching.
    pub async fn detect_communities(
        &self,
        algorithm: Option<Algorithm>,
        resolution: Option<f64>,
    ) -> Result<DetectionReport> {
        let snapshot = self.refresh_snapshot().await?;
        let algorithm = algorithm.unwrap_or(self.config.detection.algorithm);
        let resolution = resolution.unwrap_or(self.config.detection.resolution);

        let partition = self.detector.detect(&snapshot, algorithm, resolution)?;
        let previous = self.store.current_version();

        let community_count = partition.communities.len();
        let modularity = partition.modularity;
        let degraded = partition.degraded;
        let graph_version = partition.graph_version.clone();
        let store_version = self.store.install(partition);

        let diff = match previous {
            Some(previous) => Some(self.store.diff(previous, store_version)?),
            None => None,
        };

        Ok(DetectionReport {
            store_version,
            graph_version,
            algorithm,
            community_count,
            modularity,
            degraded,
            diff,
        })
    }

    /// The active partition. Fails until the first detection run.
    pub fn active_partition(&self) -> Result<Arc<InstalledPartition>> {
        self.store.active()
    }

    /// Active communities, largest first.
    pub fn communities(&self) -> Result<Vec<Community>> {
        self.store.communities()
    }

    /// A community from the active partition.
    pub fn get_community(&self, id: CommunityId) -> Result<Community> {
        self.store.get_community(id)
    }

    /// Membership movement between two installed store versions.
    pub fn diff(&self, from: StoreVersion, to: StoreVersion) -> Result<PartitionDiff> {
        self.store.diff(from, to)
    }

    /// Summarizes one active community at the given level.
    pub async fn summarize_community(
        &self,
        id: CommunityId,
        level: SummaryLevel,
    ) -> Result<Arc<Summary>> {
        let (snapshot, community) = self.partition_context(id)?;
        self.summarizer.summarize(&snapshot, &community, level).await
    }

    /// Summarizes every active community with bounded concurrency.
    pub async fn summarize_all(&self, level: Option<SummaryLevel>) -> Result<BatchReport> {
        let level = level
            .or(self.config.summary_level)
            .unwrap_or(SummaryLevel::Detailed);
        let active = self.store.active()?;
        let snapshot = self.snapshot_for(&active.partition)?;
        Ok(self
            .summarizer
            .summarize_all(&snapshot, &active.partition.communities, level)
            .await)
    }

    /// Answers a question against the active partition.
    pub async fn answer(&self, question: &str, strategy: Option<Strategy>) -> Result<Answer> {
        let active = self.store.active()?;
        let snapshot = self.snapshot_for(&active.partition)?;
        self.qa
            .answer(&snapshot, &active.partition, &self.summarizer, question, strategy)
            .await
    }

    /// Number of cached summaries, across graph versions.
    pub fn summary_cache_len(&self) -> usize {
        self.summarizer.cache_len()
    }

    fn partition_context(&self, id: CommunityId) -> Result<(Arc<GraphSnapshot>, Community)> {
        let active = self.store.active()?;
        let snapshot = self.snapshot_for(&active.partition)?;
        let community = self.store.get_community(id)?;
        Ok((snapshot, community))
    }

    /// The snapshot a partition was computed from. Detection installs both
    /// under the same lock discipline, so a mismatch means the caller raced
    /// a refresh; the partition's own version wins.
    fn snapshot_for(&self, partition: &PartitionResult) -> Result<Arc<GraphSnapshot>> {
        let snapshot = self
            .snapshot
            .read()
            .clone()
            .ok_or(GraphRagError::NotReady)?;
        if snapshot.version() != &partition.graph_version {
            return Err(GraphRagError::NotReady);
        }
        Ok(snapshot)
    }
}
