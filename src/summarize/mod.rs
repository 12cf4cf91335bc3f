//! Community summarization with a version-keyed cache.
//!
//! A summary is generated per (community, level, graph version). The cache
//! key carries the graph version, so a new snapshot silently misses and the
//! stale entries just stop being reachable; there is no eager purge. Nothing
//! is cached until the model output parses cleanly, which also makes a
//! cancelled batch task harmless.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::sync::Semaphore;

use crate::core::{CommunityId, GraphRagError, GraphVersion, NodeId, Result};
use crate::detection::Community;
use crate::generation::{generate_with_retry, LanguageModel};
use crate::graph::GraphSnapshot;

/// Level of detail for a community summary.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SummaryLevel {
    /// Two or three sentences, no topic list.
    Brief,
    /// A paragraph plus key entities and topics.
    Detailed,
    /// Detailed plus a structural assessment of the community.
    Comprehensive,
}

impl SummaryLevel {
    /// Parses a level name, mapping failure to a configuration error.
    pub fn parse(name: &str) -> Result<Self> {
        name.parse().map_err(|_| {
            GraphRagError::config(format!(
                "unsupported summary level '{name}' (expected brief, detailed, or comprehensive)"
            ))
        })
    }

    fn max_tokens(self) -> usize {
        match self {
            SummaryLevel::Brief => 200,
            SummaryLevel::Detailed => 500,
            SummaryLevel::Comprehensive => 900,
        }
    }
}

/// A generated community summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Community this summary describes.
    pub community_id: CommunityId,
    /// Level it was generated at.
    pub level: SummaryLevel,
    /// Snapshot version the context was drawn from.
    pub graph_version: GraphVersion,
    /// Short headline for the community.
    pub title: String,
    /// Narrative summary text.
    pub overview: String,
    /// Most important member entities, by display name.
    pub key_entities: Vec<String>,
    /// Representative internal relations, rendered from the sampled context.
    pub key_relations: Vec<String>,
    /// Main topics; empty at the brief level.
    pub main_topics: Vec<String>,
    /// Community size at generation time.
    pub node_count: usize,
    /// Internal edge count at generation time.
    pub edge_count: usize,
    /// Structural assessment; present only at the comprehensive level.
    pub structure_notes: Option<String>,
    /// Wall-clock generation time.
    pub generated_at: DateTime<Utc>,
}

/// Model output shape. Parsed strictly from the extracted JSON object.
#[derive(Deserialize)]
struct RawSummary {
    title: String,
    summary: String,
    #[serde(default)]
    key_entities: Vec<String>,
    #[serde(default)]
    main_topics: Vec<String>,
    #[serde(default)]
    structure: Option<String>,
}

/// Summarizer tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    /// Member sample budget for prompt context. Highest-degree members win.
    pub max_context_nodes: usize,
    /// Concurrent generation permits for batch runs.
    pub max_concurrent: usize,
    /// Per-community deadline in batch runs, seconds.
    pub task_timeout_secs: u64,
    /// Backoff before the single generation retry, milliseconds.
    pub retry_backoff_ms: u64,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            max_context_nodes: 30,
            max_concurrent: 4,
            task_timeout_secs: 180,
            retry_backoff_ms: 500,
        }
    }
}

/// Per-community outcome of a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFailure {
    /// Community that failed.
    pub community_id: CommunityId,
    /// Why, in display form.
    pub reason: String,
}

/// Report from [`CommunitySummarizer::summarize_all`]. Partial failure is
/// reported here, never as an error for the whole batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    /// Communities summarized successfully (cache hits included).
    pub successful: Vec<CommunityId>,
    /// Communities that failed, with reasons.
    pub failed: Vec<BatchFailure>,
}

impl BatchReport {
    /// True when every community summarized.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

type CacheKey = (CommunityId, SummaryLevel, GraphVersion);

/// Generates and caches community summaries.
pub struct CommunitySummarizer {
    llm: Arc<dyn LanguageModel>,
    config: SummarizerConfig,
    cache: RwLock<HashMap<CacheKey, Arc<Summary>>>,
}

impl CommunitySummarizer {
    /// Creates a summarizer over the given backend.
    pub fn new(llm: Arc<dyn LanguageModel>, config: SummarizerConfig) -> Self {
        Self {
            llm,
            config,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Number of cached summaries, across all versions.
    pub fn cache_len(&self) -> usize {
        self.cache.read().len()
    }

    /// Drops cached summaries whose graph version is not the given one.
    /// Optional housekeeping; correctness never depends on it.
    pub fn evict_stale(&self, current: &GraphVersion) {
        self.cache.write().retain(|(_, _, version), _| version == current);
    }

    /// Summarizes one community at the given level, serving from cache when
    /// the same (community, level, snapshot version) was summarized before.
    pub async fn summarize(
        &self,
        snapshot: &GraphSnapshot,
        community: &Community,
        level: SummaryLevel,
    ) -> Result<Arc<Summary>> {
        let key = (community.id, level, snapshot.version().clone());
        if let Some(cached) = self.cache.read().get(&key) {
            tracing::debug!(community = %community.id, %level, "summary cache hit");
            return Ok(Arc::clone(cached));
        }

        let context = build_context(snapshot, community, self.config.max_context_nodes);
        let backoff = Duration::from_millis(self.config.retry_backoff_ms);

        let prompt = summary_prompt(community, level, &context, false);
        let text =
            generate_with_retry(self.llm.as_ref(), &prompt, level.max_tokens(), backoff).await?;

        let raw = match parse_summary_json(&text) {
            Ok(raw) => raw,
            Err(first_err) => {
                // One stricter-prompt retry; a second parse failure is final
                // and nothing gets cached.
                tracing::warn!(
                    community = %community.id,
                    error = %first_err,
                    "summary output unparseable, retrying with strict prompt"
                );
                let strict = summary_prompt(community, level, &context, true);
                let text =
                    generate_with_retry(self.llm.as_ref(), &strict, level.max_tokens(), backoff)
                        .await?;
                parse_summary_json(&text).map_err(|err| GraphRagError::SummaryGeneration {
                    community_id: community.id.0,
                    message: err,
                })?
            }
        };

        let summary = Arc::new(Summary {
            community_id: community.id,
            level,
            graph_version: snapshot.version().clone(),
            title: raw.title,
            overview: raw.summary,
            key_entities: raw.key_entities,
            key_relations: context.relation_lines.iter().take(10).cloned().collect(),
            node_count: community.size(),
            edge_count: community.internal_edge_count,
            main_topics: if level == SummaryLevel::Brief {
                Vec::new()
            } else {
                raw.main_topics
            },
            structure_notes: if level == SummaryLevel::Comprehensive {
                raw.structure.or_else(|| Some(structure_notes(community)))
            } else {
                None
            },
            generated_at: Utc::now(),
        });

        self.cache.write().insert(key, Arc::clone(&summary));
        tracing::info!(community = %community.id, %level, "summary generated");
        Ok(summary)
    }

    /// Summarizes every given community with bounded concurrency.
    ///
    /// Each community gets its own deadline; one slow or failing community
    /// never sinks the batch.
    pub async fn summarize_all(
        &self,
        snapshot: &GraphSnapshot,
        communities: &[Community],
        level: SummaryLevel,
    ) -> BatchReport {
        let semaphore = Semaphore::new(self.config.max_concurrent.max(1));
        let deadline = Duration::from_secs(self.config.task_timeout_secs);

        let tasks = communities.iter().map(|community| {
            let semaphore = &semaphore;
            async move {
                // Acquire on a non-closed semaphore cannot fail.
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            community.id,
                            Err("summarization semaphore closed".to_string()),
                        )
                    }
                };
                let outcome =
                    tokio::time::timeout(deadline, self.summarize(snapshot, community, level))
                        .await;
                let result = match outcome {
                    Ok(Ok(_)) => Ok(()),
                    Ok(Err(err)) => Err(err.to_string()),
                    Err(_) => Err(GraphRagError::Timeout {
                        operation: format!("summarize community {}", community.id),
                        duration: deadline,
                    }
                    .to_string()),
                };
                (community.id, result)
            }
        });

        let mut report = BatchReport::default();
        for (community_id, result) in join_all(tasks).await {
            match result {
                Ok(()) => report.successful.push(community_id),
                Err(reason) => report.failed.push(BatchFailure {
                    community_id,
                    reason,
                }),
            }
        }

        tracing::info!(
            successful = report.successful.len(),
            failed = report.failed.len(),
            %level,
            "batch summarization finished"
        );
        report
    }
}

/// Prompt context assembled from a community's members and internal edges.
struct CommunityContext {
    entity_lines: Vec<String>,
    relation_lines: Vec<String>,
    sampled: usize,
    total: usize,
}

/// Samples the highest-degree members into prompt context. Hub entities
/// describe a community better than a random slice of its periphery.
fn build_context(
    snapshot: &GraphSnapshot,
    community: &Community,
    budget: usize,
) -> CommunityContext {
    let mut members: Vec<&NodeId> = community.member_node_ids.iter().collect();
    members.sort_by_key(|id| std::cmp::Reverse(snapshot.degree(id)));
    let sampled: Vec<&NodeId> = members.into_iter().take(budget.max(1)).collect();
    let sampled_set: std::collections::BTreeSet<NodeId> =
        sampled.iter().map(|id| (*id).clone()).collect();

    let mut by_type: HashMap<&str, Vec<String>> = HashMap::new();
    for id in &sampled {
        if let Some(node) = snapshot.node(id) {
            by_type
                .entry(node.node_type.as_str())
                .or_default()
                .push(node.display_name());
        }
    }
    let mut entity_lines: Vec<String> = by_type
        .into_iter()
        .map(|(node_type, names)| format!("{node_type}: {}", names.join(", ")))
        .collect();
    entity_lines.sort();

    let relation_lines: Vec<String> = snapshot
        .edges_within(&sampled_set)
        .map(|edge| {
            let source = snapshot
                .node(&edge.source_id)
                .map(|n| n.display_name())
                .unwrap_or_else(|| edge.source_id.to_string());
            let target = snapshot
                .node(&edge.target_id)
                .map(|n| n.display_name())
                .unwrap_or_else(|| edge.target_id.to_string());
            format!("{source} -[{}]-> {target}", edge.edge_type)
        })
        .collect();

    CommunityContext {
        entity_lines,
        relation_lines,
        sampled: sampled.len(),
        total: community.size(),
    }
}

fn summary_prompt(
    community: &Community,
    level: SummaryLevel,
    context: &CommunityContext,
    strict: bool,
) -> String {
    let instructions = match level {
        SummaryLevel::Brief => {
            "Write a 2-3 sentence summary of this community. \
             Respond with a JSON object: {\"title\": string, \"summary\": string, \
             \"key_entities\": [string]}."
        }
        SummaryLevel::Detailed => {
            "Write a one-paragraph summary of this community covering its main \
             entities and how they relate. Respond with a JSON object: \
             {\"title\": string, \"summary\": string, \"key_entities\": [string], \
             \"main_topics\": [string]}."
        }
        SummaryLevel::Comprehensive => {
            "Write a thorough summary of this community: its main entities, how \
             they relate, and what holds the group together structurally. Respond \
             with a JSON object: {\"title\": string, \"summary\": string, \
             \"key_entities\": [string], \"main_topics\": [string], \"structure\": string}."
        }
    };

    let mut prompt = String::new();
    if strict {
        prompt.push_str(
            "Respond with ONLY a single valid JSON object. No prose, no markdown \
             fences, no text before or after the JSON.\n\n",
        );
    }
    prompt.push_str(instructions);
    prompt.push_str(&format!(
        "\n\nCommunity of {} entities ({} shown), {} internal and {} external \
         relationships, density {:.2}.\n\nEntities:\n",
        context.total,
        context.sampled,
        community.internal_edge_count,
        community.external_edge_count,
        community.density,
    ));
    for line in &context.entity_lines {
        prompt.push_str("- ");
        prompt.push_str(line);
        prompt.push('\n');
    }
    prompt.push_str("\nRelationships:\n");
    for line in &context.relation_lines {
        prompt.push_str("- ");
        prompt.push_str(line);
        prompt.push('\n');
    }
    prompt
}

/// Extracts the first-to-last-brace JSON object from model output and parses
/// it. Models wrap JSON in prose and markdown fences often enough that a
/// plain `from_str` on the whole output would reject good answers.
fn parse_summary_json(text: &str) -> std::result::Result<RawSummary, String> {
    let start = text
        .find('{')
        .ok_or_else(|| "no JSON object in model output".to_string())?;
    let end = text
        .rfind('}')
        .ok_or_else(|| "unterminated JSON object in model output".to_string())?;
    if end < start {
        return Err("malformed JSON object in model output".to_string());
    }
    serde_json::from_str(&text[start..=end]).map_err(|err| format!("invalid summary JSON: {err}"))
}

fn structure_notes(community: &Community) -> String {
    let cohesion = if community.density > 0.6 {
        "tightly knit"
    } else if community.density > 0.2 {
        "moderately connected"
    } else {
        "loosely connected"
    };
    format!(
        "{cohesion} group of {} entities with {} internal and {} external relationships",
        community.size(),
        community.internal_edge_count,
        community.external_edge_count
    )
}
