//! Question answering over the community structure.
//!
//! Three routing strategies share one contract: build a context, synthesize
//! an answer from it, report which communities the context came from.
//!
//! - **community_first** routes the question to the most relevant
//!   communities and answers from their summaries; when nothing is relevant
//!   enough it falls back to the global view and says so.
//! - **global_first** answers from whole-graph statistics plus every
//!   community summary. Suits "what is this graph about" questions.
//! - **hybrid** assembles both contexts concurrently and weights the
//!   community side higher in the confidence blend.
//!
//! Relevance is deliberately lexical: normalized term overlap between the
//! question and a community's summary and member names. No embeddings, which
//! keeps routing deterministic and explainable.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::core::{CommunityId, GraphRagError, Result};
use crate::detection::{Community, PartitionResult};
use crate::generation::{generate_with_retry, LanguageModel};
use crate::graph::GraphSnapshot;
use crate::summarize::{CommunitySummarizer, Summary, SummaryLevel};

/// Question routing strategy.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Route to the most relevant communities first.
    CommunityFirst,
    /// Answer from the global graph view.
    GlobalFirst,
    /// Blend both context sources.
    Hybrid,
}

impl Strategy {
    /// Parses a strategy name, mapping failure to a configuration error.
    pub fn parse(name: &str) -> Result<Self> {
        name.parse().map_err(|_| {
            GraphRagError::config(format!(
                "unsupported strategy '{name}' (expected community_first, global_first, or hybrid)"
            ))
        })
    }
}

/// QA tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QaConfig {
    /// Default strategy when the caller does not pick one.
    pub strategy: Strategy,
    /// How many top communities feed the community context.
    pub top_k: usize,
    /// Minimum relevance score for a community to participate, in [0, 1].
    pub relevance_threshold: f64,
    /// Token budget for answer synthesis.
    pub max_answer_tokens: usize,
    /// Backoff before the single generation retry, milliseconds.
    pub retry_backoff_ms: u64,
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::CommunityFirst,
            top_k: 3,
            relevance_threshold: 0.1,
            max_answer_tokens: 600,
            retry_backoff_ms: 500,
        }
    }
}

/// A community that contributed to an answer, with its relevance score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevantCommunity {
    /// Community id.
    pub id: CommunityId,
    /// Relevance score in [0, 1]. Zero for communities that entered through
    /// the global context rather than by matching the question.
    pub score: f64,
}

/// A generated answer with its provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    /// The question as asked.
    pub question: String,
    /// Strategy that produced the answer.
    pub strategy: Strategy,
    /// Synthesized answer text.
    pub answer_text: String,
    /// Term-coverage confidence in [0, 1].
    pub confidence: f64,
    /// Context sources that actually fed the answer: one entry per community
    /// block and one per node id serialized into the context.
    pub sources: Vec<String>,
    /// Communities whose summaries participated, highest relevance first.
    pub relevant_communities: Vec<RelevantCommunity>,
    /// Wall-clock generation time.
    pub generated_at: DateTime<Utc>,
    /// True when community routing found nothing relevant and the answer
    /// came from the global view instead.
    pub fell_back: bool,
}

/// One assembled context, ready for synthesis.
struct QueryContext {
    text: String,
    sources: Vec<String>,
    communities: Vec<RelevantCommunity>,
    /// Confidence multiplier: for community routing, the fraction of the
    /// top-K slots filled by communities that cleared the threshold.
    confidence_factor: f64,
}

/// Routes questions and synthesizes answers.
pub struct QaEngine {
    llm: Arc<dyn LanguageModel>,
    config: QaConfig,
}

impl QaEngine {
    /// Creates an engine over the given backend.
    pub fn new(llm: Arc<dyn LanguageModel>, config: QaConfig) -> Self {
        Self { llm, config }
    }

    /// Answers a question against the given partition.
    ///
    /// Generation failure after the retry is not an error: the answer
    /// degrades to a templated no-information response with zero confidence.
    pub async fn answer(
        &self,
        snapshot: &GraphSnapshot,
        partition: &PartitionResult,
        summarizer: &CommunitySummarizer,
        question: &str,
        strategy: Option<Strategy>,
    ) -> Result<Answer> {
        let strategy = strategy.unwrap_or(self.config.strategy);
        let question = question.trim();
        if question.is_empty() {
            return Err(GraphRagError::config("question must not be empty"));
        }

        tracing::info!(%strategy, question_chars = question.len(), "answering question");

        let mut hybrid_confidence = None;
        let (context, fell_back) = match strategy {
            Strategy::CommunityFirst => {
                match self
                    .community_context(snapshot, partition, summarizer, question)
                    .await
                {
                    Some(context) => (context, false),
                    None => {
                        tracing::info!("no relevant community, falling back to global context");
                        (
                            self.global_context(snapshot, partition, summarizer).await,
                            true,
                        )
                    }
                }
            }
            Strategy::GlobalFirst => (
                self.global_context(snapshot, partition, summarizer).await,
                false,
            ),
            Strategy::Hybrid => {
                let (community, global) = tokio::join!(
                    self.community_context(snapshot, partition, summarizer, question),
                    self.global_context(snapshot, partition, summarizer)
                );
                match community {
                    Some(mut community) => {
                        // Community evidence weighs more than the global
                        // backdrop in the blended confidence.
                        hybrid_confidence = Some(
                            0.6 * community.confidence_factor
                                * term_coverage(question, &community.text)
                                + 0.4 * term_coverage(question, &global.text),
                        );
                        community.text.push_str("\n\n");
                        community.text.push_str(&global.text);
                        community.sources.extend(global.sources);
                        // The appended global text embeds every community's
                        // summary, so those ids belong in the provenance too.
                        for entry in global.communities {
                            if !community.communities.iter().any(|c| c.id == entry.id) {
                                community.communities.push(entry);
                            }
                        }
                        (community, false)
                    }
                    None => (global, true),
                }
            }
        };

        let prompt = format!(
            "Answer the question using only the context below. If the context \
             does not contain the answer, say so.\n\nContext:\n{}\n\nQuestion: {}\n\nAnswer:",
            context.text, question
        );

        let backoff = Duration::from_millis(self.config.retry_backoff_ms);
        let synthesis = generate_with_retry(
            self.llm.as_ref(),
            &prompt,
            self.config.max_answer_tokens,
            backoff,
        )
        .await;

        let answer = match synthesis {
            Ok(text) => {
                let confidence = hybrid_confidence.unwrap_or_else(|| {
                    context.confidence_factor * term_coverage(question, &context.text)
                });
                Answer {
                    question: question.to_string(),
                    strategy,
                    answer_text: text.trim().to_string(),
                    confidence,
                    sources: context.sources,
                    relevant_communities: context.communities,
                    generated_at: Utc::now(),
                    fell_back,
                }
            }
            Err(err) if err.is_retryable() => {
                tracing::warn!(error = %err, "answer synthesis failed, returning templated answer");
                Answer {
                    question: question.to_string(),
                    strategy,
                    answer_text:
                        "Insufficient information: the answer could not be generated from the \
                         available community context."
                            .to_string(),
                    confidence: 0.0,
                    sources: Vec::new(),
                    relevant_communities: Vec::new(),
                    generated_at: Utc::now(),
                    fell_back,
                }
            }
            Err(err) => return Err(err),
        };

        Ok(answer)
    }

    /// Context from the top-K relevant communities, or None when no
    /// community clears the relevance threshold.
    async fn community_context(
        &self,
        snapshot: &GraphSnapshot,
        partition: &PartitionResult,
        summarizer: &CommunitySummarizer,
        question: &str,
    ) -> Option<QueryContext> {
        let question_terms = significant_terms(question);
        if question_terms.is_empty() {
            return None;
        }

        let mut scored: Vec<(f64, &Community, Option<Arc<Summary>>)> = Vec::new();
        for community in &partition.communities {
            // A missing summary degrades scoring to member names only; it
            // never fails the question.
            let summary = summarizer
                .summarize(snapshot, community, SummaryLevel::Brief)
                .await
                .ok();
            let score = relevance(
                &question_terms,
                snapshot,
                community,
                summary.as_deref(),
            );
            if score >= self.config.relevance_threshold {
                scored.push((score, community, summary));
            }
        }
        if scored.is_empty() {
            return None;
        }
        let top_k = self.config.top_k.max(1);
        let confidence_factor = (scored.len() as f64 / top_k as f64).min(1.0);

        // Highest score wins; ties go to the denser community, then the
        // lower id, so routing is deterministic.
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    b.1.density
                        .partial_cmp(&a.1.density)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a.1.id.cmp(&b.1.id))
        });
        scored.truncate(top_k);

        let mut text = String::new();
        let mut sources = Vec::new();
        let mut communities = Vec::new();
        for (score, community, summary) in &scored {
            communities.push(RelevantCommunity {
                id: community.id,
                score: *score,
            });
            let names: Vec<String> = community
                .member_node_ids
                .iter()
                .filter_map(|id| snapshot.node(id))
                .map(|n| n.display_name())
                .collect();
            match summary {
                Some(summary) => {
                    text.push_str(&format!(
                        "Community {} ({}): {}\nMembers: {}\n",
                        community.id,
                        summary.title,
                        summary.overview,
                        names.join(", ")
                    ));
                    sources.push(format!("community {} ({})", community.id, summary.title));
                }
                None => {
                    text.push_str(&format!(
                        "Community {}: members {}\n",
                        community.id,
                        names.join(", ")
                    ));
                    sources.push(format!("community {}", community.id));
                }
            }
            // Every node id serialized into the context is attributed.
            for id in &community.member_node_ids {
                sources.push(format!("node {id}"));
            }
            tracing::debug!(community = %community.id, score, "community selected for context");
        }

        Some(QueryContext {
            text,
            sources,
            communities,
            confidence_factor,
        })
    }

    /// Whole-graph context: aggregate statistics plus every community's
    /// brief summary.
    async fn global_context(
        &self,
        snapshot: &GraphSnapshot,
        partition: &PartitionResult,
        summarizer: &CommunitySummarizer,
    ) -> QueryContext {
        let mut text = format!(
            "Knowledge graph overview: {} entities, {} relationships, {} communities, \
             modularity {:.3}.\n",
            snapshot.node_count(),
            snapshot.edge_count(),
            partition.communities.len(),
            partition.modularity
        );

        let mut sources = vec!["global graph overview".to_string()];
        let mut communities = Vec::new();
        for community in &partition.communities {
            communities.push(RelevantCommunity {
                id: community.id,
                score: 0.0,
            });
            match summarizer
                .summarize(snapshot, community, SummaryLevel::Brief)
                .await
            {
                Ok(summary) => text.push_str(&format!(
                    "Community {} ({} members, {}): {}\n",
                    community.id,
                    community.size(),
                    summary.title,
                    summary.overview
                )),
                Err(err) => {
                    tracing::warn!(community = %community.id, error = %err, "summary unavailable for global context");
                    let names: Vec<String> = community
                        .member_node_ids
                        .iter()
                        .filter_map(|id| snapshot.node(id))
                        .map(|n| n.display_name())
                        .collect();
                    text.push_str(&format!(
                        "Community {} ({} members): {}\n",
                        community.id,
                        community.size(),
                        names.join(", ")
                    ));
                    // Raw member ids went into the context; attribute them.
                    for id in &community.member_node_ids {
                        sources.push(format!("node {id}"));
                    }
                }
            }
        }

        QueryContext {
            text,
            sources,
            communities,
            confidence_factor: 1.0,
        }
    }
}

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "do", "does", "for",
    "from", "has", "have", "how", "in", "is", "it", "its", "of", "on", "or",
    "that", "the", "their", "there", "these", "this", "to", "was", "were",
    "what", "when", "where", "which", "who", "why", "will", "with",
];

/// Lowercased alphanumeric terms with stop words removed.
fn significant_terms(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|t| t.to_lowercase())
        .filter(|t| t.len() > 1 && !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

/// Fraction of question terms found in the community's summary and member
/// names, in [0, 1].
fn relevance(
    question_terms: &BTreeSet<String>,
    snapshot: &GraphSnapshot,
    community: &Community,
    summary: Option<&Summary>,
) -> f64 {
    let mut haystack = String::new();
    if let Some(summary) = summary {
        haystack.push_str(&summary.title);
        haystack.push(' ');
        haystack.push_str(&summary.overview);
        for entity in &summary.key_entities {
            haystack.push(' ');
            haystack.push_str(entity);
        }
        for topic in &summary.main_topics {
            haystack.push(' ');
            haystack.push_str(topic);
        }
    }
    for id in &community.member_node_ids {
        if let Some(node) = snapshot.node(id) {
            haystack.push(' ');
            haystack.push_str(&node.display_name());
            haystack.push(' ');
            haystack.push_str(&node.node_type);
        }
    }

    let community_terms = significant_terms(&haystack);
    let matched = question_terms
        .iter()
        .filter(|t| community_terms.contains(*t))
        .count();
    matched as f64 / question_terms.len() as f64
}

/// Fraction of the question's significant terms covered by the context.
fn term_coverage(question: &str, context: &str) -> f64 {
    let question_terms = significant_terms(question);
    if question_terms.is_empty() {
        return 0.0;
    }
    let context_terms = significant_terms(context);
    let covered = question_terms
        .iter()
        .filter(|t| context_terms.contains(*t))
        .count();
    covered as f64 / question_terms.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Edge, Node};
    use crate::detection::{Algorithm, CommunityDetector, DetectionConfig};
    use crate::generation::MockLanguageModel;
    use crate::summarize::SummarizerConfig;

    fn named(id: &str, name: &str, node_type: &str) -> Node {
        let mut node = Node::new(id, node_type);
        node.properties.insert("name".to_string(), name.into());
        node
    }

    fn fixture() -> (GraphSnapshot, PartitionResult) {
        let nodes = vec![
            named("a", "Alice", "Person"),
            named("b", "Bob", "Person"),
            named("c", "Carol", "Person"),
            named("d", "Dave", "Person"),
        ];
        let edges = vec![
            Edge::new("e1", "a", "b", "KNOWS"),
            Edge::new("e2", "b", "c", "KNOWS"),
        ];
        let snapshot = GraphSnapshot::build(nodes, edges).unwrap();
        let partition = CommunityDetector::new(DetectionConfig {
            seed: Some(1),
            max_iterations: 100,
        })
        .detect(&snapshot, Algorithm::Louvain, 1.0)
        .unwrap();
        (snapshot, partition)
    }

    fn summary_response() -> String {
        r#"{"title": "Alice's circle", "summary": "Alice, Bob and Carol know each other.",
            "key_entities": ["Alice", "Bob"], "main_topics": ["friendship"]}"#
            .to_string()
    }

    fn summarizer(mock: Arc<MockLanguageModel>) -> CommunitySummarizer {
        CommunitySummarizer::new(mock, SummarizerConfig::default())
    }

    #[tokio::test]
    async fn community_first_finds_the_relevant_community() {
        let (snapshot, partition) = fixture();
        let mock = Arc::new(MockLanguageModel::always(summary_response()));
        let summarizer = summarizer(mock.clone());
        let engine = QaEngine::new(mock, QaConfig::default());

        let answer = engine
            .answer(&snapshot, &partition, &summarizer, "Who does Alice know?", None)
            .await
            .unwrap();
        assert_eq!(answer.strategy, Strategy::CommunityFirst);
        assert!(!answer.fell_back);
        assert!(!answer.relevant_communities.is_empty());
        assert!(answer.confidence > 0.0);
        // Provenance names the communities the context actually used, with
        // the relevance score that ranked them.
        assert!(answer.sources.iter().any(|s| s.starts_with("community")));
        assert!(answer.relevant_communities.iter().all(|rc| rc.score > 0.0));
        // Every member node serialized into the context is attributed too.
        for rc in &answer.relevant_communities {
            let community = partition.community(rc.id).unwrap();
            for member in &community.member_node_ids {
                assert!(answer.sources.contains(&format!("node {member}")));
            }
        }
    }

    #[tokio::test]
    async fn zero_overlap_falls_back_to_global() {
        let (snapshot, partition) = fixture();
        let mock = Arc::new(MockLanguageModel::always(summary_response()));
        let summarizer = summarizer(mock.clone());
        let engine = QaEngine::new(mock, QaConfig::default());

        let answer = engine
            .answer(
                &snapshot,
                &partition,
                &summarizer,
                "Quantum chromodynamics lagrangian?",
                None,
            )
            .await
            .unwrap();
        assert!(answer.fell_back);
        assert_eq!(answer.sources, vec!["global graph overview".to_string()]);
        assert_eq!(answer.confidence, 0.0);
    }

    #[tokio::test]
    async fn global_first_reports_aggregate_context() {
        let (snapshot, partition) = fixture();
        let mock = Arc::new(MockLanguageModel::always(summary_response()));
        let summarizer = summarizer(mock.clone());
        let engine = QaEngine::new(mock, QaConfig::default());

        let answer = engine
            .answer(
                &snapshot,
                &partition,
                &summarizer,
                "What is this graph about?",
                Some(Strategy::GlobalFirst),
            )
            .await
            .unwrap();
        assert!(!answer.fell_back);
        assert_eq!(
            answer.relevant_communities.len(),
            partition.communities.len()
        );
    }

    #[tokio::test]
    async fn hybrid_blends_both_contexts() {
        let (snapshot, partition) = fixture();
        let mock = Arc::new(MockLanguageModel::always(summary_response()));
        let summarizer = summarizer(mock.clone());
        let engine = QaEngine::new(mock, QaConfig::default());

        let answer = engine
            .answer(
                &snapshot,
                &partition,
                &summarizer,
                "Who does Alice know?",
                Some(Strategy::Hybrid),
            )
            .await
            .unwrap();
        assert!(!answer.fell_back);
        assert!(answer
            .sources
            .contains(&"global graph overview".to_string()));
        assert!(answer.sources.iter().any(|s| s.starts_with("community")));
        // The appended global context embeds every community's summary, so
        // the provenance lists them all.
        assert_eq!(
            answer.relevant_communities.len(),
            partition.communities.len()
        );
    }

    #[tokio::test]
    async fn synthesis_failure_degrades_to_templated_answer() {
        let (snapshot, partition) = fixture();
        let summary_mock = Arc::new(MockLanguageModel::always(summary_response()));
        let summarizer = summarizer(summary_mock);
        // Warm every brief summary so only synthesis hits the failing mock.
        for community in &partition.communities {
            summarizer
                .summarize(&snapshot, community, SummaryLevel::Brief)
                .await
                .unwrap();
        }

        let failing = Arc::new(MockLanguageModel::always("unused".to_string()));
        failing.fail_next(2);
        let engine = QaEngine::new(failing, QaConfig::default());
        let answer = engine
            .answer(&snapshot, &partition, &summarizer, "Who does Alice know?", None)
            .await
            .unwrap();
        assert_eq!(answer.confidence, 0.0);
        assert!(answer.answer_text.starts_with("Insufficient information"));
        assert!(answer.sources.is_empty());
    }

    #[tokio::test]
    async fn empty_question_is_a_config_error() {
        let (snapshot, partition) = fixture();
        let mock = Arc::new(MockLanguageModel::always(summary_response()));
        let summarizer = summarizer(mock.clone());
        let engine = QaEngine::new(mock, QaConfig::default());
        let err = engine
            .answer(&snapshot, &partition, &summarizer, "   ", None)
            .await
            .unwrap_err();
        assert!(matches!(err, GraphRagError::Config { .. }));
    }

    #[test]
    fn strategy_parsing() {
        assert_eq!(
            Strategy::parse("community_first").unwrap(),
            Strategy::CommunityFirst
        );
        assert!(Strategy::parse("psychic").is_err());
    }

    #[test]
    fn stop_words_are_filtered() {
        let terms = significant_terms("What is the role of Alice in this graph?");
        assert!(terms.contains("alice"));
        assert!(terms.contains("role"));
        assert!(!terms.contains("the"));
        assert!(!terms.contains("is"));
    }
}
