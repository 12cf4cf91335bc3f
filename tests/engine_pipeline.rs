//! End-to-end pipeline tests: storage -> snapshot -> detection -> store ->
//! summaries -> answers, with a scripted model standing in for the LLM.

use std::sync::Arc;

use graphrag_communities::config::Config;
use graphrag_communities::generation::MockLanguageModel;
use graphrag_communities::prelude::*;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn named(id: &str, name: &str, node_type: &str) -> Node {
    let mut node = Node::new(id, node_type);
    node.properties.insert("name".to_string(), name.into());
    node
}

/// A small social graph: a connected chain alice-bob-carol plus the isolated
/// node dana.
fn seeded_storage() -> Arc<MemoryGraphStorage> {
    let storage = Arc::new(MemoryGraphStorage::new());
    storage.upsert_node(named("a", "Alice", "Person"));
    storage.upsert_node(named("b", "Bob", "Person"));
    storage.upsert_node(named("c", "Carol", "Person"));
    storage.upsert_node(named("d", "Dana", "Person"));
    storage
        .upsert_edge(Edge::new("e1", "a", "b", "KNOWS"))
        .unwrap();
    storage
        .upsert_edge(Edge::new("e2", "b", "c", "KNOWS"))
        .unwrap();
    storage
}

fn summary_json() -> String {
    r#"{"title": "Alice's circle", "summary": "Alice, Bob and Carol form a chain of acquaintances.",
        "key_entities": ["Alice", "Bob", "Carol"], "main_topics": ["friendship"]}"#
        .to_string()
}

fn engine(storage: Arc<MemoryGraphStorage>, llm: Arc<MockLanguageModel>) -> GraphRagEngine {
    let mut config = Config::default();
    config.detection.tuning.seed = Some(42);
    GraphRagEngine::new(storage, llm, config).unwrap()
}

#[tokio::test]
async fn detect_summarize_answer_round_trip() {
    init_tracing();
    let storage = seeded_storage();
    let llm = Arc::new(MockLanguageModel::always(summary_json()));
    let engine = engine(storage, llm);

    let report = engine.detect_communities(None, None).await.unwrap();
    assert_eq!(report.community_count, 2);
    assert!(!report.degraded);

    // The chain clusters together; the isolate stays alone. communities()
    // orders largest first.
    let communities = engine.communities().unwrap();
    assert_eq!(communities[0].size(), 3);
    assert_eq!(communities[1].size(), 1);
    assert!(communities[0]
        .member_node_ids
        .contains(&NodeId::from("b")));

    let batch = engine.summarize_all(Some(SummaryLevel::Brief)).await.unwrap();
    assert!(batch.is_complete());
    assert_eq!(batch.successful.len(), 2);

    let answer = engine.answer("Who does Alice know?", None).await.unwrap();
    assert!(!answer.fell_back);
    assert!(answer.confidence > 0.0);
    assert!(answer
        .relevant_communities
        .iter()
        .any(|rc| rc.id == communities[0].id && rc.score > 0.0));
}

#[tokio::test]
async fn summaries_are_cached_per_graph_version() {
    let storage = seeded_storage();
    let llm = Arc::new(MockLanguageModel::always(summary_json()));
    let engine = engine(storage.clone(), llm.clone());

    engine.detect_communities(None, None).await.unwrap();
    let communities = engine.communities().unwrap();
    let target = communities[0].id;

    let first = engine
        .summarize_community(target, SummaryLevel::Detailed)
        .await
        .unwrap();
    let calls_after_first = llm.call_count();
    let second = engine
        .summarize_community(target, SummaryLevel::Detailed)
        .await
        .unwrap();

    // Same Arc served, no extra model call.
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(llm.call_count(), calls_after_first);

    // Re-detecting an unchanged graph keeps the same content version, so the
    // cache stays warm.
    engine.detect_communities(None, None).await.unwrap();
    let communities = engine.communities().unwrap();
    let third = engine
        .summarize_community(communities[0].id, SummaryLevel::Detailed)
        .await
        .unwrap();
    assert_eq!(third.graph_version, first.graph_version);
    assert_eq!(llm.call_count(), calls_after_first);
}

#[tokio::test]
async fn topology_change_invalidates_summaries() {
    init_tracing();
    let storage = seeded_storage();
    let llm = Arc::new(MockLanguageModel::always(summary_json()));
    let engine = engine(storage.clone(), llm.clone());

    engine.detect_communities(None, None).await.unwrap();
    let target = engine.communities().unwrap()[0].id;
    engine
        .summarize_community(target, SummaryLevel::Brief)
        .await
        .unwrap();
    let calls_before = llm.call_count();

    // Connect Dana into the chain: membership changes, version changes.
    storage
        .upsert_edge(Edge::new("e3", "c", "d", "KNOWS"))
        .unwrap();
    let report = engine.detect_communities(None, None).await.unwrap();
    let dana = engine
        .active_partition()
        .unwrap()
        .partition
        .community_of(&NodeId::from("d"))
        .cloned()
        .unwrap();
    assert!(dana.size() >= 2, "dana should no longer be isolated");
    assert!(report.diff.is_some());

    let target = engine.communities().unwrap()[0].id;
    engine
        .summarize_community(target, SummaryLevel::Brief)
        .await
        .unwrap();
    // Fresh generation against the new snapshot version.
    assert!(llm.call_count() > calls_before);
}

#[tokio::test]
async fn answer_sources_match_used_communities() {
    let storage = seeded_storage();
    let llm = Arc::new(MockLanguageModel::always(summary_json()));
    let engine = engine(storage, llm);

    engine.detect_communities(None, None).await.unwrap();
    let answer = engine.answer("Who does Bob know?", None).await.unwrap();

    // Every community that fed the context is listed, and every node id
    // serialized into the context is attributed as a source.
    for rc in &answer.relevant_communities {
        let community = engine.get_community(rc.id).unwrap();
        assert!(answer
            .sources
            .iter()
            .any(|s| s.contains(&format!("community {}", rc.id))));
        for member in &community.member_node_ids {
            assert!(
                answer.sources.contains(&format!("node {member}")),
                "member {member} fed the context but is not attributed"
            );
        }
    }
}

#[tokio::test]
async fn isolated_node_question_routes_to_its_singleton() {
    let storage = seeded_storage();
    let llm = Arc::new(MockLanguageModel::always(summary_json()));
    let engine = engine(storage, llm);
    engine.detect_communities(None, None).await.unwrap();

    let answer = engine.answer("Tell me about Dana", None).await.unwrap();
    assert!(!answer.fell_back);

    // Only Dana's singleton community matches the question.
    assert_eq!(answer.relevant_communities.len(), 1);
    let rc = &answer.relevant_communities[0];
    assert!(rc.score > 0.0);
    let community = engine.get_community(rc.id).unwrap();
    assert_eq!(community.size(), 1);
    assert!(community.member_node_ids.contains(&NodeId::from("d")));

    // Both the community and the isolated node itself appear as sources.
    assert!(answer
        .sources
        .iter()
        .any(|s| s.contains(&format!("community {}", rc.id))));
    assert!(answer.sources.contains(&"node d".to_string()));

    // One sparse singleton cannot cover much of the question.
    assert!(answer.confidence > 0.0 && answer.confidence < 0.5);
}

#[tokio::test]
async fn irrelevant_question_sets_the_fallback_flag() {
    let storage = seeded_storage();
    let llm = Arc::new(MockLanguageModel::always(summary_json()));
    let engine = engine(storage, llm);

    engine.detect_communities(None, None).await.unwrap();
    let answer = engine
        .answer("Explain transfinite ordinal arithmetic.", None)
        .await
        .unwrap();
    assert!(answer.fell_back);
    assert_eq!(answer.sources, vec!["global graph overview".to_string()]);
}

#[tokio::test]
async fn batch_failures_do_not_poison_the_cache() {
    let storage = seeded_storage();
    // Summaries never parse: prose only, both attempts per community.
    let llm = Arc::new(MockLanguageModel::always("no json here".to_string()));
    let engine = engine(storage, llm);

    engine.detect_communities(None, None).await.unwrap();
    let batch = engine.summarize_all(Some(SummaryLevel::Brief)).await.unwrap();
    assert!(batch.successful.is_empty());
    assert_eq!(batch.failed.len(), 2);
    assert_eq!(engine.summary_cache_len(), 0);
}

#[tokio::test]
async fn explicit_algorithm_and_resolution_override_config() {
    let storage = seeded_storage();
    let llm = Arc::new(MockLanguageModel::always(summary_json()));
    let engine = engine(storage, llm);

    let report = engine
        .detect_communities(Some(Algorithm::Leiden), Some(1.5))
        .await
        .unwrap();
    assert_eq!(report.algorithm, Algorithm::Leiden);
    assert!(report.modularity >= -1.0 && report.modularity <= 1.0);
}
