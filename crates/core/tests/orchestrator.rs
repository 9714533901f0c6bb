mod common;

use common::{harness, path, verdict, FixedEmbedder, ScriptedLlm, VERSION};
use doctax_core::models::{ClassificationMethod, TaskPriority, UNCATEGORIZED};
use doctax_core::orchestrator::{Chunk, ClassifyError};
use doctax_core::taxonomy::TaxonomyError;
use std::time::Duration;

fn legal_embedder() -> std::sync::Arc<FixedEmbedder> {
    FixedEmbedder::new(vec![0.0, 1.0, 0.0, 0.0])
}

async fn mapping_count(pool: &sqlx::SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM doc_taxonomy_mappings")
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn confidentiality_marker_takes_fast_path() {
    let llm = ScriptedLlm::replying(verdict(&["Legal", "Contracts"], 0.9));
    let h = harness(llm.clone(), legal_embedder()).await;

    let result = h
        .orchestrator
        .classify("chunk-a", "CONFIDENTIAL: minutes of the board meeting", VERSION)
        .await
        .unwrap();

    assert_eq!(result.method, ClassificationMethod::SensitivityRule);
    assert!(result.confidence >= 0.95);
    assert_eq!(result.canonical_path, path(&["Compliance", "Sensitive", "Confidential"]));
    assert!(!result.hitl_required);
    assert_eq!(llm.calls(), 0);

    let mappings = h.orchestrator.mappings().for_doc("chunk-a", VERSION).await.unwrap();
    assert_eq!(mappings.len(), 1);
    assert_eq!(mappings[0].node_id, "compliance-confidential");
    assert!(!mappings[0].hitl_required);
}

#[tokio::test]
async fn low_confidence_llm_answer_is_queued_for_review() {
    let llm = ScriptedLlm::replying(verdict(&["Legal", "Contracts"], 0.55));
    let h = harness(llm.clone(), legal_embedder()).await;

    let result = h
        .orchestrator
        .classify("chunk-b", "Notes from the planning session about next steps.", VERSION)
        .await
        .unwrap();

    assert_eq!(llm.calls(), 1);
    assert_eq!(result.method, ClassificationMethod::LlmOnly);
    assert!((result.confidence - 0.44).abs() < 1e-9);
    assert!(result.hitl_required);

    let pending = h.orchestrator.hitl().get_pending_tasks(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].chunk_id, "chunk-b");
    assert_eq!(pending[0].suggested_path, path(&["Legal", "Contracts"]));
    assert_eq!(pending[0].priority, TaskPriority::High);
    assert_eq!(pending[0].node_id, "legal-contracts");

    let mappings = h.orchestrator.mappings().for_doc("chunk-b", VERSION).await.unwrap();
    assert_eq!(mappings.len(), 1);
    assert!(mappings[0].hitl_required);
}

#[tokio::test]
async fn rule_and_llm_agreement_is_boosted() {
    let llm = ScriptedLlm::replying(verdict(&["Finance", "Reports"], 0.80));
    let h = harness(llm.clone(), legal_embedder()).await;

    let result = h
        .orchestrator
        .classify("chunk-c", "Quarterly revenue grew while cash flow stayed flat.", VERSION)
        .await
        .unwrap();

    assert_eq!(llm.calls(), 1);
    assert_eq!(result.method, ClassificationMethod::CrossValidated);
    assert!((result.confidence - 0.9075).abs() < 1e-9);
    assert!(!result.hitl_required);
    assert!(h.orchestrator.hitl().get_pending_tasks(10).await.unwrap().is_empty());

    // Classifying again updates the same mapping row.
    h.orchestrator
        .classify("chunk-c", "Quarterly revenue grew while cash flow stayed flat.", VERSION)
        .await
        .unwrap();
    assert_eq!(mapping_count(&h.pool).await, 1);
}

#[tokio::test]
async fn reclassifying_replaces_earlier_review_state() {
    let llm = ScriptedLlm::replying(verdict(&["Legal", "Contracts"], 0.55));
    let h = harness(llm.clone(), legal_embedder()).await;
    let vague = "Notes from the planning session about next steps.";

    h.orchestrator.classify("c1", vague, VERSION).await.unwrap();
    let first = h.orchestrator.hitl().get_pending_tasks(10).await.unwrap();
    h.orchestrator.classify("c1", vague, VERSION).await.unwrap();

    // The open task is refreshed, not duplicated.
    let pending = h.orchestrator.hitl().get_pending_tasks(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].task_id, first[0].task_id);
    assert_eq!(mapping_count(&h.pool).await, 1);

    // A confident result retires the open task and the provisional mapping.
    let result = h
        .orchestrator
        .classify("c1", "CONFIDENTIAL: board pack for the next session", VERSION)
        .await
        .unwrap();
    assert!(!result.hitl_required);
    assert!(h.orchestrator.hitl().get_pending_tasks(10).await.unwrap().is_empty());

    let mappings = h.orchestrator.mappings().for_doc("c1", VERSION).await.unwrap();
    assert_eq!(mappings.len(), 1);
    assert_eq!(mappings[0].node_id, "compliance-confidential");
    assert!(!mappings[0].hitl_required);
    assert!((mappings[0].confidence - 0.95).abs() < 1e-9);
}

#[tokio::test]
async fn empty_text_touches_nothing() {
    let llm = ScriptedLlm::replying(verdict(&["Legal", "Contracts"], 0.9));
    let embedder = legal_embedder();
    let h = harness(llm.clone(), embedder.clone()).await;

    let result = h.orchestrator.classify("chunk-e", "  \n\t ", VERSION).await.unwrap();

    assert_eq!(result.canonical_path, vec![UNCATEGORIZED.to_string()]);
    assert_eq!(result.confidence, 0.0);
    assert_eq!(llm.calls(), 0);
    assert_eq!(embedder.calls(), 0);
    assert_eq!(mapping_count(&h.pool).await, 0);
}

#[tokio::test]
async fn unknown_version_is_an_error() {
    let llm = ScriptedLlm::replying(verdict(&["Legal", "Contracts"], 0.9));
    let h = harness(llm.clone(), legal_embedder()).await;

    let err = h
        .orchestrator
        .classify("chunk-x", "some text", "v404")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClassifyError::Taxonomy(TaxonomyError::UnknownVersion(v)) if v == "v404"
    ));
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn llm_timeout_falls_back_to_semantic_similarity() {
    let llm = ScriptedLlm::stalled(Duration::from_secs(2));
    let embedder = legal_embedder();
    let h = harness(llm.clone(), embedder.clone()).await;

    let result = h
        .orchestrator
        .classify("chunk-t", "Notes from the planning session about next steps.", VERSION)
        .await
        .unwrap();

    assert_eq!(llm.calls(), 1);
    assert_eq!(embedder.calls(), 1);
    assert_eq!(result.method, ClassificationMethod::SemanticFallback);
    assert_eq!(result.canonical_path, path(&["Legal", "Contracts"]));
    assert!((result.confidence - 0.8).abs() < 1e-6);
    assert_eq!(result.reasoning.len(), 2);
}

#[tokio::test]
async fn rule_against_fallback_disagreement_is_reviewed() {
    let llm = ScriptedLlm::failing();
    let h = harness(llm.clone(), legal_embedder()).await;

    // One finance term: keyword rule at 0.80, below the fast path.
    let result = h
        .orchestrator
        .classify("chunk-d", "The revenue figures are attached.", VERSION)
        .await
        .unwrap();

    assert_eq!(result.method, ClassificationMethod::LlmDisagreement);
    assert_eq!(result.canonical_path, path(&["Legal", "Contracts"]));
    assert_eq!(result.candidates[0], path(&["Finance", "Reports"]));
    assert!(result.drift);
    assert!(result.hitl_required);

    let pending = h.orchestrator.hitl().get_pending_tasks(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].alternatives[0], path(&["Finance", "Reports"]));
    assert_eq!(pending[0].priority, TaskPriority::High);
}

#[tokio::test]
async fn classify_many_keeps_input_order() {
    let llm = ScriptedLlm::replying(verdict(&["Finance", "Reports"], 0.80));
    let h = harness(llm.clone(), legal_embedder()).await;

    let chunks = vec![
        Chunk {
            chunk_id: "m-1".into(),
            text: "Internal use only: salary bands".into(),
        },
        Chunk {
            chunk_id: "m-2".into(),
            text: String::new(),
        },
        Chunk {
            chunk_id: "m-3".into(),
            text: "Revenue and cash flow summary".into(),
        },
    ];
    let results = h.orchestrator.classify_many(&chunks, VERSION).await;

    assert_eq!(results.len(), 3);
    let methods: Vec<ClassificationMethod> = results
        .iter()
        .map(|r| r.as_ref().unwrap().method)
        .collect();
    assert_eq!(
        methods,
        vec![
            ClassificationMethod::SensitivityRule,
            ClassificationMethod::FallbackUncategorized,
            ClassificationMethod::CrossValidated,
        ]
    );
    assert_eq!(llm.calls(), 1);
    assert_eq!(mapping_count(&h.pool).await, 2);
}

#[tokio::test]
async fn confidences_stay_in_unit_range() {
    let llm = ScriptedLlm::replying(verdict(&["Finance", "Reports"], 1.0));
    let h = harness(llm, legal_embedder()).await;

    let result = h
        .orchestrator
        .classify("chunk-r", "Revenue and cash flow summary", VERSION)
        .await
        .unwrap();
    assert_eq!(result.confidence, 1.0);
}
