#![allow(dead_code)]

use doctax_core::cross_validate::CrossValidator;
use doctax_core::hitl::{HitlQueueManager, HitlSettings};
use doctax_core::llm::{LlmClassifier, LlmSettings};
use doctax_core::mapping::MappingStore;
use doctax_core::models::TaxonomyNode;
use doctax_core::orchestrator::ClassificationOrchestrator;
use doctax_core::rules::{RuleMatcher, RuleSet};
use doctax_core::semantic::SemanticClassifier;
use doctax_core::taxonomy::{InMemoryCatalog, TaxonomyCatalog};
use providers::{EmbedResponse, EmbeddingProvider, LlmProvider, ProviderError};
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const VERSION: &str = "v1";

pub fn path(labels: &[&str]) -> Vec<String> {
    labels.iter().map(|s| s.to_string()).collect()
}

pub fn node(id: &str, labels: &[&str], embedding: Option<Vec<f32>>) -> TaxonomyNode {
    TaxonomyNode {
        id: id.to_string(),
        label: labels.last().map(|s| s.to_string()).unwrap_or_default(),
        canonical_path: path(labels),
        version: VERSION.to_string(),
        embedding,
    }
}

/// Leaves of a small two-level taxonomy with orthogonal embeddings.
pub fn taxonomy() -> Vec<TaxonomyNode> {
    vec![
        node("finance", &["Finance"], None),
        node("finance-reports", &["Finance", "Reports"], Some(vec![1.0, 0.0, 0.0, 0.0])),
        node("legal-contracts", &["Legal", "Contracts"], Some(vec![0.0, 1.0, 0.0, 0.0])),
        node("hr-policies", &["HR", "Policies"], Some(vec![0.0, 0.0, 1.0, 0.0])),
        node(
            "compliance-confidential",
            &["Compliance", "Sensitive", "Confidential"],
            Some(vec![0.0, 0.0, 0.0, 1.0]),
        ),
    ]
}

pub fn verdict(labels: &[&str], confidence: f64) -> String {
    serde_json::json!({
        "path": labels,
        "candidates": [],
        "reasoning": ["matches the document subject", "terminology fits the branch"],
        "confidence": confidence,
    })
    .to_string()
}

/// Answers every prompt with the same text, optionally after a delay.
pub struct ScriptedLlm {
    reply: Result<String, String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn replying(reply: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(reply.into()),
            delay: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            reply: Err("connection refused".into()),
            delay: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn stalled(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(verdict(&["Legal", "Contracts"], 0.99)),
            delay: Some(delay),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedLlm {
    async fn generate(&self, _prompt: &str, _timeout: Duration) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.reply.clone().map_err(ProviderError::RequestFailed)
    }
}

/// Returns the same vector for every input.
pub struct FixedEmbedder {
    pub vector: Vec<f32>,
    calls: AtomicUsize,
}

impl FixedEmbedder {
    pub fn new(vector: Vec<f32>) -> Arc<Self> {
        Arc::new(Self {
            vector,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for FixedEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(EmbedResponse {
            vectors: texts.iter().map(|_| self.vector.clone()).collect(),
        })
    }
}

pub async fn memory_pool() -> SqlitePool {
    let pool = storage::connect("sqlite::memory:").await.unwrap();
    storage::migrate(&pool).await.unwrap();
    pool
}

pub struct Harness {
    pub pool: SqlitePool,
    pub orchestrator: ClassificationOrchestrator,
    pub catalog: Arc<dyn TaxonomyCatalog>,
}

pub async fn harness(llm: Arc<ScriptedLlm>, embedder: Arc<FixedEmbedder>) -> Harness {
    let pool = memory_pool().await;
    let catalog: Arc<dyn TaxonomyCatalog> = Arc::new(InMemoryCatalog::new(taxonomy()));
    let rules = Arc::new(RuleMatcher::new(Arc::new(RuleSet::builtin())).unwrap());
    let semantic = SemanticClassifier::new(embedder, Duration::from_secs(1), 3);
    let llm = LlmClassifier::new(
        llm,
        Some(semantic),
        LlmSettings {
            timeout: Duration::from_millis(200),
            ..LlmSettings::default()
        },
    );
    let hitl = HitlQueueManager::new(pool.clone(), HitlSettings::default())
        .with_catalog(catalog.clone());
    let orchestrator = ClassificationOrchestrator::new(
        catalog.clone(),
        rules,
        llm,
        hitl,
        MappingStore::new(pool.clone()),
    )
    .with_validator(CrossValidator::default());
    Harness {
        pool,
        orchestrator,
        catalog,
    }
}
