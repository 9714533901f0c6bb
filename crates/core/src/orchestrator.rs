//! Runs one chunk through rules, LLM, cross validation and persistence.

use crate::cross_validate::CrossValidator;
use crate::hitl::{HitlError, HitlQueueManager, NewTask};
use crate::llm::LlmClassifier;
use crate::mapping::{MappingRecord, MappingStore};
use crate::models::{ClassificationResult, TaskPriority};
use crate::rules::{RuleMatch, RuleMatcher};
use crate::taxonomy::{resolve_node_id, TaxonomyCatalog, TaxonomyError};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error(transparent)]
    Taxonomy(#[from] TaxonomyError),
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error(transparent)]
    Review(HitlError),
}

impl From<HitlError> for ClassifyError {
    fn from(err: HitlError) -> Self {
        match err {
            HitlError::Storage(e) => ClassifyError::Storage(e),
            other => ClassifyError::Review(other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub text: String,
}

pub struct ClassificationOrchestrator {
    catalog: Arc<dyn TaxonomyCatalog>,
    rules: Arc<RuleMatcher>,
    llm: LlmClassifier,
    validator: CrossValidator,
    hitl: HitlQueueManager,
    mappings: MappingStore,
    fast_path_threshold: f64,
    max_concurrency: usize,
}

impl ClassificationOrchestrator {
    pub fn new(
        catalog: Arc<dyn TaxonomyCatalog>,
        rules: Arc<RuleMatcher>,
        llm: LlmClassifier,
        hitl: HitlQueueManager,
        mappings: MappingStore,
    ) -> Self {
        Self {
            catalog,
            rules,
            llm,
            validator: CrossValidator::default(),
            hitl,
            mappings,
            fast_path_threshold: 0.90,
            max_concurrency: 8,
        }
    }

    pub fn with_validator(mut self, validator: CrossValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_fast_path_threshold(mut self, threshold: f64) -> Self {
        self.fast_path_threshold = threshold;
        self
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n.max(1);
        self
    }

    pub fn hitl(&self) -> &HitlQueueManager {
        &self.hitl
    }

    pub fn mappings(&self) -> &MappingStore {
        &self.mappings
    }

    /// Classify one chunk and persist the outcome.
    ///
    /// Whitespace-only text returns `Uncategorized` at 0.0 without touching any stage or
    /// the database. An unknown taxonomy version is the only input error. Re-classifying a
    /// chunk replaces its mapping in that version and refreshes or drops its open task.
    pub async fn classify(
        &self,
        chunk_id: &str,
        text: &str,
        version: &str,
    ) -> Result<ClassificationResult, ClassifyError> {
        if text.trim().is_empty() {
            debug!(chunk_id, "empty chunk; skipping classification");
            return Ok(ClassificationResult::empty_input());
        }

        let nodes = self.catalog.leaf_nodes(version).await?;

        let rule = self.rules.match_text(text);
        let result = match &rule {
            Some(m) if m.confidence >= self.fast_path_threshold => {
                debug!(chunk_id, rule = %m.rule, confidence = m.confidence, "fast path");
                fast_path_result(m, self.validator.hitl_threshold())
            }
            _ => {
                let outcome = self.llm.classify(text, &nodes).await;
                self.validator.resolve(rule.as_ref(), &outcome)
            }
        };

        let node_id = resolve_node_id(&nodes, &result.canonical_path);
        if result.hitl_required {
            self.hitl
                .add_task(NewTask {
                    chunk_id: chunk_id.to_string(),
                    taxonomy_version: version.to_string(),
                    node_id,
                    text: text.to_string(),
                    suggested_path: result.canonical_path.clone(),
                    confidence: result.confidence,
                    alternatives: result.candidates.clone(),
                    priority: TaskPriority::for_result(&result),
                })
                .await?;
        } else {
            self.hitl
                .accept_mapping(&MappingRecord {
                    doc_id: chunk_id.to_string(),
                    node_id,
                    version: version.to_string(),
                    path: result.canonical_path.clone(),
                    confidence: result.confidence,
                    hitl_required: false,
                })
                .await?;
        }

        info!(
            chunk_id,
            method = %result.method,
            confidence = result.confidence,
            hitl = result.hitl_required,
            "classified chunk"
        );
        Ok(result)
    }

    /// Classify chunks concurrently, at most `max_concurrency` at a time.
    /// Results come back in input order.
    pub async fn classify_many(
        &self,
        chunks: &[Chunk],
        version: &str,
    ) -> Vec<Result<ClassificationResult, ClassifyError>> {
        stream::iter(chunks)
            .map(|chunk| self.classify(&chunk.chunk_id, &chunk.text, version))
            .buffered(self.max_concurrency)
            .collect()
            .await
    }
}

fn fast_path_result(rule: &RuleMatch, hitl_threshold: f64) -> ClassificationResult {
    let mut reasoning = vec![format!("rule {} matched", rule.rule)];
    if !rule.matched_terms.is_empty() {
        reasoning.push(format!("matched terms: {}", rule.matched_terms.join(", ")));
    }
    ClassificationResult {
        canonical_path: rule.path.clone(),
        confidence: rule.confidence,
        method: rule.method,
        candidates: Vec::new(),
        reasoning,
        hitl_required: rule.confidence < hitl_threshold,
        drift: false,
    }
}
