//! Embedding-similarity classifier. Used as the LLM's fallback and usable on its own.

use crate::embeddings::{cosine_similarity, embed_text, EmbeddingError};
use crate::models::{clamp_confidence, uncategorized_path, ClassificationMethod, TaxonomyNode};
use providers::EmbeddingProvider;
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredPath {
    pub path: Vec<String>,
    pub confidence: f64,
    pub method: ClassificationMethod,
}

impl ScoredPath {
    pub fn uncategorized() -> Self {
        Self {
            path: uncategorized_path(),
            confidence: 0.5,
            method: ClassificationMethod::FallbackUncategorized,
        }
    }
}

/// Rank nodes by cosine similarity to `text_embedding`, best first, keeping `top_k`.
///
/// Nodes without embeddings are ignored. When none of the nodes carries an embedding the
/// single `Uncategorized` fallback is returned instead.
pub fn rank_nodes(text_embedding: &[f32], nodes: &[TaxonomyNode], top_k: usize) -> Vec<ScoredPath> {
    let mut scored: Vec<ScoredPath> = nodes
        .iter()
        .filter_map(|node| {
            let embedding = node.embedding.as_deref()?;
            if embedding.is_empty() {
                return None;
            }
            let similarity = cosine_similarity(text_embedding, embedding) as f64;
            Some(ScoredPath {
                path: node.canonical_path.clone(),
                confidence: clamp_confidence(similarity),
                method: ClassificationMethod::SemanticFallback,
            })
        })
        .collect();

    if scored.is_empty() {
        return vec![ScoredPath::uncategorized()];
    }

    scored.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });
    scored.truncate(top_k.max(1));
    scored
}

#[derive(Clone)]
pub struct SemanticClassifier {
    embedder: Arc<dyn EmbeddingProvider>,
    timeout: Duration,
    top_k: usize,
}

impl SemanticClassifier {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, timeout: Duration, top_k: usize) -> Self {
        Self {
            embedder,
            timeout,
            top_k,
        }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Embed `text` and rank `nodes` against it.
    ///
    /// With no node embeddings the text is never sent to the embedder.
    pub async fn classify_text(
        &self,
        text: &str,
        nodes: &[TaxonomyNode],
    ) -> Result<Vec<ScoredPath>, EmbeddingError> {
        let has_embeddings = nodes
            .iter()
            .any(|n| n.embedding.as_ref().is_some_and(|e| !e.is_empty()));
        if !has_embeddings {
            debug!("no taxonomy embeddings available; semantic classifier returns uncategorized");
            return Ok(vec![ScoredPath::uncategorized()]);
        }
        let vector = embed_text(self.embedder.as_ref(), text, self.timeout).await?;
        Ok(rank_nodes(&vector, nodes, self.top_k))
    }
}
