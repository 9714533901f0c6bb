use crate::taxonomy::{SqliteCatalog, TaxonomyError};
use providers::{EmbeddingProvider, ProviderError, ProviderRegistry};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("embedding timed out after {0:?}")]
    Timeout(Duration),
    #[error("provider returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },
    #[error("provider returned an empty vector")]
    EmptyVector,
    #[error(transparent)]
    Taxonomy(#[from] TaxonomyError),
}

#[derive(Debug, Clone)]
pub struct EmbeddingRequest {
    pub texts: Vec<String>,
    pub provider: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    pub vectors: Vec<Vec<f32>>,
}

pub async fn embed(
    req: EmbeddingRequest,
    registry: &ProviderRegistry,
) -> Result<EmbeddingResult, EmbeddingError> {
    let provider = registry.embedding(req.provider.as_deref())?;
    let resp = provider.embed(&req.texts).await?;
    if resp.vectors.len() != req.texts.len() {
        return Err(EmbeddingError::CountMismatch {
            expected: req.texts.len(),
            got: resp.vectors.len(),
        });
    }
    Ok(EmbeddingResult {
        vectors: resp.vectors,
    })
}

/// Embed one text under a deadline.
pub async fn embed_text(
    provider: &dyn EmbeddingProvider,
    text: &str,
    timeout: Duration,
) -> Result<Vec<f32>, EmbeddingError> {
    let texts = [text.to_string()];
    let resp = tokio::time::timeout(timeout, provider.embed(&texts))
        .await
        .map_err(|_| EmbeddingError::Timeout(timeout))??;
    let vector = resp
        .vectors
        .into_iter()
        .next()
        .ok_or(EmbeddingError::CountMismatch {
            expected: 1,
            got: 0,
        })?;
    if vector.is_empty() {
        return Err(EmbeddingError::EmptyVector);
    }
    Ok(vector)
}

/// Compute and store embeddings for every node of `version` that lacks one.
///
/// The text embedded for a node is its canonical path joined with ` > `, which keeps
/// sibling labels such as "Reports" distinguishable across branches.
pub async fn embed_taxonomy(
    catalog: &SqliteCatalog,
    provider: &dyn EmbeddingProvider,
    version: &str,
    batch_size: usize,
    refresh: bool,
) -> Result<usize, EmbeddingError> {
    let nodes: Vec<_> = catalog
        .all_nodes(version)
        .await?
        .into_iter()
        .filter(|n| refresh || n.embedding.is_none())
        .collect();

    let mut embedded = 0usize;
    for batch in nodes.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|n| n.canonical_path.join(" > ")).collect();
        let resp = provider.embed(&texts).await?;
        if resp.vectors.len() != batch.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: batch.len(),
                got: resp.vectors.len(),
            });
        }
        for (node, vector) in batch.iter().zip(resp.vectors) {
            if vector.is_empty() {
                debug!(node = %node.id, "provider returned empty vector; skipping");
                continue;
            }
            catalog.set_embedding(version, &node.id, &vector).await?;
            embedded += 1;
        }
    }
    info!(version, embedded, "taxonomy embeddings stored");
    Ok(embedded)
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1, 1]`; `0.0` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
