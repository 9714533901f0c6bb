//! Taxonomy catalog: read-only access to the published nodes of a taxonomy version.
//!
//! Two backends exist. [`SqliteCatalog`] reads the `taxonomy_nodes` table and is what the
//! pipeline uses in production; [`InMemoryCatalog`] holds nodes loaded from a TOML file and
//! backs tests and small deployments. An unknown version is always an error: every stage
//! downstream depends on a valid node list.

use crate::embeddings::{blob_to_vec, vec_to_blob};
use crate::models::TaxonomyNode;
use serde::Deserialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::Path;
use storage::models::{decode_path, encode_path, TaxonomyNodeRow};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum TaxonomyError {
    #[error("unknown or unpublished taxonomy version: {0}")]
    UnknownVersion(String),
    #[error("taxonomy storage error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("corrupt taxonomy node {id}: {reason}")]
    Corrupt { id: String, reason: String },
    #[error("taxonomy file error: {0}")]
    File(String),
}

#[async_trait::async_trait]
pub trait TaxonomyCatalog: Send + Sync {
    /// Leaf nodes of `version`. Fails with `UnknownVersion` when nothing is published under it.
    async fn leaf_nodes(&self, version: &str) -> Result<Vec<TaxonomyNode>, TaxonomyError>;
}

/// Drop every node whose path is a strict prefix of another node's path.
pub fn retain_leaves(nodes: Vec<TaxonomyNode>) -> Vec<TaxonomyNode> {
    let paths: Vec<Vec<String>> = nodes.iter().map(|n| n.canonical_path.clone()).collect();
    nodes
        .into_iter()
        .filter(|node| {
            !paths.iter().any(|other| {
                other.len() > node.canonical_path.len() && other.starts_with(&node.canonical_path)
            })
        })
        .collect()
}

/// Stable key for a path that has no catalog node (e.g. `Uncategorized`).
pub fn path_key(path: &[String]) -> String {
    path.join("/")
}

/// Node id whose canonical path equals `path`, or the path key when the path is not in the catalog.
pub fn resolve_node_id(nodes: &[TaxonomyNode], path: &[String]) -> String {
    nodes
        .iter()
        .find(|n| n.canonical_path == path)
        .map(|n| n.id.clone())
        .unwrap_or_else(|| path_key(path))
}

#[derive(Debug, Deserialize)]
struct TaxonomyFile {
    nodes: Vec<TaxonomyNode>,
}

/// Read nodes from a TOML file with a `[[nodes]]` array.
pub fn load_nodes_from_file(path: &Path) -> Result<Vec<TaxonomyNode>, TaxonomyError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| TaxonomyError::File(format!("{}: {e}", path.display())))?;
    let parsed: TaxonomyFile = toml::from_str(&content)
        .map_err(|e| TaxonomyError::File(format!("{}: {e}", path.display())))?;
    for node in &parsed.nodes {
        if node.canonical_path.is_empty() {
            return Err(TaxonomyError::Corrupt {
                id: node.id.clone(),
                reason: "empty canonical_path".into(),
            });
        }
    }
    Ok(parsed.nodes)
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryCatalog {
    versions: HashMap<String, Vec<TaxonomyNode>>,
}

impl InMemoryCatalog {
    pub fn new(nodes: Vec<TaxonomyNode>) -> Self {
        let mut versions: HashMap<String, Vec<TaxonomyNode>> = HashMap::new();
        for node in nodes {
            versions.entry(node.version.clone()).or_default().push(node);
        }
        Self { versions }
    }

    pub fn from_file(path: &Path) -> Result<Self, TaxonomyError> {
        Ok(Self::new(load_nodes_from_file(path)?))
    }

    pub fn versions(&self) -> Vec<String> {
        let mut v: Vec<String> = self.versions.keys().cloned().collect();
        v.sort();
        v
    }
}

#[async_trait::async_trait]
impl TaxonomyCatalog for InMemoryCatalog {
    async fn leaf_nodes(&self, version: &str) -> Result<Vec<TaxonomyNode>, TaxonomyError> {
        let nodes = self
            .versions
            .get(version)
            .filter(|nodes| !nodes.is_empty())
            .ok_or_else(|| TaxonomyError::UnknownVersion(version.to_string()))?;
        Ok(retain_leaves(nodes.clone()))
    }
}

#[derive(Clone)]
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace nodes. Existing embeddings are kept when the incoming node carries none.
    pub async fn import(&self, nodes: &[TaxonomyNode]) -> Result<usize, TaxonomyError> {
        let mut tx = self.pool.begin().await?;
        for node in nodes {
            sqlx::query(
                r#"
                INSERT INTO taxonomy_nodes (id, version, label, canonical_path, embedding)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(id, version) DO UPDATE SET
                    label = excluded.label,
                    canonical_path = excluded.canonical_path,
                    embedding = COALESCE(excluded.embedding, taxonomy_nodes.embedding)
                "#,
            )
            .bind(&node.id)
            .bind(&node.version)
            .bind(&node.label)
            .bind(encode_path(&node.canonical_path))
            .bind(node.embedding.as_deref().map(vec_to_blob))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        info!(count = nodes.len(), "imported taxonomy nodes");
        Ok(nodes.len())
    }

    pub async fn set_embedding(
        &self,
        version: &str,
        node_id: &str,
        embedding: &[f32],
    ) -> Result<(), TaxonomyError> {
        sqlx::query("UPDATE taxonomy_nodes SET embedding = ?1 WHERE id = ?2 AND version = ?3")
            .bind(vec_to_blob(embedding))
            .bind(node_id)
            .bind(version)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn all_nodes(&self, version: &str) -> Result<Vec<TaxonomyNode>, TaxonomyError> {
        let rows = sqlx::query_as::<_, TaxonomyNodeRow>(
            "SELECT id, version, label, canonical_path, embedding FROM taxonomy_nodes WHERE version = ?1 ORDER BY canonical_path",
        )
        .bind(version)
        .fetch_all(&self.pool)
        .await?;
        if rows.is_empty() {
            return Err(TaxonomyError::UnknownVersion(version.to_string()));
        }
        rows.into_iter().map(node_from_row).collect()
    }
}

fn node_from_row(row: TaxonomyNodeRow) -> Result<TaxonomyNode, TaxonomyError> {
    let canonical_path = decode_path(&row.canonical_path).map_err(|e| TaxonomyError::Corrupt {
        id: row.id.clone(),
        reason: e.to_string(),
    })?;
    Ok(TaxonomyNode {
        id: row.id,
        label: row.label,
        canonical_path,
        version: row.version,
        embedding: row
            .embedding
            .filter(|blob| !blob.is_empty())
            .map(|blob| blob_to_vec(&blob)),
    })
}

#[async_trait::async_trait]
impl TaxonomyCatalog for SqliteCatalog {
    async fn leaf_nodes(&self, version: &str) -> Result<Vec<TaxonomyNode>, TaxonomyError> {
        let nodes = retain_leaves(self.all_nodes(version).await?);
        debug!(version, leaves = nodes.len(), "loaded taxonomy leaves");
        Ok(nodes)
    }
}
