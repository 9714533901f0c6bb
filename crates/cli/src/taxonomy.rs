use anyhow::{Context, Result};
use doctax_core::embeddings::embed_taxonomy;
use doctax_core::models::TaxonomyNode;
use doctax_core::taxonomy::{load_nodes_from_file, SqliteCatalog};
use providers::EmbeddingProvider;
use std::path::Path;
use tracing::info;

const EMBED_BATCH: usize = 32;

/// Load a `[[nodes]]` TOML file into `taxonomy_nodes`.
pub async fn import(catalog: &SqliteCatalog, file: &Path) -> Result<usize> {
    let nodes = load_nodes_from_file(file)?;
    let n = catalog
        .import(&nodes)
        .await
        .with_context(|| format!("import {}", file.display()))?;
    info!(file = %file.display(), nodes = n, "taxonomy imported");
    Ok(n)
}

pub async fn embed(
    catalog: &SqliteCatalog,
    provider: &dyn EmbeddingProvider,
    version: &str,
    refresh: bool,
) -> Result<usize> {
    let n = embed_taxonomy(catalog, provider, version, EMBED_BATCH, refresh)
        .await
        .with_context(|| format!("embed taxonomy {version}"))?;
    Ok(n)
}

pub fn node_line(node: &TaxonomyNode) -> String {
    let marker = if node.embedding.as_ref().is_some_and(|e| !e.is_empty()) {
        "*"
    } else {
        " "
    };
    format!("{marker} {:<32} {}", node.id, node.canonical_path.join(" > "))
}
