//! Wiring: turn an [`AppConfig`] into providers, catalog and a ready orchestrator.

use crate::config::{AppConfig, TaxonomySource};
use crate::cross_validate::CrossValidator;
use crate::hitl::{HitlQueueManager, HitlSettings};
use crate::llm::{LlmClassifier, LlmSettings};
use crate::mapping::MappingStore;
use crate::orchestrator::ClassificationOrchestrator;
use crate::rules::{load_rules, RuleMatcher};
use crate::semantic::SemanticClassifier;
use crate::taxonomy::{InMemoryCatalog, SqliteCatalog, TaxonomyCatalog};
use anyhow::Context;
use providers::lmstudio::{LmStudioConfig, LmStudioProvider};
use providers::noop::NoopProvider;
use providers::openai::{OpenAiConfig, OpenAiProvider};
use providers::{EmbeddingProvider, LlmProvider, ProviderRegistry};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use storage::{connect, migrate};
use tracing::{info, warn};

const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com";

pub async fn open_database(config: &AppConfig) -> anyhow::Result<SqlitePool> {
    let pool = connect(&config.database.path).await.context("db connect")?;
    migrate(&pool).await.context("db migrate")?;
    Ok(pool)
}

/// Register every provider the environment has credentials for, plus `noop`.
pub fn build_registry(config: &AppConfig) -> ProviderRegistry {
    let noop = Arc::new(NoopProvider);
    let mut reg = ProviderRegistry::new()
        .with_embedding("noop", noop.clone())
        .with_llm("noop", noop);

    if let Some(key) = std::env::var_os("OPENAI_API_KEY") {
        let base = std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_OPENAI_BASE.into());
        let provider = OpenAiProvider::new(OpenAiConfig {
            api_key: key.to_string_lossy().into_owned(),
            base_url: base,
            embedding_model: config.embeddings.model.clone(),
            chat_model: config.llm.model.clone(),
        });
        reg = reg
            .with_embedding("openai", Arc::new(provider.clone()))
            .with_llm("openai", Arc::new(provider));
    }

    if let Some(base) = std::env::var_os("LMSTUDIO_BASE_URL") {
        let provider = LmStudioProvider::new(LmStudioConfig {
            base_url: base.to_string_lossy().into_owned(),
            embedding_model: config.embeddings.model.clone(),
            chat_model: config.llm.model.clone(),
        });
        reg = reg
            .with_embedding("lmstudio", Arc::new(provider.clone()))
            .with_llm("lmstudio", Arc::new(provider));
    }

    reg.set_preferred_embedding(&config.embeddings.provider)
        .set_preferred_llm(&config.llm.provider)
}

/// Preferred embedding provider, or `noop` when it has no credentials.
pub fn embedding_provider(reg: &ProviderRegistry) -> Arc<dyn EmbeddingProvider> {
    reg.embedding(None).unwrap_or_else(|err| {
        warn!(error = %err, "embedding provider unavailable; using noop");
        Arc::new(NoopProvider)
    })
}

pub fn llm_provider(reg: &ProviderRegistry) -> Arc<dyn LlmProvider> {
    reg.llm(None).unwrap_or_else(|err| {
        warn!(error = %err, "llm provider unavailable; using noop");
        Arc::new(NoopProvider)
    })
}

pub fn build_catalog(config: &AppConfig, pool: &SqlitePool) -> anyhow::Result<Arc<dyn TaxonomyCatalog>> {
    match config.taxonomy.source {
        TaxonomySource::Sqlite => Ok(Arc::new(SqliteCatalog::new(pool.clone()))),
        TaxonomySource::File => {
            let path = config
                .taxonomy
                .path
                .as_deref()
                .context("taxonomy.path is required when taxonomy.source = \"file\"")?;
            let catalog = InMemoryCatalog::from_file(Path::new(path))
                .with_context(|| format!("load taxonomy file {path}"))?;
            info!(path, versions = ?catalog.versions(), "loaded taxonomy file");
            Ok(Arc::new(catalog))
        }
    }
}

pub fn build_rules(config: &AppConfig) -> anyhow::Result<Arc<RuleMatcher>> {
    let rules = load_rules(config.rules.path.as_deref().map(Path::new)).context("load rules")?;
    let matcher = RuleMatcher::new(Arc::new(rules)).context("compile rules")?;
    Ok(Arc::new(matcher))
}

pub fn build_hitl(config: &AppConfig, pool: &SqlitePool, catalog: Arc<dyn TaxonomyCatalog>) -> HitlQueueManager {
    HitlQueueManager::new(pool.clone(), HitlSettings::from(&config.hitl)).with_catalog(catalog)
}

pub fn build_orchestrator(
    config: &AppConfig,
    pool: &SqlitePool,
) -> anyhow::Result<ClassificationOrchestrator> {
    let registry = build_registry(config);
    let catalog = build_catalog(config, pool)?;
    let rules = build_rules(config)?;

    let cls = &config.classification;
    let semantic = SemanticClassifier::new(
        embedding_provider(&registry),
        config.embeddings.timeout(),
        cls.semantic_top_k,
    );
    let llm = LlmClassifier::new(
        llm_provider(&registry),
        Some(semantic),
        LlmSettings {
            timeout: config.llm.timeout(),
            max_taxonomy_paths: config.llm.max_taxonomy_paths,
            excerpt_chars: config.llm.excerpt_chars,
        },
    );

    let hitl = build_hitl(config, pool, catalog.clone());
    Ok(ClassificationOrchestrator::new(
        catalog,
        rules,
        llm,
        hitl,
        MappingStore::new(pool.clone()),
    )
    .with_validator(CrossValidator::new(cls.drift_ratio, cls.hitl_threshold))
    .with_fast_path_threshold(cls.fast_path_threshold)
    .with_max_concurrency(cls.max_concurrency))
}
