use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub taxonomy: TaxonomyConfig,
    #[serde(default)]
    pub rules: RuleConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embeddings: EmbeddingConfig,
    #[serde(default)]
    pub classification: ClassificationConfig,
    #[serde(default)]
    pub hitl: HitlConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxonomySource {
    #[default]
    Sqlite,
    File,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaxonomyConfig {
    #[serde(default)]
    pub source: TaxonomySource,
    /// TOML node file, required when `source = "file"`.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleConfig {
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub timeout_ms: u64,
    pub max_taxonomy_paths: usize,
    pub excerpt_chars: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "noop".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_ms: 10_000,
            max_taxonomy_paths: 20,
            excerpt_chars: 500,
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "noop".to_string(),
            model: "text-embedding-3-small".to_string(),
            timeout_ms: 5_000,
        }
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    /// Stage 1 confidence at or above which the LLM is never called.
    pub fast_path_threshold: f64,
    pub hitl_threshold: f64,
    pub drift_ratio: f64,
    pub semantic_top_k: usize,
    pub max_concurrency: usize,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            fast_path_threshold: 0.90,
            hitl_threshold: 0.70,
            drift_ratio: 0.5,
            semantic_top_k: 3,
            max_concurrency: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HitlConfig {
    pub recent_window: i64,
    pub readiness_min_interactions: i64,
    pub readiness_min_success_rate: f64,
    pub snippet_chars: usize,
}

impl Default for HitlConfig {
    fn default() -> Self {
        Self {
            recent_window: 100,
            readiness_min_interactions: 1000,
            readiness_min_success_rate: 0.70,
            snippet_chars: 500,
        }
    }
}

pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(
        config::Environment::with_prefix("DOCTAX")
            .prefix_separator("__")
            .separator("__"),
    );
    let cfg = settings.build()?;
    Ok(cfg.try_deserialize()?)
}
