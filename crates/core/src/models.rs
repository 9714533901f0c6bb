use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Label used whenever nothing better than a generic bucket is known.
pub const UNCATEGORIZED: &str = "Uncategorized";

pub fn uncategorized_path() -> Vec<String> {
    vec![UNCATEGORIZED.to_string()]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyNode {
    pub id: String,
    pub label: String,
    pub canonical_path: Vec<String>,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMethod {
    SensitivityRule,
    KeywordRule,
    Llm,
    LlmOnly,
    CrossValidated,
    LlmDisagreement,
    SemanticFallback,
    FallbackUncategorized,
}

impl ClassificationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationMethod::SensitivityRule => "sensitivity_rule",
            ClassificationMethod::KeywordRule => "keyword_rule",
            ClassificationMethod::Llm => "llm",
            ClassificationMethod::LlmOnly => "llm_only",
            ClassificationMethod::CrossValidated => "cross_validated",
            ClassificationMethod::LlmDisagreement => "llm_disagreement",
            ClassificationMethod::SemanticFallback => "semantic_fallback",
            ClassificationMethod::FallbackUncategorized => "fallback_uncategorized",
        }
    }

    /// Results produced by a fallback rather than by a classifier that answered.
    pub fn is_fallback(&self) -> bool {
        matches!(
            self,
            ClassificationMethod::SemanticFallback | ClassificationMethod::FallbackUncategorized
        )
    }
}

impl fmt::Display for ClassificationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub canonical_path: Vec<String>,
    pub confidence: f64,
    pub method: ClassificationMethod,
    #[serde(default)]
    pub candidates: Vec<Vec<String>>,
    #[serde(default)]
    pub reasoning: Vec<String>,
    pub hitl_required: bool,
    #[serde(default)]
    pub drift: bool,
}

impl ClassificationResult {
    /// Result for empty input: nothing was classified.
    pub fn empty_input() -> Self {
        Self {
            canonical_path: uncategorized_path(),
            confidence: 0.0,
            method: ClassificationMethod::FallbackUncategorized,
            candidates: Vec::new(),
            reasoning: Vec::new(),
            hitl_required: false,
            drift: false,
        }
    }
}

/// Keep every confidence inside `[0, 1]`; NaN collapses to zero.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Completed => "completed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(TaskStatus::Pending),
            "completed" => Some(TaskStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Normal => "normal",
            TaskPriority::High => "high",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "low" => Some(TaskPriority::Low),
            "normal" => Some(TaskPriority::Normal),
            "high" => Some(TaskPriority::High),
            _ => None,
        }
    }

    /// Drift and very low confidence jump the queue.
    pub fn for_result(result: &ClassificationResult) -> Self {
        if result.drift || result.confidence < 0.5 {
            TaskPriority::High
        } else {
            TaskPriority::Normal
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitlTask {
    pub task_id: String,
    pub chunk_id: String,
    pub taxonomy_version: String,
    pub node_id: String,
    pub text_snippet: String,
    pub suggested_path: Vec<String>,
    pub confidence: f64,
    pub alternatives: Vec<Vec<String>>,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub reviewer_id: Option<String>,
    pub reviewer_notes: Option<String>,
    pub approved_path: Option<Vec<String>>,
    pub final_confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocTaxonomyMapping {
    pub doc_id: String,
    pub node_id: String,
    pub version: String,
    pub path: Vec<String>,
    pub confidence: f64,
    pub hitl_required: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitlStats {
    pub pending: i64,
    pub completed: i64,
    /// Mean final confidence over the most recent completions; `None` before any.
    pub recent_mean_confidence: Option<f64>,
    pub success_rate: f64,
    pub interactions: i64,
    pub model_ready: bool,
}

pub(crate) fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(|| DateTime::<Utc>::from(std::time::UNIX_EPOCH))
}
