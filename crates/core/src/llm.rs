//! Stage 2: structured-prompt LLM classification.
//!
//! The model's answer is an untrusted contract. [`parse_response`] accepts exactly one JSON
//! object with `path`, `candidates`, `reasoning` and `confidence`; anything else is a
//! malformed response and takes the same route as a transport failure: semantic
//! similarity first, then the `Uncategorized` bucket. [`LlmClassifier::classify`] never
//! returns an error.

use crate::models::{clamp_confidence, ClassificationMethod, TaxonomyNode};
use crate::semantic::{ScoredPath, SemanticClassifier};
use providers::{LlmProvider, ProviderError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const MAX_CANDIDATES: usize = 3;
pub const MIN_REASONING: usize = 2;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("llm call timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed llm response: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub timeout: Duration,
    pub max_taxonomy_paths: usize,
    pub excerpt_chars: usize,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_taxonomy_paths: 20,
            excerpt_chars: 500,
        }
    }
}

/// The four fields the model must return, nothing more.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmVerdict {
    pub path: Vec<String>,
    pub candidates: Vec<Vec<String>>,
    pub reasoning: Vec<String>,
    pub confidence: f64,
}

/// What Stage 2 hands to cross validation, whichever classifier produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LlmOutcome {
    pub path: Vec<String>,
    pub candidates: Vec<Vec<String>>,
    pub reasoning: Vec<String>,
    pub confidence: f64,
    pub method: ClassificationMethod,
}

impl From<LlmVerdict> for LlmOutcome {
    fn from(v: LlmVerdict) -> Self {
        Self {
            path: v.path,
            candidates: v.candidates,
            reasoning: v.reasoning,
            confidence: v.confidence,
            method: ClassificationMethod::Llm,
        }
    }
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3)
        .map(|w| w.to_lowercase())
}

/// Pick at most `limit` leaf paths to show the model: paths sharing words with the text
/// first, then shallower (broader) paths.
pub fn candidate_paths(text: &str, nodes: &[TaxonomyNode], limit: usize) -> Vec<Vec<String>> {
    let vocabulary: HashSet<String> = words(text).collect();
    let mut scored: Vec<(usize, &TaxonomyNode)> = nodes
        .iter()
        .map(|node| {
            let overlap = node
                .canonical_path
                .iter()
                .flat_map(|label| words(label))
                .filter(|w| vocabulary.contains(w))
                .count();
            (overlap, node)
        })
        .collect();
    scored.sort_by(|(a_score, a), (b_score, b)| {
        b_score
            .cmp(a_score)
            .then_with(|| a.canonical_path.len().cmp(&b.canonical_path.len()))
    });
    scored
        .into_iter()
        .take(limit)
        .map(|(_, node)| node.canonical_path.clone())
        .collect()
}

pub fn excerpt(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

pub fn build_prompt(text: &str, paths: &[Vec<String>], excerpt_chars: usize) -> String {
    let mut prompt = String::from(
        "Classify the document excerpt into exactly one path of the taxonomy below.\n\n\
         Taxonomy paths (labels from root to leaf, separated by \" > \"):\n",
    );
    for path in paths {
        prompt.push_str("- ");
        prompt.push_str(&path.join(" > "));
        prompt.push('\n');
    }
    prompt.push_str("\nDocument excerpt:\n\"\"\"\n");
    prompt.push_str(&excerpt(text, excerpt_chars));
    prompt.push_str("\n\"\"\"\n\n");
    prompt.push_str(
        "Respond with a single JSON object containing exactly these four fields and nothing else:\n\
         {\"path\": [\"Root\", \"...\", \"Leaf\"], \
         \"candidates\": [[\"alternative\", \"path\"]], \
         \"reasoning\": [\"short justification\", \"another justification\"], \
         \"confidence\": 0.0}\n\
         - path: the best matching taxonomy path as a list of labels\n\
         - candidates: up to 3 alternative paths\n\
         - reasoning: at least 2 short justification strings\n\
         - confidence: a number between 0 and 1\n",
    );
    prompt
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the opening fence line.
    match body.split_once('\n') {
        Some((tag, inner)) if !tag.trim_start().starts_with('{') => inner.trim(),
        _ => body.trim(),
    }
}

fn non_empty_labels(path: &[String]) -> bool {
    !path.is_empty() && path.iter().all(|label| !label.trim().is_empty())
}

/// Parse and validate a model answer. Any deviation from the expected shape is an error.
pub fn parse_response(raw: &str) -> Result<LlmVerdict, LlmError> {
    let body = strip_code_fence(raw);
    let verdict: LlmVerdict =
        serde_json::from_str(body).map_err(|e| LlmError::Malformed(e.to_string()))?;

    if !non_empty_labels(&verdict.path) {
        return Err(LlmError::Malformed("path must be a non-empty list of labels".into()));
    }
    if verdict.candidates.len() > MAX_CANDIDATES {
        return Err(LlmError::Malformed(format!(
            "expected at most {MAX_CANDIDATES} candidates, got {}",
            verdict.candidates.len()
        )));
    }
    if !verdict.candidates.iter().all(|c| non_empty_labels(c)) {
        return Err(LlmError::Malformed("candidate paths must be non-empty".into()));
    }
    if verdict.reasoning.len() < MIN_REASONING
        || verdict.reasoning.iter().any(|r| r.trim().is_empty())
    {
        return Err(LlmError::Malformed(format!(
            "expected at least {MIN_REASONING} non-empty reasoning strings"
        )));
    }
    if !verdict.confidence.is_finite() || !(0.0..=1.0).contains(&verdict.confidence) {
        return Err(LlmError::Malformed(format!(
            "confidence {} outside [0, 1]",
            verdict.confidence
        )));
    }
    Ok(verdict)
}

pub struct LlmClassifier {
    llm: Arc<dyn LlmProvider>,
    semantic: Option<SemanticClassifier>,
    settings: LlmSettings,
}

impl LlmClassifier {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        semantic: Option<SemanticClassifier>,
        settings: LlmSettings,
    ) -> Self {
        Self {
            llm,
            semantic,
            settings,
        }
    }

    /// One LLM round trip under the configured deadline, validated.
    pub async fn ask(&self, text: &str, nodes: &[TaxonomyNode]) -> Result<LlmVerdict, LlmError> {
        let paths = candidate_paths(text, nodes, self.settings.max_taxonomy_paths);
        let prompt = build_prompt(text, &paths, self.settings.excerpt_chars);
        let timeout = self.settings.timeout;
        let raw = tokio::time::timeout(timeout, self.llm.generate(&prompt, timeout))
            .await
            .map_err(|_| LlmError::Timeout(timeout))??;
        parse_response(&raw)
    }

    /// Classify with the full fallback chain. Never fails.
    pub async fn classify(&self, text: &str, nodes: &[TaxonomyNode]) -> LlmOutcome {
        match self.ask(text, nodes).await {
            Ok(verdict) => {
                debug!(confidence = verdict.confidence, "llm verdict accepted");
                verdict.into()
            }
            Err(err) => {
                warn!(error = %err, "llm classification failed; trying semantic fallback");
                self.fallback(text, nodes, &err).await
            }
        }
    }

    async fn fallback(&self, text: &str, nodes: &[TaxonomyNode], cause: &LlmError) -> LlmOutcome {
        let Some(semantic) = &self.semantic else {
            return uncategorized(format!("llm unavailable: {cause}"), "no semantic classifier configured".into());
        };
        match semantic.classify_text(text, nodes).await {
            Ok(ranked) => from_ranked(ranked, cause),
            Err(err) => {
                warn!(error = %err, "semantic fallback failed; using uncategorized");
                uncategorized(format!("llm unavailable: {cause}"), format!("semantic fallback failed: {err}"))
            }
        }
    }
}

fn uncategorized(first: String, second: String) -> LlmOutcome {
    let fallback = ScoredPath::uncategorized();
    LlmOutcome {
        path: fallback.path,
        candidates: Vec::new(),
        reasoning: vec![first, second],
        confidence: fallback.confidence,
        method: fallback.method,
    }
}

fn from_ranked(ranked: Vec<ScoredPath>, cause: &LlmError) -> LlmOutcome {
    let mut iter = ranked.into_iter();
    let Some(best) = iter.next() else {
        return uncategorized(format!("llm unavailable: {cause}"), "semantic fallback returned nothing".into());
    };
    if best.method == ClassificationMethod::FallbackUncategorized {
        return uncategorized(
            format!("llm unavailable: {cause}"),
            "no taxonomy embeddings available".into(),
        );
    }
    LlmOutcome {
        reasoning: vec![
            format!("llm unavailable: {cause}"),
            format!(
                "closest taxonomy node by embedding similarity ({:.3})",
                best.confidence
            ),
        ],
        path: best.path,
        candidates: iter.take(MAX_CANDIDATES).map(|s| s.path).collect(),
        confidence: clamp_confidence(best.confidence),
        method: ClassificationMethod::SemanticFallback,
    }
}
