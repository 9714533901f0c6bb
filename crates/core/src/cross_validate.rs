//! Stage 3: reconcile the rule and LLM opinions into one calibrated result.

use crate::llm::{LlmOutcome, MAX_CANDIDATES};
use crate::models::{clamp_confidence, ClassificationMethod, ClassificationResult};
use crate::rules::RuleMatch;
use tracing::debug;

const LLM_ONLY_FACTOR: f64 = 0.8;
const AGREEMENT_BOOST: f64 = 1.1;
const DISAGREEMENT_FACTOR: f64 = 0.7;

#[derive(Debug, Clone)]
pub struct CrossValidator {
    /// Fraction of the rule path that must be shared with the LLM path to avoid drift.
    drift_ratio: f64,
    hitl_threshold: f64,
}

impl Default for CrossValidator {
    fn default() -> Self {
        Self::new(0.5, 0.70)
    }
}

pub fn common_prefix_len(a: &[String], b: &[String]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

impl CrossValidator {
    pub fn new(drift_ratio: f64, hitl_threshold: f64) -> Self {
        Self {
            drift_ratio,
            hitl_threshold,
        }
    }

    pub fn hitl_threshold(&self) -> f64 {
        self.hitl_threshold
    }

    pub fn detects_drift(&self, rule_path: &[String], llm_path: &[String]) -> bool {
        (common_prefix_len(rule_path, llm_path) as f64) < rule_path.len() as f64 * self.drift_ratio
    }

    pub fn resolve(&self, rule: Option<&RuleMatch>, llm: &LlmOutcome) -> ClassificationResult {
        let (confidence, method, candidates, drift) = match rule {
            None => {
                let method = if llm.method.is_fallback() {
                    llm.method
                } else {
                    ClassificationMethod::LlmOnly
                };
                (
                    llm.confidence * LLM_ONLY_FACTOR,
                    method,
                    llm.candidates.clone(),
                    false,
                )
            }
            Some(rule) if rule.path == llm.path => (
                ((rule.confidence + llm.confidence) / 2.0 * AGREEMENT_BOOST).min(1.0),
                ClassificationMethod::CrossValidated,
                llm.candidates.clone(),
                false,
            ),
            Some(rule) => {
                let drift = self.detects_drift(&rule.path, &llm.path);
                let mut candidates = vec![rule.path.clone()];
                candidates.extend(
                    llm.candidates
                        .iter()
                        .filter(|c| **c != rule.path)
                        .cloned(),
                );
                candidates.truncate(MAX_CANDIDATES);
                debug!(rule = %rule.rule, drift, "rule and llm disagree");
                (
                    llm.confidence * DISAGREEMENT_FACTOR,
                    ClassificationMethod::LlmDisagreement,
                    candidates,
                    drift,
                )
            }
        };

        let confidence = clamp_confidence(confidence);
        ClassificationResult {
            canonical_path: llm.path.clone(),
            confidence,
            method,
            candidates,
            reasoning: llm.reasoning.clone(),
            hitl_required: confidence < self.hitl_threshold || drift,
            drift,
        }
    }
}
