//! Stage 1: pattern and keyword matching against an immutable [`RuleSet`].
//!
//! Sensitivity patterns are checked first and always win; keyword groups are scored by how
//! many distinct terms they hit. No match is a normal outcome and returns `None`.

use crate::models::ClassificationMethod;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("failed to read rules file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid rules file {path}: {message}")]
    Parse { path: String, message: String },
    #[error("rule {rule}: invalid pattern {pattern:?}: {source}")]
    Pattern {
        rule: String,
        pattern: String,
        source: regex::Error,
    },
    #[error("rule {0}: path must not be empty")]
    EmptyPath(String),
    #[error("rule {0}: blank term or pattern")]
    BlankTerm(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Pattern {
    /// Case-insensitive regular expression.
    Regex { pattern: String },
    /// Literal phrase matched on word boundaries, case-insensitive.
    Phrase { phrase: String },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SensitivityRule {
    pub name: String,
    pub path: Vec<String>,
    pub patterns: Vec<Pattern>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeywordGroup {
    pub name: String,
    pub path: Vec<String>,
    pub terms: Vec<String>,
    #[serde(default = "default_min_matches")]
    pub min_matches: usize,
}

fn default_min_matches() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleSet {
    #[serde(default = "default_sensitivity_confidence")]
    pub sensitivity_confidence: f64,
    #[serde(default = "default_keyword_base")]
    pub keyword_base_confidence: f64,
    #[serde(default = "default_keyword_step")]
    pub keyword_step: f64,
    #[serde(default = "default_keyword_max")]
    pub keyword_max_confidence: f64,
    #[serde(default)]
    pub sensitivity: Vec<SensitivityRule>,
    #[serde(default)]
    pub keywords: Vec<KeywordGroup>,
}

fn default_sensitivity_confidence() -> f64 {
    0.95
}
fn default_keyword_base() -> f64 {
    0.80
}
fn default_keyword_step() -> f64 {
    0.05
}
fn default_keyword_max() -> f64 {
    0.90
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl RuleSet {
    pub fn empty() -> Self {
        Self {
            sensitivity_confidence: default_sensitivity_confidence(),
            keyword_base_confidence: default_keyword_base(),
            keyword_step: default_keyword_step(),
            keyword_max_confidence: default_keyword_max(),
            sensitivity: Vec::new(),
            keywords: Vec::new(),
        }
    }

    /// Rule tables shipped with the binary, used when no rules file is configured.
    pub fn builtin() -> Self {
        let phrase = |p: &str| Pattern::Phrase {
            phrase: p.to_string(),
        };
        let group = |name: &str, path: &[&str], terms: &[&str]| KeywordGroup {
            name: name.to_string(),
            path: strings(path),
            terms: strings(terms),
            min_matches: 1,
        };
        Self {
            sensitivity: vec![SensitivityRule {
                name: "confidentiality-marker".into(),
                path: strings(&["Compliance", "Sensitive", "Confidential"]),
                patterns: vec![
                    phrase("strictly confidential"),
                    phrase("confidential"),
                    phrase("internal use only"),
                    phrase("do not distribute"),
                    phrase("attorney-client privileged"),
                    Pattern::Regex {
                        pattern: r"\brestricted\s*(?:access|distribution|data)\b".into(),
                    },
                ],
            }],
            keywords: vec![
                group(
                    "finance-reports",
                    &["Finance", "Reports"],
                    &["revenue", "balance sheet", "quarterly earnings", "ebitda", "cash flow"],
                ),
                group(
                    "legal-contracts",
                    &["Legal", "Contracts"],
                    &["agreement", "indemnification", "liability", "termination clause", "governing law"],
                ),
                group(
                    "hr-policies",
                    &["HR", "Policies"],
                    &["employee handbook", "leave policy", "benefits", "onboarding", "code of conduct"],
                ),
                group(
                    "engineering-architecture",
                    &["Engineering", "Architecture"],
                    &["microservice", "api gateway", "deployment", "latency", "database schema"],
                ),
            ],
            ..Self::empty()
        }
    }

    pub fn from_toml_str(content: &str, origin: &str) -> Result<Self, RuleError> {
        toml::from_str(content).map_err(|e| RuleError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })
    }
}

/// Load a rule set from `path`, or the built-in tables when no path is given.
pub fn load_rules(path: Option<&Path>) -> Result<RuleSet, RuleError> {
    let Some(path) = path else {
        return Ok(RuleSet::builtin());
    };
    let content = fs::read_to_string(path).map_err(|source| RuleError::Io {
        path: path.display().to_string(),
        source,
    })?;
    RuleSet::from_toml_str(&content, &path.display().to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleMatch {
    pub path: Vec<String>,
    pub confidence: f64,
    pub method: ClassificationMethod,
    pub rule: String,
    pub matched_terms: Vec<String>,
}

struct CompiledSensitivity {
    name: String,
    path: Vec<String>,
    patterns: Vec<Regex>,
}

struct CompiledGroup {
    name: String,
    path: Vec<String>,
    min_matches: usize,
    terms: Vec<(String, Regex)>,
}

pub struct RuleMatcher {
    rules: Arc<RuleSet>,
    sensitivity: Vec<CompiledSensitivity>,
    groups: Vec<CompiledGroup>,
}

/// Build a case-insensitive regex for a literal phrase. Word boundaries are only
/// asserted at edges that are word characters, so terms like "p&l" still match.
fn phrase_regex(phrase: &str) -> Result<Regex, regex::Error> {
    let trimmed = phrase.trim();
    let is_word = |c: Option<char>| c.map(|c| c.is_alphanumeric() || c == '_').unwrap_or(false);
    let mut pattern = String::new();
    if is_word(trimmed.chars().next()) {
        pattern.push_str(r"\b");
    }
    pattern.push_str(&regex::escape(trimmed).replace(' ', r"\s+"));
    if is_word(trimmed.chars().last()) {
        pattern.push_str(r"\b");
    }
    RegexBuilder::new(&pattern).case_insensitive(true).build()
}

impl RuleMatcher {
    pub fn new(rules: Arc<RuleSet>) -> Result<Self, RuleError> {
        let mut sensitivity = Vec::with_capacity(rules.sensitivity.len());
        for rule in &rules.sensitivity {
            if rule.path.is_empty() {
                return Err(RuleError::EmptyPath(rule.name.clone()));
            }
            let mut patterns = Vec::with_capacity(rule.patterns.len());
            for p in &rule.patterns {
                let raw = match p {
                    Pattern::Regex { pattern } => pattern,
                    Pattern::Phrase { phrase } => phrase,
                };
                // An empty pattern matches every text.
                if raw.trim().is_empty() {
                    return Err(RuleError::BlankTerm(rule.name.clone()));
                }
                let (raw, compiled) = match p {
                    Pattern::Regex { pattern } => (
                        pattern,
                        RegexBuilder::new(pattern).case_insensitive(true).build(),
                    ),
                    Pattern::Phrase { phrase } => (phrase, phrase_regex(phrase)),
                };
                patterns.push(compiled.map_err(|source| RuleError::Pattern {
                    rule: rule.name.clone(),
                    pattern: raw.clone(),
                    source,
                })?);
            }
            sensitivity.push(CompiledSensitivity {
                name: rule.name.clone(),
                path: rule.path.clone(),
                patterns,
            });
        }

        let mut groups = Vec::with_capacity(rules.keywords.len());
        for group in &rules.keywords {
            if group.path.is_empty() {
                return Err(RuleError::EmptyPath(group.name.clone()));
            }
            let mut terms = Vec::with_capacity(group.terms.len());
            for term in &group.terms {
                if term.trim().is_empty() {
                    return Err(RuleError::BlankTerm(group.name.clone()));
                }
                let re = phrase_regex(term).map_err(|source| RuleError::Pattern {
                    rule: group.name.clone(),
                    pattern: term.clone(),
                    source,
                })?;
                terms.push((term.to_lowercase(), re));
            }
            groups.push(CompiledGroup {
                name: group.name.clone(),
                path: group.path.clone(),
                min_matches: group.min_matches.max(1),
                terms,
            });
        }

        Ok(Self {
            rules,
            sensitivity,
            groups,
        })
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    fn keyword_confidence(&self, distinct: usize) -> f64 {
        let rules = &self.rules;
        let raw = rules.keyword_base_confidence
            + rules.keyword_step * distinct.saturating_sub(1) as f64;
        raw.min(rules.keyword_max_confidence)
            .max(rules.keyword_base_confidence)
            .clamp(0.0, 1.0)
    }

    /// First match wins: sensitivity rules, then the strongest keyword group.
    pub fn match_text(&self, text: &str) -> Option<RuleMatch> {
        for rule in &self.sensitivity {
            if let Some(m) = rule.patterns.iter().find_map(|re| re.find(text)) {
                debug!(rule = %rule.name, "sensitivity rule matched");
                return Some(RuleMatch {
                    path: rule.path.clone(),
                    confidence: self.rules.sensitivity_confidence.clamp(0.0, 1.0),
                    method: ClassificationMethod::SensitivityRule,
                    rule: rule.name.clone(),
                    matched_terms: vec![m.as_str().to_lowercase()],
                });
            }
        }

        let mut best: Option<(&CompiledGroup, Vec<String>)> = None;
        for group in &self.groups {
            let mut hits: Vec<String> = group
                .terms
                .iter()
                .filter(|(_, re)| re.is_match(text))
                .map(|(term, _)| term.clone())
                .collect();
            hits.sort();
            hits.dedup();
            if hits.len() < group.min_matches {
                continue;
            }
            let better = match &best {
                Some((_, current)) => hits.len() > current.len(),
                None => true,
            };
            if better {
                best = Some((group, hits));
            }
        }

        best.map(|(group, hits)| {
            debug!(group = %group.name, hits = hits.len(), "keyword group matched");
            RuleMatch {
                path: group.path.clone(),
                confidence: self.keyword_confidence(hits.len()),
                method: ClassificationMethod::KeywordRule,
                rule: group.name.clone(),
                matched_terms: hits,
            }
        })
    }
}
