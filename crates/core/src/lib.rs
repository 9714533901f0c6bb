//! Core library: taxonomy catalog, rule/LLM/semantic classifiers, cross validation,
//! review queue, and the orchestrator that ties them together.

pub mod config;
pub mod cross_validate;
pub mod embeddings;
pub mod hitl;
pub mod llm;
pub mod mapping;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod rules;
pub mod semantic;
pub mod taxonomy;
