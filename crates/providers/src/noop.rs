use crate::{EmbedResponse, EmbeddingProvider, LlmProvider, ProviderError};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct NoopProvider;

#[async_trait::async_trait]
impl EmbeddingProvider for NoopProvider {
    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError> {
        Ok(EmbedResponse {
            vectors: vec![vec![]; texts.len()],
        })
    }
}

#[async_trait::async_trait]
impl LlmProvider for NoopProvider {
    async fn generate(&self, _prompt: &str, _timeout: Duration) -> Result<String, ProviderError> {
        Err(ProviderError::NotImplemented)
    }
}
