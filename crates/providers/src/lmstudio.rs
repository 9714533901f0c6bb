//! LM Studio local server. Speaks the OpenAI wire format without auth.

use crate::openai::{embedding_vectors, system_prompt, ChatApiResponse, ChatMessage, ChatRequest};
use crate::{EmbedResponse, EmbeddingProvider, LlmProvider, ProviderError};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Clone)]
pub struct LmStudioConfig {
    pub base_url: String,
    pub embedding_model: String,
    pub chat_model: String,
}

#[derive(Clone)]
pub struct LmStudioProvider {
    client: Client,
    cfg: Arc<LmStudioConfig>,
}

impl LmStudioProvider {
    pub fn new(cfg: LmStudioConfig) -> Self {
        Self {
            client: Client::new(),
            cfg: Arc::new(cfg),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.cfg.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for LmStudioProvider {
    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError> {
        let body = serde_json::json!({
            "model": self.cfg.embedding_model,
            "input": texts,
        });
        let resp = self
            .client
            .post(self.url("/v1/embeddings"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, None))?;
        if !resp.status().is_success() {
            return Err(ProviderError::RequestFailed(format!(
                "lmstudio embeddings status {}",
                resp.status()
            )));
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        embedding_vectors(body)
    }
}

#[async_trait::async_trait]
impl LlmProvider for LmStudioProvider {
    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<String, ProviderError> {
        let body = ChatRequest {
            model: &self.cfg.chat_model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt(),
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.0,
        };
        debug!(model = %self.cfg.chat_model, "lmstudio chat request");
        let resp = self
            .client
            .post(self.url("/v1/chat/completions"))
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, Some(timeout)))?;
        if !resp.status().is_success() {
            return Err(ProviderError::RequestFailed(format!(
                "lmstudio chat status {}",
                resp.status()
            )));
        }
        let parsed: ChatApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, Some(timeout)))?;
        parsed.into_content()
    }
}
