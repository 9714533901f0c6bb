use providers::lmstudio::{LmStudioConfig, LmStudioProvider};
use providers::openai::{OpenAiConfig, OpenAiProvider};
use providers::{EmbeddingProvider, LlmProvider, ProviderError};
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn openai(server: &MockServer) -> OpenAiProvider {
    OpenAiProvider::new(OpenAiConfig {
        api_key: "test-key".into(),
        base_url: server.uri(),
        embedding_model: "text-embedding-3-small".into(),
        chat_model: "gpt-4o-mini".into(),
    })
}

#[tokio::test]
async fn generate_returns_first_choice_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "{\"path\": [\"A\"]}"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let out = openai(&server)
        .generate("classify this", Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(out, "{\"path\": [\"A\"]}");
}

#[tokio::test]
async fn generate_maps_slow_server_to_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"choices": []}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let err = openai(&server)
        .generate("slow", Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Timeout(_)), "got {err:?}");
}

#[tokio::test]
async fn generate_rejects_empty_choices_and_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})))
        .mount(&server)
        .await;
    let err = openai(&server)
        .generate("x", Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::EmptyResponse));

    let failing = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&failing)
        .await;
    let err = openai(&failing)
        .generate("x", Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::RequestFailed(_)));
}

#[tokio::test]
async fn lmstudio_embeds_without_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{"embedding": [0.1, 0.2]}, {"embedding": [0.3, 0.4]}]
        })))
        .mount(&server)
        .await;

    let provider = LmStudioProvider::new(LmStudioConfig {
        base_url: format!("{}/", server.uri()),
        embedding_model: "nomic-embed".into(),
        chat_model: "local".into(),
    });
    let resp = provider
        .embed(&["a".to_string(), "b".to_string()])
        .await
        .unwrap();
    assert_eq!(resp.vectors, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
}
