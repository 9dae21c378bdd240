//! HTTP-level tests for the provider clients against a mock server.

use text2sparql_llm::embed::OllamaEmbedder;
use text2sparql_llm::{
    CompletionRequest, Embedder, LlmConfig, LlmError, LlmProvider, UnifiedClient,
};
use std::time::Duration;

#[tokio::test]
async fn openai_completion_returns_message_content() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer test-key")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "choices": [{"message": {"role": "assistant", "content": "Paris"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 1}
            }"#,
        )
        .create_async()
        .await;

    let config = LlmConfig::openai("test-key", "gpt-4").with_base_url(&server.url());
    let client = UnifiedClient::from_config(config).unwrap();
    let response = client
        .complete(CompletionRequest::system_user("translate", "Paris").temperature(0.1))
        .await
        .unwrap();

    assert_eq!(response.content, "Paris");
    assert_eq!(response.usage.prompt_tokens, 12);
    mock.assert_async().await;
}

#[tokio::test]
async fn rate_limit_is_reported_with_retry_hint() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/chat/completions")
        .with_status(429)
        .with_header("retry-after", "2")
        .create_async()
        .await;

    let config = LlmConfig::openai("k", "gpt-4").with_base_url(&server.url());
    let client = UnifiedClient::from_config(config).unwrap();
    let err = client
        .complete(CompletionRequest::system_user("s", "u"))
        .await
        .unwrap_err();

    match err {
        LlmError::RateLimited { retry_after_ms } => assert_eq!(retry_after_ms, 2000),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn anthropic_completion_joins_text_blocks() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/messages")
        .match_header("x-api-key", "ak")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "content": [{"type": "text", "text": "SELECT "}, {"type": "text", "text": "?x"}],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 3, "output_tokens": 2}
            }"#,
        )
        .create_async()
        .await;

    let config = LlmConfig::anthropic("ak", "claude").with_base_url(&server.url());
    let client = UnifiedClient::from_config(config).unwrap();
    let response = client
        .complete(CompletionRequest::system_user("s", "u"))
        .await
        .unwrap();
    assert_eq!(response.content, "SELECT ?x");
}

#[tokio::test]
async fn ollama_embedder_falls_back_to_per_item_endpoint() {
    let mut server = mockito::Server::new_async().await;
    let _batched = server
        .mock("POST", "/api/embed")
        .with_status(404)
        .create_async()
        .await;
    let per_item = server
        .mock("POST", "/api/embeddings")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"embedding": [0.5, 0.25]}"#)
        .expect(2)
        .create_async()
        .await;

    let embedder = OllamaEmbedder::new(&server.url(), "all-minilm", Duration::from_secs(5)).unwrap();
    let vectors = embedder
        .embed(&["a".to_string(), "b".to_string()])
        .await
        .unwrap();

    assert_eq!(vectors.len(), 2);
    approx::assert_relative_eq!(vectors[1][0], 0.5);
    per_item.assert_async().await;
}
