//! Mock HTTP server tests for `OpenAiCompatProvider::complete()`.
//!
//! A local wiremock server emulates an OpenAI-compatible endpoint so the full
//! request/response path runs without a real API.

use std::collections::HashMap;

use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mathweave_llm::config::LlmProviderConfig;
use mathweave_llm::error::ProviderError;
use mathweave_llm::openai_compat::OpenAiCompatProvider;
use mathweave_llm::provider::Provider;
use mathweave_llm::retry::is_retryable;
use mathweave_llm::types::{ChatMessage, ChatRequest};

fn mock_config(server_url: &str) -> LlmProviderConfig {
    LlmProviderConfig {
        name: "mock-provider".into(),
        base_url: server_url.into(),
        api_key_env: "MATHWEAVE_MOCK_UNUSED_KEY".into(),
        api_key_optional: false,
        model_prefix: None,
        default_model: Some("test-model".into()),
        headers: HashMap::new(),
        timeout_secs: Some(5),
    }
}

fn test_request() -> ChatRequest {
    ChatRequest::new(
        "test-model",
        vec![
            ChatMessage::system("Reply with JSON."),
            ChatMessage::user("Solve 2x + 3 = 7"),
        ],
    )
    .json_mode()
}

fn completion_body(content: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-001",
        "object": "chat.completion",
        "model": "test-model",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 12, "completion_tokens": 9, "total_tokens": 21}
    })
}

// ── Success ────────────────────────────────────────────────────────────

#[tokio::test]
async fn complete_success_sends_json_mode_and_auth() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer gsk-mock"))
        .and(body_partial_json(serde_json::json!({
            "model": "test-model",
            "response_format": {"type": "json_object"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(r#"{"answer":"x = 2"}"#)))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiCompatProvider::with_api_key(mock_config(&server.uri()), "gsk-mock".into());
    let response = provider.complete(&test_request()).await.unwrap();

    assert_eq!(response.id, "chatcmpl-001");
    assert_eq!(response.first_content(), Some(r#"{"answer":"x = 2"}"#));
    assert_eq!(response.usage.unwrap().total_tokens, 21);
}

#[tokio::test]
async fn custom_headers_are_forwarded() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("x-team", "math"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("ok")))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = mock_config(&server.uri());
    config.headers.insert("x-team".into(), "math".into());
    let provider = OpenAiCompatProvider::with_api_key(config, "k".into());
    provider.complete(&test_request()).await.unwrap();
}

#[tokio::test]
async fn anonymous_provider_omits_authorization() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("ok")))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = mock_config(&server.uri());
    config.api_key_optional = true;
    let provider = OpenAiCompatProvider::new(config);
    provider.complete(&test_request()).await.unwrap();

    let received = server.received_requests().await.unwrap();
    assert!(received[0].headers.get("authorization").is_none());
}

// ── Errors ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn unauthorized_maps_to_auth_failed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&server)
        .await;

    let provider = OpenAiCompatProvider::with_api_key(mock_config(&server.uri()), "bad".into());
    let err = provider.complete(&test_request()).await.unwrap_err();
    assert!(matches!(err, ProviderError::AuthFailed(ref body) if body.contains("invalid api key")));
    assert!(!is_retryable(&err));
}

#[tokio::test]
async fn rate_limit_reads_retry_after_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "2")
                .set_body_string(r#"{"error":{"message":"slow down"}}"#),
        )
        .mount(&server)
        .await;

    let provider = OpenAiCompatProvider::with_api_key(mock_config(&server.uri()), "k".into());
    let err = provider.complete(&test_request()).await.unwrap_err();
    assert!(matches!(err, ProviderError::RateLimited { retry_after_ms: 2000 }));
    assert!(is_retryable(&err));
}

#[tokio::test]
async fn rate_limit_reads_retry_after_from_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string(r#"{"retry_after_ms": 750}"#))
        .mount(&server)
        .await;

    let provider = OpenAiCompatProvider::with_api_key(mock_config(&server.uri()), "k".into());
    let err = provider.complete(&test_request()).await.unwrap_err();
    assert!(matches!(err, ProviderError::RateLimited { retry_after_ms: 750 }));
}

#[tokio::test]
async fn exhausted_quota_is_not_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string(
            r#"{"error":{"message":"You exceeded your current quota","type":"insufficient_quota"}}"#,
        ))
        .mount(&server)
        .await;

    let provider = OpenAiCompatProvider::with_api_key(mock_config(&server.uri()), "k".into());
    let err = provider.complete(&test_request()).await.unwrap_err();
    assert!(matches!(err, ProviderError::RequestFailed(ref m) if m.contains("quota")));
    assert!(!is_retryable(&err));
}

#[tokio::test]
async fn not_found_maps_to_model_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such model"))
        .mount(&server)
        .await;

    let provider = OpenAiCompatProvider::with_api_key(mock_config(&server.uri()), "k".into());
    let err = provider.complete(&test_request()).await.unwrap_err();
    assert!(matches!(err, ProviderError::ModelNotFound(ref m) if m.contains("test-model")));
}

#[tokio::test]
async fn server_error_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let provider = OpenAiCompatProvider::with_api_key(mock_config(&server.uri()), "k".into());
    let err = provider.complete(&test_request()).await.unwrap_err();
    assert!(matches!(err, ProviderError::RequestFailed(ref m) if m.starts_with("HTTP 503")));
    assert!(is_retryable(&err));
}

#[tokio::test]
async fn malformed_body_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
        .mount(&server)
        .await;

    let provider = OpenAiCompatProvider::with_api_key(mock_config(&server.uri()), "k".into());
    let err = provider.complete(&test_request()).await.unwrap_err();
    assert!(matches!(err, ProviderError::InvalidResponse(_)));
}

#[tokio::test]
async fn missing_key_fails_before_sending() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("ok")))
        .expect(0)
        .mount(&server)
        .await;

    let provider = OpenAiCompatProvider::new(mock_config(&server.uri()));
    let err = provider.complete(&test_request()).await.unwrap_err();
    assert!(matches!(err, ProviderError::NotConfigured(_)));
}
