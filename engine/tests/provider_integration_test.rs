//! Integration tests for the HTTP model providers
//!
//! These tests do NOT require a running model server; wiremock stands in
//! for Ollama and the OpenAI-compatible API.

mod common;

use common::*;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wiremock::{
    matchers::{body_partial_json, body_string_contains, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use parley_engine::agent::{Orchestrator, TurnStatus};
use parley_engine::config::OpenAIConfig;
use parley_engine::llm::ollama::OllamaProvider;
use parley_engine::llm::openai::OpenAIProvider;
use parley_engine::llm::{LLMError, LLMProvider, LLMResponse, Message, ToolSchema};
use parley_engine::prompts::PromptStore;
use parley_engine::thread::{Thread, ThreadSettings};

fn ollama_reply(message: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "model": "llama3.1:8b",
        "created_at": "2024-08-04T19:22:45.499127Z",
        "message": message,
        "done": true,
        "prompt_eval_count": 20,
        "eval_count": 4
    }))
}

fn weather_schema() -> ToolSchema {
    ToolSchema {
        name: "weather".to_string(),
        description: "Current weather for a city".to_string(),
        parameters: json!({ "type": "object", "properties": { "city": { "type": "string" } } }),
    }
}

#[tokio::test]
async fn test_ollama_native_tool_calls_and_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({ "model": "llama3.1:8b", "stream": false })))
        .and(body_string_contains("\"weather\""))
        .respond_with(ollama_reply(json!({
            "role": "assistant",
            "content": "",
            "tool_calls": [{ "function": { "name": "weather", "arguments": { "city": "Oslo" } } }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OllamaProvider::new(server.uri(), "llama3.1:8b");
    let generation = provider
        .generate(&[Message::user("Weather in Oslo?")], &[weather_schema()])
        .await
        .unwrap();

    assert_eq!(generation.usage.prompt_tokens, 20);
    assert_eq!(generation.usage.total_tokens, 24);
    match generation.response {
        LLMResponse::ToolCalls { calls } => {
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0].name, "weather");
            let args: serde_json::Value = serde_json::from_str(&calls[0].arguments).unwrap();
            assert_eq!(args["city"], "Oslo");
            assert!(!calls[0].id.is_empty());
        }
        other => panic!("expected tool calls, got {:?}", other),
    }
}

#[tokio::test]
async fn test_ollama_text_printed_tool_call_is_recovered() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ollama_reply(json!({
            "role": "assistant",
            "content": "```json\n{\"function\": \"weather\", \"arguments\": {\"city\": \"Oslo\"}}\n```"
        })))
        .mount(&server)
        .await;

    let provider = OllamaProvider::new(server.uri(), "llama3.1:8b");
    let generation = provider
        .generate(&[Message::user("Weather?")], &[weather_schema()])
        .await
        .unwrap();

    assert!(matches!(
        generation.response,
        LLMResponse::ToolCalls { ref calls } if calls[0].name == "weather"
    ));
}

#[tokio::test]
async fn test_ollama_server_error_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
        .mount(&server)
        .await;

    let provider = OllamaProvider::new(server.uri(), "llama3.1:8b");
    let err = provider
        .generate(&[Message::user("Hello")], &[])
        .await
        .unwrap_err();

    match err {
        LLMError::ProviderUnavailable(msg) => assert!(msg.contains("model not loaded")),
        other => panic!("expected ProviderUnavailable, got {:?}", other),
    }
}

#[tokio::test]
async fn test_ollama_connection_error() {
    // Nothing listens on port 9 on test machines
    let provider = OllamaProvider::new("http://127.0.0.1:9", "llama3.1:8b");
    let result = provider.generate(&[Message::user("Hello")], &[]).await;

    assert!(matches!(
        result,
        Err(LLMError::ProviderUnavailable(_)) | Err(LLMError::NetworkError(_))
    ));
}

#[tokio::test]
async fn test_full_turn_over_ollama() {
    let server = MockServer::start().await;

    // grading requests are the only ones offering the grade helper
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_string_contains("grade_documents"))
        .respond_with(ollama_reply(json!({
            "role": "assistant",
            "content": "",
            "tool_calls": [{ "function": { "name": "grade_documents", "arguments": { "binary_score": "yes" } } }]
        })))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ollama_reply(json!({
            "role": "assistant",
            "content": "",
            "tool_calls": [{ "function": { "name": "search_documents", "arguments": { "query": "default port" } } }]
        })))
        .up_to_n_times(1)
        .with_priority(2)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_string_contains("8080"))
        .respond_with(ollama_reply(json!({
            "role": "assistant",
            "content": "The default port is 8080 [DOCS]."
        })))
        .with_priority(3)
        .mount(&server)
        .await;

    let config = test_config();
    let catalog = catalog_with(&config, vec![]);
    let prompts = Arc::new(PromptStore::new(catalog.clone()));
    let engine = Orchestrator::new(
        Arc::new(OllamaProvider::new(server.uri(), "llama3.1:8b")),
        catalog,
        prompts,
        Arc::new(docs_index()),
        &config,
    );

    let mut thread = Thread::new("t1", ThreadSettings::default());
    let outcome = engine
        .run_turn(&mut thread, "What's the default port?", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, TurnStatus::Answered);
    assert_eq!(outcome.answer, "The default port is 8080 [DOCS].");
    assert_eq!(outcome.metadata.usage.total_tokens, 72);
    assert!(outcome.metadata.retrieval.unwrap().relevant);
}

#[tokio::test]
async fn test_openai_parses_tool_calls_and_usage() {
    let server = MockServer::start().await;
    std::env::set_var("PARLEY_TEST_OPENAI_KEY", "sk-test");

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({ "model": "gpt-4o-mini" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": { "name": "weather", "arguments": "{\"city\":\"Oslo\"}" }
                    }]
                }
            }],
            "usage": { "prompt_tokens": 30, "completion_tokens": 7, "total_tokens": 37 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAIProvider::new(OpenAIConfig {
        base_url: server.uri(),
        model: "gpt-4o-mini".to_string(),
        api_key_env: "PARLEY_TEST_OPENAI_KEY".to_string(),
    });
    let generation = provider
        .generate(&[Message::user("Weather in Oslo?")], &[weather_schema()])
        .await
        .unwrap();

    assert_eq!(generation.usage.total_tokens, 37);
    match generation.response {
        LLMResponse::ToolCalls { calls } => {
            assert_eq!(calls[0].id, "call_1");
            assert_eq!(calls[0].arguments, "{\"city\":\"Oslo\"}");
        }
        other => panic!("expected tool calls, got {:?}", other),
    }
}

#[tokio::test]
async fn test_openai_missing_key_fails_before_request() {
    let provider = OpenAIProvider::new(OpenAIConfig {
        base_url: "http://127.0.0.1:9".to_string(),
        model: "gpt-4o-mini".to_string(),
        api_key_env: "PARLEY_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
    });

    assert!(!provider.check_health().await);
    let err = provider.generate(&[Message::user("hi")], &[]).await.unwrap_err();
    assert!(matches!(err, LLMError::AuthenticationFailed(_)));
}
