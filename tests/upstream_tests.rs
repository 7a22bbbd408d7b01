//! Integration tests for the OpenAI-compatible client against a mock server.

use futures::StreamExt;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chat_relay::config::UpstreamConfig;
use chat_relay::upstream::openai::OpenAiClient;
use chat_relay::upstream::{ChatBackend, ChatChunk, CompletionRequest, Message, UpstreamError};

fn client_for(server: &MockServer) -> OpenAiClient {
    let config = UpstreamConfig {
        base_url: format!("{}/v1/", server.uri()),
        ..UpstreamConfig::default()
    };
    OpenAiClient::new("test-api-key".to_string(), &config).unwrap()
}

fn request(model: &str) -> CompletionRequest {
    CompletionRequest {
        model: model.to_string(),
        messages: vec![Message::system("be nice"), Message::user("Hi")],
        stream: false,
    }
}

fn sse_body(frames: &[serde_json::Value]) -> String {
    let mut body = String::new();
    for frame in frames {
        body.push_str(&format!("data: {frame}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

async fn collect(client: &OpenAiClient, model: &str) -> Vec<Result<ChatChunk, UpstreamError>> {
    let stream = client.complete_stream(request(model)).await.unwrap();
    stream.collect().await
}

#[tokio::test]
async fn test_complete_sends_exchange_and_returns_first_choice() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-api-key"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "messages": [
                {"role": "system", "content": "be nice"},
                {"role": "user", "content": "Hi"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hello!"},
                "finish_reason": "stop"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let completion = client_for(&server).complete(request("gpt-4o-mini")).await.unwrap();
    assert_eq!(completion.content, "Hello!");
}

#[tokio::test]
async fn test_complete_surfaces_provider_error_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {
                "message": "Incorrect API key provided",
                "type": "invalid_request_error"
            }
        })))
        .mount(&server)
        .await;

    let err = client_for(&server).complete(request("m")).await.unwrap_err();
    assert_eq!(
        err,
        UpstreamError::Api {
            status: 401,
            message: "Incorrect API key provided".to_string()
        }
    );
}

#[tokio::test]
async fn test_complete_with_no_choices() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let err = client_for(&server).complete(request("m")).await.unwrap_err();
    assert_eq!(err, UpstreamError::NoChoices);
}

#[tokio::test]
async fn test_stream_yields_text_and_tool_fragments() {
    let server = MockServer::start().await;
    let body = sse_body(&[
        json!({"choices": [{"index": 0, "delta": {"role": "assistant", "content": ""}}]}),
        json!({"choices": [{"index": 0, "delta": {"content": "Hel"}}]}),
        json!({"choices": [{"index": 0, "delta": {"content": "lo"}}]}),
        json!({"choices": [{"index": 0, "delta": {"tool_calls": [
            {"index": 0, "id": "call_1", "type": "function",
             "function": {"name": "lookup", "arguments": "{\"q\":"}}
        ]}}]}),
        json!({"choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]}),
    ]);

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"stream": true, "model": "gpt-4o"})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .expect(1)
        .mount(&server)
        .await;

    let chunks: Vec<ChatChunk> = collect(&client_for(&server), "gpt-4o")
        .await
        .into_iter()
        .map(|c| c.unwrap())
        .collect();

    assert_eq!(chunks.len(), 5);
    let text: String = chunks.iter().map(|c| c.content.as_str()).collect();
    assert_eq!(text, "Hello");
    assert_eq!(chunks[3].tool_calls.len(), 1);
    assert_eq!(chunks[3].tool_calls[0]["function"]["name"], "lookup");
}

#[tokio::test]
async fn test_stream_in_band_error_ends_stream() {
    let server = MockServer::start().await;
    let body = format!(
        "data: {}\n\ndata: {}\n\ndata: {}\n\n",
        json!({"choices": [{"delta": {"content": "par"}}]}),
        json!({"error": {"message": "The server had an error while processing your request."}}),
        json!({"choices": [{"delta": {"content": "never"}}]}),
    );
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let chunks = collect(&client_for(&server), "m").await;
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].as_ref().unwrap().content, "par");
    assert_eq!(
        chunks[1].as_ref().unwrap_err().to_string(),
        "The server had an error while processing your request."
    );
}

#[tokio::test]
async fn test_stream_open_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"message": "Rate limit reached"}
        })))
        .mount(&server)
        .await;

    let result = client_for(&server).complete_stream(request("m")).await;
    match result {
        Err(err) => assert_eq!(err.to_string(), "429: Rate limit reached"),
        Ok(_) => panic!("expected the stream to fail to open"),
    }
}
