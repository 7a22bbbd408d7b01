//! HTTP client for OpenAI-compatible chat completions.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use tracing::debug;

use crate::config::UpstreamConfig;
use crate::upstream::sse::{SseDecoder, DONE_SENTINEL};
use crate::upstream::{
    ChatBackend, ChatChunk, ChunkStream, Completion, CompletionRequest, UpstreamError,
};

/// Client bound to one API key and base URL.
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    completions_url: String,
    request_timeout: Duration,
}

impl OpenAiClient {
    pub fn new(api_key: String, config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| UpstreamError::Init(e.to_string()))?;

        Ok(Self {
            http,
            api_key,
            completions_url: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }

    async fn post(&self, request: &CompletionRequest) -> Result<reqwest::Response, UpstreamError> {
        let mut builder = self
            .http
            .post(&self.completions_url)
            .bearer_auth(&self.api_key)
            .json(request);

        // Streams stay open as long as the model keeps talking.
        if !request.stream {
            builder = builder.timeout(self.request_timeout);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status.as_u16(), &body));
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatBackend for OpenAiClient {
    async fn complete(&self, mut request: CompletionRequest) -> Result<Completion, UpstreamError> {
        request.stream = false;
        let response = self.post(&request).await?;
        let body = response.text().await?;
        parse_completion(&body)
    }

    async fn complete_stream(
        &self,
        mut request: CompletionRequest,
    ) -> Result<ChunkStream, UpstreamError> {
        request.stream = true;
        let response = self.post(&request).await?;
        debug!(url = %self.completions_url, "Upstream stream opened");
        Ok(chunk_stream(Box::pin(response.bytes_stream())))
    }
}

// ─── Wire Types ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CompletionBody {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkBody {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
}

// ─── Decoding ──────────────────────────────────────────────────────────────

/// Prefer the provider's `error.message`, else the raw body.
fn api_error(status: u16, body: &str) -> UpstreamError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|env| env.error.message)
        .ok()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.trim().to_string());
    UpstreamError::Api { status, message }
}

fn parse_completion(body: &str) -> Result<Completion, UpstreamError> {
    let parsed: CompletionBody =
        serde_json::from_str(body).map_err(|e| UpstreamError::Decode(e.to_string()))?;
    let choice = parsed.choices.into_iter().next().ok_or(UpstreamError::NoChoices)?;
    Ok(Completion {
        content: choice.message.content.unwrap_or_default(),
    })
}

/// Decode one `data:` payload. Errors reported in-band end the stream.
fn parse_chunk(data: &str) -> Result<ChatChunk, UpstreamError> {
    let body: ChunkBody =
        serde_json::from_str(data).map_err(|e| UpstreamError::Decode(e.to_string()))?;

    if let Some(err) = body.error {
        return Err(UpstreamError::Stream(err.message));
    }

    let Some(choice) = body.choices.into_iter().next() else {
        return Ok(ChatChunk::default());
    };
    Ok(ChatChunk {
        content: choice.delta.content.unwrap_or_default(),
        tool_calls: choice.delta.tool_calls.unwrap_or_default(),
    })
}

struct DecodeState<S> {
    body: S,
    decoder: SseDecoder,
    pending: std::collections::VecDeque<String>,
    failed: Option<UpstreamError>,
    finished: bool,
}

/// Turn the raw response body into a stream of chunks, ending at `[DONE]`,
/// at the first error, or when the body closes.
fn chunk_stream<S, B>(body: S) -> ChunkStream
where
    S: futures::Stream<Item = Result<B, reqwest::Error>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = DecodeState {
        body,
        decoder: SseDecoder::new(),
        pending: Default::default(),
        failed: None,
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if st.finished {
                return None;
            }

            if let Some(data) = st.pending.pop_front() {
                if data == DONE_SENTINEL {
                    st.finished = true;
                    return None;
                }
                let item = parse_chunk(&data);
                if item.is_err() {
                    st.finished = true;
                }
                return Some((item, st));
            }

            // Frames decoded ahead of a decoder failure are delivered first.
            if let Some(e) = st.failed.take() {
                st.finished = true;
                return Some((Err(e), st));
            }

            match st.body.next().await {
                Some(Ok(bytes)) => {
                    if let Err(e) = st.decoder.push(bytes.as_ref(), &mut st.pending) {
                        st.failed = Some(e);
                    }
                }
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(UpstreamError::from(e)), st));
                }
                None => match st.decoder.finish() {
                    Some(tail) => {
                        st.pending.push_back(tail);
                        // Nothing more will arrive; mark the body exhausted.
                        st.pending.push_back(DONE_SENTINEL.to_string());
                    }
                    None => return None,
                },
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::sse::MAX_FRAME_BYTES;

    fn part(s: &'static str) -> Result<&'static [u8], reqwest::Error> {
        Ok(s.as_bytes())
    }

    #[test]
    fn test_parse_completion_first_choice() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"hi"}},{"message":{"content":"other"}}]}"#;
        assert_eq!(parse_completion(body).unwrap().content, "hi");
    }

    #[test]
    fn test_parse_completion_no_choices() {
        assert_eq!(
            parse_completion(r#"{"choices":[]}"#).unwrap_err(),
            UpstreamError::NoChoices
        );
    }

    #[test]
    fn test_api_error_prefers_provider_message() {
        let err = api_error(401, r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#);
        assert_eq!(err.to_string(), "401: Incorrect API key provided");

        let err = api_error(502, "bad gateway\n");
        assert_eq!(err.to_string(), "502: bad gateway");
    }

    #[test]
    fn test_parse_chunk_content_and_tools() {
        let chunk = parse_chunk(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#).unwrap();
        assert_eq!(chunk.content, "Hel");
        assert!(chunk.tool_calls.is_empty());

        let chunk = parse_chunk(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"lookup","arguments":""}}]}}]}"#,
        )
        .unwrap();
        assert_eq!(chunk.content, "");
        assert_eq!(chunk.tool_calls.len(), 1);
        assert_eq!(chunk.tool_calls[0]["id"], "call_1");
    }

    #[test]
    fn test_parse_chunk_in_band_error() {
        let err = parse_chunk(r#"{"error":{"message":"overloaded"}}"#).unwrap_err();
        assert_eq!(err, UpstreamError::Stream("overloaded".to_string()));
    }

    #[tokio::test]
    async fn test_chunk_stream_stops_at_done() {
        let parts = vec![
            part("data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\ndata: {\"choi"),
            part("ces\":[{\"delta\":{\"content\":\"b\"}}]}\n\ndata: [DONE]\n\n"),
            part("data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n"),
        ];
        let chunks: Vec<_> = chunk_stream(stream::iter(parts)).collect().await;
        let texts: Vec<_> = chunks.into_iter().map(|c| c.unwrap().content).collect();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_chunk_stream_ends_after_decode_error() {
        let parts = vec![part("data: not-json\n\ndata: {\"choices\":[]}\n\n")];
        let chunks: Vec<_> = chunk_stream(stream::iter(parts)).collect().await;
        assert_eq!(chunks.len(), 1);
        assert!(matches!(chunks[0], Err(UpstreamError::Decode(_))));
    }

    #[tokio::test]
    async fn test_chunk_stream_oversized_frame_ends_stream() {
        let mut body = String::from("data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\ndata: ");
        body.push_str(&"z".repeat(MAX_FRAME_BYTES + 1));
        let body: &'static str = Box::leak(body.into_boxed_str());

        let chunks: Vec<_> = chunk_stream(stream::iter(vec![part(body)])).collect().await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].as_ref().unwrap().content, "a");
        assert!(matches!(chunks[1], Err(UpstreamError::Decode(_))));
    }

    #[tokio::test]
    async fn test_chunk_stream_without_done_marker() {
        let parts = vec![part("data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}")];
        let chunks: Vec<_> = chunk_stream(stream::iter(parts)).collect().await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap().content, "x");
    }
}
