//! SSE (Server-Sent Events) relay for `/api/chat/stream`.
//!
//! A relay task reads the upstream chunk stream and pushes [`StreamEvent`]s
//! into a channel; the response body drains that channel, one SSE frame per
//! event. Every stream ends with exactly one `done` or `error` event.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::State;
use axum::http::{header, HeaderName, HeaderValue, Version};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures::stream::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::server::api::{parse_request, AppState};
use crate::server::error::ChatError;
use crate::server::models::{ChatRequest, StreamEvent};
use crate::upstream::{ChatChunk, ChunkStream};

const EVENT_BUFFER: usize = 32;

pub(crate) async fn chat_stream(
    State(state): State<Arc<AppState>>,
    version: Version,
    body: Result<Bytes, BytesRejection>,
) -> impl IntoResponse {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);

    match accept(version, body) {
        Ok(request) => {
            tokio::spawn(stream_chat(state, request, tx));
        }
        Err(e) => {
            warn!(error = %e, "Stream request rejected");
            // The channel is empty, so this cannot fail.
            let _ = tx.try_send(StreamEvent::error(e.to_string()));
        }
    }

    (
        [
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            // Keeps nginx from buffering the event stream.
            (HeaderName::from_static("x-accel-buffering"), HeaderValue::from_static("no")),
        ],
        Sse::new(events_to_sse(rx)).keep_alive(KeepAlive::default()),
    )
}

/// Validate the body and make sure the connection can carry incremental
/// frames. HTTP/1.0 has no chunked transfer encoding.
fn accept(
    version: Version,
    body: Result<Bytes, BytesRejection>,
) -> Result<ChatRequest, ChatError> {
    let request = parse_request(body)?;
    if version == Version::HTTP_10 || version == Version::HTTP_09 {
        return Err(ChatError::StreamingUnsupported);
    }
    Ok(request)
}

/// Open the upstream stream and relay it. Errors before the first chunk are
/// reported as the single terminal event.
async fn stream_chat(state: Arc<AppState>, request: ChatRequest, tx: mpsc::Sender<StreamEvent>) {
    info!(
        model = request.model,
        chat_id = request.chat_id.as_deref().unwrap_or("-"),
        "Streaming chat request"
    );

    let opened = async {
        let client = state.upstream.get()?;
        let mut completion = request.to_completion(&state.config);
        completion.stream = true;
        Ok::<_, ChatError>(client.complete_stream(completion).await?)
    }
    .await;

    match opened {
        Ok(chunks) => relay(chunks, tx).await,
        Err(e) => {
            warn!(error = %e, "Failed to open upstream stream");
            let _ = tx.send(StreamEvent::error(e.to_string())).await;
        }
    }
}

/// Forward chunks as events until the upstream ends, fails, or the client
/// goes away.
pub async fn relay(mut chunks: ChunkStream, tx: mpsc::Sender<StreamEvent>) {
    let mut relayed = 0usize;

    while let Some(item) = chunks.next().await {
        match item {
            Ok(chunk) => {
                for event in chunk_events(chunk) {
                    if tx.send(event).await.is_err() {
                        debug!(relayed, "Client disconnected, dropping upstream stream");
                        return;
                    }
                    relayed += 1;
                }
            }
            Err(e) => {
                warn!(error = %e, relayed, "Upstream stream failed");
                let _ = tx.send(StreamEvent::error(e.to_string())).await;
                return;
            }
        }
    }

    debug!(relayed, "Upstream stream complete");
    let _ = tx.send(StreamEvent::Done).await;
}

/// Events for one chunk: its text (if any), then one per tool-call fragment.
pub fn chunk_events(chunk: ChatChunk) -> Vec<StreamEvent> {
    let mut events = Vec::with_capacity(1 + chunk.tool_calls.len());
    if !chunk.content.is_empty() {
        events.push(StreamEvent::Message {
            content: chunk.content,
        });
    }
    events.extend(
        chunk
            .tool_calls
            .into_iter()
            .map(|data| StreamEvent::Tool { data }),
    );
    events
}

/// Convert an event receiver into an SSE stream of `data: <json>` frames.
pub fn events_to_sse(
    rx: mpsc::Receiver<StreamEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    ReceiverStream::new(rx).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(Event::default().data(data))
    })
}
