//! Upstream chat-completion provider.
//!
//! - [`openai`]: HTTP client for OpenAI-compatible `/chat/completions`
//! - [`sse`]: decoder for the provider's server-sent event stream
//! - [`accessor`]: once-only construction of the shared client

pub mod accessor;
pub mod openai;
pub mod sse;

use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors talking to the upstream provider.
///
/// `Clone` so a single initialization failure can be handed to every caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("{0} environment variable is not set")]
    MissingApiKey(String),

    #[error("Failed to initialize upstream client: {0}")]
    Init(String),

    #[error("{0}")]
    Transport(String),

    #[error("{status}: {message}")]
    Api { status: u16, message: String },

    /// Error reported inside an otherwise successful stream.
    #[error("{0}")]
    Stream(String),

    #[error("Malformed upstream response: {0}")]
    Decode(String),

    #[error("Upstream returned no choices")]
    NoChoices,
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        UpstreamError::Transport(e.to_string())
    }
}

/// One message in the exchange sent upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A chat completion request as sent to the provider.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

/// The interesting part of a non-streaming completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Text of the first choice.
    pub content: String,
}

/// One incremental unit of a streamed completion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatChunk {
    /// Incremental text, possibly empty.
    pub content: String,

    /// Raw tool-call fragments, relayed without interpretation.
    pub tool_calls: Vec<serde_json::Value>,
}

/// Stream of chunks; an `Err` item ends the stream.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ChatChunk, UpstreamError>> + Send>>;

/// A provider capable of answering chat completions.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Run one blocking completion.
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, UpstreamError>;

    /// Open a streaming completion.
    async fn complete_stream(&self, request: CompletionRequest)
        -> Result<ChunkStream, UpstreamError>;
}
