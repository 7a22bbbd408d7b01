//! Request and response bodies of the public API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::config::{Config, DEFAULT_CONTEXT};
use crate::server::error::ChatError;
use crate::upstream::{CompletionRequest, Message};

/// Incoming chat message.
///
/// Missing or `null` `message`/`model` decode as empty strings so they are
/// reported by [`ChatRequest::validate`] rather than as a malformed body.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub message: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub model: String,
    /// System prompt to use; see [`Config::system_message`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl ChatRequest {
    pub fn validate(&self) -> Result<(), ChatError> {
        if self.message.is_empty() || self.model.is_empty() {
            return Err(ChatError::MissingFields);
        }
        Ok(())
    }

    /// Two-message exchange: the context's system prompt, then the user text.
    pub fn to_completion(&self, config: &Config) -> CompletionRequest {
        let context = self.context.as_deref().unwrap_or(DEFAULT_CONTEXT);
        CompletionRequest {
            model: self.model.clone(),
            messages: vec![
                Message::system(config.system_message(context)),
                Message::user(self.message.clone()),
            ],
            stream: false,
        }
    }
}

/// Reply of the non-streaming endpoint: a message or an error, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatResponse {
    Message { message: String },
    Error { error: String },
}

impl ChatResponse {
    pub fn message(message: impl Into<String>) -> Self {
        ChatResponse::Message {
            message: message.into(),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        ChatResponse::Error {
            error: error.into(),
        }
    }
}

/// One event of the streaming endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Message { content: String },
    Tool { data: serde_json::Value },
    Error { error: String },
    Done,
}

impl StreamEvent {
    pub fn error(error: impl Into<String>) -> Self {
        StreamEvent::Error {
            error: error.into(),
        }
    }

    /// `done` and `error` end a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error { .. })
    }
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}
