//! chat-relay: a small chat backend for OpenAI-compatible APIs.
//!
//! Forwards a user message (plus a configured system prompt) to the
//! upstream chat-completions endpoint and returns the reply, either as one
//! JSON body or relayed chunk by chunk as server-sent events.

pub mod config;
pub mod server;
pub mod upstream;

pub use config::{Cli, Config};
pub use server::api::{build_router, AppState};
pub use upstream::accessor::UpstreamAccessor;
