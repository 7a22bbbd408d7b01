//! HTTP server for the chat API.
//!
//! - [`api`]: Router, shared state and the JSON handlers
//! - [`streaming`]: SSE relay for streamed replies
//! - [`models`]: Request/response bodies
//! - [`error`]: Per-request error taxonomy
//! - [`middleware`]: CORS and request logging
//! - [`shutdown`]: Signal handling and bounded graceful drain

pub mod api;
pub mod error;
pub mod middleware;
pub mod models;
pub mod shutdown;
pub mod streaming;
