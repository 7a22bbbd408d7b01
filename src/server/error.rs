//! Per-request failures. All of them are reported in-band: as an `error`
//! field on `/api/chat`, or as an `error` event on `/api/chat/stream`.

use thiserror::Error;

use crate::upstream::UpstreamError;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Invalid request format")]
    InvalidFormat,

    #[error("Message and model are required")]
    MissingFields,

    #[error("Streaming not supported")]
    StreamingUnsupported,

    /// Upstream failures are surfaced verbatim.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}
