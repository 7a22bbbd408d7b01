//! Process-wide upstream client, built on first use.
//!
//! The factory runs at most once, even when many requests race to be first.
//! Its outcome, success or failure, is kept and handed to every later
//! caller; a failed initialization is never retried.

use std::sync::{Arc, OnceLock};

use tracing::{info, warn};

use crate::config::UpstreamConfig;
use crate::upstream::openai::OpenAiClient;
use crate::upstream::{ChatBackend, UpstreamError};

pub type SharedBackend = Arc<dyn ChatBackend>;

type Factory = Box<dyn Fn() -> Result<SharedBackend, UpstreamError> + Send + Sync>;

pub struct UpstreamAccessor {
    factory: Factory,
    cell: OnceLock<Result<SharedBackend, UpstreamError>>,
}

impl UpstreamAccessor {
    /// Build clients with a custom factory.
    pub fn with_factory<F>(factory: F) -> Self
    where
        F: Fn() -> Result<SharedBackend, UpstreamError> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            cell: OnceLock::new(),
        }
    }

    /// Build an [`OpenAiClient`] using the API key found in the environment
    /// variable named by `config.api_key_env`.
    pub fn from_config(config: UpstreamConfig) -> Self {
        Self::with_factory(move || {
            let api_key = std::env::var(&config.api_key_env)
                .ok()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| UpstreamError::MissingApiKey(config.api_key_env.clone()))?;

            let client = OpenAiClient::new(api_key, &config)?;
            info!(base_url = %config.base_url, "Upstream client initialized");
            Ok(Arc::new(client) as SharedBackend)
        })
    }

    /// Return the shared client, constructing it on first call.
    ///
    /// The first call runs the factory on the calling thread and blocks any
    /// thread that races it; building the reqwest client loads TLS roots.
    /// Call it once at startup, before serving, so request handlers only
    /// ever read the cell.
    pub fn get(&self) -> Result<SharedBackend, UpstreamError> {
        self.cell
            .get_or_init(|| {
                let outcome = (self.factory)();
                if let Err(e) = &outcome {
                    warn!(error = %e, "Failed to initialize upstream client");
                }
                outcome
            })
            .clone()
    }

    /// Whether initialization has been attempted.
    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}
