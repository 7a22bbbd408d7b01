//! Runtime configuration for chat-relay.
//!
//! Configuration is loaded from a JSON file (every field optional) and then
//! overridden from the command line / environment. System prompts live here
//! too: they are read-only once the server starts.

use std::collections::HashMap;
use std::path::PathBuf;

use axum::http::HeaderValue;
use clap::Parser;
use serde::{Deserialize, Serialize};

/// Context name used when a request does not ask for a specific prompt.
pub const DEFAULT_CONTEXT: &str = "default";

const DEFAULT_SYSTEM_MESSAGE: &str =
    "You are a helpful AI assistant. You provide clear, accurate, and concise responses.";
const CODE_SYSTEM_MESSAGE: &str =
    "You are a helpful AI coding assistant. You provide clear, accurate, and helpful code-related responses.";

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "chat-relay", about = "Chat backend relaying to an OpenAI-compatible API")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Listen host (overrides the config file).
    #[arg(long)]
    pub host: Option<String>,

    /// Listen port (overrides the config file).
    #[arg(short, long, env = "API_PORT")]
    pub port: Option<u16>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,

    /// Upstream API configuration.
    pub upstream: UpstreamConfig,

    /// System prompts keyed by context name.
    pub prompts: PromptConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,

    pub port: u16,

    /// The single origin allowed by CORS. Credentials are allowed, so this
    /// cannot be `*`.
    pub cors_origin: String,

    /// How long in-flight requests may run after a shutdown signal.
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origin: "http://localhost:3000".to_string(),
            shutdown_grace_secs: 30,
        }
    }
}

/// Upstream (OpenAI-compatible) API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL, without the `/chat/completions` suffix.
    pub base_url: String,

    /// Name of the environment variable holding the API key.
    pub api_key_env: String,

    /// Timeout for non-streaming completions.
    pub request_timeout_secs: u64,

    pub connect_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            request_timeout_secs: 120,
            connect_timeout_secs: 10,
        }
    }
}

/// System prompts keyed by context name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptConfig {
    pub messages: HashMap<String, String>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        let messages = HashMap::from([
            (DEFAULT_CONTEXT.to_string(), DEFAULT_SYSTEM_MESSAGE.to_string()),
            ("code".to_string(), CODE_SYSTEM_MESSAGE.to_string()),
        ]);
        Self { messages }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)
                .map_err(|e| anyhow::anyhow!("invalid config file {}: {e}", path.display()))?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Apply command-line overrides on top of the loaded file.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
    }

    /// Reject settings the server cannot start with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let origin = self.server.cors_origin.trim();
        if origin == "*" {
            anyhow::bail!("cors_origin cannot be \"*\" when credentials are allowed");
        }
        if HeaderValue::from_str(origin).is_err() || origin.is_empty() {
            anyhow::bail!("cors_origin {:?} is not a valid origin", self.server.cors_origin);
        }
        if self.upstream.base_url.trim().is_empty() {
            anyhow::bail!("upstream.base_url must not be empty");
        }
        Ok(())
    }

    /// `host:port` to bind the listener on.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// System prompt for `context`, degrading to the default prompt.
    pub fn system_message(&self, context: &str) -> &str {
        self.prompts
            .messages
            .get(context)
            .or_else(|| self.prompts.messages.get(DEFAULT_CONTEXT))
            .map(String::as_str)
            .unwrap_or(DEFAULT_SYSTEM_MESSAGE)
    }
}
