use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use chat_relay::server::shutdown::{serve_until, shutdown_signal};
use chat_relay::{build_router, AppState, Cli, Config, UpstreamAccessor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before parsing so API_PORT and friends can come from it.
    let dotenv_result = dotenv::dotenv();

    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "chat_relay=debug,tower_http=debug"
    } else {
        "chat_relay=info,tower_http=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("chat-relay v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = dotenv_result {
        warn!(error = %e, "Error loading .env file");
    }

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    config.apply_cli(&cli);
    config.validate()?;
    let config = Arc::new(config);

    info!(
        listen = config.listen_addr(),
        upstream = config.upstream.base_url,
        cors_origin = config.server.cors_origin,
        prompts = config.prompts.messages.len(),
        "Configuration loaded"
    );

    // Build the upstream client before serving so no request thread blocks on
    // it; a failure is reported again on each request.
    let upstream = UpstreamAccessor::from_config(config.upstream.clone());
    if upstream.get().is_err() {
        warn!("Upstream client unavailable, chat requests will return errors");
    }

    let state = Arc::new(AppState::new(config.clone(), upstream));
    let app = build_router(state)?;

    let listen_addr = config.listen_addr();
    info!(addr = listen_addr, "Starting server");

    let listener = match TcpListener::bind(&listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = listen_addr, error = %e, "Failed to start server");
            return Err(e.into());
        }
    };
    info!("Listening on {listen_addr}");

    let grace = Duration::from_secs(config.server.shutdown_grace_secs);
    let outcome = serve_until(listener, app, shutdown_signal(), grace).await?;
    info!(?outcome, "Shutdown complete");

    Ok(())
}
