use std::path::PathBuf;
use std::process::ExitCode;

use tracing::{error, info};

mod auth;
mod error;
mod logging;
mod routes;
mod state;

use error::ServerError;
use state::AppState;

const CONFIG_ENV: &str = "MEDIAGEN_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "mediagen.json";

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // The subscriber may not be installed yet.
            eprintln!("mediagen-server: {}", e);
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

async fn run() -> Result<(), ServerError> {
    let path = config_path();
    let mut config = mediagen::load_config(&path)?;
    mediagen::config::apply_process_env(&mut config)?;

    logging::init(&config.logging)?;
    info!(config = %path.display(), "configuration loaded");

    let state = AppState::from_config(&config)?;
    let dispatcher = state.dispatcher.clone();
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .map_err(|e| ServerError::Bind {
            addr: config.server.bind.clone(),
            source: e,
        })?;
    info!(addr = %config.server.bind, "mediagen-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(ServerError::Serve)?;

    dispatcher.shutdown().await;
    info!("mediagen-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
