mod analyzer;
mod app;
mod config;
mod connections;
mod db;
mod error;
mod scans;
mod state;

use crate::scans::pending::spawn_sweeper;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "nutriscan=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let state = AppState::init().await?;
    let sweeper = spawn_sweeper(state.pending.clone(), state.config.pending.sweep_every);

    let (host, port) = (state.config.host.clone(), state.config.port);
    let connections = state.connections.clone();
    let served = app::serve(app::build_app(state), &host, port, connections).await;

    sweeper.abort();
    served
}
