use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;

use docrouter::core;
use docrouter::pipeline;
use docrouter::server;
use docrouter::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (state, receivers) = AppState::initialize().await?;
    core::logging::init(&state.paths);

    pipeline::spawn_workers(state.clone(), receivers);

    let bind_addr = state.settings.server.bind_addr.clone();
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {bind_addr}"))?;
    let addr = listener.local_addr()?;
    tracing::info!("Listening on {}", addr);

    let app: Router = server::router::router(state.clone());
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
