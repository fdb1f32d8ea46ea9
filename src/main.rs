mod chat;
mod core;
mod history;
mod llm;
mod rag;
mod server;
mod state;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;

use crate::core::settings::Settings;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env();
    core::logging::init(&settings.log_dir);

    let port = settings.port;
    let state = AppState::initialize(settings).await?;

    // Schema drift is reported, not fixed; the store runs degraded if the
    // database is absent.
    match state.store.validate_schema().await {
        Ok(()) => tracing::info!("conversation schema validated"),
        Err(e) => tracing::warn!("conversation schema check failed: {}", e),
    }

    if let Err(e) = state.index.ensure_collection().await {
        tracing::warn!("could not ensure vector collection: {}", e);
    }

    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    let app: Router = server::router::router(state);
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
