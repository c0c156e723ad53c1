//! HTTP API server.

mod handlers;
mod routes;

pub use routes::create_router;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::ingest::Orchestrator;
use crate::repository::Store;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub orchestrator: Arc<Orchestrator>,
}

/// Serve the API, with the continuous sweep running as a background task.
/// Ctrl-C triggers a graceful shutdown: the sweep stops at its next
/// suspension point, in-flight requests drain, then the pool closes.
pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweeper = state.orchestrator.clone();
    let sweep_handle = tokio::spawn(async move {
        sweeper.run_sweep(shutdown_rx).await;
    });

    let app = create_router(state.clone());
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = sweep_handle.await;
    state.store.close().await;
    Ok(())
}
