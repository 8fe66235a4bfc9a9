use std::future::IntoFuture;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::info;

use calmirror_core::{PushHandlers, ReconciliationEngine, SyncConfig};

use crate::server::{self, AppState};
use crate::singleton;

const NOTIFICATION_BUFFER: usize = 256;

/// Mirror until interrupted: periodic reconciliation, push handlers and the
/// HTTP surface all share one context.
pub async fn run(config: &SyncConfig) -> Result<()> {
    let _lock = singleton::acquire_lock()?;

    let ctx = super::connect(config).await?;
    let (tx, rx) = mpsc::channel(NOTIFICATION_BUFFER);

    let engine = ReconciliationEngine::new(ctx.clone());
    let handlers = PushHandlers::new(ctx.clone());

    let listener = tokio::net::TcpListener::bind(config.server.bind)
        .await
        .with_context(|| format!("Could not bind {}", config.server.bind))?;
    info!(bind = %config.server.bind, "HTTP surface listening");
    let app = server::router(AppState::new(ctx.clone(), tx));

    tokio::select! {
        _ = engine.run_forever() => {}
        _ = handlers.run(rx) => {}
        result = axum::serve(listener, app).into_future() => {
            result.context("HTTP surface stopped")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
        }
    }

    ctx.persist().await;
    Ok(())
}
