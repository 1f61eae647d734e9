use rolodex_scheduler::SessionSweeper;
use rolodex_storage::Database;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::Context;
use crate::api::{self, AppState};

pub async fn run(
    ctx: Context,
    cli_host: Option<String>,
    cli_port: Option<u16>,
    cli_public: Option<PathBuf>,
) -> anyhow::Result<()> {
    let db: Arc<dyn Database> = Arc::new(ctx.open_database(true).await?);
    info!(data_source = %ctx.data_source(), hash_params = ?db.hasher().params(), "Storage ready");

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let sweeper = Arc::new(SessionSweeper::new(db.clone()).with_interval(ctx.config.sweep_interval()));
    let sweeper_handle = {
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            sweeper.run_loop(shutdown_rx).await;
        })
    };

    let host = cli_host
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| ctx.config.server.host.clone());
    let port = cli_port.unwrap_or(ctx.config.server.port);
    let public_dir = cli_public.unwrap_or_else(|| PathBuf::from(&ctx.config.server.public_dir));

    let state = AppState {
        db: db.clone(),
        session_ttl: ctx.config.session_ttl(),
    };
    let app = api::router(state, Some(&public_dir));

    let bind_addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, public_dir = %public_dir.display(), "Listening");

    let http_shutdown_rx = shutdown_tx.subscribe();
    let http_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut rx = http_shutdown_rx;
                let _ = rx.recv().await;
            })
            .await
            .ok();
    });

    // ── Wait for shutdown signal ──
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, draining tasks...");
    let _ = shutdown_tx.send(());

    let graceful_timeout = Duration::from_secs(10);
    for (name, handle) in [("http_server", http_handle), ("sweeper", sweeper_handle)] {
        match tokio::time::timeout(graceful_timeout, handle).await {
            Ok(Ok(())) => debug!(task = name, "Task stopped"),
            Ok(Err(e)) => warn!(task = name, error = %e, "Task panicked"),
            Err(_) => warn!(task = name, "Task did not stop in time"),
        }
    }

    db.close()?;
    info!("Database closed");
    Ok(())
}
