//! brecht: append-only commit log server
//!
//! Opens one segment (store + memory-mapped index) under `BRECHT_DATA` and
//! serves append/retrieve requests over length-prefixed JSON frames.
//!
//! On Ctrl+C or SIGTERM the listener stops and the segment is closed, which flushes the
//! store and shrinks the index file back to its written entries.

use brecht::broker::server::{self, ServerConfig};
use brecht::log::Segment;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Initialize the global `tracing` subscriber from `RUST_LOG` (default `info`).
fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Waits for SIGINT on all platforms, plus SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => tracing::info!("received SIGTERM"),
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to register SIGTERM handler");
                ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ServerConfig::from_env().map_err(anyhow::Error::msg)?;

    tracing::info!(data_dir = %config.data_dir.display(), "Data directory");
    tracing::info!(listen_addr = %config.listen_addr, "Listen address");
    tracing::info!(max_index_bytes = config.storage.max_index_bytes, "Index capacity");

    let segment = Arc::new(Segment::open(&config.data_dir, 0, config.storage)?);
    let listener = TcpListener::bind(config.listen_addr).await?;

    server::serve(listener, Arc::clone(&segment), shutdown_signal()).await?;

    segment.close()?;
    Ok(())
}
