use crate::broker::connection;
use crate::log::Segment;
use crate::storage::{Config, DEFAULT_MAX_INDEX_BYTES};
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Default socket address when `BRECHT_LISTEN` is not set.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";

/// Default data directory when `BRECHT_DATA` is not set.
pub const DEFAULT_DATA_DIR: &str = "./data";

/// Server configuration parsed from environment variables.
///
/// | Variable                 | Default          | Description                      |
/// |--------------------------|------------------|----------------------------------|
/// | `BRECHT_DATA`            | `./data`         | Directory holding segment files  |
/// | `BRECHT_LISTEN`          | `127.0.0.1:8080` | Socket address to listen on      |
/// | `BRECHT_MAX_INDEX_BYTES` | `1048576`        | Index capacity while mapped      |
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub data_dir: PathBuf,
    pub listen_addr: SocketAddr,
    pub storage: Config,
}

impl ServerConfig {
    /// Parse configuration from the process environment.
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Parse configuration from any key lookup. Unset keys take defaults.
    ///
    /// # Errors
    /// - `BRECHT_LISTEN` is set but not a valid `SocketAddr`
    /// - `BRECHT_MAX_INDEX_BYTES` is set but not a valid nonzero `u64`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = lookup("BRECHT_DATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        let listen_addr = lookup("BRECHT_LISTEN")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| format!("BRECHT_LISTEN is not a valid socket address: {e}"))?;

        let max_index_bytes = match lookup("BRECHT_MAX_INDEX_BYTES") {
            Some(val) => val
                .parse::<u64>()
                .map_err(|e| format!("BRECHT_MAX_INDEX_BYTES is not a valid u64: {e}"))?,
            None => DEFAULT_MAX_INDEX_BYTES,
        };

        let storage = Config::new(max_index_bytes);
        storage.validate().map_err(|e| e.to_string())?;

        Ok(ServerConfig {
            data_dir,
            listen_addr,
            storage,
        })
    }
}

/// Run the TCP server until `shutdown` resolves.
///
/// Architecture:
/// - Main loop accepts connections
/// - Each connection spawned into independent async task
/// - Tasks are detached; one bad connection never stops the others
///
/// The segment is not closed here; the caller owns its lifecycle.
pub async fn serve<F>(listener: TcpListener, segment: Arc<Segment>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, base_offset = segment.base_offset(), "listening");

    tokio::pin!(shutdown);

    loop {
        let (stream, peer_addr) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = &mut shutdown => {
                tracing::info!(%local_addr, "shutting down listener");
                return Ok(());
            }
        };

        tracing::debug!(%peer_addr, "accepted connection");

        let segment = Arc::clone(&segment);
        tokio::spawn(async move {
            match connection::handle_connection(stream, segment).await {
                Ok(()) => tracing::debug!(%peer_addr, "connection closed"),
                Err(e) => tracing::warn!(%peer_addr, error = %e, "connection error"),
            }
        });
    }
}
