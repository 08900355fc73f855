//! TCP listener: one tokio task per accepted connection

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::codec::Connection;
use crate::config::ServerConfig;
use crate::error::Result;
use crate::file_store::FileStore;
use crate::handler::ConnectionHandler;
use crate::repository::TaskRepository;

/// Process-wide state shared by every connection handler.
pub struct ServerState {
    pub repo: TaskRepository,
    pub files: FileStore,
}

impl ServerState {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo: TaskRepository::new(),
            files: FileStore::new(storage_dir),
        }
    }
}

/// Bind the configured address and serve until `shutdown` resolves.
pub async fn serve<F>(config: &ServerConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let listener = TcpListener::bind(&config.bind).await?;
    let shared = Arc::new(ServerState::new(config.storage_dir.clone()));
    info!(
        addr = %listener.local_addr()?,
        storage = %shared.files.root().display(),
        "taskwired listening"
    );
    serve_until(listener, shared, shutdown).await
}

/// Accept forever on an already-bound listener.
pub async fn serve_listener(listener: TcpListener, shared: Arc<ServerState>) -> Result<()> {
    serve_until(listener, shared, std::future::pending()).await
}

async fn serve_until<F>(listener: TcpListener, shared: Arc<ServerState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    loop {
        let (stream, peer) = tokio::select! {
            _ = &mut shutdown => {
                info!("shutting down listener");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    // A failed accept (fd exhaustion, aborted handshake) must not stop the server
                    error!(error = %e, "accept failed");
                    continue;
                }
            },
        };

        let span = tracing::info_span!("conn", %peer, id = %Uuid::new_v4());
        let shared = Arc::clone(&shared);
        tokio::spawn(
            async move {
                debug!("accepted");
                let handler = ConnectionHandler::new(Connection::from_tcp(stream), shared);
                match handler.run().await {
                    Ok(()) => debug!("connection closed"),
                    Err(e) => warn!(error = %e, "connection ended with error"),
                }
            }
            .instrument(span),
        );
    }
}
