use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tracing::{error, info};
use wsm_core::Result;
use wsm_daemon::WorkspaceManager;

use crate::{create_router, AppState};

pub struct Server {
    state: AppState,
    addr: SocketAddr,
}

impl Server {
    pub fn new(manager: Arc<WorkspaceManager>, addr: SocketAddr) -> Self {
        Self {
            state: AppState::new(manager),
            addr,
        }
    }

    /// Serves until Ctrl+C or SIGTERM.
    pub async fn run(self) -> Result<()> {
        let router = create_router(self.state);
        let listener = tokio::net::TcpListener::bind(self.addr).await?;

        info!(target: "wsm::api", addr = %self.addr, "Server listening");
        info!(target: "wsm::api", "  GET  /api/status | /api/metrics | /api/analysis | /api/topology | /api/files");
        info!(target: "wsm::api", "  GET  /api/analysis/file?path=<relative>");
        info!(target: "wsm::api", "  GET|POST /api/config, POST /api/components/{{name}}/restart");
        info!(target: "wsm::api", "  WS   ws://{}/ws", self.addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(target: "wsm::api", error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(target: "wsm::api", error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!(target: "wsm::api", "Received Ctrl+C, shutting down gracefully");
        },
        _ = terminate => {
            info!(target: "wsm::api", "Received SIGTERM, shutting down gracefully");
        },
    }
}
