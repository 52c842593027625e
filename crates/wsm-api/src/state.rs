use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use wsm_daemon::WorkspaceManager;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<WorkspaceManager>,
    pub started: Instant,
    pub ws_clients: Arc<WebSocketClients>,
}

impl AppState {
    pub fn new(manager: Arc<WorkspaceManager>) -> Self {
        Self {
            manager,
            started: Instant::now(),
            ws_clients: Arc::new(WebSocketClients::default()),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

/// Connected real-time subscribers.
#[derive(Default)]
pub struct WebSocketClients {
    active: AtomicUsize,
}

impl WebSocketClients {
    pub fn on_connect(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_disconnect(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }
}
