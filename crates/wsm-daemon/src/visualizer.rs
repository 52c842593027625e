use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tracing::{debug, info};
use wsm_core::{Result, TopologyConfig, WorkspaceError};
use wsm_indexer::{build_topology, FileAnalysis, Topology};

/// Keeps the most recent topology derived from the indexer's analyses.
pub struct Visualizer {
    config: RwLock<TopologyConfig>,
    latest: RwLock<Option<Topology>>,
    running: AtomicBool,
}

impl Visualizer {
    pub fn new(config: TopologyConfig) -> Self {
        Self {
            config: RwLock::new(config),
            latest: RwLock::new(None),
            running: AtomicBool::new(false),
        }
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        info!(target: "wsm::visualizer", "Visualizer started");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        *self.latest.write() = None;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> TopologyConfig {
        self.config.read().clone()
    }

    pub fn set_config(&self, config: TopologyConfig) {
        *self.config.write() = config;
    }

    pub fn latest(&self) -> Option<Topology> {
        self.latest.read().clone()
    }

    /// Lays out `analyses` on the blocking pool and stores the result.
    pub async fn regenerate(&self, analyses: Vec<FileAnalysis>) -> Result<Topology> {
        if !self.is_running() {
            return Err(WorkspaceError::InvalidOperation(
                "visualizer is not running".to_string(),
            ));
        }
        let config = self.config();
        let topology = tokio::task::spawn_blocking(move || build_topology(&analyses, &config))
            .await
            .map_err(|e| WorkspaceError::ComponentFailed {
                component: "visualizer".to_string(),
                reason: e.to_string(),
            })?;
        debug!(
            target: "wsm::visualizer",
            nodes = topology.nodes.len(),
            edges = topology.edges.len(),
            "Topology regenerated"
        );
        *self.latest.write() = Some(topology.clone());
        Ok(topology)
    }
}
