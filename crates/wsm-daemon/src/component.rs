use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;
use wsm_core::Result;
use wsm_indexer::DependencyIndexer;
use wsm_watcher::FileWatcher;

use crate::health::Probe;
use crate::monitor::SystemMonitor;
use crate::visualizer::Visualizer;

/// A unit the supervisor can start, stop and probe.
#[async_trait]
pub trait Component: Send + Sync {
    fn name(&self) -> &'static str;

    async fn start(&self, root: &Path) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    fn is_running(&self) -> bool;

    /// Component-specific health predicate.
    fn probe(&self) -> Probe;
}

pub struct WatcherComponent {
    watcher: Arc<FileWatcher>,
}

impl WatcherComponent {
    pub fn new(watcher: Arc<FileWatcher>) -> Self {
        Self { watcher }
    }
}

#[async_trait]
impl Component for WatcherComponent {
    fn name(&self) -> &'static str {
        "watcher"
    }

    async fn start(&self, root: &Path) -> Result<()> {
        self.watcher.start(root).await
    }

    async fn stop(&self) -> Result<()> {
        self.watcher.stop().await
    }

    fn is_running(&self) -> bool {
        self.watcher.is_running()
    }

    fn probe(&self) -> Probe {
        if !self.watcher.is_running() {
            Probe::Unhealthy("not running".to_string())
        } else if !self.watcher.is_loop_alive() {
            Probe::Unhealthy("event loop exited".to_string())
        } else if !self.watcher.is_ready() {
            Probe::Warming("initial scan in progress".to_string())
        } else if self.watcher.tracked_count() == 0 {
            Probe::Unhealthy("no files tracked".to_string())
        } else {
            Probe::Healthy
        }
    }
}

/// The indexer plus the watcher it reads its file set from.
pub struct IndexerComponent {
    indexer: Arc<DependencyIndexer>,
    watcher: Arc<FileWatcher>,
}

impl IndexerComponent {
    pub fn new(indexer: Arc<DependencyIndexer>, watcher: Arc<FileWatcher>) -> Self {
        Self { indexer, watcher }
    }
}

#[async_trait]
impl Component for IndexerComponent {
    fn name(&self) -> &'static str {
        "indexer"
    }

    async fn start(&self, root: &Path) -> Result<()> {
        let root = self.watcher.root().unwrap_or_else(|| root.to_path_buf());
        self.indexer.start(&root)?;

        // After a restart the watcher is already ready and will not announce it again.
        if self.watcher.is_ready() {
            let indexer = self.indexer.clone();
            let paths = self.watcher.tracked_paths();
            tokio::spawn(async move {
                if let Err(e) = indexer.index_all(paths).await {
                    warn!(target: "wsm::indexer", error = %e, "Full analysis after restart failed");
                }
            });
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.indexer.stop();
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.indexer.is_running()
    }

    fn probe(&self) -> Probe {
        if !self.indexer.is_running() {
            return Probe::Unhealthy("not running".to_string());
        }
        if self.indexer.analysis_count() > 0 {
            return Probe::Healthy;
        }
        if !self.watcher.is_ready() || self.indexer.last_full_analysis().is_none() {
            return Probe::Warming("initial indexing pending".to_string());
        }
        Probe::Unhealthy("no files analyzed".to_string())
    }
}

pub struct MonitorComponent {
    monitor: Arc<SystemMonitor>,
}

impl MonitorComponent {
    pub fn new(monitor: Arc<SystemMonitor>) -> Self {
        Self { monitor }
    }
}

#[async_trait]
impl Component for MonitorComponent {
    fn name(&self) -> &'static str {
        "monitor"
    }

    async fn start(&self, _root: &Path) -> Result<()> {
        self.monitor.start()
    }

    async fn stop(&self) -> Result<()> {
        self.monitor.stop().await;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.monitor.is_running()
    }

    fn probe(&self) -> Probe {
        if !self.monitor.is_running() {
            return Probe::Unhealthy("not running".to_string());
        }
        if !self.monitor.is_loop_alive() {
            return Probe::Unhealthy("sampling loop exited".to_string());
        }
        match self.monitor.latest() {
            None => Probe::Warming("no sample yet".to_string()),
            Some(m) if m.cpu_percent >= 0.0 => Probe::Healthy,
            Some(m) => Probe::Unhealthy(format!("invalid CPU reading {}", m.cpu_percent)),
        }
    }
}

pub struct VisualizerComponent {
    visualizer: Arc<Visualizer>,
}

impl VisualizerComponent {
    pub fn new(visualizer: Arc<Visualizer>) -> Self {
        Self { visualizer }
    }
}

#[async_trait]
impl Component for VisualizerComponent {
    fn name(&self) -> &'static str {
        "visualizer"
    }

    async fn start(&self, _root: &Path) -> Result<()> {
        self.visualizer.start();
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.visualizer.stop();
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.visualizer.is_running()
    }

    fn probe(&self) -> Probe {
        if self.visualizer.is_running() {
            Probe::Healthy
        } else {
            Probe::Unhealthy("not running".to_string())
        }
    }
}
