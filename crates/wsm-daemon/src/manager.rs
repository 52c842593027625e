use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use wsm_core::{ConfigUpdate, Result, WorkspaceConfig, WorkspaceError};
use wsm_indexer::{DependencyIndexer, IndexerEvent, Topology};
use wsm_watcher::{ChangeKind, FileWatcher, WatcherEvent};

use crate::component::{Component, IndexerComponent, MonitorComponent, VisualizerComponent, WatcherComponent};
use crate::events::{EventBus, WorkspaceEvent, WorkspaceSnapshot};
use crate::monitor::{MetricsSource, MonitorEvent, SysinfoSource, SystemMonitor};
use crate::status::{HealthReport, WorkspaceStatus};
use crate::supervisor::Supervisor;
use crate::visualizer::Visualizer;

type SharedReceiver<T> = Arc<tokio::sync::Mutex<UnboundedReceiver<T>>>;

/// Handles shared by the manager and its background tasks.
#[derive(Clone)]
struct Shared {
    watcher: Arc<FileWatcher>,
    indexer: Arc<DependencyIndexer>,
    monitor: Arc<SystemMonitor>,
    visualizer: Arc<Visualizer>,
    supervisor: Arc<Supervisor>,
    bus: Arc<EventBus>,
}

struct Receivers {
    watcher: SharedReceiver<WatcherEvent>,
    indexer: SharedReceiver<IndexerEvent>,
    monitor: SharedReceiver<MonitorEvent>,
}

struct Session {
    root: PathBuf,
    started: Instant,
    started_at: DateTime<Utc>,
    tasks: Vec<JoinHandle<()>>,
}

/// Owns the four components, relays their outbound channels onto the event bus,
/// and runs the periodic health check.
pub struct WorkspaceManager {
    config: RwLock<WorkspaceConfig>,
    shared: Shared,
    receivers: Receivers,
    session: Mutex<Option<Session>>,
    running: AtomicBool,
    lifecycle: tokio::sync::Mutex<()>,
}

impl WorkspaceManager {
    pub fn new(config: WorkspaceConfig) -> Result<Self> {
        Self::with_metrics_source(config, Box::new(SysinfoSource::new()))
    }

    pub fn with_metrics_source(config: WorkspaceConfig, source: Box<dyn MetricsSource>) -> Result<Self> {
        config.validate()?;

        let (watcher, watcher_rx) = FileWatcher::new(config.watch.clone());
        let (indexer, indexer_rx) = DependencyIndexer::new(config.indexer.clone());
        let (monitor, monitor_rx) = SystemMonitor::with_source(config.monitor.clone(), source);
        let watcher = Arc::new(watcher);
        let indexer = Arc::new(indexer);
        let monitor = Arc::new(monitor);
        let visualizer = Arc::new(Visualizer::new(config.topology.clone()));

        // Monitor and watcher have no dependencies; the indexer needs a live watcher,
        // the visualizer a live indexer.
        let components: Vec<Arc<dyn Component>> = vec![
            Arc::new(MonitorComponent::new(monitor.clone())),
            Arc::new(WatcherComponent::new(watcher.clone())),
            Arc::new(IndexerComponent::new(indexer.clone(), watcher.clone())),
            Arc::new(VisualizerComponent::new(visualizer.clone())),
        ];
        let supervisor = Arc::new(Supervisor::new(components, &config.health));

        Ok(Self {
            shared: Shared {
                watcher,
                indexer,
                monitor,
                visualizer,
                supervisor,
                bus: Arc::new(EventBus::new(config.server.event_buffer)),
            },
            receivers: Receivers {
                watcher: Arc::new(tokio::sync::Mutex::new(watcher_rx)),
                indexer: Arc::new(tokio::sync::Mutex::new(indexer_rx)),
                monitor: Arc::new(tokio::sync::Mutex::new(monitor_rx)),
            },
            config: RwLock::new(config),
            session: Mutex::new(None),
            running: AtomicBool::new(false),
            lifecycle: tokio::sync::Mutex::new(()),
        })
    }

    /// Brings every component up for `root`. A missing root is fatal.
    pub async fn start(&self, root: &Path) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        if self.running.load(Ordering::SeqCst) {
            return Err(WorkspaceError::InvalidOperation(
                "workspace manager is already running".to_string(),
            ));
        }
        let root = tokio::fs::canonicalize(root)
            .await
            .map_err(|_| WorkspaceError::RootNotFound(root.to_path_buf()))?;
        if !root.is_dir() {
            return Err(WorkspaceError::RootNotFound(root));
        }

        self.push_config();
        let mut tasks = vec![
            tokio::spawn(relay_watcher(self.shared.clone(), self.receivers.watcher.clone())),
            tokio::spawn(relay_indexer(self.shared.clone(), self.receivers.indexer.clone())),
            tokio::spawn(relay_monitor(self.shared.clone(), self.receivers.monitor.clone())),
        ];

        if let Err(e) = self.shared.supervisor.start_all(&root).await {
            for task in &tasks {
                task.abort();
            }
            return Err(e);
        }

        let interval = Duration::from_secs(self.config.read().health.check_interval_secs.max(1));
        tasks.push(tokio::spawn(health_loop(self.shared.clone(), interval)));

        info!(target: "wsm::manager", root = %root.display(), "Workspace manager started");
        *self.session.lock() = Some(Session {
            root,
            started: Instant::now(),
            started_at: Utc::now(),
            tasks,
        });
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Stops the health loop, then every component in reverse order, then the relays.
    pub async fn stop(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let session = self.session.lock().take();
        let tasks = session.map(|s| s.tasks).unwrap_or_default();
        if let Some(health) = tasks.last() {
            health.abort();
        }
        self.shared.supervisor.stop_all().await;
        for task in tasks {
            task.abort();
            let _ = task.await;
        }
        info!(target: "wsm::manager", "Workspace manager stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn push_config(&self) {
        let config = self.config.read().clone();
        self.shared.watcher.set_config(config.watch);
        self.shared.indexer.set_config(config.indexer);
        self.shared.monitor.set_config(config.monitor);
        self.shared.visualizer.set_config(config.topology);
        self.shared.supervisor.set_config(&config.health);
    }

    pub fn config(&self) -> WorkspaceConfig {
        self.config.read().clone()
    }

    /// Validates and applies a partial update. Components pick it up on their next start.
    pub fn update_config(&self, update: ConfigUpdate) -> Result<WorkspaceConfig> {
        let updated = update.apply(&self.config.read())?;
        *self.config.write() = updated.clone();
        self.push_config();
        info!(target: "wsm::manager", "Configuration updated");
        Ok(updated)
    }

    pub fn status(&self) -> WorkspaceStatus {
        let session = self.session.lock();
        WorkspaceStatus {
            running: self.is_running(),
            root: session.as_ref().map(|s| s.root.clone()),
            started_at: session.as_ref().map(|s| s.started_at),
            uptime_seconds: session.as_ref().map(|s| s.started.elapsed().as_secs()).unwrap_or(0),
            components: self.shared.supervisor.status(),
            config: self.config.read().summary(),
        }
    }

    pub fn snapshot(&self) -> WorkspaceSnapshot {
        WorkspaceSnapshot {
            status: self.status(),
            analysis: self.shared.indexer.analysis_report(),
            metrics: self.shared.monitor.latest(),
        }
    }

    /// Runs one health check now and publishes the `healthCheck` event.
    pub async fn check_health(&self) -> HealthReport {
        run_health_check(&self.shared).await
    }

    pub async fn restart_component(&self, name: &str) -> Result<crate::health::ComponentHealth> {
        if !self.is_running() {
            return Err(WorkspaceError::InvalidOperation(
                "workspace manager is not running".to_string(),
            ));
        }
        self.shared.supervisor.restart(name).await
    }

    /// Latest topology, generating one if none exists yet.
    pub async fn topology(&self) -> Result<Topology> {
        match self.shared.visualizer.latest() {
            Some(topology) => Ok(topology),
            None => {
                self.shared
                    .visualizer
                    .regenerate(self.shared.indexer.analyses())
                    .await
            }
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.shared.bus
    }

    pub fn watcher(&self) -> &Arc<FileWatcher> {
        &self.shared.watcher
    }

    pub fn indexer(&self) -> &Arc<DependencyIndexer> {
        &self.shared.indexer
    }

    pub fn monitor(&self) -> &Arc<SystemMonitor> {
        &self.shared.monitor
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.shared.supervisor
    }
}

async fn relay_watcher(shared: Shared, rx: SharedReceiver<WatcherEvent>) {
    let mut rx = rx.lock().await;
    while let Some(event) = rx.recv().await {
        match event {
            WatcherEvent::Ready {
                tracked_files,
                duration_ms,
            } => {
                shared.bus.publish(WorkspaceEvent::WatcherReady {
                    tracked_files,
                    duration_ms,
                });
                if shared.indexer.is_running() {
                    let indexer = shared.indexer.clone();
                    let paths = shared.watcher.tracked_paths();
                    tokio::spawn(async move {
                        if let Err(e) = indexer.index_all(paths).await {
                            warn!(target: "wsm::manager", error = %e, "Full analysis failed");
                        }
                    });
                }
            }
            WatcherEvent::Change(change) => {
                let path = change.path.clone();
                let kind = change.kind;
                shared.bus.publish(WorkspaceEvent::from_change(change));
                if !shared.indexer.is_running() {
                    continue;
                }
                // Awaited in place so updates for one path apply in arrival order.
                let result = match kind {
                    ChangeKind::Added | ChangeKind::Changed => {
                        shared.indexer.update_file(&path).await.map(|_| ())
                    }
                    ChangeKind::Deleted => shared.indexer.remove_file(&path).map(|_| ()),
                    ChangeKind::DirAdded | ChangeKind::DirDeleted => Ok(()),
                };
                if let Err(e) = result {
                    warn!(target: "wsm::manager", path = %path.display(), error = %e, "Incremental analysis failed");
                }
            }
            WatcherEvent::Error { message } => {
                shared.bus.publish(WorkspaceEvent::WatcherError {
                    message: message.clone(),
                });
                if let Err(e) = shared.supervisor.report_failure("watcher", message).await {
                    warn!(target: "wsm::manager", error = %e, "Could not record watcher failure");
                }
            }
        }
    }
}

async fn relay_indexer(shared: Shared, rx: SharedReceiver<IndexerEvent>) {
    let mut rx = rx.lock().await;
    while let Some(first) = rx.recv().await {
        // Coalesce whatever is already queued into one topology regeneration.
        let mut batch = vec![first];
        while let Ok(event) = rx.try_recv() {
            batch.push(event);
        }

        for event in batch {
            let event = match event {
                IndexerEvent::FileAnalyzed { analysis, cycles } => {
                    WorkspaceEvent::FileAnalyzed { analysis, cycles }
                }
                IndexerEvent::FileRemoved { path } => WorkspaceEvent::FileRemoved { path },
                IndexerEvent::AnalysisComplete(summary) => WorkspaceEvent::AnalysisComplete(summary),
            };
            shared.bus.publish(event);
        }

        if shared.visualizer.is_running() {
            match shared.visualizer.regenerate(shared.indexer.analyses()).await {
                Ok(topology) => {
                    shared.bus.publish(WorkspaceEvent::TopologyGenerated(topology));
                }
                Err(e) => warn!(target: "wsm::manager", error = %e, "Topology generation failed"),
            }
        }
    }
}

async fn relay_monitor(shared: Shared, rx: SharedReceiver<MonitorEvent>) {
    let mut rx = rx.lock().await;
    while let Some(MonitorEvent::Sample { metrics, alerts }) = rx.recv().await {
        shared.bus.publish(WorkspaceEvent::MetricsUpdate { metrics, alerts });
    }
}

async fn health_loop(shared: Shared, interval: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        run_health_check(&shared).await;
    }
}

async fn run_health_check(shared: &Shared) -> HealthReport {
    let components = shared.supervisor.check_all().await;
    let report = HealthReport::new(components, shared.monitor.check_alerts());
    debug!(
        target: "wsm::manager",
        failed = report.failed.len(),
        alerts = report.alerts.len(),
        "Health check complete"
    );
    shared.bus.publish(WorkspaceEvent::HealthCheck(report.clone()));
    report
}
