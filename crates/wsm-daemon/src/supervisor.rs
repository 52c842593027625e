use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{error, info, warn};
use wsm_core::{HealthConfig, Result, WorkspaceError};

use crate::component::Component;
use crate::health::{ComponentHealth, HealthAction, Probe, RestartPolicy};
use crate::status::ComponentStatus;

struct Supervised {
    component: Arc<dyn Component>,
    health: Mutex<ComponentHealth>,
    /// Serializes start/stop of this component.
    lifecycle: tokio::sync::Mutex<()>,
}

#[derive(Debug, Clone, Copy)]
struct Timeouts {
    start: Duration,
    stop: Duration,
}

impl From<&HealthConfig> for Timeouts {
    fn from(config: &HealthConfig) -> Self {
        Self {
            start: Duration::from_secs(config.start_timeout_secs),
            stop: Duration::from_secs(config.stop_timeout_secs),
        }
    }
}

/// Starts components in registration order, stops them in reverse, and applies
/// the restart policy to probe results.
pub struct Supervisor {
    entries: Vec<Supervised>,
    policy: RwLock<RestartPolicy>,
    timeouts: RwLock<Timeouts>,
    root: RwLock<Option<PathBuf>>,
}

impl Supervisor {
    pub fn new(components: Vec<Arc<dyn Component>>, config: &HealthConfig) -> Self {
        let entries = components
            .into_iter()
            .map(|component| Supervised {
                health: Mutex::new(ComponentHealth::new(component.name())),
                component,
                lifecycle: tokio::sync::Mutex::new(()),
            })
            .collect();
        Self {
            entries,
            policy: RwLock::new(RestartPolicy::from(config)),
            timeouts: RwLock::new(Timeouts::from(config)),
            root: RwLock::new(None),
        }
    }

    /// Takes effect on the next health check and the next start/stop.
    pub fn set_config(&self, config: &HealthConfig) {
        *self.policy.write() = RestartPolicy::from(config);
        *self.timeouts.write() = Timeouts::from(config);
    }

    fn entry(&self, name: &str) -> Result<&Supervised> {
        self.entries
            .iter()
            .find(|e| e.component.name() == name)
            .ok_or_else(|| WorkspaceError::ComponentNotFound(name.to_string()))
    }

    /// Starts every component in order.
    ///
    /// A fatal error stops whatever already started and is returned. Any other start
    /// failure leaves that component unhealthy for the health loop to restart.
    pub async fn start_all(&self, root: &Path) -> Result<()> {
        *self.root.write() = Some(root.to_path_buf());
        for (i, entry) in self.entries.iter().enumerate() {
            {
                let mut health = entry.health.lock();
                *health = ComponentHealth::new(entry.component.name());
            }
            if let Err(e) = self.start_entry(entry, root).await {
                if e.is_fatal() {
                    error!(target: "wsm::supervisor", component = entry.component.name(), error = %e, "Fatal start failure");
                    for started in self.entries[..i].iter().rev() {
                        self.stop_entry(started).await;
                    }
                    return Err(e);
                }
                warn!(target: "wsm::supervisor", component = entry.component.name(), error = %e, "Component failed to start");
            }
        }
        Ok(())
    }

    /// Stops every component in reverse order. A stop that errors or hangs past the
    /// stop timeout is logged and the sequence continues.
    pub async fn stop_all(&self) {
        for entry in self.entries.iter().rev() {
            self.stop_entry(entry).await;
        }
    }

    async fn start_entry(&self, entry: &Supervised, root: &Path) -> Result<()> {
        let _guard = entry.lifecycle.lock().await;
        let name = entry.component.name();
        let limit = self.timeouts.read().start;
        entry.health.lock().mark_starting();

        let result = match timeout(limit, entry.component.start(root)).await {
            Ok(result) => result,
            Err(_) => Err(WorkspaceError::Timeout(format!(
                "{} did not start within {:?}",
                name, limit
            ))),
        };

        match &result {
            Ok(()) => {
                entry.health.lock().mark_running();
                info!(target: "wsm::supervisor", component = name, "Component started");
            }
            Err(e) => entry.health.lock().mark_start_failed(e.to_string()),
        }
        result
    }

    async fn stop_entry(&self, entry: &Supervised) {
        let _guard = entry.lifecycle.lock().await;
        let name = entry.component.name();
        let limit = self.timeouts.read().stop;
        match timeout(limit, entry.component.stop()).await {
            Ok(Ok(())) => info!(target: "wsm::supervisor", component = name, "Component stopped"),
            Ok(Err(e)) => warn!(target: "wsm::supervisor", component = name, error = %e, "Component stop failed"),
            Err(_) => warn!(
                target: "wsm::supervisor",
                component = name,
                timeout_secs = limit.as_secs_f64(),
                "Component stop timed out, continuing shutdown"
            ),
        }
        entry.health.lock().mark_stopped();
    }

    async fn restart_entry(&self, entry: &Supervised) -> Result<()> {
        let root = self
            .root
            .read()
            .clone()
            .ok_or_else(|| WorkspaceError::InvalidOperation("supervisor was never started".to_string()))?;
        self.stop_entry(entry).await;
        self.start_entry(entry, &root).await
    }

    /// Probes every component once and acts on the outcome.
    pub async fn check_all(&self) -> Vec<ComponentHealth> {
        for entry in &self.entries {
            let probe = entry.component.probe();
            self.apply(entry, &probe).await;
        }
        self.health()
    }

    /// Counts an out-of-band failure (e.g. a watcher error event) as a failed check.
    pub async fn report_failure(&self, name: &str, reason: impl Into<String>) -> Result<HealthAction> {
        let entry = self.entry(name)?;
        Ok(self.apply(entry, &Probe::Unhealthy(reason.into())).await)
    }

    async fn apply(&self, entry: &Supervised, probe: &Probe) -> HealthAction {
        let policy = *self.policy.read();
        let action = entry.health.lock().record(probe, policy);
        let name = entry.component.name();
        match action {
            HealthAction::None => {}
            HealthAction::Restart => {
                let attempt = {
                    let mut health = entry.health.lock();
                    health.record_restart();
                    health.restart_count
                };
                warn!(
                    target: "wsm::supervisor",
                    component = name,
                    attempt,
                    max_restarts = policy.max_restarts,
                    "Restarting unhealthy component"
                );
                if let Err(e) = self.restart_entry(entry).await {
                    error!(target: "wsm::supervisor", component = name, error = %e, "Automatic restart failed");
                }
            }
            HealthAction::GiveUp => {
                error!(
                    target: "wsm::supervisor",
                    component = name,
                    restarts = policy.max_restarts,
                    "Restart budget exhausted, component marked failed"
                );
            }
        }
        action
    }

    /// Restart requested from outside. Clears a failed state without consuming
    /// the automatic restart budget.
    pub async fn restart(&self, name: &str) -> Result<ComponentHealth> {
        let entry = self.entry(name)?;
        entry.health.lock().reset_for_manual_restart();
        info!(target: "wsm::supervisor", component = name, "Manual restart requested");
        self.restart_entry(entry).await?;
        Ok(entry.health.lock().clone())
    }

    pub fn health(&self) -> Vec<ComponentHealth> {
        self.entries.iter().map(|e| e.health.lock().clone()).collect()
    }

    pub fn health_of(&self, name: &str) -> Result<ComponentHealth> {
        Ok(self.entry(name)?.health.lock().clone())
    }

    /// Recorded health merged with a live probe of each component.
    pub fn status(&self) -> Vec<ComponentStatus> {
        self.entries
            .iter()
            .map(|e| {
                let health = e.health.lock().clone();
                ComponentStatus::new(health, e.component.is_running(), e.component.probe())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ComponentState;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct Fake {
        name: &'static str,
        running: AtomicBool,
        healthy: AtomicBool,
        hang_on_stop: bool,
        fatal_start: bool,
        starts: AtomicUsize,
        log: Option<Arc<Mutex<Vec<String>>>>,
    }

    impl Fake {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                healthy: AtomicBool::new(true),
                ..Default::default()
            }
        }

        fn logged(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                log: Some(log.clone()),
                ..Self::new(name)
            }
        }

        fn note(&self, what: &str) {
            if let Some(log) = &self.log {
                log.lock().push(format!("{} {}", what, self.name));
            }
        }
    }

    #[async_trait]
    impl Component for Fake {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn start(&self, root: &Path) -> Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.fatal_start {
                return Err(WorkspaceError::RootNotFound(root.to_path_buf()));
            }
            self.note("start");
            self.running.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            self.note("stop");
            if self.hang_on_stop {
                std::future::pending::<()>().await;
            }
            self.running.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }

        fn probe(&self) -> Probe {
            if self.healthy.load(Ordering::SeqCst) {
                Probe::Healthy
            } else {
                Probe::Unhealthy("simulated failure".to_string())
            }
        }
    }

    fn config() -> HealthConfig {
        HealthConfig {
            start_timeout_secs: 1,
            stop_timeout_secs: 1,
            ..HealthConfig::default()
        }
    }

    #[tokio::test]
    async fn test_start_and_stop_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let components: Vec<Arc<dyn Component>> = vec![
            Arc::new(Fake::logged("monitor", &log)),
            Arc::new(Fake::logged("watcher", &log)),
            Arc::new(Fake::logged("indexer", &log)),
        ];
        let supervisor = Supervisor::new(components, &config());
        supervisor.start_all(Path::new("/tmp")).await.unwrap();
        supervisor.stop_all().await;

        assert_eq!(
            *log.lock(),
            vec![
                "start monitor", "start watcher", "start indexer",
                "stop indexer", "stop watcher", "stop monitor",
            ]
        );
    }

    #[tokio::test]
    async fn test_hanging_stop_does_not_block_shutdown() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let hanging = Fake {
            hang_on_stop: true,
            ..Fake::logged("indexer", &log)
        };
        let components: Vec<Arc<dyn Component>> =
            vec![Arc::new(Fake::logged("watcher", &log)), Arc::new(hanging)];
        let supervisor = Supervisor::new(components, &config());
        supervisor.start_all(Path::new("/tmp")).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), supervisor.stop_all())
            .await
            .expect("shutdown must not deadlock");
        assert!(log.lock().contains(&"stop watcher".to_string()));
        assert!(supervisor.health().iter().all(|h| h.state == ComponentState::Stopped));
    }

    #[tokio::test]
    async fn test_fatal_start_rolls_back() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let broken = Fake {
            fatal_start: true,
            ..Fake::logged("watcher", &log)
        };
        let components: Vec<Arc<dyn Component>> =
            vec![Arc::new(Fake::logged("monitor", &log)), Arc::new(broken)];
        let supervisor = Supervisor::new(components, &config());
        let err = supervisor.start_all(Path::new("/missing")).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(*log.lock(), vec!["start monitor", "stop monitor"]);
    }

    #[tokio::test]
    async fn test_restart_cap() {
        let failing = Arc::new(Fake::new("indexer"));
        failing.healthy.store(false, Ordering::SeqCst);
        let components: Vec<Arc<dyn Component>> = vec![failing.clone()];
        let supervisor = Supervisor::new(components, &config());
        supervisor.start_all(Path::new("/tmp")).await.unwrap();

        for _ in 0..40 {
            supervisor.check_all().await;
        }

        let health = supervisor.health_of("indexer").unwrap();
        assert_eq!(health.restart_count, 5);
        assert_eq!(health.state, ComponentState::Failed);
        // initial start + 5 restarts
        assert_eq!(failing.starts.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_manual_restart_revives_failed_component() {
        let failing = Arc::new(Fake::new("monitor"));
        failing.healthy.store(false, Ordering::SeqCst);
        let cfg = HealthConfig {
            failure_threshold: 1,
            max_restarts: 0,
            ..config()
        };
        let components: Vec<Arc<dyn Component>> = vec![failing.clone()];
        let supervisor = Supervisor::new(components, &cfg);
        supervisor.start_all(Path::new("/tmp")).await.unwrap();
        supervisor.check_all().await;
        assert!(supervisor.health_of("monitor").unwrap().is_failed());

        failing.healthy.store(true, Ordering::SeqCst);
        let health = supervisor.restart("monitor").await.unwrap();
        assert_eq!(health.state, ComponentState::Running);
        assert_eq!(health.restart_count, 0);

        supervisor.check_all().await;
        assert_eq!(supervisor.health_of("monitor").unwrap().state, ComponentState::Healthy);
        assert!(matches!(
            supervisor.restart("nope").await,
            Err(WorkspaceError::ComponentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reported_failures_trigger_restart() {
        let watcher = Arc::new(Fake::new("watcher"));
        let components: Vec<Arc<dyn Component>> = vec![watcher.clone()];
        let supervisor = Supervisor::new(components, &config());
        supervisor.start_all(Path::new("/tmp")).await.unwrap();

        for _ in 0..2 {
            assert_eq!(supervisor.report_failure("watcher", "inotify overflow").await.unwrap(), HealthAction::None);
        }
        assert_eq!(supervisor.report_failure("watcher", "inotify overflow").await.unwrap(), HealthAction::Restart);
        assert_eq!(watcher.starts.load(Ordering::SeqCst), 2);
    }
}
