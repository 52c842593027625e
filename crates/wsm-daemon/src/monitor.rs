use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sysinfo::{Disks, Networks, System};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use wsm_core::{MonitorConfig, Result, WorkspaceError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub disk_percent: f64,
    pub disk_used_bytes: u64,
    pub disk_total_bytes: u64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
    /// Re-published last sample because the source failed
    pub stale: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Resource {
    Cpu,
    Memory,
    Disk,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub resource: Resource,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub latest: Option<SystemMetrics>,
    pub history: Vec<SystemMetrics>,
}

#[derive(Debug, Clone)]
pub enum MonitorEvent {
    Sample {
        metrics: SystemMetrics,
        alerts: Vec<Alert>,
    },
}

/// Something that can produce a resource sample.
pub trait MetricsSource: Send {
    fn sample(&mut self) -> Result<SystemMetrics>;
}

/// Host metrics through `sysinfo`.
pub struct SysinfoSource {
    system: System,
    disks: Disks,
    networks: Networks,
}

impl SysinfoSource {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is a delta; prime it so the first real sample has a baseline.
        system.refresh_cpu_usage();
        Self {
            system,
            disks: Disks::new_with_refreshed_list(),
            networks: Networks::new_with_refreshed_list(),
        }
    }
}

impl Default for SysinfoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSource for SysinfoSource {
    fn sample(&mut self) -> Result<SystemMetrics> {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();
        self.disks.refresh(true);
        self.networks.refresh(true);

        let memory_total = self.system.total_memory();
        if memory_total == 0 {
            return Err(WorkspaceError::ComponentFailed {
                component: "monitor".to_string(),
                reason: "memory information unavailable".to_string(),
            });
        }
        let memory_used = self.system.used_memory();

        let (disk_total, disk_available) = self
            .disks
            .list()
            .iter()
            .fold((0u64, 0u64), |(total, available), disk| {
                (total + disk.total_space(), available + disk.available_space())
            });
        let disk_used = disk_total.saturating_sub(disk_available);

        let (rx, tx) = self
            .networks
            .list()
            .values()
            .fold((0u64, 0u64), |(rx, tx), data| {
                (rx + data.total_received(), tx + data.total_transmitted())
            });

        Ok(SystemMetrics {
            timestamp: Utc::now(),
            cpu_percent: self.system.global_cpu_usage() as f64,
            memory_percent: percent(memory_used, memory_total),
            memory_used_bytes: memory_used,
            memory_total_bytes: memory_total,
            disk_percent: percent(disk_used, disk_total),
            disk_used_bytes: disk_used,
            disk_total_bytes: disk_total,
            network_rx_bytes: rx,
            network_tx_bytes: tx,
            stale: false,
        })
    }
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64 * 100.0
    }
}

#[derive(Default)]
struct Samples {
    latest: Option<SystemMetrics>,
    history: VecDeque<SystemMetrics>,
}

/// Samples host resources on a fixed timer and keeps a bounded history.
pub struct SystemMonitor {
    config: RwLock<MonitorConfig>,
    source: Arc<Mutex<Box<dyn MetricsSource>>>,
    samples: Arc<RwLock<Samples>>,
    running: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
    event_tx: mpsc::UnboundedSender<MonitorEvent>,
}

impl SystemMonitor {
    pub fn new(config: MonitorConfig) -> (Self, mpsc::UnboundedReceiver<MonitorEvent>) {
        Self::with_source(config, Box::new(SysinfoSource::new()))
    }

    pub fn with_source(
        config: MonitorConfig,
        source: Box<dyn MetricsSource>,
    ) -> (Self, mpsc::UnboundedReceiver<MonitorEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let monitor = Self {
            config: RwLock::new(config),
            source: Arc::new(Mutex::new(source)),
            samples: Arc::new(RwLock::new(Samples::default())),
            running: AtomicBool::new(false),
            task: Mutex::new(None),
            event_tx,
        };
        (monitor, event_rx)
    }

    pub fn config(&self) -> MonitorConfig {
        self.config.read().clone()
    }

    pub fn set_config(&self, config: MonitorConfig) {
        *self.config.write() = config;
    }

    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(WorkspaceError::InvalidOperation(
                "monitor is already running".to_string(),
            ));
        }
        let config = self.config();
        let sampler = Sampler {
            config: config.clone(),
            source: self.source.clone(),
            samples: self.samples.clone(),
            event_tx: self.event_tx.clone(),
        };
        let interval = Duration::from_millis(config.sample_interval_ms.max(1));
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                sampler.sample_once().await;
            }
        });
        *self.task.lock() = Some(task);
        info!(target: "wsm::monitor", interval_ms = config.sample_interval_ms, "System monitor started");
        Ok(())
    }

    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
            info!(target: "wsm::monitor", "System monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// False when the sampling task has exited (or panicked) without a stop.
    pub fn is_loop_alive(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|task| !task.is_finished())
    }

    #[cfg(test)]
    pub(crate) fn abort_sampler(&self) {
        if let Some(task) = self.task.lock().as_ref() {
            task.abort();
        }
    }

    pub fn latest(&self) -> Option<SystemMetrics> {
        self.samples.read().latest.clone()
    }

    /// Latest sample plus the rolling history, oldest first.
    pub fn metrics(&self) -> MetricsReport {
        let samples = self.samples.read();
        MetricsReport {
            latest: samples.latest.clone(),
            history: samples.history.iter().cloned().collect(),
        }
    }

    pub fn check_alerts(&self) -> Vec<Alert> {
        match self.latest() {
            Some(metrics) => alerts_for(&metrics, &self.config.read()),
            None => Vec::new(),
        }
    }
}

struct Sampler {
    config: MonitorConfig,
    source: Arc<Mutex<Box<dyn MetricsSource>>>,
    samples: Arc<RwLock<Samples>>,
    event_tx: mpsc::UnboundedSender<MonitorEvent>,
}

impl Sampler {
    async fn sample_once(&self) {
        let source = self.source.clone();
        let sampled = tokio::task::spawn_blocking(move || source.lock().sample())
            .await
            .unwrap_or_else(|e| {
                Err(WorkspaceError::ComponentFailed {
                    component: "monitor".to_string(),
                    reason: e.to_string(),
                })
            });

        let metrics = match sampled {
            Ok(metrics) => metrics,
            Err(e) => {
                let Some(last) = self.samples.read().latest.clone() else {
                    warn!(target: "wsm::monitor", error = %e, "Metrics unavailable and no previous sample");
                    return;
                };
                warn!(target: "wsm::monitor", error = %e, "Metrics unavailable, reusing last sample");
                SystemMetrics {
                    timestamp: Utc::now(),
                    stale: true,
                    ..last
                }
            }
        };

        {
            let mut samples = self.samples.write();
            samples.history.push_back(metrics.clone());
            while samples.history.len() > self.config.history_size.max(1) {
                samples.history.pop_front();
            }
            samples.latest = Some(metrics.clone());
        }

        let alerts = alerts_for(&metrics, &self.config);
        debug!(
            target: "wsm::monitor",
            cpu = metrics.cpu_percent,
            memory = metrics.memory_percent,
            disk = metrics.disk_percent,
            alerts = alerts.len(),
            "Sampled system metrics"
        );
        let _ = self.event_tx.send(MonitorEvent::Sample { metrics, alerts });
    }
}

fn alerts_for(metrics: &SystemMetrics, config: &MonitorConfig) -> Vec<Alert> {
    [
        (Resource::Cpu, metrics.cpu_percent, config.cpu_threshold, "High CPU usage"),
        (Resource::Memory, metrics.memory_percent, config.memory_threshold, "High memory usage"),
        (Resource::Disk, metrics.disk_percent, config.disk_threshold, "High disk usage"),
    ]
    .into_iter()
    .filter(|(_, value, threshold, _)| value > threshold)
    .map(|(resource, value, threshold, label)| Alert {
        resource,
        value,
        threshold,
        message: format!("{}: {:.1}% (threshold {:.0}%)", label, value, threshold),
    })
    .collect()
}
