use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use wsm_core::HealthConfig;

/// Lifecycle of a supervised component.
///
/// `Stopped -> Starting -> Running -> {Healthy, Unhealthy} -> Stopped`, plus `Failed`
/// once the restart budget is spent. `Failed` is left only by a manual restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ComponentState {
    Stopped,
    Starting,
    Running,
    Healthy,
    Unhealthy,
    Failed,
}

impl std::fmt::Display for ComponentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentState::Stopped => write!(f, "stopped"),
            ComponentState::Starting => write!(f, "starting"),
            ComponentState::Running => write!(f, "running"),
            ComponentState::Healthy => write!(f, "healthy"),
            ComponentState::Unhealthy => write!(f, "unhealthy"),
            ComponentState::Failed => write!(f, "failed"),
        }
    }
}

/// Result of one health probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "reason", rename_all = "camelCase")]
pub enum Probe {
    Healthy,
    /// Not healthy yet, but not a failure either (initial scan, first sample, ...)
    Warming(String),
    Unhealthy(String),
}

impl Probe {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Probe::Healthy)
    }
}

/// What the supervisor should do after recording a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthAction {
    None,
    Restart,
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub failure_threshold: u32,
    pub max_restarts: u32,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            max_restarts: 5,
        }
    }
}

impl From<&HealthConfig> for RestartPolicy {
    fn from(config: &HealthConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            max_restarts: config.max_restarts,
        }
    }
}

/// Recorded health of one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub state: ComponentState,
    pub running: bool,
    pub healthy: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub restart_count: u32,
    pub last_error: Option<String>,
}

impl ComponentHealth {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: ComponentState::Stopped,
            running: false,
            healthy: false,
            last_check: None,
            consecutive_failures: 0,
            restart_count: 0,
            last_error: None,
        }
    }

    pub fn mark_starting(&mut self) {
        self.state = ComponentState::Starting;
        self.running = false;
        self.healthy = false;
    }

    pub fn mark_running(&mut self) {
        self.state = ComponentState::Running;
        self.running = true;
        self.healthy = false;
        self.consecutive_failures = 0;
    }

    /// A start attempt that failed or timed out.
    pub fn mark_start_failed(&mut self, reason: impl Into<String>) {
        self.state = ComponentState::Unhealthy;
        self.running = false;
        self.healthy = false;
        self.last_error = Some(reason.into());
    }

    pub fn mark_stopped(&mut self) {
        if self.state != ComponentState::Failed {
            self.state = ComponentState::Stopped;
        }
        self.running = false;
        self.healthy = false;
    }

    pub fn is_failed(&self) -> bool {
        self.state == ComponentState::Failed
    }

    /// Folds one probe result into the state machine.
    pub fn record(&mut self, probe: &Probe, policy: RestartPolicy) -> HealthAction {
        self.last_check = Some(Utc::now());
        match self.state {
            ComponentState::Failed | ComponentState::Stopped | ComponentState::Starting => {
                return HealthAction::None;
            }
            _ => {}
        }

        match probe {
            Probe::Healthy => {
                if self.state == ComponentState::Unhealthy {
                    info!(target: "wsm::health", component = %self.name, "Component recovered");
                }
                self.state = ComponentState::Healthy;
                self.healthy = true;
                self.consecutive_failures = 0;
                HealthAction::None
            }
            Probe::Warming(reason) => {
                debug!(target: "wsm::health", component = %self.name, reason = %reason, "Component warming up");
                self.healthy = false;
                if self.state != ComponentState::Unhealthy {
                    self.state = ComponentState::Running;
                }
                HealthAction::None
            }
            Probe::Unhealthy(reason) => {
                self.state = ComponentState::Unhealthy;
                self.healthy = false;
                self.consecutive_failures += 1;
                self.last_error = Some(reason.clone());
                warn!(
                    target: "wsm::health",
                    component = %self.name,
                    failures = self.consecutive_failures,
                    reason = %reason,
                    "Health check failed"
                );

                if self.consecutive_failures < policy.failure_threshold {
                    HealthAction::None
                } else if self.restart_count >= policy.max_restarts {
                    self.state = ComponentState::Failed;
                    HealthAction::GiveUp
                } else {
                    HealthAction::Restart
                }
            }
        }
    }

    /// Counts an automatic restart against the budget.
    pub fn record_restart(&mut self) {
        self.restart_count += 1;
        self.consecutive_failures = 0;
    }

    /// Manual restarts clear `Failed` without touching the restart budget.
    pub fn reset_for_manual_restart(&mut self) {
        if self.state == ComponentState::Failed {
            self.state = ComponentState::Stopped;
        }
        self.consecutive_failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(name: &str) -> ComponentHealth {
        let mut health = ComponentHealth::new(name);
        health.mark_starting();
        health.mark_running();
        health
    }

    fn fail() -> Probe {
        Probe::Unhealthy("probe failed".to_string())
    }

    #[test]
    fn test_restart_after_threshold() {
        let policy = RestartPolicy::default();
        let mut health = running("indexer");

        assert_eq!(health.record(&fail(), policy), HealthAction::None);
        assert_eq!(health.record(&fail(), policy), HealthAction::None);
        assert_eq!(health.state, ComponentState::Unhealthy);
        assert_eq!(health.record(&fail(), policy), HealthAction::Restart);
        assert_eq!(health.last_error.as_deref(), Some("probe failed"));
    }

    #[test]
    fn test_healthy_probe_resets_failures() {
        let policy = RestartPolicy::default();
        let mut health = running("watcher");
        health.record(&fail(), policy);
        health.record(&fail(), policy);
        assert_eq!(health.record(&Probe::Healthy, policy), HealthAction::None);
        assert_eq!(health.consecutive_failures, 0);
        assert!(health.healthy);
        assert_eq!(health.state, ComponentState::Healthy);
    }

    #[test]
    fn test_warming_is_not_a_failure() {
        let policy = RestartPolicy::default();
        let mut health = running("watcher");
        for _ in 0..10 {
            assert_eq!(
                health.record(&Probe::Warming("scanning".to_string()), policy),
                HealthAction::None
            );
        }
        assert_eq!(health.state, ComponentState::Running);
        assert!(!health.healthy);
        assert_eq!(health.consecutive_failures, 0);
    }

    #[test]
    fn test_restart_cap_gives_up_once() {
        let policy = RestartPolicy {
            failure_threshold: 3,
            max_restarts: 5,
        };
        let mut health = running("indexer");
        let mut restarts = 0;
        let mut gave_up = 0;

        for _ in 0..100 {
            match health.record(&fail(), policy) {
                HealthAction::Restart => {
                    restarts += 1;
                    health.record_restart();
                    health.mark_starting();
                    health.mark_running();
                }
                HealthAction::GiveUp => gave_up += 1,
                HealthAction::None => {}
            }
        }

        assert_eq!(restarts, 5);
        assert_eq!(gave_up, 1);
        assert_eq!(health.state, ComponentState::Failed);
        assert_eq!(health.restart_count, 5);
    }

    #[test]
    fn test_manual_restart_clears_failed() {
        let policy = RestartPolicy {
            failure_threshold: 1,
            max_restarts: 0,
        };
        let mut health = running("monitor");
        assert_eq!(health.record(&fail(), policy), HealthAction::GiveUp);
        health.mark_stopped();
        assert!(health.is_failed());

        health.reset_for_manual_restart();
        health.mark_starting();
        health.mark_running();
        assert_eq!(health.state, ComponentState::Running);
        assert_eq!(health.restart_count, 0);
    }

    #[test]
    fn test_stopped_components_ignore_probes() {
        let mut health = ComponentHealth::new("visualizer");
        assert_eq!(health.record(&fail(), RestartPolicy::default()), HealthAction::None);
        assert_eq!(health.state, ComponentState::Stopped);
        assert_eq!(health.consecutive_failures, 0);
    }
}
