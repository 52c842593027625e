use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use wsm_core::ConfigSummary;

use crate::health::{ComponentHealth, ComponentState, Probe};
use crate::monitor::Alert;

/// Recorded health of a component merged with a live probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub name: String,
    pub state: ComponentState,
    pub running: bool,
    pub healthy: bool,
    pub probe: Probe,
    pub last_check: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub restart_count: u32,
    pub last_error: Option<String>,
}

impl ComponentStatus {
    pub fn new(health: ComponentHealth, running: bool, probe: Probe) -> Self {
        let healthy = running && probe.is_healthy() && health.state != ComponentState::Failed;
        Self {
            name: health.name,
            state: health.state,
            running,
            healthy,
            probe,
            last_check: health.last_check,
            consecutive_failures: health.consecutive_failures,
            restart_count: health.restart_count,
            last_error: health.last_error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceStatus {
    pub running: bool,
    pub root: Option<PathBuf>,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_seconds: u64,
    pub components: Vec<ComponentStatus>,
    pub config: ConfigSummary,
}

impl WorkspaceStatus {
    pub fn component(&self, name: &str) -> Option<&ComponentStatus> {
        self.components.iter().find(|c| c.name == name)
    }
}

/// Payload of the periodic `healthCheck` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub timestamp: DateTime<Utc>,
    pub components: Vec<ComponentHealth>,
    pub failed: Vec<String>,
    pub alerts: Vec<Alert>,
}

impl HealthReport {
    pub fn new(components: Vec<ComponentHealth>, alerts: Vec<Alert>) -> Self {
        let failed = components
            .iter()
            .filter(|c| c.is_failed())
            .map(|c| c.name.clone())
            .collect();
        Self {
            timestamp: Utc::now(),
            components,
            failed,
            alerts,
        }
    }
}
