use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use wsm_indexer::{AnalysisReport, AnalysisSummary, Cycle, FileAnalysis, Topology};
use wsm_watcher::{ChangeEvent, ChangeKind};

use crate::monitor::{Alert, SystemMetrics};
use crate::status::{HealthReport, WorkspaceStatus};

/// Full current state, sent to a subscriber before any incremental event.
#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceSnapshot {
    pub status: WorkspaceStatus,
    pub analysis: AnalysisReport,
    pub metrics: Option<SystemMetrics>,
}

/// Every event the manager publishes. Serialized as `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum WorkspaceEvent {
    Snapshot(Box<WorkspaceSnapshot>),
    WatcherReady {
        tracked_files: usize,
        duration_ms: u64,
    },
    FileAdded(ChangeEvent),
    FileChanged(ChangeEvent),
    FileDeleted(ChangeEvent),
    DirectoryAdded(ChangeEvent),
    DirectoryDeleted(ChangeEvent),
    WatcherError {
        message: String,
    },
    FileAnalyzed {
        analysis: FileAnalysis,
        cycles: Vec<Cycle>,
    },
    FileRemoved {
        path: PathBuf,
    },
    AnalysisComplete(AnalysisSummary),
    MetricsUpdate {
        metrics: SystemMetrics,
        alerts: Vec<Alert>,
    },
    TopologyGenerated(Topology),
    HealthCheck(HealthReport),
}

impl WorkspaceEvent {
    pub fn from_change(change: ChangeEvent) -> Self {
        match change.kind {
            ChangeKind::Added => WorkspaceEvent::FileAdded(change),
            ChangeKind::Changed => WorkspaceEvent::FileChanged(change),
            ChangeKind::Deleted => WorkspaceEvent::FileDeleted(change),
            ChangeKind::DirAdded => WorkspaceEvent::DirectoryAdded(change),
            ChangeKind::DirDeleted => WorkspaceEvent::DirectoryDeleted(change),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            WorkspaceEvent::Snapshot(_) => "snapshot",
            WorkspaceEvent::WatcherReady { .. } => "watcherReady",
            WorkspaceEvent::FileAdded(_) => "fileAdded",
            WorkspaceEvent::FileChanged(_) => "fileChanged",
            WorkspaceEvent::FileDeleted(_) => "fileDeleted",
            WorkspaceEvent::DirectoryAdded(_) => "directoryAdded",
            WorkspaceEvent::DirectoryDeleted(_) => "directoryDeleted",
            WorkspaceEvent::WatcherError { .. } => "watcherError",
            WorkspaceEvent::FileAnalyzed { .. } => "fileAnalyzed",
            WorkspaceEvent::FileRemoved { .. } => "fileRemoved",
            WorkspaceEvent::AnalysisComplete(_) => "analysisComplete",
            WorkspaceEvent::MetricsUpdate { .. } => "metricsUpdate",
            WorkspaceEvent::TopologyGenerated(_) => "topologyGenerated",
            WorkspaceEvent::HealthCheck(_) => "healthCheck",
        }
    }
}

/// `{seq, timestamp, type, data}` on the wire.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: WorkspaceEvent,
}

/// Best-effort fan-out of published events.
///
/// Publishing never waits on subscribers: a receiver that falls more than the
/// channel capacity behind observes `Lagged` and skips ahead. A ring of recent
/// envelopes allows catch-up by sequence number.
pub struct EventBus {
    tx: broadcast::Sender<Arc<EventEnvelope>>,
    seq: AtomicU64,
    recent: RwLock<VecDeque<Arc<EventEnvelope>>>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            seq: AtomicU64::new(0),
            recent: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Stamps and publishes `event`; returns its sequence number.
    pub fn publish(&self, event: WorkspaceEvent) -> u64 {
        let mut recent = self.recent.write();
        let envelope = Arc::new(self.envelope(event));
        if recent.len() >= self.capacity {
            recent.pop_front();
        }
        recent.push_back(envelope.clone());
        let seq = envelope.seq;
        // No receivers is fine.
        let _ = self.tx.send(envelope);
        seq
    }

    /// Stamps an event without publishing it (used for per-subscriber snapshots).
    pub fn envelope(&self, event: WorkspaceEvent) -> EventEnvelope {
        EventEnvelope {
            seq: self.seq.fetch_add(1, Ordering::SeqCst) + 1,
            timestamp: Utc::now(),
            event,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<EventEnvelope>> {
        self.tx.subscribe()
    }

    pub fn recent_since(&self, seq: u64, limit: usize) -> Vec<Arc<EventEnvelope>> {
        self.recent
            .read()
            .iter()
            .filter(|e| e.seq > seq)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn last_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }
}
