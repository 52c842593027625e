//! Orchestration layer: per-component health state machines, the supervisor that
//! starts, stops and restarts components, the system monitor, and the event bus that
//! fans every component's outbound channel out to external subscribers.

pub mod component;
pub mod events;
pub mod health;
pub mod manager;
pub mod monitor;
pub mod status;
pub mod supervisor;
pub mod visualizer;

pub use component::{Component, IndexerComponent, MonitorComponent, VisualizerComponent, WatcherComponent};
pub use events::{EventBus, EventEnvelope, WorkspaceEvent, WorkspaceSnapshot};
pub use health::{ComponentHealth, ComponentState, HealthAction, Probe, RestartPolicy};
pub use manager::WorkspaceManager;
pub use monitor::{Alert, MetricsReport, MetricsSource, MonitorEvent, Resource, SysinfoSource, SystemMetrics, SystemMonitor};
pub use status::{ComponentStatus, HealthReport, WorkspaceStatus};
pub use supervisor::Supervisor;
pub use visualizer::Visualizer;
