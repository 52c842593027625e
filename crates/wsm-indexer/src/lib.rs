//! Dependency indexing: per-language import extraction, resolution against the
//! watched tree, an incrementally maintained dependency graph and its cycles.

pub mod analyzers;
pub mod graph;
pub mod indexer;
pub mod resolver;
pub mod topology;
pub mod types;

pub use analyzers::{AnalyzerRegistry, LanguageAnalyzer, ParseOutput};
pub use graph::DependencyGraph;
pub use indexer::DependencyIndexer;
pub use resolver::resolve_import;
pub use topology::{build_topology, NodeKind, Topology, TopologyEdge, TopologyNode};
pub use types::*;
