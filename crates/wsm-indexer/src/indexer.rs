use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use wsm_core::{IndexerConfig, Language, Result, WorkspaceError};

use crate::analyzers::{AnalyzerRegistry, ParseOutput};
use crate::graph::{DependencyGraph, NodeId};
use crate::resolver::resolve_import;
use crate::types::{
    AnalysisReport, AnalysisSummary, Cycle, FileAnalysis, ImportDeclaration, ImportTarget,
    IndexerEvent, ResolvedImport,
};

#[derive(Default)]
struct IndexState {
    analyses: BTreeMap<PathBuf, FileAnalysis>,
    graph: DependencyGraph,
    cycles: BTreeSet<Cycle>,
    /// Ticket of the last committed write per path
    committed: HashMap<PathBuf, u64>,
    last_full: Option<AnalysisSummary>,
}

/// Owns every FileAnalysis and the DependencyGraph for one watched root.
///
/// All index state sits behind a single lock, so replacing a file's edges and
/// refreshing the cycles it touches is atomic for readers. Parsing happens outside
/// the lock on the blocking pool; each parse carries a ticket and is dropped if a
/// newer write for the same path committed first.
pub struct DependencyIndexer {
    config: RwLock<IndexerConfig>,
    registry: Arc<AnalyzerRegistry>,
    root: RwLock<Option<PathBuf>>,
    state: RwLock<IndexState>,
    next_ticket: AtomicU64,
    running: AtomicBool,
    event_tx: mpsc::UnboundedSender<IndexerEvent>,
}

#[derive(Serialize)]
struct IndexSnapshot<'a> {
    metadata: SnapshotMetadata<'a>,
    files: Vec<&'a FileAnalysis>,
}

#[derive(Serialize)]
struct SnapshotMetadata<'a> {
    root: &'a Path,
    generated_at: chrono::DateTime<Utc>,
    total_files: usize,
    total_dependencies: usize,
    cycles: &'a BTreeSet<Cycle>,
}

impl DependencyIndexer {
    pub fn new(config: IndexerConfig) -> (Self, mpsc::UnboundedReceiver<IndexerEvent>) {
        Self::with_registry(config, AnalyzerRegistry::new())
    }

    pub fn with_registry(
        config: IndexerConfig,
        registry: AnalyzerRegistry,
    ) -> (Self, mpsc::UnboundedReceiver<IndexerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let indexer = Self {
            config: RwLock::new(config),
            registry: Arc::new(registry),
            root: RwLock::new(None),
            state: RwLock::new(IndexState::default()),
            next_ticket: AtomicU64::new(0),
            running: AtomicBool::new(false),
            event_tx,
        };
        (indexer, event_rx)
    }

    /// Begins a fresh index for `root`. Prior analyses are discarded.
    pub fn start(&self, root: &Path) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(WorkspaceError::InvalidOperation(
                "indexer is already running".to_string(),
            ));
        }
        if !root.is_dir() {
            return Err(WorkspaceError::RootNotFound(root.to_path_buf()));
        }
        *self.state.write() = IndexState::default();
        *self.root.write() = Some(root.to_path_buf());
        self.running.store(true, Ordering::SeqCst);
        info!(target: "wsm::indexer", root = %root.display(), "Indexer started");
        Ok(())
    }

    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!(target: "wsm::indexer", "Indexer stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> IndexerConfig {
        self.config.read().clone()
    }

    pub fn set_config(&self, config: IndexerConfig) {
        *self.config.write() = config;
    }

    fn require_root(&self) -> Result<PathBuf> {
        if !self.is_running() {
            return Err(WorkspaceError::InvalidOperation(
                "indexer is not running".to_string(),
            ));
        }
        self.root
            .read()
            .clone()
            .ok_or_else(|| WorkspaceError::InvalidOperation("indexer has no root".to_string()))
    }

    fn take_ticket(&self) -> u64 {
        self.next_ticket.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn emit(&self, event: IndexerEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Re-parses one file (path relative to the root) and replaces its analysis and edges.
    ///
    /// Returns `None` when the file no longer exists (it is removed from the index) or
    /// when a newer write for the same path already committed.
    pub async fn update_file(&self, relative: &Path) -> Result<Option<FileAnalysis>> {
        let root = self.require_root()?;
        let ticket = self.take_ticket();

        let Some((language, output)) = self.parse_file(&root, relative).await else {
            self.remove_file(relative)?;
            return Ok(None);
        };

        let max_cycles = self.config.read().max_cycles;
        let (analysis, events) = {
            let mut state = self.state.write();
            let Some(changed) = commit(&mut state, relative, ticket, language, output, false, max_cycles) else {
                debug!(target: "wsm::indexer", path = %relative.display(), ticket, "Dropping stale analysis");
                return Ok(None);
            };
            let analysis = state.analyses.get(relative).cloned();
            (analysis, analyzed_events(&state, &changed, max_cycles))
        };

        for event in events {
            self.emit(event);
        }
        Ok(analysis)
    }

    /// Drops a file's analysis and node. Importers fall back to unresolved imports.
    pub fn remove_file(&self, relative: &Path) -> Result<bool> {
        self.require_root()?;
        let ticket = self.take_ticket();
        let max_cycles = self.config.read().max_cycles;

        let (existed, events) = {
            let mut state = self.state.write();
            state.committed.insert(relative.to_path_buf(), ticket);
            let existed = state.analyses.remove(relative).is_some();
            let importers = state.graph.remove_node(relative).unwrap_or_default();
            state.cycles.retain(|c| !c.iter().any(|p| p == relative));

            let changed: Vec<PathBuf> = importers
                .into_iter()
                .filter(|importer| reresolve(&mut state, importer))
                .collect();
            refresh_cycles(&mut state, &changed, max_cycles);
            (existed, analyzed_events(&state, &changed, max_cycles))
        };

        if existed {
            debug!(target: "wsm::indexer", path = %relative.display(), "File removed from index");
            self.emit(IndexerEvent::FileRemoved {
                path: relative.to_path_buf(),
            });
        }
        for event in events {
            self.emit(event);
        }
        Ok(existed)
    }

    /// Full analysis of `paths` in batches of `batch_size`, yielding between files.
    ///
    /// Analyses of files not in `paths` that were not written during the run are
    /// dropped, so this also reconciles the index with a fresh watcher scan.
    pub async fn index_all(&self, paths: Vec<PathBuf>) -> Result<AnalysisSummary> {
        let root = self.require_root()?;
        let config = self.config();
        let started = Instant::now();
        let run_start = self.next_ticket.load(Ordering::SeqCst);
        let batch_size = config.batch_size.max(1);
        info!(target: "wsm::indexer", files = paths.len(), batch_size, "Full analysis started");

        for (batch_no, batch) in paths.chunks(batch_size).enumerate() {
            for relative in batch {
                let ticket = self.take_ticket();
                match self.parse_file(&root, relative).await {
                    Some((language, output)) => {
                        let mut state = self.state.write();
                        commit(&mut state, relative, ticket, language, output, true, config.max_cycles);
                    }
                    None => {
                        debug!(target: "wsm::indexer", path = %relative.display(), "File vanished before analysis")
                    }
                }
                tokio::task::yield_now().await;
            }
            debug!(target: "wsm::indexer", batch = batch_no + 1, size = batch.len(), "Batch analyzed");
            if !self.is_running() {
                return Err(WorkspaceError::InvalidOperation(
                    "indexer stopped during full analysis".to_string(),
                ));
            }
        }

        let summary = {
            let mut state = self.state.write();
            let keep: HashSet<&PathBuf> = paths.iter().collect();
            let stale: Vec<PathBuf> = state
                .analyses
                .keys()
                .filter(|p| !keep.contains(p))
                .filter(|p| state.committed.get(*p).copied().unwrap_or(0) <= run_start)
                .cloned()
                .collect();
            for path in &stale {
                state.analyses.remove(path);
                state.graph.remove_node(path);
            }
            let IndexState { analyses, committed, .. } = &mut *state;
            committed.retain(|path, ticket| *ticket > run_start || analyses.contains_key(path));

            let all: Vec<PathBuf> = state.analyses.keys().cloned().collect();
            for path in &all {
                reresolve(&mut state, path);
            }
            state.cycles = state.graph.all_cycles(config.max_cycles).into_iter().collect();

            let summary = AnalysisSummary {
                files_analyzed: state.analyses.len(),
                dependencies: state.graph.edge_count(),
                cycles: state.cycles.len(),
                parse_errors: state
                    .analyses
                    .values()
                    .filter(|a| a.parse_error.is_some())
                    .count(),
                duration_ms: started.elapsed().as_millis() as u64,
                completed_at: Utc::now(),
            };
            state.last_full = Some(summary.clone());
            summary
        };

        info!(
            target: "wsm::indexer",
            files = summary.files_analyzed,
            dependencies = summary.dependencies,
            cycles = summary.cycles,
            duration_ms = summary.duration_ms,
            "Full analysis complete"
        );

        if let Some(path) = config.snapshot_path {
            if let Err(e) = self.write_snapshot(&root, &path).await {
                warn!(target: "wsm::indexer", path = %path.display(), error = %e, "Failed to write index snapshot");
            }
        }

        self.emit(IndexerEvent::AnalysisComplete(summary.clone()));
        Ok(summary)
    }

    async fn parse_file(&self, root: &Path, relative: &Path) -> Option<(Language, ParseOutput)> {
        let registry = self.registry.clone();
        let absolute = root.join(relative);
        let rel = relative.to_path_buf();
        let max_bytes = self.config.read().max_file_bytes;
        let language = Language::from_path(relative);

        let output = match tokio::task::spawn_blocking(move || {
            parse_blocking(&registry, &absolute, &rel, max_bytes)
        })
        .await
        {
            Ok(output) => output?,
            Err(e) => ParseOutput::failed(format!("analysis task failed: {}", e)),
        };
        Some((language, output))
    }

    /// Writes the JSON index dump.
    pub async fn write_snapshot(&self, root: &Path, path: &Path) -> Result<()> {
        let json = {
            let state = self.state.read();
            let snapshot = IndexSnapshot {
                metadata: SnapshotMetadata {
                    root,
                    generated_at: Utc::now(),
                    total_files: state.analyses.len(),
                    total_dependencies: state.graph.edge_count(),
                    cycles: &state.cycles,
                },
                files: state.analyses.values().collect(),
            };
            serde_json::to_vec_pretty(&snapshot)?
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    pub fn analysis_report(&self) -> AnalysisReport {
        let state = self.state.read();
        let mut unresolved_imports = 0;
        let mut external = BTreeSet::new();
        for analysis in state.analyses.values() {
            for import in &analysis.imports {
                match &import.target {
                    ImportTarget::Unresolved => unresolved_imports += 1,
                    ImportTarget::External { package } => {
                        external.insert(package.clone());
                    }
                    ImportTarget::Internal { .. } => {}
                }
            }
        }
        AnalysisReport {
            total_files: state.analyses.len(),
            total_dependencies: state.graph.edge_count(),
            unresolved_imports,
            external_packages: external.into_iter().collect(),
            parse_errors: state
                .analyses
                .values()
                .filter(|a| a.parse_error.is_some())
                .count(),
            cycles: state.cycles.iter().cloned().collect(),
            last_full_analysis: state.last_full.clone(),
        }
    }

    pub fn file_analysis(&self, relative: &Path) -> Option<FileAnalysis> {
        self.state.read().analyses.get(relative).cloned()
    }

    pub fn analyses(&self) -> Vec<FileAnalysis> {
        self.state.read().analyses.values().cloned().collect()
    }

    pub fn analysis_count(&self) -> usize {
        self.state.read().analyses.len()
    }

    pub fn last_full_analysis(&self) -> Option<AnalysisSummary> {
        self.state.read().last_full.clone()
    }

    pub fn cycles(&self) -> Vec<Cycle> {
        self.state.read().cycles.iter().cloned().collect()
    }

    /// Files with an internal edge into `relative`.
    pub fn dependents(&self, relative: &Path) -> Vec<PathBuf> {
        let state = self.state.read();
        state
            .graph
            .node_id(relative)
            .map(|id| {
                state
                    .graph
                    .dependents(id)
                    .into_iter()
                    .map(Path::to_path_buf)
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn parse_blocking(
    registry: &AnalyzerRegistry,
    absolute: &Path,
    relative: &Path,
    max_bytes: u64,
) -> Option<ParseOutput> {
    let meta = match std::fs::metadata(absolute) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => return Some(ParseOutput::failed(format!("unreadable: {}", e))),
    };
    let Some(analyzer) = registry.for_path(relative) else {
        return Some(ParseOutput::failed(format!(
            "unsupported file type: {}",
            Language::from_path(relative)
        )));
    };
    if meta.len() > max_bytes {
        return Some(ParseOutput::failed(format!(
            "file too large: {} bytes (limit {})",
            meta.len(),
            max_bytes
        )));
    }
    let bytes = match std::fs::read(absolute) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => return Some(ParseOutput::failed(format!("unreadable: {}", e))),
    };
    match String::from_utf8(bytes) {
        Ok(content) => Some(analyzer.parse(&content)),
        Err(_) => Some(ParseOutput::failed("undecodable content: not valid UTF-8")),
    }
}

fn resolve_all(
    graph: &DependencyGraph,
    relative: &Path,
    imports: impl Iterator<Item = ImportDeclaration>,
) -> Vec<ResolvedImport> {
    imports
        .map(|decl| {
            let target = resolve_import(relative, &decl, &|p| graph.contains(p));
            ResolvedImport {
                specifier: decl.specifier,
                kind: decl.kind,
                line: decl.line,
                target,
            }
        })
        .collect()
}

fn internal_edges(graph: &DependencyGraph, imports: &[ResolvedImport]) -> Vec<(NodeId, String)> {
    imports
        .iter()
        .filter_map(|i| match &i.target {
            ImportTarget::Internal { path } => Some((graph.node_id(path)?, i.specifier.clone())),
            _ => None,
        })
        .collect()
}

/// Applies one parse result. Returns every path whose analysis changed, or `None`
/// when a newer write for the path already committed.
fn commit(
    state: &mut IndexState,
    relative: &Path,
    ticket: u64,
    language: Language,
    output: ParseOutput,
    bulk: bool,
    max_cycles: usize,
) -> Option<Vec<PathBuf>> {
    if state.committed.get(relative).copied().unwrap_or(0) > ticket {
        return None;
    }
    state.committed.insert(relative.to_path_buf(), ticket);

    let (id, created) = state.graph.ensure_node(relative);
    let imports = resolve_all(&state.graph, relative, output.imports.into_iter());
    let edges = internal_edges(&state.graph, &imports);
    state.graph.set_edges(id, edges);

    let parse_error = if output.errors.is_empty() {
        None
    } else {
        Some(output.errors.join("; "))
    };
    state.analyses.insert(
        relative.to_path_buf(),
        FileAnalysis {
            path: relative.to_path_buf(),
            language,
            imports,
            exports: output.exports,
            parse_error,
            analyzed_at: Utc::now(),
        },
    );

    let mut changed = vec![relative.to_path_buf()];
    if bulk {
        return Some(changed);
    }
    if created {
        // A new file may satisfy imports that previously resolved to nothing.
        let waiting: Vec<PathBuf> = state
            .analyses
            .values()
            .filter(|a| a.path != relative)
            .filter(|a| {
                a.imports
                    .iter()
                    .any(|i| !matches!(i.target, ImportTarget::Internal { .. }))
            })
            .map(|a| a.path.clone())
            .collect();
        for path in waiting {
            if reresolve(state, &path) {
                changed.push(path);
            }
        }
    }
    refresh_cycles(state, &changed, max_cycles);
    Some(changed)
}

/// Re-resolves an analyzed file's imports against the current node set.
fn reresolve(state: &mut IndexState, relative: &Path) -> bool {
    let Some(analysis) = state.analyses.get(relative) else {
        return false;
    };
    let decls = analysis
        .imports
        .iter()
        .map(|i| ImportDeclaration::new(i.specifier.clone(), i.kind, i.line));
    let updated = resolve_all(&state.graph, relative, decls);
    if updated == analysis.imports {
        return false;
    }
    let edges = internal_edges(&state.graph, &updated);
    if let Some(id) = state.graph.node_id(relative) {
        state.graph.set_edges(id, edges);
    }
    if let Some(analysis) = state.analyses.get_mut(relative) {
        analysis.imports = updated;
    }
    true
}

/// Drops cached cycles through `changed` and re-enumerates everything reachable from them.
fn refresh_cycles(state: &mut IndexState, changed: &[PathBuf], max_cycles: usize) {
    if changed.is_empty() {
        return;
    }
    state
        .cycles
        .retain(|cycle| !changed.iter().any(|p| cycle.contains(p)));
    for path in changed {
        let Some(id) = state.graph.node_id(path) else {
            continue;
        };
        for cycle in state.graph.cycles_from(id, max_cycles) {
            if state.cycles.len() >= max_cycles {
                return;
            }
            state.cycles.insert(cycle);
        }
    }
}

/// One FileAnalyzed per changed path, carrying every cycle reachable from it.
fn analyzed_events(state: &IndexState, changed: &[PathBuf], max_cycles: usize) -> Vec<IndexerEvent> {
    changed
        .iter()
        .filter_map(|path| {
            let analysis = state.analyses.get(path)?.clone();
            let cycles = state
                .graph
                .node_id(path)
                .map(|id| state.graph.cycles_from(id, max_cycles))
                .unwrap_or_default();
            Some(IndexerEvent::FileAnalyzed { analysis, cycles })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn full_analysis_forgets_tickets_of_removed_files() -> Result<()> {
        let dir = TempDir::new()?;
        std::fs::write(dir.path().join("a.js"), "import './b';\n")?;
        std::fs::write(dir.path().join("b.js"), "")?;
        let (indexer, _rx) = DependencyIndexer::new(IndexerConfig::default());
        indexer.start(dir.path())?;
        indexer
            .index_all(vec![PathBuf::from("a.js"), PathBuf::from("b.js")])
            .await?;

        std::fs::remove_file(dir.path().join("b.js"))?;
        indexer.remove_file(Path::new("b.js"))?;
        assert!(indexer.state.read().committed.contains_key(Path::new("b.js")));

        indexer.index_all(vec![PathBuf::from("a.js")]).await?;
        let state = indexer.state.read();
        assert_eq!(state.committed.len(), 1);
        assert!(state.committed.contains_key(Path::new("a.js")));
        Ok(())
    }
}
