use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use ignore::WalkBuilder;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use wsm_core::{Result, WatchConfig, WorkspaceError};

use crate::filter::PathFilter;
use crate::fingerprint::{snapshot_file, sub_changes};
use crate::types::{
    ChangeEvent, ChangeKind, DirectoryStats, LargestFile, WatchedFile, WatcherEvent,
};

type RawEvent = notify::Result<Event>;

/// Recursive, debounced watcher over a single root.
///
/// The WatchedFile table is written only by the task spawned in [`FileWatcher::start`];
/// everything else reads it through accessors. Events go out on the channel returned
/// by [`FileWatcher::new`], which stays open across stop/start cycles.
pub struct FileWatcher {
    config: RwLock<WatchConfig>,
    files: Arc<DashMap<PathBuf, WatchedFile>>,
    root: RwLock<Option<PathBuf>>,
    event_tx: mpsc::UnboundedSender<WatcherEvent>,
    ready: Arc<watch::Sender<bool>>,
    running: AtomicBool,
    active: Mutex<Option<ActiveWatch>>,
}

struct ActiveWatch {
    watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl FileWatcher {
    pub fn new(config: WatchConfig) -> (Self, mpsc::UnboundedReceiver<WatcherEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (ready, _) = watch::channel(false);
        let watcher = Self {
            config: RwLock::new(config),
            files: Arc::new(DashMap::new()),
            root: RwLock::new(None),
            event_tx,
            ready: Arc::new(ready),
            running: AtomicBool::new(false),
            active: Mutex::new(None),
        };
        (watcher, event_rx)
    }

    /// Registers the OS watch and spawns the initial scan. Returns before the scan
    /// completes; `Ready` is published (and [`wait_ready`](Self::wait_ready) resolves) once it does.
    pub async fn start(&self, root: &Path) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(WorkspaceError::InvalidOperation(
                "watcher is already running".to_string(),
            ));
        }

        let root = match tokio::fs::canonicalize(root).await {
            Ok(p) if p.is_dir() => p,
            Ok(_) => return Err(WorkspaceError::RootNotFound(root.to_path_buf())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(WorkspaceError::RootNotFound(root.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };

        let config = self.config.read().clone();
        let filter = Arc::new(PathFilter::new(&root, &config)?);

        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<RawEvent>();
        let mut watcher = notify::recommended_watcher(move |res: RawEvent| {
            let _ = raw_tx.send(res);
        })
        .map_err(|e| WorkspaceError::Watch(e.to_string()))?;
        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| WorkspaceError::Watch(e.to_string()))?;

        self.files.clear();
        self.ready.send_replace(false);
        *self.root.write() = Some(root.clone());

        let task_state = WatchLoop {
            filter,
            files: self.files.clone(),
            dirs: HashSet::new(),
            pending: HashMap::new(),
            debounce: Duration::from_millis(config.debounce_ms),
            events: self.event_tx.clone(),
            ready: self.ready.clone(),
        };
        let task = tokio::spawn(task_state.run(raw_rx));

        *self.active.lock() = Some(ActiveWatch { watcher, task });
        self.running.store(true, Ordering::SeqCst);
        info!(target: "wsm::watcher", root = %root.display(), "Watching started");
        Ok(())
    }

    /// Releases the OS watch and stops the event task. Nothing is emitted after this returns.
    pub async fn stop(&self) -> Result<()> {
        let active = self.active.lock().take();
        if let Some(ActiveWatch { watcher, task }) = active {
            drop(watcher);
            task.abort();
            let _ = task.await;
            info!(target: "wsm::watcher", "Watching stopped");
        }
        self.running.store(false, Ordering::SeqCst);
        self.ready.send_replace(false);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// False when the event task has exited (or panicked) while the watch is still registered.
    pub fn is_loop_alive(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|active| !active.task.is_finished())
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Waits for the initial scan of the current run, up to `timeout`.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let mut rx = self.ready.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|ready| *ready))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    pub fn root(&self) -> Option<PathBuf> {
        self.root.read().clone()
    }

    pub fn config(&self) -> WatchConfig {
        self.config.read().clone()
    }

    /// Takes effect on the next start.
    pub fn set_config(&self, config: WatchConfig) {
        *self.config.write() = config;
    }

    pub fn tracked_count(&self) -> usize {
        self.files.len()
    }

    pub fn get(&self, relative: &Path) -> Option<WatchedFile> {
        self.files.get(relative).map(|f| f.clone())
    }

    pub fn tracked_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.files.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }

    pub fn tracked_files(&self) -> Vec<WatchedFile> {
        let mut files: Vec<WatchedFile> = self.files.iter().map(|e| e.value().clone()).collect();
        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        files
    }

    /// Per-directory totals over the tracked files, keyed by parent directory.
    pub fn directory_stats(&self) -> Vec<DirectoryStats> {
        let mut by_dir: BTreeMap<PathBuf, DirectoryStats> = BTreeMap::new();
        for entry in self.files.iter() {
            let file = entry.value();
            let dir = file
                .relative_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default();
            let stats = by_dir.entry(dir.clone()).or_insert_with(|| DirectoryStats {
                directory: dir,
                total_files: 0,
                total_bytes: 0,
                file_types: BTreeMap::new(),
                dotfiles: 0,
                largest_file: None,
            });
            stats.total_files += 1;
            stats.total_bytes += file.size;
            *stats
                .file_types
                .entry(file.language.as_str().to_string())
                .or_insert(0) += 1;
            if file.is_dotfile() {
                stats.dotfiles += 1;
            }
            let larger = stats
                .largest_file
                .as_ref()
                .map(|l| file.size > l.size || (file.size == l.size && file.relative_path < l.path))
                .unwrap_or(true);
            if larger {
                stats.largest_file = Some(LargestFile {
                    path: file.relative_path.clone(),
                    size: file.size,
                });
            }
        }
        by_dir.into_values().collect()
    }
}

/// State owned by the per-run watch task.
struct WatchLoop {
    filter: Arc<PathFilter>,
    files: Arc<DashMap<PathBuf, WatchedFile>>,
    dirs: HashSet<PathBuf>,
    pending: HashMap<PathBuf, Instant>,
    debounce: Duration,
    events: mpsc::UnboundedSender<WatcherEvent>,
    ready: Arc<watch::Sender<bool>>,
}

impl WatchLoop {
    async fn run(mut self, mut raw_rx: mpsc::UnboundedReceiver<RawEvent>) {
        // Raw events queue up in `raw_rx` while the initial scan runs.
        let started = Instant::now();
        let root = self.filter.root().to_path_buf();
        let (files, dirs) = self.scan(&root).await;
        for file in files {
            self.files.insert(file.relative_path.clone(), file);
        }
        self.dirs.extend(dirs);
        self.ready.send_replace(true);
        let tracked_files = self.files.len();
        info!(target: "wsm::watcher", tracked_files, "Initial scan complete");
        self.emit(WatcherEvent::Ready {
            tracked_files,
            duration_ms: started.elapsed().as_millis() as u64,
        });

        let mut tick = tokio::time::interval((self.debounce / 2).max(Duration::from_millis(10)));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                raw = raw_rx.recv() => match raw {
                    Some(Ok(event)) => self.buffer(event),
                    Some(Err(e)) => {
                        warn!(target: "wsm::watcher", error = %e, "OS watch error");
                        self.emit(WatcherEvent::Error { message: e.to_string() });
                    }
                    None => break,
                },
                _ = tick.tick() => self.flush_settled().await,
            }
        }
    }

    fn emit(&self, event: WatcherEvent) {
        let _ = self.events.send(event);
    }

    fn buffer(&mut self, event: Event) {
        if matches!(event.kind, EventKind::Access(_)) {
            return;
        }
        let now = Instant::now();
        for path in event.paths {
            if self.filter.relative(&path).is_some() {
                self.pending.insert(path, now);
            }
        }
    }

    async fn flush_settled(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let now = Instant::now();
        let mut settled: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, last)| now.duration_since(**last) >= self.debounce)
            .map(|(p, _)| p.clone())
            .collect();
        // Parents sort before children, so a deleted directory cascades before its entries.
        settled.sort();
        for path in settled {
            self.pending.remove(&path);
            self.reconcile(&path).await;
        }
    }

    /// Compares the settled state of `path` on disk against the table and emits the difference.
    async fn reconcile(&mut self, path: &Path) {
        let Some(rel) = self.filter.relative(path) else {
            return;
        };

        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => {
                if self.dirs.contains(&rel) || !self.filter.should_track_dir(&rel) {
                    return;
                }
                self.dirs.insert(rel.clone());
                self.emit(WatcherEvent::Change(ChangeEvent::new(ChangeKind::DirAdded, rel)));
                // Files written before the OS watch covered the new directory get no events of their own.
                let (files, dirs) = self.scan(path).await;
                self.dirs.extend(dirs);
                for file in files {
                    self.apply_snapshot(file);
                }
            }
            Ok(_) => {
                if !self.filter.should_track_file(&rel) {
                    return;
                }
                let root = self.filter.root().to_path_buf();
                let abs = path.to_path_buf();
                match tokio::task::spawn_blocking(move || snapshot_file(&root, &abs)).await {
                    Ok(Ok(file)) => self.apply_snapshot(file),
                    Ok(Err(e)) if e.kind() == io::ErrorKind::NotFound => self.remove(&rel),
                    Ok(Err(e)) => {
                        warn!(target: "wsm::watcher", path = %rel.display(), error = %e, "Skipping file this cycle")
                    }
                    Err(e) => warn!(target: "wsm::watcher", error = %e, "Snapshot task failed"),
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => self.remove(&rel),
            Err(e) => {
                warn!(target: "wsm::watcher", path = %rel.display(), error = %e, "Skipping path this cycle")
            }
        }
    }

    fn apply_snapshot(&mut self, file: WatchedFile) {
        let rel = file.relative_path.clone();
        let previous = self.files.get(&rel).map(|f| f.clone());
        match previous {
            None => {
                debug!(target: "wsm::watcher", path = %rel.display(), "File added");
                self.files.insert(rel.clone(), file.clone());
                let mut event = ChangeEvent::new(ChangeKind::Added, rel);
                event.current = Some(file);
                self.emit(WatcherEvent::Change(event));
            }
            Some(prev) => {
                if prev.fingerprint == file.fingerprint
                    && prev.size == file.size
                    && prev.modified == file.modified
                {
                    return;
                }
                debug!(target: "wsm::watcher", path = %rel.display(), "File changed");
                self.files.insert(rel.clone(), file.clone());
                let mut event = ChangeEvent::new(ChangeKind::Changed, rel);
                event.sub_changes = sub_changes(&prev, &file);
                event.previous = Some(prev);
                event.current = Some(file);
                self.emit(WatcherEvent::Change(event));
            }
        }
    }

    fn remove(&mut self, rel: &Path) {
        if let Some((_, previous)) = self.files.remove(rel) {
            debug!(target: "wsm::watcher", path = %rel.display(), "File deleted");
            let mut event = ChangeEvent::new(ChangeKind::Deleted, rel.to_path_buf());
            event.previous = Some(previous);
            self.emit(WatcherEvent::Change(event));
            return;
        }

        let mut nested: Vec<PathBuf> = self
            .files
            .iter()
            .filter(|e| e.key().starts_with(rel))
            .map(|e| e.key().clone())
            .collect();
        let was_dir = self.dirs.remove(rel);
        if nested.is_empty() && !was_dir {
            return;
        }

        nested.sort();
        info!(
            target: "wsm::watcher",
            path = %rel.display(),
            files = nested.len(),
            "Directory deleted"
        );
        for path in nested {
            if let Some((_, previous)) = self.files.remove(&path) {
                let mut event = ChangeEvent::new(ChangeKind::Deleted, path);
                event.previous = Some(previous);
                self.emit(WatcherEvent::Change(event));
            }
        }
        self.dirs.retain(|d| !d.starts_with(rel));
        self.emit(WatcherEvent::Change(ChangeEvent::new(
            ChangeKind::DirDeleted,
            rel.to_path_buf(),
        )));
    }

    /// Walks `start` on the blocking pool, returning tracked files and the directories visited.
    async fn scan(&self, start: &Path) -> (Vec<WatchedFile>, Vec<PathBuf>) {
        let filter = self.filter.clone();
        let start = start.to_path_buf();
        let result = tokio::task::spawn_blocking(move || scan_tree(&filter, &start)).await;
        match result {
            Ok(found) => found,
            Err(e) => {
                warn!(target: "wsm::watcher", error = %e, "Scan task failed");
                (Vec::new(), Vec::new())
            }
        }
    }
}

fn scan_tree(filter: &Arc<PathFilter>, start: &Path) -> (Vec<WatchedFile>, Vec<PathBuf>) {
    let entry_filter = filter.clone();
    let walker = WalkBuilder::new(start)
        .standard_filters(false)
        .follow_links(false)
        .filter_entry(move |entry| {
            let Some(rel) = entry_filter.relative(entry.path()) else {
                return true;
            };
            match entry.file_type() {
                Some(ft) if ft.is_dir() => {
                    !entry_filter.is_excluded_dir(&rel) && entry_filter.can_descend(&rel)
                }
                _ => true,
            }
        })
        .build();

    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for dent in walker {
        let dent = match dent {
            Ok(d) => d,
            Err(e) => {
                warn!(target: "wsm::watcher", error = %e, "Walker error");
                continue;
            }
        };
        let Some(rel) = filter.relative(dent.path()) else {
            continue;
        };
        match dent.file_type() {
            Some(ft) if ft.is_dir() => dirs.push(rel),
            Some(ft) if ft.is_file() => {
                if !filter.should_track_file(&rel) {
                    continue;
                }
                match snapshot_file(filter.root(), dent.path()) {
                    Ok(file) => files.push(file),
                    Err(e) => {
                        debug!(target: "wsm::watcher", path = %rel.display(), error = %e, "File vanished during scan")
                    }
                }
            }
            _ => {}
        }
    }
    (files, dirs)
}
