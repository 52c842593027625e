use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use wsm_core::Language;

/// Content identity of a tracked file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ContentFingerprint {
    Hashed { sha256: String },
    /// Binary or unreadable content: tracked by metadata only.
    Undecodable { reason: String },
}

impl ContentFingerprint {
    pub fn hash(&self) -> Option<&str> {
        match self {
            ContentFingerprint::Hashed { sha256 } => Some(sha256),
            ContentFingerprint::Undecodable { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchedFile {
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub fingerprint: ContentFingerprint,
    pub line_count: usize,
    pub char_count: usize,
    pub extension: Option<String>,
    pub language: Language,
}

impl WatchedFile {
    pub fn is_dotfile(&self) -> bool {
        self.relative_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('.'))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    Added,
    Changed,
    Deleted,
    DirAdded,
    DirDeleted,
}

/// One detail of what differed between two observations of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SubChange {
    Fingerprint {
        changed: bool,
    },
    Size {
        previous: u64,
        current: u64,
        delta: i64,
    },
    LineCount {
        previous: usize,
        current: usize,
        delta: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    /// Path relative to the watched root
    pub path: PathBuf,
    pub previous: Option<WatchedFile>,
    pub current: Option<WatchedFile>,
    pub sub_changes: Vec<SubChange>,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, path: PathBuf) -> Self {
        Self {
            kind,
            path,
            previous: None,
            current: None,
            sub_changes: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

/// Everything the watcher publishes on its outbound channel.
#[derive(Debug, Clone)]
pub enum WatcherEvent {
    /// Initial scan finished.
    Ready {
        tracked_files: usize,
        duration_ms: u64,
    },
    Change(ChangeEvent),
    /// OS-level watch error; watching continues.
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LargestFile {
    pub path: PathBuf,
    pub size: u64,
}

/// Aggregates for the files tracked directly inside one directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryStats {
    pub directory: PathBuf,
    pub total_files: usize,
    pub total_bytes: u64,
    pub file_types: BTreeMap<String, usize>,
    pub dotfiles: usize,
    pub largest_file: Option<LargestFile>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fingerprint_serialization() {
        let hashed = ContentFingerprint::Hashed {
            sha256: "abc".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&hashed).unwrap(),
            json!({"status": "hashed", "sha256": "abc"})
        );

        let binary = ContentFingerprint::Undecodable {
            reason: "binary content".to_string(),
        };
        assert_eq!(binary.hash(), None);
        assert_eq!(serde_json::to_value(&binary).unwrap()["status"], "undecodable");
    }

    #[test]
    fn test_change_kind_names() {
        assert_eq!(serde_json::to_value(ChangeKind::DirDeleted).unwrap(), "dirDeleted");
        assert_eq!(
            serde_json::to_value(SubChange::Fingerprint { changed: true }).unwrap(),
            json!({"kind": "fingerprint", "changed": true})
        );
    }
}
