use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::Path;
use wsm_core::Language;

use crate::types::{ContentFingerprint, SubChange, WatchedFile};

pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Reads `absolute` and builds its snapshot. Only a vanished file is an error; unreadable
/// or binary content is recorded as [`ContentFingerprint::Undecodable`].
pub fn snapshot_file(root: &Path, absolute: &Path) -> io::Result<WatchedFile> {
    let meta = fs::metadata(absolute)?;
    let relative = absolute.strip_prefix(root).unwrap_or(absolute).to_path_buf();
    let modified = meta
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    let (fingerprint, line_count, char_count) = match fs::read(absolute) {
        Ok(bytes) => describe(&bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(e),
        Err(e) => (
            ContentFingerprint::Undecodable {
                reason: format!("unreadable: {}", e),
            },
            0,
            0,
        ),
    };

    Ok(WatchedFile {
        extension: relative
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase()),
        language: Language::from_path(&relative),
        absolute_path: absolute.to_path_buf(),
        relative_path: relative,
        size: meta.len(),
        modified,
        fingerprint,
        line_count,
        char_count,
    })
}

fn describe(bytes: &[u8]) -> (ContentFingerprint, usize, usize) {
    if bytes.contains(&0) {
        return (
            ContentFingerprint::Undecodable {
                reason: "binary content".to_string(),
            },
            0,
            0,
        );
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => (
            ContentFingerprint::Hashed {
                sha256: hash_bytes(bytes),
            },
            text.lines().count(),
            text.chars().count(),
        ),
        Err(_) => (
            ContentFingerprint::Undecodable {
                reason: "not valid UTF-8".to_string(),
            },
            0,
            0,
        ),
    }
}

/// Fingerprint comparison always comes first; size and line deltas follow when it differs.
///
/// Undecodable content on either side cannot be compared, so it always counts as changed.
pub fn sub_changes(previous: &WatchedFile, current: &WatchedFile) -> Vec<SubChange> {
    let comparable = matches!(
        (&previous.fingerprint, &current.fingerprint),
        (ContentFingerprint::Hashed { .. }, ContentFingerprint::Hashed { .. })
    );
    let changed = !comparable || previous.fingerprint != current.fingerprint;
    let mut changes = vec![SubChange::Fingerprint { changed }];
    if changed || previous.size != current.size {
        changes.push(SubChange::Size {
            previous: previous.size,
            current: current.size,
            delta: current.size as i64 - previous.size as i64,
        });
    }
    if changed || previous.line_count != current.line_count {
        changes.push(SubChange::LineCount {
            previous: previous.line_count,
            current: current.line_count,
            delta: current.line_count as i64 - previous.line_count as i64,
        });
    }
    changes
}
