pub mod filter;
pub mod fingerprint;
pub mod types;
pub mod watcher;

pub use filter::PathFilter;
pub use fingerprint::{hash_bytes, snapshot_file, sub_changes};
pub use types::*;
pub use watcher::FileWatcher;
