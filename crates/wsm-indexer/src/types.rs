use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use wsm_core::Language;

/// How an import was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImportKind {
    Import,
    Require,
    DynamicImport,
    ReExport,
    /// Rust `mod name;`
    Module,
    /// Rust `use` / `extern crate`
    Use,
    /// HTML `src`/`href` references
    Asset,
}

/// An import exactly as declared in source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportDeclaration {
    pub specifier: String,
    pub kind: ImportKind,
    pub line: usize,
}

impl ImportDeclaration {
    pub fn new(specifier: impl Into<String>, kind: ImportKind, line: usize) -> Self {
        Self {
            specifier: specifier.into(),
            kind,
            line,
        }
    }
}

/// Where an import points once resolved against the tracked files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ImportTarget {
    /// Another analyzed file, relative to the root.
    Internal { path: PathBuf },
    /// Path-like specifier with no matching file (yet).
    Unresolved,
    /// Package or URL outside the workspace.
    External { package: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedImport {
    pub specifier: String,
    pub kind: ImportKind,
    pub line: usize,
    pub target: ImportTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAnalysis {
    pub path: PathBuf,
    pub language: Language,
    pub imports: Vec<ResolvedImport>,
    pub exports: Vec<String>,
    pub parse_error: Option<String>,
    pub analyzed_at: DateTime<Utc>,
}

/// A closed path around a dependency cycle: first and last entries are the same file.
pub type Cycle = Vec<PathBuf>;

/// Result of one full (batched) analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub files_analyzed: usize,
    pub dependencies: usize,
    pub cycles: usize,
    pub parse_errors: usize,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub total_files: usize,
    /// Internal file-to-file edges
    pub total_dependencies: usize,
    pub unresolved_imports: usize,
    pub external_packages: Vec<String>,
    pub parse_errors: usize,
    pub cycles: Vec<Cycle>,
    pub last_full_analysis: Option<AnalysisSummary>,
}

/// Everything the indexer publishes on its outbound channel.
#[derive(Debug, Clone)]
pub enum IndexerEvent {
    FileAnalyzed {
        analysis: FileAnalysis,
        /// Known cycles passing through this file
        cycles: Vec<Cycle>,
    },
    FileRemoved {
        path: PathBuf,
    },
    AnalysisComplete(AnalysisSummary),
}
