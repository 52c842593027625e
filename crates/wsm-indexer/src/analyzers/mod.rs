//! Per-language import extraction.
//!
//! Languages with a tree-sitter grammar are parsed into an AST; the rest use regex
//! pattern extraction. Both sit behind [`LanguageAnalyzer`] and are selected by file
//! extension through [`AnalyzerRegistry`].

mod ecmascript;
mod pattern;
mod python;

pub use ecmascript::{EcmaDialect, EcmaScriptAnalyzer};
pub use pattern::{CssAnalyzer, GoAnalyzer, HtmlAnalyzer, RustAnalyzer};
pub use python::PythonAnalyzer;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::types::ImportDeclaration;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOutput {
    pub imports: Vec<ImportDeclaration>,
    pub exports: Vec<String>,
    pub errors: Vec<String>,
}

impl ParseOutput {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            imports: Vec::new(),
            exports: Vec::new(),
            errors: vec![error.into()],
        }
    }
}

pub trait LanguageAnalyzer: Send + Sync {
    fn name(&self) -> &'static str;
    fn parse(&self, content: &str) -> ParseOutput;
}

/// Maps lowercase file extensions to analyzers.
pub struct AnalyzerRegistry {
    by_extension: HashMap<&'static str, Arc<dyn LanguageAnalyzer>>,
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            by_extension: HashMap::new(),
        };

        let js: Arc<dyn LanguageAnalyzer> = Arc::new(EcmaScriptAnalyzer::new(EcmaDialect::JavaScript));
        let ts: Arc<dyn LanguageAnalyzer> = Arc::new(EcmaScriptAnalyzer::new(EcmaDialect::TypeScript));
        let tsx: Arc<dyn LanguageAnalyzer> = Arc::new(EcmaScriptAnalyzer::new(EcmaDialect::Tsx));
        let python: Arc<dyn LanguageAnalyzer> = Arc::new(PythonAnalyzer);
        let css: Arc<dyn LanguageAnalyzer> = Arc::new(CssAnalyzer);
        let html: Arc<dyn LanguageAnalyzer> = Arc::new(HtmlAnalyzer);

        registry.register(&["js", "jsx", "mjs", "cjs"], js);
        registry.register(&["ts", "mts", "cts"], ts);
        registry.register(&["tsx"], tsx);
        registry.register(&["py", "pyi"], python);
        registry.register(&["rs"], Arc::new(RustAnalyzer));
        registry.register(&["go"], Arc::new(GoAnalyzer));
        registry.register(&["css", "scss", "less"], css);
        registry.register(&["html", "htm"], html);
        registry
    }

    pub fn register(&mut self, extensions: &[&'static str], analyzer: Arc<dyn LanguageAnalyzer>) {
        for ext in extensions {
            self.by_extension.insert(ext, analyzer.clone());
        }
    }

    pub fn for_path(&self, path: &Path) -> Option<Arc<dyn LanguageAnalyzer>> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        self.by_extension.get(ext.as_str()).cloned()
    }

    pub fn is_supported(&self, path: &Path) -> bool {
        self.for_path(path).is_some()
    }
}

impl Default for AnalyzerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Describes the first ERROR or MISSING node below `root`.
pub(crate) fn syntax_error(root: tree_sitter::Node) -> String {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            return format!("syntax error at line {}", node.start_position().row + 1);
        }
        if node.has_error() {
            let mut cursor = node.walk();
            let children: Vec<_> = node.children(&mut cursor).collect();
            stack.extend(children.into_iter().rev());
        }
    }
    "syntax error".to_string()
}

/// 1-based line of a byte offset.
pub(crate) fn line_of(content: &str, offset: usize) -> usize {
    content[..offset.min(content.len())]
        .bytes()
        .filter(|b| *b == b'\n')
        .count()
        + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_dispatch() {
        let registry = AnalyzerRegistry::new();
        assert_eq!(registry.for_path(Path::new("a.JS")).unwrap().name(), "javascript");
        assert_eq!(registry.for_path(Path::new("a.tsx")).unwrap().name(), "tsx");
        assert_eq!(registry.for_path(Path::new("m/x.py")).unwrap().name(), "python");
        assert_eq!(registry.for_path(Path::new("lib.rs")).unwrap().name(), "rust");
        assert!(registry.for_path(Path::new("README.md")).is_none());
        assert!(!registry.is_supported(Path::new("Makefile")));
    }

    #[test]
    fn test_line_of() {
        let src = "a\nb\nc";
        assert_eq!(line_of(src, 0), 1);
        assert_eq!(line_of(src, 2), 2);
        assert_eq!(line_of(src, 4), 3);
    }
}
