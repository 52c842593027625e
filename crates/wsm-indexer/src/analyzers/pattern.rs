//! Regex-based extraction for languages without a bundled grammar.

use lazy_static::lazy_static;
use regex::Regex;

use super::{line_of, LanguageAnalyzer, ParseOutput};
use crate::types::{ImportDeclaration, ImportKind};

lazy_static! {
    static ref RUST_MOD: Regex =
        Regex::new(r"(?m)^[ \t]*(?:pub(?:\([^)]*\))?\s+)?mod\s+([A-Za-z_][A-Za-z0-9_]*)\s*;").unwrap();
    static ref RUST_USE: Regex =
        Regex::new(r"(?m)^[ \t]*(?:pub(?:\([^)]*\))?\s+)?use\s+(?:::)?([A-Za-z_][A-Za-z0-9_]*)").unwrap();
    static ref RUST_EXTERN: Regex =
        Regex::new(r"(?m)^[ \t]*extern\s+crate\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap();
    static ref RUST_PUB_ITEM: Regex = Regex::new(
        r"(?m)^[ \t]*pub\s+(?:async\s+)?(?:unsafe\s+)?(?:fn|struct|enum|trait|type|const|static|mod)\s+([A-Za-z_][A-Za-z0-9_]*)"
    )
    .unwrap();
    static ref GO_IMPORT_BLOCK: Regex = Regex::new(r"(?s)\bimport\s*\(([^)]*)\)").unwrap();
    static ref GO_IMPORT_SINGLE: Regex =
        Regex::new(r#"(?m)^[ \t]*import\s+(?:[A-Za-z_.][A-Za-z0-9_]*\s+)?"([^"]+)""#).unwrap();
    static ref GO_QUOTED: Regex = Regex::new(r#""([^"]+)""#).unwrap();
    static ref GO_EXPORT: Regex =
        Regex::new(r"(?m)^(?:func\s+(?:\([^)]*\)\s*)?|type\s+)([A-Z][A-Za-z0-9_]*)").unwrap();
    static ref CSS_IMPORT: Regex =
        Regex::new(r#"@import\s+(?:url\(\s*)?["']?([^"')\s;]+)"#).unwrap();
    static ref HTML_SCRIPT_SRC: Regex =
        Regex::new(r#"(?i)<script\b[^>]*\bsrc\s*=\s*["']([^"']+)["']"#).unwrap();
    static ref HTML_LINK_HREF: Regex =
        Regex::new(r#"(?i)<link\b[^>]*\bhref\s*=\s*["']([^"']+)["']"#).unwrap();
}

/// Rust: `mod x;` declarations become module imports; `use`/`extern crate` of other
/// crates become external imports. Paths within the crate (`crate::`, `self::`,
/// `super::`) are not file references and are skipped.
pub struct RustAnalyzer;

impl LanguageAnalyzer for RustAnalyzer {
    fn name(&self) -> &'static str {
        "rust"
    }

    fn parse(&self, content: &str) -> ParseOutput {
        let mut output = ParseOutput::default();
        for cap in RUST_MOD.captures_iter(content) {
            let m = &cap[1];
            let line = line_of(content, cap.get(0).map(|g| g.start()).unwrap_or(0));
            output.imports.push(ImportDeclaration::new(m, ImportKind::Module, line));
        }
        for re in [&*RUST_USE, &*RUST_EXTERN] {
            for cap in re.captures_iter(content) {
                let root = &cap[1];
                if matches!(root, "crate" | "self" | "super" | "Self") {
                    continue;
                }
                let line = line_of(content, cap.get(0).map(|g| g.start()).unwrap_or(0));
                output.imports.push(ImportDeclaration::new(root, ImportKind::Use, line));
            }
        }
        output.imports.sort_by_key(|i| i.line);
        output.exports = RUST_PUB_ITEM
            .captures_iter(content)
            .map(|c| c[1].to_string())
            .collect();
        output
    }
}

pub struct GoAnalyzer;

impl LanguageAnalyzer for GoAnalyzer {
    fn name(&self) -> &'static str {
        "go"
    }

    fn parse(&self, content: &str) -> ParseOutput {
        let mut output = ParseOutput::default();
        for block in GO_IMPORT_BLOCK.captures_iter(content) {
            let Some(body) = block.get(1) else { continue };
            for cap in GO_QUOTED.captures_iter(body.as_str()) {
                let offset = body.start() + cap.get(0).map(|g| g.start()).unwrap_or(0);
                output.imports.push(ImportDeclaration::new(
                    &cap[1],
                    ImportKind::Import,
                    line_of(content, offset),
                ));
            }
        }
        for cap in GO_IMPORT_SINGLE.captures_iter(content) {
            let line = line_of(content, cap.get(0).map(|g| g.start()).unwrap_or(0));
            output
                .imports
                .push(ImportDeclaration::new(&cap[1], ImportKind::Import, line));
        }
        output.imports.sort_by_key(|i| i.line);
        output.exports = GO_EXPORT
            .captures_iter(content)
            .map(|c| c[1].to_string())
            .collect();
        output
    }
}

pub struct CssAnalyzer;

impl LanguageAnalyzer for CssAnalyzer {
    fn name(&self) -> &'static str {
        "css"
    }

    fn parse(&self, content: &str) -> ParseOutput {
        let imports = CSS_IMPORT
            .captures_iter(content)
            .map(|cap| {
                let line = line_of(content, cap.get(0).map(|g| g.start()).unwrap_or(0));
                ImportDeclaration::new(&cap[1], ImportKind::Import, line)
            })
            .collect();
        ParseOutput {
            imports,
            ..Default::default()
        }
    }
}

pub struct HtmlAnalyzer;

impl LanguageAnalyzer for HtmlAnalyzer {
    fn name(&self) -> &'static str {
        "html"
    }

    fn parse(&self, content: &str) -> ParseOutput {
        let mut output = ParseOutput::default();
        for re in [&*HTML_SCRIPT_SRC, &*HTML_LINK_HREF] {
            for cap in re.captures_iter(content) {
                let line = line_of(content, cap.get(0).map(|g| g.start()).unwrap_or(0));
                output
                    .imports
                    .push(ImportDeclaration::new(&cap[1], ImportKind::Asset, line));
            }
        }
        output.imports.sort_by_key(|i| i.line);
        output
    }
}
