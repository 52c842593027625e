use tree_sitter::{Node, Parser};

use super::{LanguageAnalyzer, ParseOutput};
use crate::types::{ImportDeclaration, ImportKind};

/// Python `import x` / `from x import y` via tree-sitter.
///
/// `from . import a` has no module part, so each imported name becomes its own
/// relative specifier (`.a`). Exports are the top-level function and class names.
pub struct PythonAnalyzer;

impl LanguageAnalyzer for PythonAnalyzer {
    fn name(&self) -> &'static str {
        "python"
    }

    fn parse(&self, content: &str) -> ParseOutput {
        let mut parser = Parser::new();
        let language: tree_sitter::Language = tree_sitter_python::LANGUAGE.into();
        if let Err(e) = parser.set_language(&language) {
            return ParseOutput::failed(format!("grammar unavailable: {}", e));
        }
        let Some(tree) = parser.parse(content, None) else {
            return ParseOutput::failed("parser produced no tree");
        };
        let root = tree.root_node();
        if root.has_error() {
            return ParseOutput::failed(super::syntax_error(root));
        }

        let mut output = ParseOutput::default();
        let src = content.as_bytes();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            match node.kind() {
                "import_statement" => collect_plain_import(&node, src, &mut output),
                "import_from_statement" => collect_from_import(&node, src, &mut output),
                _ => {
                    let mut cursor = node.walk();
                    let children: Vec<Node> = node.named_children(&mut cursor).collect();
                    stack.extend(children.into_iter().rev());
                }
            }
        }
        output.imports.sort_by_key(|i| i.line);

        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            let def = if child.kind() == "decorated_definition" {
                child.child_by_field_name("definition")
            } else {
                Some(child)
            };
            if let Some(def) = def {
                if matches!(def.kind(), "function_definition" | "class_definition") {
                    if let Some(name) = def.child_by_field_name("name") {
                        output.exports.push(text(&name, src).to_string());
                    }
                }
            }
        }

        output
    }
}

fn text<'a>(node: &Node, src: &'a [u8]) -> &'a str {
    node.utf8_text(src).unwrap_or("")
}

/// The dotted module name of a `dotted_name` or `aliased_import` node.
fn module_name<'a>(node: &Node, src: &'a [u8]) -> Option<&'a str> {
    match node.kind() {
        "dotted_name" => Some(text(node, src)),
        "aliased_import" => node.child_by_field_name("name").map(|n| text(&n, src)),
        _ => None,
    }
}

fn collect_plain_import(node: &Node, src: &[u8], output: &mut ParseOutput) {
    let line = node.start_position().row + 1;
    let mut cursor = node.walk();
    for name in node.children_by_field_name("name", &mut cursor) {
        if let Some(module) = module_name(&name, src) {
            output
                .imports
                .push(ImportDeclaration::new(module, ImportKind::Import, line));
        }
    }
}

fn collect_from_import(node: &Node, src: &[u8], output: &mut ParseOutput) {
    let line = node.start_position().row + 1;
    let Some(module) = node.child_by_field_name("module_name") else {
        return;
    };
    let module = text(&module, src).trim();

    if !module.is_empty() && module.chars().all(|c| c == '.') {
        let mut cursor = node.walk();
        for name in node.children_by_field_name("name", &mut cursor) {
            if let Some(imported) = module_name(&name, src) {
                output.imports.push(ImportDeclaration::new(
                    format!("{}{}", module, imported),
                    ImportKind::Import,
                    line,
                ));
            }
        }
    } else {
        output
            .imports
            .push(ImportDeclaration::new(module, ImportKind::Import, line));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(out: &ParseOutput) -> Vec<&str> {
        out.imports.iter().map(|i| i.specifier.as_str()).collect()
    }

    #[test]
    fn test_import_forms() {
        let src = "\
import os
import numpy as np, sys
from collections import defaultdict
from .models import User
from .. import utils, config as cfg

def main():
    import json
";
        let out = PythonAnalyzer.parse(src);
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        assert_eq!(
            specs(&out),
            vec!["os", "numpy", "sys", "collections", ".models", "..utils", "..config", "json"]
        );
        assert_eq!(out.imports[4].line, 5);
        assert_eq!(out.exports, vec!["main"]);
    }

    #[test]
    fn test_decorated_exports() {
        let src = "@dataclass\nclass Point:\n    x: int\n\n@cache\ndef load():\n    pass\n";
        let out = PythonAnalyzer.parse(src);
        assert_eq!(out.exports, vec!["Point", "load"]);
    }

    #[test]
    fn test_syntax_error() {
        let out = PythonAnalyzer.parse("def broken(:\n    import os\n");
        assert!(out.imports.is_empty());
        assert_eq!(out.errors.len(), 1);
    }
}
