use tree_sitter::{Node, Parser, TreeCursor};

use super::{LanguageAnalyzer, ParseOutput};
use crate::types::{ImportDeclaration, ImportKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcmaDialect {
    JavaScript,
    TypeScript,
    Tsx,
}

/// JavaScript/TypeScript imports via tree-sitter: ES `import`/`export ... from`,
/// CommonJS `require("...")` and dynamic `import("...")`.
pub struct EcmaScriptAnalyzer {
    dialect: EcmaDialect,
}

impl EcmaScriptAnalyzer {
    pub fn new(dialect: EcmaDialect) -> Self {
        Self { dialect }
    }

    fn language(&self) -> tree_sitter::Language {
        match self.dialect {
            EcmaDialect::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            EcmaDialect::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            EcmaDialect::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
        }
    }
}

impl LanguageAnalyzer for EcmaScriptAnalyzer {
    fn name(&self) -> &'static str {
        match self.dialect {
            EcmaDialect::JavaScript => "javascript",
            EcmaDialect::TypeScript => "typescript",
            EcmaDialect::Tsx => "tsx",
        }
    }

    fn parse(&self, content: &str) -> ParseOutput {
        let mut parser = Parser::new();
        if let Err(e) = parser.set_language(&self.language()) {
            return ParseOutput::failed(format!("grammar unavailable: {}", e));
        }
        let Some(tree) = parser.parse(content, None) else {
            return ParseOutput::failed("parser produced no tree");
        };
        let root = tree.root_node();
        if root.has_error() {
            return ParseOutput::failed(super::syntax_error(root));
        }

        let mut collector = EcmaCollector {
            content,
            output: ParseOutput::default(),
        };
        let mut cursor = tree.walk();
        collector.walk(&mut cursor);
        collector.output
    }
}

struct EcmaCollector<'a> {
    content: &'a str,
    output: ParseOutput,
}

impl<'a> EcmaCollector<'a> {
    fn walk(&mut self, cursor: &mut TreeCursor) {
        let node = cursor.node();

        match node.kind() {
            "import_statement" => {
                if let Some(spec) = self.source_of(&node) {
                    self.push_import(spec, ImportKind::Import, &node);
                }
            }
            "export_statement" => {
                if let Some(spec) = self.source_of(&node) {
                    self.push_import(spec, ImportKind::ReExport, &node);
                }
                self.collect_exports(&node);
            }
            "call_expression" => {
                if let Some(function) = node.child_by_field_name("function") {
                    let kind = match function.kind() {
                        "import" => Some(ImportKind::DynamicImport),
                        "identifier" if self.text(&function) == "require" => Some(ImportKind::Require),
                        _ => None,
                    };
                    if let Some(kind) = kind {
                        if let Some(spec) = self.first_string_argument(&node) {
                            self.push_import(spec, kind, &node);
                        }
                    }
                }
            }
            _ => {}
        }

        if cursor.goto_first_child() {
            loop {
                self.walk(cursor);
                if !cursor.goto_next_sibling() {
                    break;
                }
            }
            cursor.goto_parent();
        }
    }

    fn push_import(&mut self, specifier: String, kind: ImportKind, node: &Node) {
        self.output.imports.push(ImportDeclaration::new(
            specifier,
            kind,
            node.start_position().row + 1,
        ));
    }

    fn source_of(&self, node: &Node) -> Option<String> {
        node.child_by_field_name("source")
            .map(|source| unquote(self.text(&source)))
    }

    fn first_string_argument(&self, call: &Node) -> Option<String> {
        let args = call.child_by_field_name("arguments")?;
        let mut cursor = args.walk();
        let first = args.named_children(&mut cursor).next()?;
        match first.kind() {
            "string" => Some(unquote(self.text(&first))),
            "template_string" => {
                let mut inner = first.walk();
                let dynamic = first
                    .named_children(&mut inner)
                    .any(|c| c.kind() == "template_substitution");
                (!dynamic).then(|| unquote(self.text(&first)))
            }
            _ => None,
        }
    }

    fn collect_exports(&mut self, node: &Node) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            match child.kind() {
                "default" => self.output.exports.push("default".to_string()),
                "export_clause" => {
                    let mut inner = child.walk();
                    for spec in child.named_children(&mut inner) {
                        if spec.kind() != "export_specifier" {
                            continue;
                        }
                        let name = spec
                            .child_by_field_name("alias")
                            .or_else(|| spec.child_by_field_name("name"));
                        if let Some(name) = name {
                            self.output.exports.push(self.text(&name).to_string());
                        }
                    }
                }
                _ => {}
            }
        }

        let declared = node
            .child_by_field_name("declaration")
            .or_else(|| node.child_by_field_name("value"));
        if let Some(decl) = declared {
            match decl.kind() {
                "lexical_declaration" | "variable_declaration" => {
                    let mut inner = decl.walk();
                    for declarator in decl.named_children(&mut inner) {
                        if let Some(name) = declarator.child_by_field_name("name") {
                            self.output.exports.push(self.text(&name).to_string());
                        }
                    }
                }
                _ => {
                    if let Some(name) = decl.child_by_field_name("name") {
                        self.output.exports.push(self.text(&name).to_string());
                    }
                }
            }
        }
    }

    fn text(&self, node: &Node) -> &'a str {
        node.utf8_text(self.content.as_bytes()).unwrap_or("")
    }
}

fn unquote(raw: &str) -> String {
    raw.trim_matches(|c| c == '"' || c == '\'' || c == '`').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specifiers(output: &ParseOutput) -> Vec<(&str, ImportKind)> {
        output
            .imports
            .iter()
            .map(|i| (i.specifier.as_str(), i.kind))
            .collect()
    }

    #[test]
    fn test_es_and_commonjs_imports() {
        let src = r#"
import React from 'react';
import { b } from "./b";
import './side-effect.css';
const fs = require('fs');
const lazy = () => import('./lazy');
export { c } from './c';
"#;
        let out = EcmaScriptAnalyzer::new(EcmaDialect::JavaScript).parse(src);
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        assert_eq!(
            specifiers(&out),
            vec![
                ("react", ImportKind::Import),
                ("./b", ImportKind::Import),
                ("./side-effect.css", ImportKind::Import),
                ("fs", ImportKind::Require),
                ("./lazy", ImportKind::DynamicImport),
                ("./c", ImportKind::ReExport),
            ]
        );
        assert_eq!(out.imports[1].line, 3);
        assert_eq!(out.exports, vec!["c"]);
    }

    #[test]
    fn test_exports() {
        let src = "export function run() {}\nexport const a = 1, b = 2;\nexport default class App {}\n";
        let out = EcmaScriptAnalyzer::new(EcmaDialect::JavaScript).parse(src);
        assert_eq!(out.exports, vec!["run", "a", "b", "default", "App"]);
    }

    #[test]
    fn test_typescript_and_tsx() {
        let ts = "import type { Props } from './types';\nexport interface Shape { x: number }\n";
        let out = EcmaScriptAnalyzer::new(EcmaDialect::TypeScript).parse(ts);
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        assert_eq!(specifiers(&out), vec![("./types", ImportKind::Import)]);
        assert_eq!(out.exports, vec!["Shape"]);

        let tsx = "import { Button } from './Button';\nexport const View = () => <Button label=\"x\" />;\n";
        let out = EcmaScriptAnalyzer::new(EcmaDialect::Tsx).parse(tsx);
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        assert_eq!(specifiers(&out), vec![("./Button", ImportKind::Import)]);
    }

    #[test]
    fn test_syntax_error_yields_no_imports() {
        let out = EcmaScriptAnalyzer::new(EcmaDialect::JavaScript).parse("import { from './b'\nconst = ;");
        assert!(out.imports.is_empty());
        assert_eq!(out.errors.len(), 1);
        assert!(out.errors[0].contains("line"));
    }

    #[test]
    fn test_computed_require_ignored() {
        let out = EcmaScriptAnalyzer::new(EcmaDialect::JavaScript)
            .parse("const name = 'x';\nrequire(name);\nrequire(`./t-${name}`);\n");
        assert!(out.imports.is_empty());
    }
}
