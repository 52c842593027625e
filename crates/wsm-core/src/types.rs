use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Language (or file type) detected from a path's extension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Language {
    JavaScript,
    TypeScript,
    Python,
    Rust,
    Go,
    Css,
    Html,
    Json,
    Markdown,
    Other(String),
}

impl Language {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "ts" | "tsx" | "mts" | "cts" => Language::TypeScript,
            "py" | "pyi" => Language::Python,
            "rs" => Language::Rust,
            "go" => Language::Go,
            "css" | "scss" | "less" => Language::Css,
            "html" | "htm" => Language::Html,
            "json" => Language::Json,
            "md" | "markdown" => Language::Markdown,
            other => Language::Other(other.to_string()),
        }
    }

    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => Self::from_extension(ext),
            // Dotfiles such as `.gitignore` have no extension; keep the file name as the type.
            None => Language::Other(
                path.file_name()
                    .and_then(|n| n.to_str())
                    .filter(|n| n.starts_with('.'))
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "no_extension".to_string()),
            ),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Python => "python",
            Language::Rust => "rust",
            Language::Go => "go",
            Language::Css => "css",
            Language::Html => "html",
            Language::Json => "json",
            Language::Markdown => "markdown",
            Language::Other(name) => name.as_str(),
        }
    }
}

impl From<String> for Language {
    fn from(name: String) -> Self {
        match name.as_str() {
            "javascript" => Language::JavaScript,
            "typescript" => Language::TypeScript,
            "python" => Language::Python,
            "rust" => Language::Rust,
            "go" => Language::Go,
            "css" => Language::Css,
            "html" => Language::Html,
            "json" => Language::Json,
            "markdown" => Language::Markdown,
            _ => Language::Other(name),
        }
    }
}

impl From<Language> for String {
    fn from(language: Language) -> Self {
        language.as_str().to_string()
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_from_path() {
        assert_eq!(Language::from_path(Path::new("src/a.js")), Language::JavaScript);
        assert_eq!(Language::from_path(Path::new("src/a.TSX")), Language::TypeScript);
        assert_eq!(Language::from_path(Path::new("pkg/mod.py")), Language::Python);
        assert_eq!(Language::from_path(Path::new("lib.rs")), Language::Rust);
        assert_eq!(
            Language::from_path(Path::new("notes.txt")),
            Language::Other("txt".to_string())
        );
    }

    #[test]
    fn test_serializes_as_name() {
        assert_eq!(serde_json::to_string(&Language::Python).unwrap(), "\"python\"");
        let other: Language = serde_json::from_str("\"txt\"").unwrap();
        assert_eq!(other, Language::Other("txt".to_string()));
    }

    #[test]
    fn test_dotfile_and_extensionless() {
        assert_eq!(
            Language::from_path(Path::new(".gitignore")),
            Language::Other(".gitignore".to_string())
        );
        assert_eq!(
            Language::from_path(Path::new("Makefile")),
            Language::Other("no_extension".to_string())
        );
    }
}
