//! Language detection and syntax-tree helpers
//!
//! Thin layer over tree-sitter grammars used by localization and validation.

pub mod parser;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

pub use parser::{declarations, parse, syntax_errors, ParseError, SyntaxIssue, SyntaxIssueKind};

/// Supported programming languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Rust,
    JavaScript,
    TypeScript,
    Tsx,
    Python,
    Go,
    Unknown,
}

impl Language {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "rs" => Language::Rust,
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "ts" | "mts" | "cts" => Language::TypeScript,
            "tsx" => Language::Tsx,
            "py" | "pyi" => Language::Python,
            "go" => Language::Go,
            _ => Language::Unknown,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(Language::from_extension)
            .unwrap_or(Language::Unknown)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Language::Rust => "rust",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Tsx => "tsx",
            Language::Python => "python",
            Language::Go => "go",
            Language::Unknown => "unknown",
        }
    }

    pub fn is_known(&self) -> bool {
        *self != Language::Unknown
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What kind of top-level declaration a name refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclarationKind {
    Function,
    Method,
    Class,
    Type,
}

/// A named declaration extracted from a syntax tree.
///
/// Methods carry their container as a prefix (`Config.load`, `impl Foo.new`)
/// so two methods with the same name in different types stay distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Declaration {
    pub name: String,
    pub kind: DeclarationKind,
    pub line: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_language_from_path() {
        assert_eq!(Language::from_path(Path::new("a.py")), Language::Python);
        assert_eq!(Language::from_path(Path::new("src/lib.rs")), Language::Rust);
        assert_eq!(Language::from_path(Path::new("web/App.tsx")), Language::Tsx);
        assert_eq!(Language::from_path(Path::new("web/app.TS")), Language::TypeScript);
        assert_eq!(Language::from_path(Path::new("main.go")), Language::Go);
        assert_eq!(Language::from_path(Path::new("index.mjs")), Language::JavaScript);
        assert_eq!(Language::from_path(Path::new("Makefile")), Language::Unknown);
        assert_eq!(Language::from_path(Path::new("App.java")), Language::Unknown);
    }
}
