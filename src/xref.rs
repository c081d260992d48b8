//! Cross-reference lookup for the symbol at an issue location

use crate::localize::IssueContext;
use crate::syntax::Language;
use crate::util::truncate;
use rayon::prelude::*;
use regex::Regex;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const MAX_REFERENCES: usize = 5;
const MIN_SYMBOL_CHARS: usize = 4;
const MAX_FILE_BYTES: u64 = 1_000_000;
const MAX_LINE_CHARS: usize = 200;

/// Node kinds whose text starts with a symbol worth searching for.
const SYMBOL_KINDS: &[&str] = &[
    "identifier",
    "type_identifier",
    "field_identifier",
    "property_identifier",
    "function_definition",
    "function_declaration",
    "function_item",
    "method_definition",
    "method_declaration",
    "class_definition",
    "class_declaration",
    "struct_item",
];

fn is_ignored(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");

    let ignored = [
        "target",
        "node_modules",
        ".git",
        ".svn",
        ".hg",
        "dist",
        "build",
        "__pycache__",
        ".pytest_cache",
        "vendor",
        "venv",
        ".venv",
        "env",
        ".remedy",
    ];

    ignored.contains(&name) || name.starts_with('.')
}

/// Symbol named by the localized node: the text before the first `(`,
/// reduced to its last identifier (`def load_config` -> `load_config`).
pub fn symbol_for_context(context: &IssueContext) -> Option<String> {
    if context.is_degraded() || !SYMBOL_KINDS.contains(&context.node_kind.as_str()) {
        return None;
    }
    let head = context.node_text.split('(').next()?.trim();
    let symbol: String = head
        .rsplit(|c: char| !(c.is_alphanumeric() || c == '_'))
        .find(|part| !part.is_empty())?
        .to_string();
    (symbol.chars().count() >= MIN_SYMBOL_CHARS).then_some(symbol)
}

/// Whole-word occurrences of `symbol` in other source files of the repo,
/// formatted as `path:line: text`. At most [`MAX_REFERENCES`], path order.
pub fn find_references(root: &Path, symbol: &str, exclude: &Path) -> anyhow::Result<Vec<String>> {
    let pattern = Regex::new(&format!(r"\b{}\b", regex::escape(symbol)))?;

    let files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_ignored(e.path()))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| Language::from_path(e.path()).is_known())
        .filter(|e| e.metadata().map(|m| m.len() <= MAX_FILE_BYTES).unwrap_or(false))
        .map(|e| e.path().strip_prefix(root).unwrap_or(e.path()).to_path_buf())
        .filter(|rel| rel != exclude)
        .collect();

    let mut hits: Vec<(PathBuf, usize, String)> = files
        .par_iter()
        .flat_map_iter(|rel| {
            let content = std::fs::read_to_string(root.join(rel)).unwrap_or_default();
            content
                .lines()
                .enumerate()
                .filter(|(_, line)| pattern.is_match(line))
                .take(MAX_REFERENCES)
                .map(|(i, line)| (rel.clone(), i + 1, truncate(line.trim(), MAX_LINE_CHARS)))
                .collect::<Vec<_>>()
        })
        .collect();

    hits.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
    Ok(hits
        .into_iter()
        .take(MAX_REFERENCES)
        .map(|(path, line, text)| format!("{}:{}: {}", path.display(), line, text))
        .collect())
}

/// Best-effort reference lookup for an issue; failures only log.
pub fn references_for(root: &Path, context: &IssueContext, issue_file: &Path) -> Vec<String> {
    let Some(symbol) = symbol_for_context(context) else {
        return Vec::new();
    };
    match find_references(root, &symbol, issue_file) {
        Ok(hits) => hits,
        Err(err) => {
            tracing::warn!(symbol = %symbol, error = %err, "cross-reference search failed");
            Vec::new()
        }
    }
}
