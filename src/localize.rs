//! Issue localization
//!
//! Resolves a reported line (and optional column) to the smallest syntax node
//! that encloses it, plus parent and sibling context for generator prompts.
//! Localization never fails: without a usable tree it falls back to the whole
//! file and records why.

use crate::syntax::parser::node_text;
use crate::syntax::{self, Language};
use serde::{Deserialize, Serialize};
use tree_sitter::Node;

const MAX_SIBLINGS: usize = 3;

/// Read-only context around an issue location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueContext {
    pub node_kind: String,
    pub node_text: String,
    pub parent_kind: String,
    pub parent_text: String,
    /// Up to three neighbours of the node, in document order
    pub siblings: Vec<String>,
    /// 1-based, inclusive
    pub start_line: usize,
    pub end_line: usize,
    /// Set when localization fell back to whole-file context
    #[serde(default)]
    pub degraded: Option<String>,
}

impl IssueContext {
    /// Context covering the entire file, used when no node can be resolved.
    pub fn whole_file(content: &str, reason: String) -> Self {
        IssueContext {
            node_kind: "file".to_string(),
            node_text: content.to_string(),
            parent_kind: "file".to_string(),
            parent_text: content.to_string(),
            siblings: Vec::new(),
            start_line: 1,
            end_line: content.lines().count().max(1),
            degraded: Some(reason),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

fn contains_line(node: &Node, row: usize) -> bool {
    node.start_position().row <= row && row <= node.end_position().row
}

fn contains_point(node: &Node, row: usize, column: usize) -> bool {
    let start = node.start_position();
    let end = node.end_position();
    let after_start = row > start.row || (row == start.row && column >= start.column);
    let before_end = row < end.row || (row == end.row && column <= end.column);
    after_start && before_end
}

/// Pick the child to descend into: the first (in document order) whose span
/// holds the target line. With a column, a child holding the exact point is
/// preferred over one that merely shares the line.
fn select_child<'t>(node: &Node<'t>, row: usize, column: Option<usize>) -> Option<Node<'t>> {
    let mut first_on_line = None;
    for i in 0..node.named_child_count() {
        let Some(child) = node.named_child(i) else {
            continue;
        };
        if !contains_line(&child, row) {
            continue;
        }
        match column {
            Some(col) if contains_point(&child, row, col) => return Some(child),
            Some(_) => {
                if first_on_line.is_none() {
                    first_on_line = Some(child);
                }
            }
            None => return Some(child),
        }
    }
    first_on_line
}

fn nearest_siblings(parent: &Node, node: &Node, content: &str) -> Vec<String> {
    let count = parent.named_child_count();
    let position = (0..count).find(|&i| parent.named_child(i).map(|c| c.id()) == Some(node.id()));
    let Some(position) = position else {
        return Vec::new();
    };

    let mut picked: Vec<usize> = Vec::with_capacity(MAX_SIBLINGS);
    let mut distance = 1;
    while picked.len() < MAX_SIBLINGS && (distance <= position || position + distance < count) {
        if distance <= position {
            picked.push(position - distance);
        }
        if picked.len() < MAX_SIBLINGS && position + distance < count {
            picked.push(position + distance);
        }
        distance += 1;
    }
    picked.sort_unstable();

    picked
        .into_iter()
        .filter_map(|i| parent.named_child(i))
        .map(|n| node_text(&n, content).to_string())
        .collect()
}

/// Locate the syntax node at `line` (1-based) and optional `column` (0-based).
pub fn locate_issue(
    content: &str,
    language: Language,
    line: usize,
    column: Option<usize>,
) -> IssueContext {
    if !language.is_known() {
        return IssueContext::whole_file(
            content,
            format!("no grammar for {}; using whole-file context", language),
        );
    }

    let total = content.lines().count();
    if line == 0 || line > total.max(1) {
        return IssueContext::whole_file(
            content,
            format!("line {} is outside the file ({} lines)", line, total),
        );
    }

    let tree = match syntax::parse(content, language) {
        Ok(tree) => tree,
        Err(err) => {
            tracing::warn!(%language, error = %err, "localization fell back to whole file");
            return IssueContext::whole_file(content, err.to_string());
        }
    };

    let row = line.saturating_sub(1);
    let root = tree.root_node();
    let mut node = root;
    while let Some(child) = select_child(&node, row, column) {
        node = child;
    }

    let parent = node.parent().unwrap_or(node);
    let siblings = if parent.id() == node.id() {
        Vec::new()
    } else {
        nearest_siblings(&parent, &node, content)
    };

    IssueContext {
        node_kind: node.kind().to_string(),
        node_text: node_text(&node, content).to_string(),
        parent_kind: parent.kind().to_string(),
        parent_text: node_text(&parent, content).to_string(),
        siblings,
        start_line: node.start_position().row + 1,
        end_line: node.end_position().row + 1,
        degraded: None,
    }
}
