//! Issue feed model and file-group batching
//!
//! Issues arrive as a code-quality search response
//! (`{"issues": [...], "total": N, "p": 1, "ps": 100}`) and are grouped per
//! file so a single worker can fix one file's issues bottom-up.

use crate::util::normalize_relative;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Severity {
    Blocker,
    Critical,
    Major,
    Minor,
    Info,
    Other(String),
}

impl From<String> for Severity {
    fn from(value: String) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "BLOCKER" => Severity::Blocker,
            "CRITICAL" => Severity::Critical,
            "MAJOR" => Severity::Major,
            "MINOR" => Severity::Minor,
            "INFO" => Severity::Info,
            _ => Severity::Other(value),
        }
    }
}

impl From<Severity> for String {
    fn from(value: Severity) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Blocker => f.write_str("BLOCKER"),
            Severity::Critical => f.write_str("CRITICAL"),
            Severity::Major => f.write_str("MAJOR"),
            Severity::Minor => f.write_str("MINOR"),
            Severity::Info => f.write_str("INFO"),
            Severity::Other(raw) => f.write_str(raw),
        }
    }
}

/// Issue type as reported by the analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Category {
    Bug,
    Vulnerability,
    CodeSmell,
    Other(String),
}

impl From<String> for Category {
    fn from(value: String) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "BUG" => Category::Bug,
            "VULNERABILITY" => Category::Vulnerability,
            "CODE_SMELL" => Category::CodeSmell,
            _ => Category::Other(value),
        }
    }
}

impl From<Category> for String {
    fn from(value: Category) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Bug => f.write_str("BUG"),
            Category::Vulnerability => f.write_str("VULNERABILITY"),
            Category::CodeSmell => f.write_str("CODE_SMELL"),
            Category::Other(raw) => f.write_str(raw),
        }
    }
}

/// A reported defect. Immutable once received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub key: String,
    pub rule: String,
    pub severity: Severity,
    pub category: Category,
    /// Repository-relative path
    pub file: PathBuf,
    /// 1-based
    pub line: Option<usize>,
    /// 0-based offset within `line`
    pub column: Option<usize>,
    pub message: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Issue {
    pub fn new(key: &str, rule: &str, file: impl Into<PathBuf>, line: Option<usize>) -> Self {
        Issue {
            key: key.to_string(),
            rule: rule.to_string(),
            severity: Severity::Major,
            category: Category::CodeSmell,
            file: normalize_relative(&file.into()),
            line: line.filter(|l| *l > 0),
            column: None,
            message: String::new(),
            tags: Vec::new(),
        }
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.message = message.to_string();
        self
    }

    pub fn is_external_rule(&self) -> bool {
        self.rule.starts_with("external_")
    }
}

#[derive(Debug, Deserialize)]
struct RawTextRange {
    #[serde(rename = "startLine")]
    start_line: Option<usize>,
    #[serde(rename = "startOffset")]
    start_offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    key: String,
    rule: String,
    #[serde(default = "default_severity")]
    severity: String,
    component: String,
    #[serde(default)]
    message: String,
    line: Option<usize>,
    #[serde(rename = "textRange")]
    text_range: Option<RawTextRange>,
    #[serde(rename = "type", default = "default_category")]
    kind: String,
    #[serde(default)]
    tags: Vec<String>,
}

fn default_severity() -> String {
    "MAJOR".to_string()
}

fn default_category() -> String {
    "CODE_SMELL".to_string()
}

#[derive(Debug, Deserialize)]
struct RawFeed {
    #[serde(default)]
    issues: Vec<RawIssue>,
    total: Option<usize>,
    p: Option<usize>,
    ps: Option<usize>,
}

/// Parsed feed plus the paging metadata the analyzer reported.
#[derive(Debug, Clone)]
pub struct IssueFeed {
    pub issues: Vec<Issue>,
    pub total: usize,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

/// `project:path/to/file.py` -> `path/to/file.py`
fn component_path(component: &str) -> PathBuf {
    let path = component
        .split_once(':')
        .map(|(_, rest)| rest)
        .unwrap_or(component);
    normalize_relative(Path::new(path))
}

impl From<RawIssue> for Issue {
    fn from(raw: RawIssue) -> Self {
        let range_line = raw.text_range.as_ref().and_then(|r| r.start_line);
        Issue {
            file: component_path(&raw.component),
            line: raw.line.or(range_line).filter(|l| *l > 0),
            column: raw.text_range.as_ref().and_then(|r| r.start_offset),
            key: raw.key,
            rule: raw.rule,
            severity: Severity::from(raw.severity),
            category: Category::from(raw.kind),
            message: raw.message,
            tags: raw.tags,
        }
    }
}

pub fn parse_issue_feed(json: &str) -> anyhow::Result<IssueFeed> {
    let raw: RawFeed = serde_json::from_str(json).context("Issue feed is not valid JSON")?;
    let issues: Vec<Issue> = raw.issues.into_iter().map(Issue::from).collect();
    Ok(IssueFeed {
        total: raw.total.unwrap_or(issues.len()),
        issues,
        page: raw.p,
        page_size: raw.ps,
    })
}

pub fn load_issue_feed(path: &Path) -> anyhow::Result<IssueFeed> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read issue feed {}", path.display()))?;
    parse_issue_feed(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Drop external-analyzer rules when asked, then cap the feed.
pub fn filter_issues(issues: Vec<Issue>, exclude_external: bool, limit: Option<usize>) -> Vec<Issue> {
    let kept = issues
        .into_iter()
        .filter(|issue| !(exclude_external && issue.is_external_rule()));
    match limit {
        Some(limit) => kept.take(limit).collect(),
        None => kept.collect(),
    }
}

/// Issues that share a file, in processing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileGroup {
    pub file: PathBuf,
    pub issues: Vec<Issue>,
}

/// Descending line order; issues without a line go last.
fn bottom_up(a: &Issue, b: &Issue) -> Ordering {
    match (a.line, b.line) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

pub fn group_issues(issues: Vec<Issue>) -> Vec<FileGroup> {
    let mut by_file: BTreeMap<PathBuf, Vec<Issue>> = BTreeMap::new();
    for mut issue in issues {
        issue.file = normalize_relative(&issue.file);
        by_file.entry(issue.file.clone()).or_default().push(issue);
    }

    by_file
        .into_iter()
        .map(|(file, mut issues)| {
            issues.sort_by(bottom_up);
            FileGroup { file, issues }
        })
        .collect()
}
