//! Validation pipeline for staged edits
//!
//! Each modified file goes through four checks in order: syntax (blocking),
//! declarations (warning unless a rule policy forbids removals), change
//! magnitude (blocking) and proximity to the issue line (warning). The set is
//! valid only when no file produced a blocking error.

use crate::diff::{diff_stats, DiffStats};
use crate::error::FixError;
use crate::issue::Issue;
use crate::syntax::{self, Language};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

/// Thresholds for the pipeline, injected at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationConfig {
    pub max_lines_changed: usize,
    pub max_change_ratio: f64,
    pub proximity_warn_lines: usize,
    /// Rule prefixes for which removing a declaration blocks the edit
    pub forbid_declaration_removal_for: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        ValidationConfig {
            max_lines_changed: 30,
            max_change_ratio: 0.10,
            proximity_warn_lines: 20,
            forbid_declaration_removal_for: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockingError {
    Syntax {
        file: PathBuf,
        line: usize,
        detail: String,
    },
    Unparseable {
        file: PathBuf,
        reason: String,
    },
    Magnitude {
        file: PathBuf,
        changed: usize,
        ratio: f64,
        max_lines: usize,
        max_ratio: f64,
    },
    StructuralPolicy {
        file: PathBuf,
        rule: String,
        removed: Vec<String>,
    },
}

impl BlockingError {
    pub fn file(&self) -> &Path {
        match self {
            BlockingError::Syntax { file, .. }
            | BlockingError::Unparseable { file, .. }
            | BlockingError::Magnitude { file, .. }
            | BlockingError::StructuralPolicy { file, .. } => file,
        }
    }

    /// Map onto the engine's error taxonomy.
    pub fn to_fix_error(&self) -> FixError {
        match self {
            BlockingError::Magnitude { .. } => FixError::ChangeMagnitude(self.to_string()),
            _ => FixError::SyntaxValidation(self.to_string()),
        }
    }
}

impl fmt::Display for BlockingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockingError::Syntax { file, line, detail } => {
                write!(f, "{}:{}: {}", file.display(), line, detail)
            }
            BlockingError::Unparseable { file, reason } => {
                write!(f, "{}: could not be parsed ({})", file.display(), reason)
            }
            BlockingError::Magnitude {
                file,
                changed,
                ratio,
                max_lines,
                max_ratio,
            } => write!(
                f,
                "{}: {} lines changed ({:.1}% of file), limit is {} lines or {:.1}%",
                file.display(),
                changed,
                ratio * 100.0,
                max_lines,
                max_ratio * 100.0
            ),
            BlockingError::StructuralPolicy {
                file,
                rule,
                removed,
            } => write!(
                f,
                "{}: rule {} does not allow removing declarations ({})",
                file.display(),
                rule,
                removed.join(", ")
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    DeclarationsChanged {
        file: PathBuf,
        removed: Vec<String>,
        added: Vec<String>,
    },
    FarFromIssue {
        file: PathBuf,
        issue_line: usize,
        distance: usize,
    },
    SyntaxUnchecked {
        file: PathBuf,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::DeclarationsChanged {
                file,
                removed,
                added,
            } => {
                write!(f, "{}: declarations changed", file.display())?;
                if !removed.is_empty() {
                    write!(f, "; removed {}", removed.join(", "))?;
                }
                if !added.is_empty() {
                    write!(f, "; added {}", added.join(", "))?;
                }
                Ok(())
            }
            Warning::FarFromIssue {
                file,
                issue_line,
                distance,
            } => write!(
                f,
                "{}: nearest change is {} lines from the issue at line {}",
                file.display(),
                distance,
                issue_line
            ),
            Warning::SyntaxUnchecked { file } => {
                write!(f, "{}: no grammar available, syntax not checked", file.display())
            }
        }
    }
}

/// Aggregate diff statistics attached to a result.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationStats {
    pub lines_added: usize,
    pub lines_removed: usize,
    /// Largest per-file change ratio
    pub ratio: f64,
    /// Distance from the issue line to the closest change in the issue's file
    pub min_distance: Option<usize>,
    pub files: BTreeMap<PathBuf, DiffStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<BlockingError>,
    pub warnings: Vec<Warning>,
    pub stats: ValidationStats,
}

impl ValidationResult {
    pub fn first_error(&self) -> Option<&BlockingError> {
        self.errors.first()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidatorPipeline {
    config: ValidationConfig,
}

impl ValidatorPipeline {
    pub fn new(config: ValidationConfig) -> Self {
        ValidatorPipeline { config }
    }

    fn forbids_removal(&self, rule: &str) -> bool {
        self.config
            .forbid_declaration_removal_for
            .iter()
            .any(|prefix| !prefix.is_empty() && rule.starts_with(prefix.as_str()))
    }

    /// Validate `modified` (post-edit content per file) against `originals`.
    ///
    /// Files are checked in path order. Files present in `modified` but not
    /// in `originals` are treated as newly created.
    pub fn validate(
        &self,
        issue: &Issue,
        originals: &BTreeMap<PathBuf, String>,
        modified: &BTreeMap<PathBuf, String>,
    ) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut stats = ValidationStats::default();

        for (path, after) in modified {
            let before = originals.get(path).map(String::as_str).unwrap_or("");
            let language = Language::from_path(path);

            if language.is_known() {
                self.check_syntax(path, after, language, &mut errors);
                self.check_declarations(issue, path, before, after, language, &mut errors, &mut warnings);
            } else {
                warnings.push(Warning::SyntaxUnchecked { file: path.clone() });
            }

            let file_stats = diff_stats(before, after);
            self.check_magnitude(path, &file_stats, &mut errors);

            if path == &issue.file {
                if let Some(issue_line) = issue.line {
                    if let Some(distance) = file_stats.min_distance_to(issue_line) {
                        stats.min_distance = Some(distance);
                        if distance > self.config.proximity_warn_lines {
                            warnings.push(Warning::FarFromIssue {
                                file: path.clone(),
                                issue_line,
                                distance,
                            });
                        }
                    }
                }
            }

            stats.lines_added += file_stats.additions;
            stats.lines_removed += file_stats.deletions;
            stats.ratio = stats.ratio.max(file_stats.ratio());
            stats.files.insert(path.clone(), file_stats);
        }

        if !warnings.is_empty() {
            tracing::debug!(issue = %issue.key, warnings = warnings.len(), "validation warnings");
        }

        ValidationResult {
            valid: errors.is_empty(),
            errors,
            warnings,
            stats,
        }
    }

    fn check_syntax(
        &self,
        path: &Path,
        content: &str,
        language: Language,
        errors: &mut Vec<BlockingError>,
    ) {
        match syntax::parse(content, language) {
            Ok(tree) => {
                for issue in syntax::syntax_errors(&tree) {
                    errors.push(BlockingError::Syntax {
                        file: path.to_path_buf(),
                        line: issue.line,
                        detail: issue.to_string(),
                    });
                }
            }
            Err(err) => errors.push(BlockingError::Unparseable {
                file: path.to_path_buf(),
                reason: err.to_string(),
            }),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn check_declarations(
        &self,
        issue: &Issue,
        path: &Path,
        before: &str,
        after: &str,
        language: Language,
        errors: &mut Vec<BlockingError>,
        warnings: &mut Vec<Warning>,
    ) {
        let names = |content: &str| -> BTreeSet<String> {
            syntax::parse(content, language)
                .map(|tree| {
                    syntax::declarations(&tree, content, language)
                        .into_iter()
                        .map(|d| d.name)
                        .collect()
                })
                .unwrap_or_default()
        };
        let old_names = names(before);
        let new_names = names(after);

        let removed: Vec<String> = old_names.difference(&new_names).cloned().collect();
        let added: Vec<String> = new_names.difference(&old_names).cloned().collect();
        if removed.is_empty() && added.is_empty() {
            return;
        }

        if !removed.is_empty() && self.forbids_removal(&issue.rule) {
            errors.push(BlockingError::StructuralPolicy {
                file: path.to_path_buf(),
                rule: issue.rule.clone(),
                removed: removed.clone(),
            });
        }
        warnings.push(Warning::DeclarationsChanged {
            file: path.to_path_buf(),
            removed,
            added,
        });
    }

    fn check_magnitude(&self, path: &Path, stats: &DiffStats, errors: &mut Vec<BlockingError>) {
        let changed = stats.changed();
        let ratio = stats.ratio();
        if changed > self.config.max_lines_changed || ratio > self.config.max_change_ratio {
            errors.push(BlockingError::Magnitude {
                file: path.to_path_buf(),
                changed,
                ratio,
                max_lines: self.config.max_lines_changed,
                max_ratio: self.config.max_change_ratio,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn python_file(lines: usize) -> String {
        let mut out = String::from("import os\nimport sys\n\n\n");
        for i in 0..lines.saturating_sub(4) {
            out.push_str(&format!("value_{} = {}\n", i, i));
        }
        out
    }

    fn single(path: &str, before: &str, after: &str) -> (BTreeMap<PathBuf, String>, BTreeMap<PathBuf, String>) {
        let mut originals = BTreeMap::new();
        originals.insert(PathBuf::from(path), before.to_string());
        let mut modified = BTreeMap::new();
        modified.insert(PathBuf::from(path), after.to_string());
        (originals, modified)
    }

    fn issue_at(file: &str, line: usize) -> Issue {
        Issue::new("ISSUE-1", "python:S1128", file, Some(line))
    }

    #[test]
    fn removing_unused_import_passes() {
        let before = python_file(100);
        let after = before.replacen("import os\n", "", 1);
        let (originals, modified) = single("a.py", &before, &after);

        let result = ValidatorPipeline::default().validate(&issue_at("a.py", 1), &originals, &modified);
        assert!(result.valid, "{:?}", result.errors);
        assert_eq!(result.stats.lines_removed, 1);
        assert_eq!(result.stats.lines_added, 0);
        assert_eq!(result.stats.min_distance, Some(0));
        assert!((result.stats.ratio - 0.01).abs() < 1e-9);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn syntax_error_blocks_with_line() {
        let before = "def f():\n    return 1\n";
        let after = "def f(:\n    return 1\n";
        let (originals, modified) = single("m.py", before, after);

        let result = ValidatorPipeline::default().validate(&issue_at("m.py", 1), &originals, &modified);
        assert!(!result.valid);
        assert!(result
            .errors
            .iter()
            .any(|e| matches!(e, BlockingError::Syntax { line, .. } if *line >= 1)));
        assert!(matches!(result.first_error().unwrap().to_fix_error(), FixError::SyntaxValidation(_)));
    }

    #[test]
    fn one_line_change_in_large_file_is_within_ratio() {
        let before = python_file(1000);
        let after = before.replacen("value_10 = 10\n", "value_10 = 11\n", 1);
        let (originals, modified) = single("big.py", &before, &after);

        let result = ValidatorPipeline::default().validate(&issue_at("big.py", 15), &originals, &modified);
        assert!(result.valid, "{:?}", result.errors);
        assert!(result.stats.ratio < 0.10);
    }

    #[test]
    fn forty_line_rewrite_of_small_file_is_blocked() {
        let before = python_file(100);
        let mut after = before.clone();
        for i in 0..20 {
            after = after.replacen(
                &format!("value_{} = {}\n", i, i),
                &format!("value_{} = {}\n", i, i + 1000),
                1,
            );
        }
        let (originals, modified) = single("small.py", &before, &after);

        let result = ValidatorPipeline::default().validate(&issue_at("small.py", 10), &originals, &modified);
        assert!(!result.valid);
        let magnitude = result
            .errors
            .iter()
            .find(|e| matches!(e, BlockingError::Magnitude { .. }))
            .unwrap();
        match magnitude {
            BlockingError::Magnitude { changed, ratio, .. } => {
                assert_eq!(*changed, 40);
                assert!(*ratio > 0.10);
            }
            _ => unreachable!(),
        }
        assert!(matches!(magnitude.to_fix_error(), FixError::ChangeMagnitude(_)));
    }

    #[test]
    fn distant_change_warns_without_blocking() {
        let before = python_file(100);
        let after = before.replacen("value_80 = 80\n", "value_80 = 81\n", 1);
        let (originals, modified) = single("a.py", &before, &after);

        let result = ValidatorPipeline::default().validate(&issue_at("a.py", 2), &originals, &modified);
        assert!(result.valid);
        assert!(result
            .warnings
            .iter()
            .any(|w| matches!(w, Warning::FarFromIssue { distance, .. } if *distance > 20)));
    }

    #[test]
    fn removed_function_is_a_warning_by_default() {
        let before = "def keep():\n    pass\n\n\ndef drop():\n    pass\n";
        let after = "def keep():\n    pass\n";
        let (originals, modified) = single("f.py", before, after);
        let config = ValidationConfig {
            max_lines_changed: 100,
            max_change_ratio: 1.0,
            ..ValidationConfig::default()
        };

        let result = ValidatorPipeline::new(config.clone()).validate(&issue_at("f.py", 5), &originals, &modified);
        assert!(result.valid);
        assert_eq!(
            result.warnings,
            vec![Warning::DeclarationsChanged {
                file: PathBuf::from("f.py"),
                removed: vec!["drop".to_string()],
                added: Vec::new(),
            }]
        );

        let strict = ValidationConfig {
            forbid_declaration_removal_for: vec!["python:".to_string()],
            ..config
        };
        let result = ValidatorPipeline::new(strict).validate(&issue_at("f.py", 5), &originals, &modified);
        assert!(!result.valid);
        assert!(matches!(result.errors[0], BlockingError::StructuralPolicy { .. }));
    }

    #[test]
    fn unknown_language_skips_syntax_but_checks_magnitude() {
        let before = "a\nb\nc\n";
        let after = "a\nB\nc\n";
        let (originals, modified) = single("notes.txt", before, after);

        let result = ValidatorPipeline::default().validate(&issue_at("notes.txt", 2), &originals, &modified);
        assert!(!result.valid);
        assert!(matches!(result.errors[0], BlockingError::Magnitude { .. }));
        assert_eq!(
            result.warnings,
            vec![Warning::SyntaxUnchecked {
                file: PathBuf::from("notes.txt")
            }]
        );
    }

    #[test]
    fn validating_unmodified_file_is_idempotent() {
        let content = python_file(50);
        let (originals, modified) = single("same.py", &content, &content);
        let pipeline = ValidatorPipeline::default();
        let issue = issue_at("same.py", 3);

        let first = pipeline.validate(&issue, &originals, &modified);
        let second = pipeline.validate(&issue, &originals, &modified);
        assert_eq!(first, second);
        assert!(first.valid);
        assert_eq!(first.stats.min_distance, None);
    }
}
