//! Retry feedback synthesis
//!
//! Turns a rejected attempt into text for the next generator call: what
//! failed, where to look, the rejected diff, and a directive that tightens
//! with each failure.

use super::AttemptOutcome;
use crate::edit::match_lines;
use crate::error::EditError;
use crate::issue::Issue;
use crate::util::{snippet_around_line, truncate};

/// Longest rejected diff quoted back to the generator
pub const MAX_FEEDBACK_DIFF_CHARS: usize = 4_000;
const MAX_LISTED_ERRORS: usize = 10;
const SNIPPET_RADIUS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Keep the file parseable; copy anchors exactly
    SyntaxFidelity,
    /// Change as few lines as possible
    Minimal,
    /// One-line substitution only
    Narrow,
}

impl Directive {
    /// Directive attached after attempt `failed` (1-based) is rejected.
    pub fn after(failed: usize) -> Self {
        match failed {
            0 | 1 => Directive::SyntaxFidelity,
            2 => Directive::Minimal,
            _ => Directive::Narrow,
        }
    }

    pub fn text(&self) -> &'static str {
        match self {
            Directive::SyntaxFidelity => {
                "Be careful with syntax: the edited file must still parse. Copy old_code \
                 character-for-character from the file, including indentation, and keep \
                 brackets, quotes and blocks balanced in new_code."
            }
            Directive::Minimal => {
                "Make a strictly minimal change. Touch only the lines the issue requires; \
                 do not reformat, rename or restructure anything else."
            }
            Directive::Narrow => {
                "Earlier strategies failed: use the narrowest possible one. Replace a single line \
                 (the one at or nearest the reported issue line) with its corrected form, \
                 changing nothing else. If the fix cannot be done in one line, change as \
                 few lines as possible."
            }
        }
    }
}

fn hint_for_edit_error(error: &EditError, anchor: &str, content: &str, issue: &Issue) -> Option<String> {
    match error {
        EditError::NotFound => {
            let line = issue.line.unwrap_or(1);
            let snippet = snippet_around_line(content, line, SNIPPET_RADIUS);
            if snippet.is_empty() {
                return None;
            }
            Some(format!(
                "old_code does not exist verbatim in the file. These are the current lines around \
                 line {} (line numbers are NOT part of the file):\n{}",
                line, snippet
            ))
        }
        EditError::Ambiguous { .. } => {
            let lines = match_lines(content, anchor)
                .into_iter()
                .take(5)
                .map(|l| l.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            Some(format!(
                "old_code appears at lines {}. Include neighbouring lines so it matches exactly once.",
                lines
            ))
        }
        EditError::EmptyAnchor => Some("old_code must contain the exact text to replace.".to_string()),
        EditError::FileUnavailable { .. } => {
            Some(format!("Only edit files that exist; the issue is in {}.", issue.file.display()))
        }
        EditError::Stale => Some(
            "Another fix changed this file while yours was being checked. Prepare the edit \
             again and copy old_code from the current file content."
                .to_string(),
        ),
    }
}

/// Feedback for the attempt that produced `outcome`.
///
/// `content` is the current text of the issue's file.
pub fn build_feedback(
    failed_attempt: usize,
    outcome: &AttemptOutcome,
    issue: &Issue,
    content: &str,
) -> String {
    let mut out = format!("Attempt {} was rejected.\n", failed_attempt);

    match outcome {
        AttemptOutcome::GeneratorFailed(err) => {
            out.push_str(&format!("Your response could not be used: {}\n", err));
            out.push_str(
                "Respond with a single JSON object containing \"edits\" with old_code and new_code.\n",
            );
        }
        AttemptOutcome::EditRejected { failure, .. } => {
            out.push_str(&format!("Error: {}\n", failure));
            let file_content = if failure.file == issue.file { content } else { "" };
            if let Some(hint) = hint_for_edit_error(&failure.error, &failure.anchor, file_content, issue) {
                out.push_str(&hint);
                out.push('\n');
            }
        }
        AttemptOutcome::ValidationFailed {
            validation, diff, ..
        } => {
            out.push_str("Blocking errors:\n");
            for err in validation.errors.iter().take(MAX_LISTED_ERRORS) {
                out.push_str(&format!("- {}\n", err));
            }
            if validation.errors.len() > MAX_LISTED_ERRORS {
                out.push_str(&format!(
                    "- ... and {} more\n",
                    validation.errors.len() - MAX_LISTED_ERRORS
                ));
            }
            if !diff.is_empty() {
                out.push_str("Rejected change:\n```diff\n");
                out.push_str(&truncate(diff, MAX_FEEDBACK_DIFF_CHARS));
                if !out.ends_with('\n') {
                    out.push('\n');
                }
                out.push_str("```\n");
            }
        }
    }

    out.push_str(Directive::after(failed_attempt).text());
    out
}
