//! Error taxonomy for the fix engine
//!
//! Every failure the engine can hit while working on an issue is one of these
//! types. Retryable failures consume an attempt; storage failures end the
//! current file-group; nothing here aborts the whole run on its own.

use std::path::PathBuf;
use thiserror::Error;

/// Failure applying a single exact-match substitution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    #[error("old_code not found")]
    NotFound,
    #[error("old_code matches {count} times (must be unique)")]
    Ambiguous { count: usize },
    #[error("old_code is empty")]
    EmptyAnchor,
    #[error("file could not be read: {reason}")]
    FileUnavailable { reason: String },
    #[error("file changed on disk after the edit was prepared")]
    Stale,
}

/// An [`EditError`] with the position of the failing edit inside its set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("edit {index} in {}: {error}", file.display())]
pub struct EditFailure {
    /// 1-based position of the edit in the edit set
    pub index: usize,
    pub file: PathBuf,
    pub error: EditError,
    /// Verbatim anchor that failed (kept for retry feedback)
    pub anchor: String,
}

/// Failure producing or decoding a candidate edit set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeneratorError {
    #[error("generator output was malformed: {0}")]
    Malformed(String),
    #[error("generator timed out after {0}ms")]
    Timeout(u64),
    #[error("generator request failed: {0}")]
    Transport(String),
    #[error("generator rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Failure reading or writing persistent storage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("failed to read {}: {reason}", path.display())]
    Read { path: PathBuf, reason: String },
    #[error("failed to write {}: {reason}", path.display())]
    Write { path: PathBuf, reason: String },
    #[error("rollback of {} failed after a partial commit: {reason}", path.display())]
    Rollback { path: PathBuf, reason: String },
    #[error("path rejected: {0}")]
    InvalidPath(String),
}

/// Failure committing a staged change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitError {
    /// Storage no longer holds the text the change was staged against
    #[error(transparent)]
    Stale(EditFailure),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Top-level error for one issue or one run.
#[derive(Debug, Clone, Error)]
pub enum FixError {
    #[error("localization degraded: {0}")]
    Localization(String),
    #[error(transparent)]
    Edit(#[from] EditFailure),
    #[error("syntax validation failed: {0}")]
    SyntaxValidation(String),
    #[error("change too large: {0}")]
    ChangeMagnitude(String),
    #[error(transparent)]
    Generator(#[from] GeneratorError),
    #[error("retries exhausted after {attempts} attempts")]
    ExhaustedRetries { attempts: usize },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("storage unavailable for all {groups} file groups")]
    StorageUnavailable { groups: usize },
}

impl FixError {
    /// Whether the controller should spend another attempt after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FixError::Edit(_)
                | FixError::SyntaxValidation(_)
                | FixError::ChangeMagnitude(_)
                | FixError::Generator(_)
        )
    }

    /// Whether the error ends processing of the current file-group.
    pub fn is_group_fatal(&self) -> bool {
        matches!(self, FixError::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification_matches_taxonomy() {
        let edit = FixError::Edit(EditFailure {
            index: 1,
            file: PathBuf::from("a.py"),
            error: EditError::NotFound,
            anchor: "x".to_string(),
        });
        assert!(edit.is_retryable());
        assert!(FixError::Generator(GeneratorError::Timeout(10)).is_retryable());
        assert!(FixError::ChangeMagnitude("40 lines".into()).is_retryable());
        assert!(!FixError::ExhaustedRetries { attempts: 3 }.is_retryable());
        assert!(!FixError::Localization("no grammar".into()).is_retryable());

        let storage = FixError::Storage(StorageError::Write {
            path: PathBuf::from("a.py"),
            reason: "disk full".into(),
        });
        assert!(!storage.is_retryable());
        assert!(storage.is_group_fatal());

        let stale = FixError::Edit(EditFailure {
            index: 1,
            file: PathBuf::from("b.py"),
            error: EditError::Stale,
            anchor: "import sys\n".to_string(),
        });
        assert!(stale.is_retryable());
        assert!(!stale.is_group_fatal());
    }

    #[test]
    fn edit_failure_message_names_file_and_index() {
        let failure = EditFailure {
            index: 2,
            file: PathBuf::from("src/lib.rs"),
            error: EditError::Ambiguous { count: 3 },
            anchor: "}".to_string(),
        };
        let msg = failure.to_string();
        assert!(msg.contains("edit 2"));
        assert!(msg.contains("src/lib.rs"));
        assert!(msg.contains("3 times"));
    }
}
