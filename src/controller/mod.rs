//! Per-issue edit/validate/retry state machine
//!
//! ```text
//! ANALYZE -> PROPOSE -> APPLY -> VALIDATE -> ACCEPT
//!               ^         |         |
//!               |         v         v
//!               +------- RETRY -----+---> EXHAUSTED
//! ```
//!
//! Every rejected attempt becomes an [`AttemptRecord`]; the full list is
//! copied into the next generator request. Storage is only written in
//! ACCEPT, so dropping the future at any earlier point leaves files intact.
//! A commit refused as stale goes back to RETRY like a rejected edit.

pub mod feedback;


use crate::config::FixConfig;
use crate::edit::EditSet;
use crate::error::{CommitError, EditError, EditFailure, FixError, GeneratorError, StorageError};
use crate::generator::{GenerationRequest, Generator};
use crate::issue::Issue;
use crate::localize::{locate_issue, IssueContext};
use crate::syntax::Language;
use crate::transaction::{CommitReceipt, StagedChange, Transaction};
use crate::validate::{ValidationResult, ValidatorPipeline};
use crate::xref;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub use feedback::{build_feedback, Directive};

/// Why an attempt was rejected.
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    GeneratorFailed(GeneratorError),
    EditRejected {
        edit_set: EditSet,
        failure: EditFailure,
    },
    ValidationFailed {
        edit_set: EditSet,
        /// Unified diff of the rejected change against the snapshot
        diff: String,
        validation: ValidationResult,
    },
}

impl AttemptOutcome {
    pub fn edit_set(&self) -> Option<&EditSet> {
        match self {
            AttemptOutcome::GeneratorFailed(_) => None,
            AttemptOutcome::EditRejected { edit_set, .. }
            | AttemptOutcome::ValidationFailed { edit_set, .. } => Some(edit_set),
        }
    }

    pub fn validation(&self) -> Option<&ValidationResult> {
        match self {
            AttemptOutcome::ValidationFailed { validation, .. } => Some(validation),
            _ => None,
        }
    }

    pub fn to_fix_error(&self) -> FixError {
        match self {
            AttemptOutcome::GeneratorFailed(err) => FixError::Generator(err.clone()),
            AttemptOutcome::EditRejected { failure, .. } => FixError::Edit(failure.clone()),
            AttemptOutcome::ValidationFailed { validation, .. } => validation
                .first_error()
                .map(|e| e.to_fix_error())
                .unwrap_or_else(|| FixError::SyntaxValidation("validation failed".to_string())),
        }
    }
}

/// One rejected iteration for an issue.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    /// 1-based
    pub attempt: usize,
    pub outcome: AttemptOutcome,
    pub feedback: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStatus {
    Accepted,
    Exhausted,
    /// Storage failed for the issue's file-group
    Failed,
    /// Not attempted because of shutdown
    Skipped,
}

impl FixStatus {
    pub fn label(&self) -> &'static str {
        match self {
            FixStatus::Accepted => "ACCEPTED",
            FixStatus::Exhausted => "EXHAUSTED",
            FixStatus::Failed => "FAILED",
            FixStatus::Skipped => "SKIPPED",
        }
    }
}

/// Terminal record for one issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixOutcome {
    pub issue_key: String,
    pub rule: String,
    pub file: PathBuf,
    pub status: FixStatus,
    pub files_modified: Vec<PathBuf>,
    pub diff: String,
    pub attempts: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub dry_run: bool,
}

impl FixOutcome {
    fn base(issue: &Issue, status: FixStatus, attempts: usize) -> Self {
        FixOutcome {
            issue_key: issue.key.clone(),
            rule: issue.rule.clone(),
            file: issue.file.clone(),
            status,
            files_modified: Vec::new(),
            diff: String::new(),
            attempts,
            message: None,
            warnings: Vec::new(),
            dry_run: false,
        }
    }

    pub fn accepted(
        issue: &Issue,
        attempts: usize,
        receipt: CommitReceipt,
        validation: &ValidationResult,
    ) -> Self {
        FixOutcome {
            files_modified: receipt.files,
            diff: receipt.diff,
            dry_run: receipt.dry_run,
            warnings: validation.warnings.iter().map(|w| w.to_string()).collect(),
            ..Self::base(issue, FixStatus::Accepted, attempts)
        }
    }

    pub fn exhausted(issue: &Issue, attempts: usize, last_error: Option<FixError>) -> Self {
        let exhausted = FixError::ExhaustedRetries { attempts };
        let message = match last_error {
            Some(err) => format!("{}; last error: {}", exhausted, err),
            None => exhausted.to_string(),
        };
        FixOutcome {
            message: Some(message),
            ..Self::base(issue, FixStatus::Exhausted, attempts)
        }
    }

    pub fn failed(issue: &Issue, attempts: usize, reason: impl std::fmt::Display) -> Self {
        FixOutcome {
            message: Some(reason.to_string()),
            ..Self::base(issue, FixStatus::Failed, attempts)
        }
    }

    pub fn skipped(issue: &Issue, attempts: usize, reason: &str) -> Self {
        FixOutcome {
            message: Some(reason.to_string()),
            ..Self::base(issue, FixStatus::Skipped, attempts)
        }
    }
}

enum FixState {
    Analyze,
    Propose,
    Apply(EditSet),
    Validate(StagedChange),
    Accept(StagedChange, ValidationResult),
    Retry(AttemptOutcome),
    Exhausted,
}

/// Localized context gathered once per issue.
struct Analysis {
    context: IssueContext,
    cross_references: Vec<String>,
}

pub struct RetryController {
    generator: Arc<dyn Generator>,
    pipeline: ValidatorPipeline,
    max_retries: usize,
    generator_timeout: Duration,
    repo_root: Option<PathBuf>,
    shutdown: Option<Arc<AtomicBool>>,
}

impl RetryController {
    pub fn new(
        generator: Arc<dyn Generator>,
        pipeline: ValidatorPipeline,
        max_retries: usize,
        generator_timeout: Duration,
    ) -> Self {
        RetryController {
            generator,
            pipeline,
            max_retries: max_retries.max(1),
            generator_timeout,
            repo_root: None,
            shutdown: None,
        }
    }

    pub fn from_config(generator: Arc<dyn Generator>, config: &FixConfig) -> Self {
        Self::new(
            generator,
            ValidatorPipeline::new(config.validation()),
            config.max_retries,
            config.generator_timeout(),
        )
    }

    /// Enable cross-reference search rooted at `root`.
    pub fn with_repo_root(mut self, root: PathBuf) -> Self {
        self.repo_root = Some(root);
        self
    }

    /// Stop proposing new attempts once `flag` is set.
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    fn shutting_down(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    async fn analyze(&self, issue: &Issue, content: &str) -> Analysis {
        let language = Language::from_path(&issue.file);
        let context = match issue.line {
            Some(line) => locate_issue(content, language, line, issue.column),
            None => IssueContext::whole_file(content, "issue has no line".to_string()),
        };
        if let Some(reason) = &context.degraded {
            let error = FixError::Localization(reason.clone());
            tracing::warn!(issue = %issue.key, file = %issue.file.display(), %error, "using whole-file context");
        }

        let cross_references = match &self.repo_root {
            Some(root) => {
                let (root, ctx, file) = (root.clone(), context.clone(), issue.file.clone());
                tokio::task::spawn_blocking(move || xref::references_for(&root, &ctx, &file))
                    .await
                    .unwrap_or_default()
            }
            None => Vec::new(),
        };

        Analysis {
            context,
            cross_references,
        }
    }

    async fn propose(&self, request: &GenerationRequest) -> Result<EditSet, GeneratorError> {
        match tokio::time::timeout(self.generator_timeout, self.generator.generate(request)).await {
            Ok(result) => result,
            Err(_) => Err(GeneratorError::Timeout(
                self.generator_timeout.as_millis() as u64,
            )),
        }
    }

    /// Drive one issue to ACCEPT, EXHAUSTED or SKIPPED.
    ///
    /// Only storage failures escape as errors; they end the file-group.
    pub async fn fix_issue(
        &self,
        issue: &Issue,
        tx: &mut Transaction,
    ) -> Result<FixOutcome, StorageError> {
        let mut state = FixState::Analyze;
        let mut analysis: Option<Analysis> = None;
        let mut history: Vec<AttemptRecord> = Vec::new();
        let mut attempt = 0usize;

        loop {
            state = match state {
                FixState::Analyze => {
                    let content = tx.load(&issue.file)?.to_string();
                    analysis = Some(self.analyze(issue, &content).await);
                    FixState::Propose
                }

                FixState::Propose => {
                    if self.shutting_down() {
                        return Ok(FixOutcome::skipped(issue, attempt, "shutdown requested"));
                    }
                    attempt += 1;
                    let (context, cross_references) = match &analysis {
                        Some(a) => (a.context.clone(), a.cross_references.clone()),
                        None => {
                            let content = tx.load(&issue.file)?;
                            (IssueContext::whole_file(content, "not analyzed".to_string()), Vec::new())
                        }
                    };
                    let request = GenerationRequest {
                        issue: issue.clone(),
                        context,
                        file_content: tx.load(&issue.file)?.to_string(),
                        cross_references,
                        history: history.clone(),
                        attempt,
                        max_retries: self.max_retries,
                    };
                    tracing::debug!(issue = %issue.key, attempt, "proposing");

                    match self.propose(&request).await {
                        Ok(set) => FixState::Apply(set),
                        Err(err) => FixState::Retry(AttemptOutcome::GeneratorFailed(err)),
                    }
                }

                FixState::Apply(set) => match tx.stage(&set) {
                    Ok(staged) => FixState::Validate(staged),
                    Err(failure) => FixState::Retry(AttemptOutcome::EditRejected {
                        edit_set: set,
                        failure,
                    }),
                },

                FixState::Validate(staged) => {
                    let result = self
                        .pipeline
                        .validate(issue, &staged.originals, &staged.modified);
                    for warning in &result.warnings {
                        tracing::debug!(issue = %issue.key, attempt, %warning, "validation warning");
                    }
                    if result.valid {
                        FixState::Accept(staged, result)
                    } else {
                        FixState::Retry(AttemptOutcome::ValidationFailed {
                            diff: staged.diff(),
                            edit_set: staged.edit_set,
                            validation: result,
                        })
                    }
                }

                FixState::Accept(staged, result) => match tx.commit(&staged) {
                    Ok(receipt) => {
                        tracing::info!(
                            issue = %issue.key,
                            file = %issue.file.display(),
                            attempt,
                            files = receipt.files.len(),
                            dry_run = receipt.dry_run,
                            "fix accepted"
                        );
                        return Ok(FixOutcome::accepted(issue, attempt, receipt, &result));
                    }
                    Err(CommitError::Stale(failure)) => FixState::Retry(AttemptOutcome::EditRejected {
                        edit_set: staged.edit_set,
                        failure,
                    }),
                    Err(CommitError::Storage(err)) => return Err(err),
                },

                FixState::Retry(outcome) => {
                    let content = tx.snapshot().get(&issue.file).unwrap_or("");
                    let feedback = build_feedback(attempt, &outcome, issue, content);
                    let error = outcome.to_fix_error();
                    // The issue's own file moved under us; localize it again.
                    let relocate = matches!(
                        &outcome,
                        AttemptOutcome::EditRejected { failure, .. }
                            if failure.error == EditError::Stale && failure.file == issue.file
                    );
                    tracing::debug!(issue = %issue.key, attempt, %error, "attempt rejected");
                    history.push(AttemptRecord {
                        attempt,
                        outcome,
                        feedback,
                    });
                    if !error.is_retryable() || attempt >= self.max_retries {
                        FixState::Exhausted
                    } else if relocate {
                        FixState::Analyze
                    } else {
                        FixState::Propose
                    }
                }

                FixState::Exhausted => {
                    let last_error = history.last().map(|r| r.outcome.to_fix_error());
                    tracing::info!(
                        issue = %issue.key,
                        file = %issue.file.display(),
                        attempts = attempt,
                        "retries exhausted"
                    );
                    return Ok(FixOutcome::exhausted(issue, attempt, last_error));
                }
            };
        }
    }
}
