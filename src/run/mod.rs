//! Run orchestration
//!
//! Issues are batched into file-groups. Groups run concurrently on a pool
//! bounded by `max_parallel_groups`; issues inside a group run one at a time
//! against that group's own [`Transaction`], so later issues see earlier
//! accepted fixes. All transactions share one write lock, so a fix that
//! reaches into another group's file is checked against storage before it
//! lands and retried if that file moved on.


use crate::config::FixConfig;
use crate::controller::{FixOutcome, FixStatus, RetryController};
use crate::error::FixError;
use crate::generator::Generator;
use crate::git_ops;
use crate::issue::{group_issues, FileGroup, Issue};
use crate::outcome_log::OutcomeLog;
use crate::storage::Storage;
use crate::transaction::Transaction;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, Semaphore};
use tracing::Instrument;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub accepted: usize,
    pub exhausted: usize,
    pub failed: usize,
    pub skipped: usize,
    /// accepted / total; 0 for an empty run
    pub success_rate: f64,
}

impl RunSummary {
    pub fn from_outcomes(outcomes: &[FixOutcome]) -> Self {
        let count = |status: FixStatus| outcomes.iter().filter(|o| o.status == status).count();
        let total = outcomes.len();
        let accepted = count(FixStatus::Accepted);
        RunSummary {
            total,
            accepted,
            exhausted: count(FixStatus::Exhausted),
            failed: count(FixStatus::Failed),
            skipped: count(FixStatus::Skipped),
            success_rate: if total == 0 {
                0.0
            } else {
                accepted as f64 / total as f64
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Group order (by path), then processing order inside each group
    pub outcomes: Vec<FixOutcome>,
    pub summary: RunSummary,
}

/// What a finished group hands back to the runner.
struct GroupResult {
    outcomes: Vec<FixOutcome>,
    storage_failed: bool,
}

/// State shared by every group task.
struct Shared {
    controller: RetryController,
    storage: Arc<dyn Storage>,
    repo_root: PathBuf,
    dry_run: bool,
    git_commit: bool,
    outcome_log: Option<OutcomeLog>,
    shutdown: Arc<AtomicBool>,
    /// Serializes git commits across groups
    commit_lock: Mutex<()>,
    /// Serializes storage commits across groups
    write_lock: Arc<StdMutex<()>>,
}

pub struct Runner {
    shared: Shared,
    max_parallel_groups: usize,
}

impl Runner {
    pub fn new(
        config: &FixConfig,
        generator: Arc<dyn Generator>,
        storage: Arc<dyn Storage>,
        repo_root: PathBuf,
    ) -> Self {
        Self::with_shutdown(config, generator, storage, repo_root, Arc::new(AtomicBool::new(false)))
    }

    pub fn with_shutdown(
        config: &FixConfig,
        generator: Arc<dyn Generator>,
        storage: Arc<dyn Storage>,
        repo_root: PathBuf,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let controller = RetryController::from_config(generator, config)
            .with_repo_root(repo_root.clone())
            .with_shutdown(shutdown.clone());
        Runner {
            shared: Shared {
                controller,
                storage,
                repo_root,
                dry_run: config.dry_run,
                git_commit: config.git_commit && !config.dry_run,
                outcome_log: None,
                shutdown,
                commit_lock: Mutex::new(()),
                write_lock: Arc::new(StdMutex::new(())),
            },
            max_parallel_groups: config.max_parallel_groups.max(1),
        }
    }

    /// Append every outcome to `log` as it is produced.
    pub fn with_outcome_log(mut self, log: OutcomeLog) -> Self {
        self.shared.outcome_log = Some(log);
        self
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shared.shutdown.clone()
    }

    /// Process every issue. Fails only when storage was unusable for every group.
    pub async fn run(self, issues: Vec<Issue>) -> Result<RunReport, FixError> {
        let shared = Arc::new(self.shared);
        let groups = group_issues(issues);
        let group_count = groups.len();
        tracing::info!(
            groups = group_count,
            issues = groups.iter().map(|g| g.issues.len()).sum::<usize>(),
            parallel = self.max_parallel_groups,
            dry_run = shared.dry_run,
            "starting run"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_parallel_groups));
        let mut handles = Vec::with_capacity(group_count);
        let mut group_issues_in_order = Vec::with_capacity(group_count);

        for group in groups {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            let shared = shared.clone();
            group_issues_in_order.push(group.issues.clone());
            let span = tracing::info_span!("group", file = %group.file.display());
            let handle = tokio::spawn(
                async move {
                    let _permit = permit;
                    run_group(&shared, group).await
                }
                .instrument(span),
            );
            handles.push(handle);
        }

        let results = futures::future::join_all(handles).await;
        let mut outcomes = Vec::new();
        let mut storage_failures = 0usize;
        for (issues, result) in group_issues_in_order.iter().zip(results) {
            match result {
                Ok(result) => {
                    storage_failures += usize::from(result.storage_failed);
                    outcomes.extend(result.outcomes);
                }
                Err(err) => {
                    tracing::error!(error = %err, "file-group task failed");
                    let reason = format!("file-group task failed: {}", err);
                    outcomes.extend(issues.iter().map(|i| FixOutcome::failed(i, 0, &reason)));
                }
            }
        }

        if group_count > 0 && storage_failures == group_count {
            return Err(FixError::StorageUnavailable {
                groups: group_count,
            });
        }

        let summary = RunSummary::from_outcomes(&outcomes);
        tracing::info!(
            total = summary.total,
            accepted = summary.accepted,
            exhausted = summary.exhausted,
            failed = summary.failed,
            skipped = summary.skipped,
            "run finished"
        );
        Ok(RunReport { outcomes, summary })
    }
}

async fn run_group(shared: &Shared, group: FileGroup) -> GroupResult {
    let mut tx = Transaction::new(shared.storage.clone(), shared.dry_run)
        .with_write_lock(shared.write_lock.clone());
    let mut outcomes = Vec::with_capacity(group.issues.len());
    let mut abort: Option<FixError> = None;

    for issue in &group.issues {
        let mut outcome = if let Some(err) = &abort {
            FixOutcome::failed(issue, 0, err)
        } else if shared.shutdown.load(Ordering::SeqCst) {
            FixOutcome::skipped(issue, 0, "shutdown requested")
        } else {
            match shared.controller.fix_issue(issue, &mut tx).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    let err = FixError::from(err);
                    let outcome = FixOutcome::failed(issue, 0, &err);
                    if err.is_group_fatal() {
                        tracing::error!(issue = %issue.key, error = %err, "storage failed; abandoning file-group");
                        abort = Some(err);
                    } else {
                        tracing::warn!(issue = %issue.key, error = %err, "issue failed");
                    }
                    outcome
                }
            }
        };

        if shared.git_commit && outcome.status == FixStatus::Accepted {
            commit_accepted(shared, issue, &mut outcome).await;
        }
        record(shared, &outcome).await;
        outcomes.push(outcome);
    }

    GroupResult {
        outcomes,
        storage_failed: abort.is_some(),
    }
}

async fn commit_accepted(shared: &Shared, issue: &Issue, outcome: &mut FixOutcome) {
    if outcome.files_modified.is_empty() {
        return;
    }
    let _guard = shared.commit_lock.lock().await;
    let repo = shared.repo_root.clone();
    let files = outcome.files_modified.clone();
    let message = git_ops::commit_message(outcome, &issue.message);

    let result = tokio::task::spawn_blocking(move || git_ops::commit_files(&repo, &files, &message)).await;
    match result {
        Ok(Ok(oid)) => tracing::info!(issue = %issue.key, commit = %oid, "committed fix"),
        Ok(Err(err)) => {
            tracing::warn!(issue = %issue.key, error = %err, "git commit failed");
            outcome.warnings.push(format!("git commit failed: {}", err));
        }
        Err(err) => {
            tracing::warn!(issue = %issue.key, error = %err, "git commit task failed");
            outcome.warnings.push(format!("git commit failed: {}", err));
        }
    }
}

async fn record(shared: &Shared, outcome: &FixOutcome) {
    let Some(log) = shared.outcome_log.clone() else {
        return;
    };
    let row = outcome.clone();
    match tokio::task::spawn_blocking(move || log.append(&row)).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!(issue = %outcome.issue_key, error = %err, "failed to append outcome"),
        Err(err) => tracing::warn!(issue = %outcome.issue_key, error = %err, "outcome log task failed"),
    }
}
