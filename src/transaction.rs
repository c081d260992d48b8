//! Per-file-group snapshots and all-or-nothing commits
//!
//! A `Transaction` owns the in-memory view of every file its group has
//! touched. Edits are staged against that view; nothing reaches storage until
//! `commit`, and a failed commit restores whatever it already wrote.
//!
//! Transactions of different groups may share files. Each commit first checks,
//! under a lock shared by those transactions, that storage still holds the text
//! the change was staged against; otherwise the change is refused as stale.

use crate::diff::unified_diff;
use crate::edit::{apply_edit_set, EditSet};
use crate::error::{CommitError, EditError, EditFailure, StorageError};
use crate::storage::Storage;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Current text of every file a file-group has loaded.
#[derive(Debug, Clone, Default)]
pub struct SourceSnapshot {
    files: BTreeMap<PathBuf, String>,
}

impl SourceSnapshot {
    pub fn get(&self, path: &Path) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn insert(&mut self, path: PathBuf, content: String) {
        self.files.insert(path, content);
    }
}

/// An edit set applied in memory, ready for validation and commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedChange {
    pub edit_set: EditSet,
    /// Pre-edit content of every touched file
    pub originals: BTreeMap<PathBuf, String>,
    /// Post-edit content of every touched file
    pub modified: BTreeMap<PathBuf, String>,
}

impl StagedChange {
    pub fn files(&self) -> Vec<PathBuf> {
        self.modified.keys().cloned().collect()
    }

    /// Unified diff over all touched files, in path order.
    pub fn diff(&self) -> String {
        self.modified
            .iter()
            .filter_map(|(path, after)| {
                let before = self.originals.get(path).map(String::as_str).unwrap_or("");
                let diff = unified_diff(before, after, &path.to_string_lossy());
                (!diff.is_empty()).then_some(diff)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    pub files: Vec<PathBuf>,
    pub diff: String,
    pub dry_run: bool,
}

pub struct Transaction {
    storage: Arc<dyn Storage>,
    snapshot: SourceSnapshot,
    dry_run: bool,
    /// Held while verifying and writing a commit
    write_lock: Arc<Mutex<()>>,
}

impl Transaction {
    pub fn new(storage: Arc<dyn Storage>, dry_run: bool) -> Self {
        Transaction {
            storage,
            snapshot: SourceSnapshot::default(),
            dry_run,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Serialize commits with every other transaction holding `lock`.
    pub fn with_write_lock(mut self, lock: Arc<Mutex<()>>) -> Self {
        self.write_lock = lock;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn snapshot(&self) -> &SourceSnapshot {
        &self.snapshot
    }

    /// Current content of `path`, reading it from storage on first use.
    pub fn load(&mut self, path: &Path) -> Result<&str, StorageError> {
        if !self.snapshot.contains(path) {
            let content = self.storage.read(path)?;
            self.snapshot.insert(path.to_path_buf(), content);
        }
        self.snapshot
            .get(path)
            .ok_or_else(|| StorageError::Read {
                path: path.to_path_buf(),
                reason: "missing from snapshot after load".to_string(),
            })
    }

    /// Apply `set` against the snapshot without mutating it.
    ///
    /// A file the set names that cannot be read is reported as an edit
    /// failure on the first edit targeting it.
    pub fn stage(&mut self, set: &EditSet) -> Result<StagedChange, EditFailure> {
        let mut originals = BTreeMap::new();
        for (i, edit) in set.edits.iter().enumerate() {
            if originals.contains_key(&edit.file) {
                continue;
            }
            let content = self.load(&edit.file).map_err(|err| EditFailure {
                index: i + 1,
                file: edit.file.clone(),
                error: EditError::FileUnavailable {
                    reason: err.to_string(),
                },
                anchor: edit.old_code.clone(),
            })?;
            originals.insert(edit.file.clone(), content.to_string());
        }

        let modified = apply_edit_set(set, &originals)?;
        Ok(StagedChange {
            edit_set: set.clone(),
            originals,
            modified,
        })
    }

    /// Persist a validated change and fold it into the snapshot.
    ///
    /// In dry-run mode storage is untouched. A file whose stored text no longer
    /// matches what the change was staged against makes the commit stale: the
    /// snapshot takes the stored text and nothing is written. If any write
    /// fails, files already written for this change are restored to their
    /// pre-commit content before the error is returned.
    pub fn commit(&mut self, staged: &StagedChange) -> Result<CommitReceipt, CommitError> {
        let diff = staged.diff();
        let changed: Vec<(&PathBuf, &String)> = staged
            .modified
            .iter()
            .filter(|(path, after)| staged.originals.get(*path) != Some(*after))
            .collect();

        if !self.dry_run {
            let lock = Arc::clone(&self.write_lock);
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.verify_unchanged(staged, changed.iter().map(|(path, _)| *path))?;

            let mut written: Vec<&PathBuf> = Vec::new();
            for (path, content) in &changed {
                if let Err(err) = self.storage.write(path, content) {
                    tracing::warn!(file = %path.display(), error = %err, "commit failed; rolling back");
                    self.rollback(&written, staged)?;
                    return Err(err.into());
                }
                written.push(*path);
            }
        }

        for (path, content) in &changed {
            self.snapshot.insert((*path).clone(), (*content).clone());
        }

        Ok(CommitReceipt {
            files: changed.iter().map(|(path, _)| (*path).clone()).collect(),
            diff,
            dry_run: self.dry_run,
        })
    }

    /// Compare stored text with the staged originals, refreshing stale entries.
    fn verify_unchanged<'a>(
        &mut self,
        staged: &StagedChange,
        paths: impl Iterator<Item = &'a PathBuf>,
    ) -> Result<(), CommitError> {
        let mut stale: Option<EditFailure> = None;
        for path in paths {
            let current = self.storage.read(path)?;
            if staged.originals.get(path) == Some(&current) {
                continue;
            }
            tracing::warn!(file = %path.display(), "file changed since it was staged");
            if stale.is_none() {
                let (index, anchor) = staged
                    .edit_set
                    .edits
                    .iter()
                    .enumerate()
                    .find(|(_, edit)| &edit.file == path)
                    .map(|(i, edit)| (i + 1, edit.old_code.clone()))
                    .unwrap_or((1, String::new()));
                stale = Some(EditFailure {
                    index,
                    file: path.clone(),
                    error: EditError::Stale,
                    anchor,
                });
            }
            self.snapshot.insert(path.clone(), current);
        }
        match stale {
            Some(failure) => Err(CommitError::Stale(failure)),
            None => Ok(()),
        }
    }

    fn rollback(&self, written: &[&PathBuf], staged: &StagedChange) -> Result<(), StorageError> {
        for path in written.iter().rev() {
            let original = staged
                .originals
                .get(*path)
                .map(String::as_str)
                .unwrap_or("");
            if let Err(err) = self.storage.write(path, original) {
                tracing::error!(file = %path.display(), error = %err, "rollback failed");
                return Err(StorageError::Rollback {
                    path: (*path).clone(),
                    reason: err.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit::ProposedEdit;
    use crate::storage::memory::MemoryStorage;

    fn two_file_set(b_anchor: &str) -> EditSet {
        EditSet::new(vec![
            ProposedEdit {
                file: PathBuf::from("a.py"),
                old_code: "import os\n".into(),
                new_code: String::new(),
            },
            ProposedEdit {
                file: PathBuf::from("b.py"),
                old_code: b_anchor.into(),
                new_code: "y = 2\n".into(),
            },
        ])
    }

    #[test]
    fn failed_edit_leaves_storage_and_snapshot_untouched() {
        let storage = Arc::new(MemoryStorage::with_files(&[
            ("a.py", "import os\nx = 1\n"),
            ("b.py", "y = 1\n"),
        ]));
        let mut tx = Transaction::new(storage.clone(), false);

        let err = tx.stage(&two_file_set("z = 9\n")).unwrap_err();
        assert_eq!(err.index, 2);
        assert_eq!(err.error, EditError::NotFound);
        assert_eq!(tx.snapshot().get(Path::new("a.py")), Some("import os\nx = 1\n"));
        assert_eq!(storage.get("a.py").unwrap(), "import os\nx = 1\n");
        assert_eq!(storage.get("b.py").unwrap(), "y = 1\n");
        assert!(storage.writes().is_empty());
    }

    #[test]
    fn commit_writes_every_file_and_updates_snapshot() {
        let storage = Arc::new(MemoryStorage::with_files(&[
            ("a.py", "import os\nx = 1\n"),
            ("b.py", "y = 1\n"),
        ]));
        let mut tx = Transaction::new(storage.clone(), false);

        let staged = tx.stage(&two_file_set("y = 1\n")).unwrap();
        let receipt = tx.commit(&staged).unwrap();
        assert_eq!(receipt.files, vec![PathBuf::from("a.py"), PathBuf::from("b.py")]);
        assert!(receipt.diff.contains("-import os"));
        assert_eq!(storage.get("a.py").unwrap(), "x = 1\n");
        assert_eq!(storage.get("b.py").unwrap(), "y = 2\n");
        assert_eq!(tx.snapshot().get(Path::new("b.py")), Some("y = 2\n"));
    }

    #[test]
    fn failed_write_rolls_back_earlier_files() {
        let storage = Arc::new(MemoryStorage::with_files(&[
            ("a.py", "import os\nx = 1\n"),
            ("b.py", "y = 1\n"),
        ]));
        storage.fail_writes_to("b.py");
        let mut tx = Transaction::new(storage.clone(), false);

        let staged = tx.stage(&two_file_set("y = 1\n")).unwrap();
        let err = tx.commit(&staged).unwrap_err();
        assert!(matches!(err, CommitError::Storage(StorageError::Write { .. })));
        assert_eq!(storage.get("a.py").unwrap(), "import os\nx = 1\n");
        assert_eq!(storage.get("b.py").unwrap(), "y = 1\n");
        assert_eq!(tx.snapshot().get(Path::new("a.py")), Some("import os\nx = 1\n"));
    }

    #[test]
    fn dry_run_reports_diff_and_updates_snapshot_only() {
        let storage = Arc::new(MemoryStorage::with_files(&[("a.py", "import os\nx = 1\n")]));
        let mut tx = Transaction::new(storage.clone(), true);

        let staged = tx
            .stage(&EditSet::single("a.py", "import os\n", ""))
            .unwrap();
        let receipt = tx.commit(&staged).unwrap();
        assert!(receipt.dry_run);
        assert!(receipt.diff.contains("-import os"));
        assert_eq!(storage.get("a.py").unwrap(), "import os\nx = 1\n");
        assert!(storage.writes().is_empty());
        assert_eq!(tx.snapshot().get(Path::new("a.py")), Some("x = 1\n"));

        // Later edits see the simulated content.
        let err = tx
            .stage(&EditSet::single("a.py", "import os\n", ""))
            .unwrap_err();
        assert_eq!(err.error, EditError::NotFound);
    }

    #[test]
    fn unreadable_file_is_an_edit_failure() {
        let storage = Arc::new(MemoryStorage::with_files(&[("a.py", "x = 1\n")]));
        storage.fail_reads_of("a.py");
        let mut tx = Transaction::new(storage, false);

        let err = tx.stage(&EditSet::single("a.py", "x", "y")).unwrap_err();
        assert!(matches!(err.error, EditError::FileUnavailable { .. }));
    }

    #[test]
    fn commit_over_a_newer_write_is_stale_and_refreshes_snapshot() {
        let storage = Arc::new(MemoryStorage::with_files(&[
            ("a.py", "import os\nx = 1\n"),
            ("b.py", "from a import os\nimport sys\ny = 1\n"),
        ]));
        let lock = Arc::new(Mutex::new(()));
        let mut first = Transaction::new(storage.clone(), false).with_write_lock(lock.clone());
        let mut second = Transaction::new(storage.clone(), false).with_write_lock(lock);

        // `second` reads b.py before `first` changes it.
        let late = second
            .stage(&EditSet::single("b.py", "import sys\n", ""))
            .unwrap();

        let early = first
            .stage(&EditSet::new(vec![
                ProposedEdit {
                    file: PathBuf::from("a.py"),
                    old_code: "import os\n".into(),
                    new_code: String::new(),
                },
                ProposedEdit {
                    file: PathBuf::from("b.py"),
                    old_code: "from a import os\n".into(),
                    new_code: String::new(),
                },
            ]))
            .unwrap();
        first.commit(&early).unwrap();
        assert_eq!(storage.get("b.py").unwrap(), "import sys\ny = 1\n");

        let failure = match second.commit(&late) {
            Err(CommitError::Stale(failure)) => failure,
            other => panic!("expected a stale commit, got {other:?}"),
        };
        assert_eq!(failure.file, PathBuf::from("b.py"));
        assert_eq!(failure.error, EditError::Stale);
        assert_eq!(failure.anchor, "import sys\n");
        assert_eq!(storage.get("b.py").unwrap(), "import sys\ny = 1\n");
        assert_eq!(second.snapshot().get(Path::new("b.py")), Some("import sys\ny = 1\n"));

        // Restaged against the refreshed snapshot, the same edit keeps both fixes.
        let retry = second
            .stage(&EditSet::single("b.py", "import sys\n", ""))
            .unwrap();
        second.commit(&retry).unwrap();
        assert_eq!(storage.get("b.py").unwrap(), "y = 1\n");
    }
}
