//! Append-only JSONL log of fix outcomes
//!
//! Stored in `.remedy/outcomes.jsonl` under the repository. Every append
//! takes an exclusive lock on `.remedy/.lock`, so concurrent workers and
//! concurrent processes never interleave rows.

use crate::controller::FixOutcome;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use uuid::Uuid;

pub const LOG_DIR: &str = ".remedy";
const OUTCOMES_FILE: &str = "outcomes.jsonl";
const LOCK_TIMEOUT_SECS: u64 = 5;
const LOCK_RETRY_MS: u64 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: FixOutcome,
}

struct LogLock {
    file: fs::File,
}

impl Drop for LogLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[derive(Debug, Clone)]
pub struct OutcomeLog {
    dir: PathBuf,
    run_id: Uuid,
}

impl OutcomeLog {
    pub fn new(repo_root: &Path, run_id: Uuid) -> Self {
        OutcomeLog {
            dir: repo_root.join(LOG_DIR),
            run_id,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(OUTCOMES_FILE)
    }

    fn lock(&self) -> anyhow::Result<LogLock> {
        fs::create_dir_all(&self.dir)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.dir.join(".lock"))?;

        let start = Instant::now();
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => break,
                Err(err) => {
                    if err.kind() != ErrorKind::WouldBlock {
                        return Err(err.into());
                    }
                    if start.elapsed() >= Duration::from_secs(LOCK_TIMEOUT_SECS) {
                        return Err(anyhow::anyhow!(
                            "Timed out waiting for outcome log lock ({}s)",
                            LOCK_TIMEOUT_SECS
                        ));
                    }
                    std::thread::sleep(Duration::from_millis(LOCK_RETRY_MS));
                }
            }
        }

        Ok(LogLock { file })
    }

    /// Append one outcome as a JSON line.
    pub fn append(&self, outcome: &FixOutcome) -> anyhow::Result<()> {
        let _lock = self.lock()?;
        let record = OutcomeRecord {
            run_id: self.run_id,
            timestamp: Utc::now(),
            outcome: outcome.clone(),
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path())?;
        let row = serde_json::to_string(&record)?;
        writeln!(file, "{}", row)?;
        Ok(())
    }

    /// Records for this log's run, oldest first. Unreadable rows are skipped.
    pub fn load_run(&self) -> anyhow::Result<Vec<OutcomeRecord>> {
        let path = self.path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(fs::File::open(path)?);
        Ok(reader
            .lines()
            .map_while(Result::ok)
            .filter_map(|line| serde_json::from_str::<OutcomeRecord>(&line).ok())
            .filter(|record| record.run_id == self.run_id)
            .collect())
    }
}
