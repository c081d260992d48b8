//! Git commits for accepted fixes
//!
//! Stages exactly the files a fix touched and commits them on HEAD.

use anyhow::{Context, Result};
use git2::{Repository, Signature};
use std::path::{Path, PathBuf};

use crate::controller::FixOutcome;
use crate::util::truncate;

/// Whether `path` is inside a git working tree
pub fn is_repository(path: &Path) -> bool {
    Repository::discover(path).is_ok()
}

/// Commit subject for an accepted fix
pub fn commit_message(outcome: &FixOutcome, issue_message: &str) -> String {
    let summary = if issue_message.trim().is_empty() {
        format!("resolve {}", outcome.rule)
    } else {
        truncate(issue_message.trim(), 60)
    };
    format!(
        "fix({}): {}\n\nIssue: {}\nFile: {}\n",
        outcome.rule,
        summary,
        outcome.issue_key,
        outcome.file.display()
    )
}

/// Stage `files` (relative to `repo_path`) and commit them. Returns the new commit id.
///
/// `repo_path` may be any directory inside the working tree.
pub fn commit_files(repo_path: &Path, files: &[PathBuf], message: &str) -> Result<String> {
    let repo = Repository::discover(repo_path)
        .with_context(|| format!("Failed to open repository at {}", repo_path.display()))?;
    let workdir = repo
        .workdir()
        .context("Repository has no working tree")?
        .canonicalize()?;
    let base = repo_path
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", repo_path.display()))?;
    let mut index = repo.index()?;

    for file in files {
        let in_tree = base
            .join(file)
            .strip_prefix(&workdir)
            .map(Path::to_path_buf)
            .with_context(|| format!("{} is outside the working tree", file.display()))?;
        index
            .add_path(&in_tree)
            .with_context(|| format!("Failed to stage {}", file.display()))?;
    }
    index.write()?;

    let tree_id = index.write_tree()?;
    let tree = repo.find_tree(tree_id)?;

    // Get author info from git config
    let config = repo.config()?;
    let name = config
        .get_string("user.name")
        .unwrap_or_else(|_| "remedy".to_string());
    let email = config
        .get_string("user.email")
        .unwrap_or_else(|_| "remedy@local".to_string());
    let sig = Signature::now(&name, &email)?;

    let parent = match repo.head() {
        Ok(head) => Some(head.peel_to_commit()?),
        Err(_) => None,
    };
    let parents: Vec<&git2::Commit> = parent.iter().collect();

    let oid = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
    Ok(oid.to_string())
}
