use std::path::{Component, Path, PathBuf};

pub fn truncate(s: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }

    let char_count = s.chars().count();
    if char_count <= max {
        return s.to_string();
    }

    if max <= 3 {
        return s.chars().take(max).collect();
    }

    let truncated: String = s.chars().take(max - 3).collect();
    format!("{}...", truncated)
}

/// Reject paths a generator or issue feed must never be allowed to name.
pub fn check_relative_path(candidate: &Path) -> Result<(), String> {
    if candidate.as_os_str().is_empty() {
        return Err("Path is empty".to_string());
    }
    if candidate.is_absolute() {
        return Err(format!(
            "Absolute paths are not allowed: {}",
            candidate.display()
        ));
    }
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(format!(
            "Parent traversal is not allowed: {}",
            candidate.display()
        ));
    }
    Ok(())
}

/// Drop `.` components so `./a.py` and `a.py` name the same file.
pub fn normalize_relative(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

pub struct RepoPath {
    pub absolute: PathBuf,
    pub relative: PathBuf,
}

pub fn resolve_repo_path_allow_new(repo_root: &Path, candidate: &Path) -> Result<RepoPath, String> {
    check_relative_path(candidate)?;

    let root = repo_root
        .canonicalize()
        .map_err(|e| format!("Failed to resolve repo root: {}", e))?;
    let joined = root.join(candidate);
    let parent = joined
        .parent()
        .ok_or_else(|| format!("Invalid path: {}", candidate.display()))?;
    let parent_canon = canonicalize_existing_parent(parent)?;

    if !parent_canon.starts_with(&root) {
        return Err(format!("Path escapes repository: {}", candidate.display()));
    }

    let relative = joined
        .strip_prefix(&root)
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|_| candidate.to_path_buf());

    Ok(RepoPath {
        absolute: joined,
        relative,
    })
}

fn canonicalize_existing_parent(path: &Path) -> Result<PathBuf, String> {
    let mut current = path.to_path_buf();
    while !current.exists() {
        if !current.pop() {
            return Err("Path has no existing parent".to_string());
        }
    }
    current
        .canonicalize()
        .map_err(|e| format!("Failed to resolve path {}: {}", current.display(), e))
}

/// 1-based line number containing `byte_offset`.
pub fn line_of_offset(content: &str, byte_offset: usize) -> usize {
    let end = byte_offset.min(content.len());
    content.as_bytes()[..end]
        .iter()
        .filter(|b| **b == b'\n')
        .count()
        + 1
}

/// Numbered excerpt of `radius` lines either side of `line` (1-based).
pub fn snippet_around_line(content: &str, line: usize, radius: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return String::new();
    }
    let target = line.clamp(1, lines.len());
    let start = target.saturating_sub(radius).max(1);
    let end = (target + radius).min(lines.len());
    let width = end.to_string().len();

    lines[start - 1..end]
        .iter()
        .enumerate()
        .map(|(offset, text)| format!("{:>width$} | {}", start + offset, text, width = width))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn truncate_unicode_safe() {
        let input = "ééééé";
        assert_eq!(truncate(input, 4), "é...");
    }

    #[test]
    fn truncate_small_max() {
        let input = "こんにちは";
        assert_eq!(truncate(input, 3), "こんに");
        assert_eq!(truncate(input, 0), "");
    }

    #[test]
    fn check_relative_path_rejects_escapes() {
        assert!(check_relative_path(Path::new("src/a.py")).is_ok());
        assert!(check_relative_path(Path::new("../etc/passwd")).is_err());
        assert!(check_relative_path(Path::new("/etc/passwd")).is_err());
        assert!(check_relative_path(Path::new("")).is_err());
    }

    #[test]
    fn resolve_repo_path_allow_new_accepts_missing_file() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path()).unwrap();

        let candidate = PathBuf::from("new_dir/new_file.rs");
        let resolved = resolve_repo_path_allow_new(root.path(), &candidate).unwrap();
        assert_eq!(resolved.relative, candidate);
        assert!(resolved.absolute.ends_with("new_dir/new_file.rs"));
    }

    #[test]
    fn normalize_relative_drops_current_dir() {
        assert_eq!(normalize_relative(Path::new("./a.py")), PathBuf::from("a.py"));
        assert_eq!(normalize_relative(Path::new("src/./b.py")), PathBuf::from("src/b.py"));
        assert_eq!(normalize_relative(Path::new("src/c.py")), PathBuf::from("src/c.py"));
    }

    #[test]
    fn line_of_offset_counts_newlines_before() {
        let content = "a\nbb\nccc\n";
        assert_eq!(line_of_offset(content, 0), 1);
        assert_eq!(line_of_offset(content, 2), 2);
        assert_eq!(line_of_offset(content, 5), 3);
        assert_eq!(line_of_offset(content, 999), 4);
    }

    #[test]
    fn snippet_around_line_clamps_and_numbers() {
        let content = "one\ntwo\nthree\nfour\nfive";
        let snippet = snippet_around_line(content, 1, 1);
        assert_eq!(snippet, "1 | one\n2 | two");

        let snippet = snippet_around_line(content, 40, 1);
        assert_eq!(snippet, "4 | four\n5 | five");
    }
}
