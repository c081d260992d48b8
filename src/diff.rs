//! Line-level diff metrics between two text buffers

use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};

const DIFF_CONTEXT_LINES: usize = 3;

/// Line-level change statistics for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub additions: usize,
    pub deletions: usize,
    pub original_lines: usize,
    pub modified_lines: usize,
    /// 1-based lines of the original file touched by the change. Insertions
    /// are attributed to the original line they were inserted before.
    pub changed_lines: Vec<usize>,
}

impl DiffStats {
    pub fn changed(&self) -> usize {
        self.additions + self.deletions
    }

    /// Changed lines relative to the original size, never dividing by zero.
    pub fn ratio(&self) -> f64 {
        self.changed() as f64 / self.original_lines.max(1) as f64
    }

    pub fn is_empty(&self) -> bool {
        self.changed() == 0
    }

    /// Smallest distance between any changed line and `line`.
    pub fn min_distance_to(&self, line: usize) -> Option<usize> {
        self.changed_lines
            .iter()
            .map(|changed| changed.abs_diff(line))
            .min()
    }
}

pub fn diff_stats(original: &str, modified: &str) -> DiffStats {
    let diff = TextDiff::from_lines(original, modified);
    let original_lines = original.lines().count();

    let mut stats = DiffStats {
        original_lines,
        modified_lines: modified.lines().count(),
        ..DiffStats::default()
    };

    // Index of the next unconsumed original line.
    let mut cursor = 0usize;
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Equal => {
                if let Some(old) = change.old_index() {
                    cursor = old + 1;
                }
            }
            ChangeTag::Delete => {
                stats.deletions += 1;
                if let Some(old) = change.old_index() {
                    stats.changed_lines.push(old + 1);
                    cursor = old + 1;
                }
            }
            ChangeTag::Insert => {
                stats.additions += 1;
                stats
                    .changed_lines
                    .push((cursor + 1).min(original_lines.max(1)));
            }
        }
    }

    stats.changed_lines.sort_unstable();
    stats.changed_lines.dedup();
    stats
}

/// Unified diff with `a/` and `b/` headers, empty when nothing changed.
pub fn unified_diff(original: &str, modified: &str, path: &str) -> String {
    if original == modified {
        return String::new();
    }
    TextDiff::from_lines(original, modified)
        .unified_diff()
        .context_radius(DIFF_CONTEXT_LINES)
        .header(&format!("a/{}", path), &format!("b/{}", path))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(count: usize) -> String {
        (1..=count).map(|i| format!("line {}\n", i)).collect()
    }

    #[test]
    fn removed_line_is_counted_and_located() {
        let original = numbered(100);
        let modified = original.replacen("line 10\n", "", 1);
        let stats = diff_stats(&original, &modified);
        assert_eq!(stats.additions, 0);
        assert_eq!(stats.deletions, 1);
        assert_eq!(stats.changed_lines, vec![10]);
        assert!((stats.ratio() - 0.01).abs() < f64::EPSILON);
        assert_eq!(stats.min_distance_to(10), Some(0));
    }

    #[test]
    fn replaced_line_counts_both_sides() {
        let original = numbered(5);
        let modified = original.replacen("line 3\n", "line three\n", 1);
        let stats = diff_stats(&original, &modified);
        assert_eq!(stats.additions, 1);
        assert_eq!(stats.deletions, 1);
        assert_eq!(stats.changed(), 2);
        assert_eq!(stats.changed_lines, vec![3]);
    }

    #[test]
    fn insertion_is_attributed_to_following_original_line() {
        let original = numbered(5);
        let modified = original.replacen("line 4\n", "inserted\nline 4\n", 1);
        let stats = diff_stats(&original, &modified);
        assert_eq!(stats.additions, 1);
        assert_eq!(stats.deletions, 0);
        assert_eq!(stats.changed_lines, vec![4]);
        assert_eq!(stats.min_distance_to(20), Some(16));
    }

    #[test]
    fn appending_to_the_end_stays_inside_the_file() {
        let original = numbered(3);
        let modified = format!("{}line 4\n", original);
        let stats = diff_stats(&original, &modified);
        assert_eq!(stats.changed_lines, vec![3]);
    }

    #[test]
    fn ratio_for_empty_original_does_not_divide_by_zero() {
        let stats = diff_stats("", "a\nb\n");
        assert_eq!(stats.additions, 2);
        assert!((stats.ratio() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn identical_buffers_have_no_changes() {
        let text = numbered(10);
        let stats = diff_stats(&text, &text);
        assert!(stats.is_empty());
        assert_eq!(stats.min_distance_to(5), None);
        assert!(unified_diff(&text, &text, "a.py").is_empty());
    }

    #[test]
    fn unified_diff_has_headers_and_markers() {
        let diff = unified_diff("a\nb\nc\n", "a\nB\nc\n", "src/x.py");
        assert!(diff.contains("--- a/src/x.py"));
        assert!(diff.contains("+++ b/src/x.py"));
        assert!(diff.contains("-b"));
        assert!(diff.contains("+B"));
    }
}
