//! Exact-match edit application
//!
//! An edit names a verbatim anchor (`old_code`) that must occur exactly once
//! in its file. Nothing is trimmed or normalized: the replacement is spliced
//! into the original byte-for-byte.

use crate::error::{EditError, EditFailure};
use crate::util::line_of_offset;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// One exact-match substitution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedEdit {
    pub file: PathBuf,
    pub old_code: String,
    pub new_code: String,
}

/// Ordered edits applied as one atomic attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditSet {
    pub edits: Vec<ProposedEdit>,
}

impl EditSet {
    pub fn new(edits: Vec<ProposedEdit>) -> Self {
        EditSet { edits }
    }

    pub fn single(file: impl Into<PathBuf>, old_code: &str, new_code: &str) -> Self {
        EditSet::new(vec![ProposedEdit {
            file: file.into(),
            old_code: old_code.to_string(),
            new_code: new_code.to_string(),
        }])
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Distinct files touched, in path order.
    pub fn files(&self) -> BTreeSet<PathBuf> {
        self.edits.iter().map(|e| e.file.clone()).collect()
    }
}

/// Byte offsets of every occurrence of `needle`, overlapping ones included.
fn occurrences(haystack: &str, needle: &str) -> Vec<usize> {
    let mut found = Vec::new();
    let mut from = 0;
    while let Some(pos) = haystack[from..].find(needle) {
        let at = from + pos;
        found.push(at);
        let step = haystack[at..].chars().next().map_or(1, char::len_utf8);
        from = at + step;
        if from > haystack.len() {
            break;
        }
    }
    found
}

/// Replace the single occurrence of `old_code` in `original` with `new_code`.
pub fn apply(original: &str, old_code: &str, new_code: &str) -> Result<String, EditError> {
    if old_code.is_empty() {
        return Err(EditError::EmptyAnchor);
    }

    let found = occurrences(original, old_code);
    match found.as_slice() {
        [] => Err(EditError::NotFound),
        [at] => {
            let mut out = String::with_capacity(original.len() - old_code.len() + new_code.len());
            out.push_str(&original[..*at]);
            out.push_str(new_code);
            out.push_str(&original[at + old_code.len()..]);
            Ok(out)
        }
        many => Err(EditError::Ambiguous { count: many.len() }),
    }
}

/// 1-based lines where `needle` starts, for pointing a generator at duplicates.
pub fn match_lines(content: &str, needle: &str) -> Vec<usize> {
    if needle.is_empty() {
        return Vec::new();
    }
    occurrences(content, needle)
        .into_iter()
        .map(|offset| line_of_offset(content, offset))
        .collect()
}

/// Apply every edit of `set` against `originals`.
///
/// Edits on the same file are applied in order, each against the result of
/// the previous one. On the first failure nothing is returned, so callers
/// never observe a partially applied set. The returned map holds only the
/// files the set touches.
pub fn apply_edit_set(
    set: &EditSet,
    originals: &BTreeMap<PathBuf, String>,
) -> Result<BTreeMap<PathBuf, String>, EditFailure> {
    let mut working: BTreeMap<PathBuf, String> = BTreeMap::new();

    for (i, edit) in set.edits.iter().enumerate() {
        let fail = |error: EditError| EditFailure {
            index: i + 1,
            file: edit.file.clone(),
            error,
            anchor: edit.old_code.clone(),
        };

        let current = match working.get(&edit.file) {
            Some(content) => content,
            None => originals.get(&edit.file).ok_or_else(|| {
                fail(EditError::FileUnavailable {
                    reason: "file is not part of the snapshot".to_string(),
                })
            })?,
        };

        let updated = apply(current, &edit.old_code, &edit.new_code).map_err(fail)?;
        working.insert(edit.file.clone(), updated);
    }

    Ok(working)
}
