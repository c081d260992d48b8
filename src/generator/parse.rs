//! Strict decoding of generator output into edit sets

use crate::edit::{EditSet, ProposedEdit};
use crate::error::GeneratorError;
use crate::util::{check_relative_path, normalize_relative, truncate};
use serde::Deserialize;
use std::path::Path;

/// Strip markdown code fences from a response
fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = if let Some(rest) = trimmed.strip_prefix("```json") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest
    } else {
        trimmed
    };
    clean.strip_suffix("```").unwrap_or(clean).trim()
}

/// Outermost `{ ... }` of a response
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start <= end).then(|| &text[start..=end])
}

#[derive(Debug, Deserialize)]
struct RawEdit {
    #[serde(default, alias = "path")]
    file: Option<String>,
    #[serde(alias = "old_string")]
    old_code: String,
    #[serde(alias = "new_string")]
    new_code: String,
}

#[derive(Debug, Deserialize)]
struct RawEditList {
    edits: Vec<RawEdit>,
}

/// The two shapes a generator may answer with.
#[derive(Debug)]
enum GeneratorOutput {
    Edits(Vec<RawEdit>),
    Single(RawEdit),
}

impl GeneratorOutput {
    fn decode(json: &str) -> Result<Self, GeneratorError> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| GeneratorError::Malformed(format!("invalid JSON: {}", e)))?;
        let object = value
            .as_object()
            .ok_or_else(|| GeneratorError::Malformed("expected a JSON object".to_string()))?;

        if object.contains_key("edits") {
            let list: RawEditList = serde_json::from_value(value)
                .map_err(|e| GeneratorError::Malformed(format!("invalid edits list: {}", e)))?;
            Ok(GeneratorOutput::Edits(list.edits))
        } else if object.contains_key("old_code") || object.contains_key("old_string") {
            let edit: RawEdit = serde_json::from_value(value)
                .map_err(|e| GeneratorError::Malformed(format!("invalid edit: {}", e)))?;
            Ok(GeneratorOutput::Single(edit))
        } else {
            Err(GeneratorError::Malformed(
                "response has neither \"edits\" nor \"old_code\"".to_string(),
            ))
        }
    }

    fn into_edits(self) -> Vec<RawEdit> {
        match self {
            GeneratorOutput::Edits(edits) => edits,
            GeneratorOutput::Single(edit) => vec![edit],
        }
    }
}

/// Comment-only elision markers ("// ...", "# rest of code") that cannot be
/// verbatim source.
fn has_placeholder(code: &str) -> bool {
    code.lines().any(|line| {
        let t = line.trim();
        if t.contains('\u{2026}') {
            return true;
        }
        let body = t
            .strip_prefix("//")
            .or_else(|| t.strip_prefix('#'))
            .or_else(|| t.strip_prefix("/*").map(|b| b.trim_end_matches("*/")))
            .map(str::trim);
        match body {
            Some(body) => {
                body == "..."
                    || body.starts_with("... ")
                    || body.to_ascii_lowercase().starts_with("rest of")
                    || body.to_ascii_lowercase().starts_with("existing code")
            }
            None => false,
        }
    })
}

/// Decode raw generator text into an [`EditSet`].
///
/// Edits without a `file` target `default_file`. Rejects output with no
/// edits, empty or elided `old_code`, and paths that are absolute or leave
/// the repository.
pub fn parse_generator_output(raw: &str, default_file: &Path) -> Result<EditSet, GeneratorError> {
    let clean = strip_markdown_fences(raw);
    let json = extract_json_object(clean).ok_or_else(|| {
        GeneratorError::Malformed(format!(
            "no JSON object in response: {:?}",
            truncate(clean, 200)
        ))
    })?;

    let raw_edits = GeneratorOutput::decode(json)?.into_edits();
    if raw_edits.is_empty() {
        return Err(GeneratorError::Malformed("response contains no edits".to_string()));
    }

    let mut edits = Vec::with_capacity(raw_edits.len());
    for (i, edit) in raw_edits.into_iter().enumerate() {
        let file = match edit.file.as_deref().map(str::trim) {
            Some(path) if !path.is_empty() => normalize_relative(Path::new(path)),
            _ => normalize_relative(default_file),
        };
        check_relative_path(&file)
            .map_err(|e| GeneratorError::Malformed(format!("edit {}: {}", i + 1, e)))?;

        if edit.old_code.is_empty() {
            return Err(GeneratorError::Malformed(format!(
                "edit {}: old_code is empty",
                i + 1
            )));
        }
        if has_placeholder(&edit.old_code) {
            return Err(GeneratorError::Malformed(format!(
                "edit {}: old_code contains an elision placeholder instead of verbatim code",
                i + 1
            )));
        }

        edits.push(ProposedEdit {
            file,
            old_code: edit.old_code,
            new_code: edit.new_code,
        });
    }

    Ok(EditSet::new(edits))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn default_file() -> PathBuf {
        PathBuf::from("src/app.py")
    }

    #[test]
    fn parses_flat_shape_with_default_file() {
        let set = parse_generator_output(
            r#"{"old_code": "import os\n", "new_code": ""}"#,
            &default_file(),
        )
        .unwrap();
        assert_eq!(set, EditSet::single("src/app.py", "import os\n", ""));
    }

    #[test]
    fn parses_fenced_multi_file_shape() {
        let raw = "Here is the fix:\n```json\n{\"edits\": [\
            {\"file\": \"a.py\", \"old_code\": \"x = 1\", \"new_code\": \"x = 2\"},\
            {\"old_code\": \"y\", \"new_code\": \"z\"}]}\n```";
        let set = parse_generator_output(raw, &default_file()).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.edits[0].file, PathBuf::from("a.py"));
        assert_eq!(set.edits[1].file, default_file());
    }

    #[test]
    fn edit_paths_drop_current_dir_prefix() {
        let set = parse_generator_output(
            r#"{"edits": [{"file": "./src/./b.py", "old_code": "a", "new_code": "b"}]}"#,
            &default_file(),
        )
        .unwrap();
        assert_eq!(set.edits[0].file, PathBuf::from("src/b.py"));
    }

    #[test]
    fn accepts_old_string_aliases() {
        let set = parse_generator_output(
            r#"{"edits": [{"old_string": "a", "new_string": "b"}]}"#,
            &default_file(),
        )
        .unwrap();
        assert_eq!(set.edits[0].old_code, "a");
    }

    #[test]
    fn rejects_malformed_shapes() {
        let cases = [
            "no json here",
            "{not valid json}",
            r#"{"edits": []}"#,
            r#"{"edits": [{"old_code": "a"}]}"#,
            r#"{"old_code": "", "new_code": "x"}"#,
            r#"{"description": "nothing to do"}"#,
            r#"{"edits": [{"file": "/etc/passwd", "old_code": "a", "new_code": "b"}]}"#,
            r#"{"edits": [{"file": "../up.py", "old_code": "a", "new_code": "b"}]}"#,
        ];
        for raw in cases {
            let err = parse_generator_output(raw, &default_file()).unwrap_err();
            assert!(matches!(err, GeneratorError::Malformed(_)), "{raw}: {err:?}");
        }
    }

    #[test]
    fn rejects_elided_anchor_but_allows_python_ellipsis() {
        let elided = r#"{"old_code": "def f():\n    # ...\n    return 1", "new_code": "x"}"#;
        assert!(parse_generator_output(elided, &default_file()).is_err());

        let rest = r#"{"old_code": "fn a() {\n    // rest of code\n}", "new_code": "x"}"#;
        assert!(parse_generator_output(rest, &default_file()).is_err());

        let stub = r#"{"old_code": "def f():\n    ...\n", "new_code": "def f():\n    pass\n"}"#;
        assert!(parse_generator_output(stub, &default_file()).is_ok());
    }
}
