use super::GenerationRequest;
use crate::syntax::Language;
use crate::util::truncate;

/// Largest AST node text quoted in a prompt
const MAX_NODE_CHARS: usize = 2_000;
const MAX_SIBLING_CHARS: usize = 300;

pub const FIX_ISSUE_SYSTEM: &str = r##"You are a senior engineer fixing a single static-analysis issue with the smallest possible edit.

OUTPUT FORMAT (JSON only, no prose):
{
  "edits": [
    {
      "file": "path/relative/to/repo (optional, defaults to the issue's file)",
      "old_code": "exact text to find",
      "new_code": "replacement text"
    }
  ]
}

CRITICAL RULES FOR EDITS:
- old_code must be copied EXACTLY from the file, including whitespace and indentation
- old_code must occur exactly ONCE in the file; include neighbouring lines if needed to make it unique
- new_code replaces old_code; it may be empty to delete the text
- Never use placeholders such as "// ..." or "# rest of code" in old_code
- Do NOT include line numbers in old_code or new_code
- Multiple edits are applied in order; each must be unique at the time it is applied

SURGICAL EDITS (MOST IMPORTANT):
- Fix only the reported issue
- Do not reformat, reorder, rename or clean up unrelated code
- Keep the file syntactically valid
- Large rewrites are rejected automatically"##;

pub fn fix_issue_system() -> &'static str {
    FIX_ISSUE_SYSTEM
}

pub fn fix_issue_user(request: &GenerationRequest) -> String {
    let issue = &request.issue;
    let language = Language::from_path(&issue.file);
    let line = issue
        .line
        .map(|l| l.to_string())
        .unwrap_or_else(|| "N/A".to_string());

    let mut out = String::new();
    out.push_str("ISSUE\n");
    out.push_str(&format!("Key: {}\n", issue.key));
    out.push_str(&format!("Rule: {}\n", issue.rule));
    out.push_str(&format!("Severity: {}\n", issue.severity));
    out.push_str(&format!("Type: {}\n", issue.category));
    out.push_str(&format!("File: {}\n", issue.file.display()));
    out.push_str(&format!("Line: {}\n", line));
    out.push_str(&format!("Message: {}\n", issue.message));

    let ctx = &request.context;
    out.push_str("\nAST CONTEXT\n");
    if let Some(reason) = &ctx.degraded {
        out.push_str(&format!("(whole file; {})\n", reason));
    } else {
        out.push_str(&format!(
            "Node: {} (lines {}-{})\n```\n{}\n```\n",
            ctx.node_kind,
            ctx.start_line,
            ctx.end_line,
            truncate(&ctx.node_text, MAX_NODE_CHARS)
        ));
        out.push_str(&format!("Parent: {}\n", ctx.parent_kind));
        for sibling in &ctx.siblings {
            out.push_str(&format!("Sibling: {}\n", truncate(sibling, MAX_SIBLING_CHARS)));
        }
    }

    if !request.cross_references.is_empty() {
        out.push_str("\nREFERENCES ELSEWHERE IN THE REPOSITORY\n");
        for hit in &request.cross_references {
            out.push_str(hit);
            out.push('\n');
        }
    }

    out.push_str(&format!(
        "\nFILE CONTENT ({})\n```{}\n{}\n```\n",
        issue.file.display(),
        if language.is_known() { language.name() } else { "" },
        request.file_content
    ));

    if !request.history.is_empty() {
        out.push_str("\nPREVIOUS ATTEMPTS (all rejected)\n");
        for record in &request.history {
            out.push_str(&format!("--- attempt {} ---\n", record.attempt));
            out.push_str(&record.feedback);
            out.push('\n');
        }
    }

    out.push_str(&format!(
        "\nThis is attempt {} of {}. Return ONLY the JSON object.",
        request.attempt, request.max_retries
    ));
    if request.is_final_attempt() {
        out.push_str(" No further attempts follow; prefer the narrowest edit that resolves the issue.");
    }
    out
}
