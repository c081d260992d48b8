//! Tree-sitter based parsing, syntax-error detection, and declaration extraction

use super::{Declaration, DeclarationKind, Language};
use std::cell::RefCell;
use std::fmt;
use thiserror::Error;
use tree_sitter::{Node, Parser, Tree};

// ═══════════════════════════════════════════════════════════════════════════
//  THREAD-LOCAL PARSER POOL
// ═══════════════════════════════════════════════════════════════════════════
//
// Tree-sitter parsers are expensive to create but can be reused for multiple
// files of the same language. Each worker thread gets its own set of
// pre-configured parsers.

thread_local! {
    static RUST_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        // Ignore error here - will be caught at parse time if language fails
        let _ = p.set_language(&tree_sitter_rust::LANGUAGE.into());
        p
    });

    static JS_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_javascript::LANGUAGE.into());
        p
    });

    static TS_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into());
        p
    });

    static TSX_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_typescript::LANGUAGE_TSX.into());
        p
    });

    static PYTHON_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_python::LANGUAGE.into());
        p
    });

    static GO_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_go::LANGUAGE.into());
        p
    });
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("no grammar available for {0}")]
    Unsupported(Language),
    #[error("{0} parser produced no tree")]
    NoTree(Language),
}

/// Parse content with the pooled parser for `language`.
pub fn parse(content: &str, language: Language) -> Result<Tree, ParseError> {
    let parse_result = match language {
        Language::Rust => RUST_PARSER.with(|p| p.borrow_mut().parse(content, None)),
        Language::JavaScript => JS_PARSER.with(|p| p.borrow_mut().parse(content, None)),
        Language::TypeScript => TS_PARSER.with(|p| p.borrow_mut().parse(content, None)),
        Language::Tsx => TSX_PARSER.with(|p| p.borrow_mut().parse(content, None)),
        Language::Python => PYTHON_PARSER.with(|p| p.borrow_mut().parse(content, None)),
        Language::Go => GO_PARSER.with(|p| p.borrow_mut().parse(content, None)),
        Language::Unknown => return Err(ParseError::Unsupported(language)),
    };

    parse_result.ok_or(ParseError::NoTree(language))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntaxIssueKind {
    /// Tokens the grammar could not place
    Unexpected,
    /// A token the parser had to invent to recover (e.g. a closing paren)
    Missing(String),
}

/// One error-producing node in a syntax tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxIssue {
    /// 1-based
    pub line: usize,
    pub column: usize,
    pub kind: SyntaxIssueKind,
}

impl fmt::Display for SyntaxIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            SyntaxIssueKind::Unexpected => write!(f, "syntax error at line {}", self.line),
            SyntaxIssueKind::Missing(kind) => {
                write!(f, "syntax error at line {}: missing `{}`", self.line, kind)
            }
        }
    }
}

/// Collect every ERROR and MISSING node, in document order.
///
/// Children of an ERROR node are not reported separately.
pub fn syntax_errors(tree: &Tree) -> Vec<SyntaxIssue> {
    let mut issues = Vec::new();
    let mut stack = vec![tree.root_node()];

    while let Some(node) = stack.pop() {
        if node.is_error() {
            issues.push(SyntaxIssue {
                line: node.start_position().row + 1,
                column: node.start_position().column,
                kind: SyntaxIssueKind::Unexpected,
            });
            continue;
        }
        if node.is_missing() {
            issues.push(SyntaxIssue {
                line: node.start_position().row + 1,
                column: node.start_position().column,
                kind: SyntaxIssueKind::Missing(node.kind().to_string()),
            });
            continue;
        }
        if !node.has_error() {
            continue;
        }
        for i in (0..node.child_count()).rev() {
            if let Some(child) = node.child(i) {
                stack.push(child);
            }
        }
    }

    issues
}

pub(crate) fn node_text<'a>(node: &Node, content: &'a str) -> &'a str {
    node.utf8_text(content.as_bytes()).unwrap_or("")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeRole {
    /// A function; becomes a method when nested in a container
    Function,
    /// A named declaration whose body may hold methods
    Container(DeclarationKind),
    /// A named declaration with no interesting members
    Named(DeclarationKind),
    /// Wrapper nodes (export, decorators, bodies) walked through unchanged
    Transparent,
    Other,
}

fn classify(language: Language, kind: &str) -> NodeRole {
    match language {
        Language::Rust => match kind {
            "function_item" | "function_signature_item" => NodeRole::Function,
            "impl_item" | "trait_item" | "mod_item" => NodeRole::Container(DeclarationKind::Type),
            "struct_item" | "enum_item" | "union_item" | "type_item" => {
                NodeRole::Named(DeclarationKind::Type)
            }
            "declaration_list" => NodeRole::Transparent,
            _ => NodeRole::Other,
        },
        Language::Python => match kind {
            "function_definition" => NodeRole::Function,
            "class_definition" => NodeRole::Container(DeclarationKind::Class),
            "decorated_definition" | "block" => NodeRole::Transparent,
            _ => NodeRole::Other,
        },
        Language::JavaScript | Language::TypeScript | Language::Tsx => match kind {
            "function_declaration" | "generator_function_declaration" | "method_definition" => {
                NodeRole::Function
            }
            "class_declaration" | "abstract_class_declaration" | "class" => {
                NodeRole::Container(DeclarationKind::Class)
            }
            "interface_declaration" | "type_alias_declaration" | "enum_declaration" => {
                NodeRole::Named(DeclarationKind::Type)
            }
            "export_statement" | "class_body" => NodeRole::Transparent,
            _ => NodeRole::Other,
        },
        Language::Go => match kind {
            "function_declaration" | "method_declaration" => NodeRole::Function,
            "type_spec" => NodeRole::Named(DeclarationKind::Type),
            "type_declaration" => NodeRole::Transparent,
            _ => NodeRole::Other,
        },
        Language::Unknown => NodeRole::Other,
    }
}

fn declared_name(node: &Node, content: &str) -> Option<String> {
    let field = if node.kind() == "impl_item" { "type" } else { "name" };
    node.child_by_field_name(field)
        .map(|n| node_text(&n, content).trim().to_string())
        .filter(|name| !name.is_empty())
}

/// Go methods are declared at top level; qualify them by receiver type.
fn go_receiver_type(node: &Node, content: &str) -> Option<String> {
    let receiver = node.child_by_field_name("receiver")?;
    let text = node_text(&receiver, content);
    let inner = text.trim().trim_start_matches('(').trim_end_matches(')');
    inner
        .split_whitespace()
        .last()
        .map(|t| t.trim_start_matches('*').to_string())
        .filter(|t| !t.is_empty())
}

/// Extract top-level declarations (functions, classes, types) and the methods
/// nested directly in class-like containers. Function bodies are not entered.
pub fn declarations(tree: &Tree, content: &str, language: Language) -> Vec<Declaration> {
    let mut out = Vec::new();
    collect_declarations(tree.root_node(), content, language, None, &mut out);
    out
}

fn collect_declarations(
    node: Node,
    content: &str,
    language: Language,
    prefix: Option<&str>,
    out: &mut Vec<Declaration>,
) {
    for i in 0..node.named_child_count() {
        let Some(child) = node.named_child(i) else {
            continue;
        };
        match classify(language, child.kind()) {
            NodeRole::Function => {
                let Some(name) = declared_name(&child, content) else {
                    continue;
                };
                let owner = if language == Language::Go && child.kind() == "method_declaration" {
                    go_receiver_type(&child, content)
                } else {
                    prefix.map(str::to_string)
                };
                let (name, kind) = match owner {
                    Some(owner) => (format!("{}.{}", owner, name), DeclarationKind::Method),
                    None => (name, DeclarationKind::Function),
                };
                out.push(Declaration {
                    name,
                    kind,
                    line: child.start_position().row + 1,
                });
            }
            NodeRole::Container(kind) => {
                let name = declared_name(&child, content)
                    .unwrap_or_else(|| "<anonymous>".to_string());
                let qualified = match prefix {
                    Some(p) => format!("{}.{}", p, name),
                    None => name,
                };
                out.push(Declaration {
                    name: qualified.clone(),
                    kind,
                    line: child.start_position().row + 1,
                });
                collect_declarations(child, content, language, Some(&qualified), out);
            }
            NodeRole::Named(kind) => {
                if let Some(name) = declared_name(&child, content) {
                    let name = match prefix {
                        Some(p) => format!("{}.{}", p, name),
                        None => name,
                    };
                    out.push(Declaration {
                        name,
                        kind,
                        line: child.start_position().row + 1,
                    });
                }
            }
            NodeRole::Transparent => {
                collect_declarations(child, content, language, prefix, out);
            }
            NodeRole::Other => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(content: &str, language: Language) -> Vec<String> {
        let tree = parse(content, language).unwrap();
        declarations(&tree, content, language)
            .into_iter()
            .map(|d| d.name)
            .collect()
    }

    #[test]
    fn valid_python_has_no_syntax_errors() {
        let tree = parse("def hello():\n    print('hi')\n", Language::Python).unwrap();
        assert!(syntax_errors(&tree).is_empty());
    }

    #[test]
    fn broken_python_reports_error_line() {
        let code = "def ok():\n    return 1\n\ndef hello(\n    print('x')\n";
        let tree = parse(code, Language::Python).unwrap();
        let errors = syntax_errors(&tree);
        assert!(!errors.is_empty());
        assert!(errors[0].to_string().starts_with("syntax error at line"));
    }

    #[test]
    fn broken_rust_is_detected() {
        let tree = parse("fn broken( {", Language::Rust).unwrap();
        assert!(!syntax_errors(&tree).is_empty());
    }

    #[test]
    fn unknown_language_is_unsupported() {
        assert_eq!(
            parse("anything", Language::Unknown).unwrap_err(),
            ParseError::Unsupported(Language::Unknown)
        );
    }

    #[test]
    fn python_declarations_include_methods() {
        let code = "\
import os

class Repo:
    def load(self):
        def helper():
            pass
        return helper

@cache
def top():
    return 1
";
        assert_eq!(names(code, Language::Python), vec!["Repo", "Repo.load", "top"]);
    }

    #[test]
    fn rust_declarations_cover_impl_methods() {
        let code = "\
struct Config;
impl Config {
    fn load() -> Self { Config }
}
fn main() {}
";
        assert_eq!(
            names(code, Language::Rust),
            vec!["Config", "Config", "Config.load", "main"]
        );
    }

    #[test]
    fn go_methods_are_qualified_by_receiver() {
        let code = "\
package main

type Server struct{}

func (s *Server) Start() {}

func main() {}
";
        assert_eq!(
            names(code, Language::Go),
            vec!["Server", "Server.Start", "main"]
        );
    }

    #[test]
    fn typescript_exports_are_walked_through() {
        let code = "\
export class Api {
  fetch() { return 1; }
}
export function run() {}
interface Shape { x: number }
";
        assert_eq!(
            names(code, Language::TypeScript),
            vec!["Api", "Api.fetch", "run", "Shape"]
        );
    }
}
