//! Shared tree-sitter helpers used by every adapter.

use crate::identity;
use crate::types::Range;
use tree_sitter::Node;

/// Guard against pathological nesting blowing the stack during traversal.
pub const MAX_AST_DEPTH: usize = 500;

/// Convert a tree-sitter node to an engine range (zero-based).
pub fn node_range(node: Node) -> Range {
    let start = node.start_position();
    let end = node.end_position();
    Range {
        start_line: start.row as u32,
        start_column: start.column as u32,
        end_line: end.row as u32,
        end_column: end.column as u32,
    }
}

/// Source text for a node.
pub fn node_text<'a>(code: &'a str, node: Node) -> &'a str {
    code.get(node.byte_range()).unwrap_or("")
}

/// Fingerprint a definition node over its normalized token stream.
///
/// The stream is the node kinds of interior nodes plus the source text of
/// leaves, with comments skipped, so formatting and comment churn do not
/// change a symbol's identity while any token change does.
pub fn fingerprint_node(code: &str, node: Node) -> String {
    let mut tokens = Vec::new();
    collect_tokens(code, node, &mut tokens, 0);
    identity::ast_fingerprint(&tokens)
}

fn collect_tokens(code: &str, node: Node, tokens: &mut Vec<String>, depth: usize) {
    if depth > MAX_AST_DEPTH {
        return;
    }
    let kind = node.kind();
    if kind.contains("comment") {
        return;
    }
    if node.child_count() == 0 {
        let text = node_text(code, node);
        if !text.trim().is_empty() {
            tokens.push(text.to_string());
        }
        return;
    }
    tokens.push(kind.to_string());
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_tokens(code, child, tokens, depth + 1);
    }
}

/// First line of a node's text, truncated for use as a signature.
pub fn signature_line(code: &str, node: Node, max_len: usize) -> String {
    let text = node_text(code, node);
    let line = text.lines().next().unwrap_or("").trim();
    let mut boundary = max_len.min(line.len());
    while boundary > 0 && !line.is_char_boundary(boundary) {
        boundary -= 1;
    }
    line[..boundary].to_string()
}

/// Collect the doc comment immediately preceding a node, if any.
///
/// Walks backwards over consecutive comment siblings and strips the comment
/// delimiters the bundled languages share (`///`, `//`, `/** */`, `#`).
pub fn leading_doc_comment(code: &str, node: Node) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();
    let mut current = node.prev_sibling();
    while let Some(sibling) = current {
        if !sibling.kind().contains("comment") {
            break;
        }
        if let Some(cleaned) = strip_comment_markers(node_text(code, sibling)) {
            parts.push(cleaned);
        }
        current = sibling.prev_sibling();
    }
    if parts.is_empty() {
        return None;
    }
    parts.reverse();
    Some(parts.join("\n"))
}

fn strip_comment_markers(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if let Some(body) = trimmed
        .strip_prefix("/**")
        .and_then(|s| s.strip_suffix("*/"))
    {
        let cleaned: Vec<&str> = body
            .lines()
            .map(|l| l.trim().trim_start_matches('*').trim())
            .filter(|l| !l.is_empty())
            .collect();
        return Some(cleaned.join("\n"));
    }
    if let Some(body) = trimmed.strip_prefix("/*").and_then(|s| s.strip_suffix("*/")) {
        return Some(body.trim().to_string());
    }
    for marker in ["///", "//!", "//", "#"] {
        if let Some(body) = trimmed.strip_prefix(marker) {
            return Some(body.trim().to_string());
        }
    }
    None
}

/// Find the nearest enclosing definition name for a call site.
///
/// `definition_kinds` maps a node kind to the field holding its name
/// (usually `name`). Returns the first hit walking up the tree.
pub fn enclosing_definition_name(
    code: &str,
    node: Node,
    definition_kinds: &[&str],
) -> Option<String> {
    let mut current = node.parent();
    while let Some(parent) = current {
        if definition_kinds.contains(&parent.kind()) {
            if let Some(name_node) = parent.child_by_field_name("name") {
                return Some(node_text(code, name_node).to_string());
            }
        }
        current = parent.parent();
    }
    None
}
