//! Rust adapter.

use crate::error::{EngineError, EngineResult};
use crate::types::{SymbolKind, Visibility};
use tree_sitter::{Node, Parser, Tree};

use super::adapter::{
    AdapterFactory, CallSite, ImportKind, LanguageAdapter, ParsedFile, ParsedImport, ParsedSymbol,
};
use super::ast;

const NODE_FUNCTION: &str = "function_item";
const NODE_STRUCT: &str = "struct_item";
const NODE_ENUM: &str = "enum_item";
const NODE_TRAIT: &str = "trait_item";
const NODE_IMPL: &str = "impl_item";
const NODE_MOD: &str = "mod_item";
const NODE_CONST: &str = "const_item";
const NODE_STATIC: &str = "static_item";
const NODE_TYPE_ALIAS: &str = "type_item";
const NODE_USE: &str = "use_declaration";
const NODE_CALL: &str = "call_expression";
const NODE_SCOPED_IDENTIFIER: &str = "scoped_identifier";
const NODE_FIELD_EXPRESSION: &str = "field_expression";
const NODE_IDENTIFIER: &str = "identifier";
const NODE_VISIBILITY: &str = "visibility_modifier";

const CALLER_KINDS: &[&str] = &[NODE_FUNCTION];

pub struct RustAdapter {
    parser: Parser,
}

pub struct RustFactory;

impl AdapterFactory for RustFactory {
    fn create(&self) -> EngineResult<Box<dyn LanguageAdapter>> {
        Ok(Box::new(RustAdapter::new()?))
    }
}

impl RustAdapter {
    pub const EXTENSIONS: &'static [&'static str] = &["rs"];

    pub fn new() -> EngineResult<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_rust::LANGUAGE.into())
            .map_err(|e| EngineError::Plugin {
                language: "rust".into(),
                reason: format!("grammar init failed: {e}"),
            })?;
        Ok(Self { parser })
    }

    fn parse_tree(&mut self, content: &str, path: &str) -> EngineResult<Tree> {
        self.parser
            .parse(content, None)
            .ok_or_else(|| EngineError::Parse {
                path: path.into(),
                language: "rust".into(),
                reason: "tree-sitter returned no tree".into(),
            })
    }

    fn visibility_of(&self, code: &str, node: Node) -> (bool, Visibility) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind() == NODE_VISIBILITY {
                let text = ast::node_text(code, child);
                if text == "pub" {
                    return (true, Visibility::Public);
                }
                // pub(crate), pub(super), pub(in ...)
                return (false, Visibility::Module);
            }
        }
        (false, Visibility::Private)
    }

    fn collect(&self, code: &str, node: Node, out: &mut ParsedFile, depth: usize) {
        if depth > ast::MAX_AST_DEPTH {
            return;
        }
        match node.kind() {
            NODE_FUNCTION => {
                let kind = if self.inside_impl_or_trait(node) {
                    SymbolKind::Method
                } else {
                    SymbolKind::Function
                };
                if let Some(symbol) = self.definition(code, node, kind) {
                    out.symbols.push(symbol);
                }
            }
            NODE_STRUCT => {
                if let Some(symbol) = self.definition(code, node, SymbolKind::Class) {
                    out.symbols.push(symbol);
                }
            }
            NODE_ENUM => {
                if let Some(symbol) = self.definition(code, node, SymbolKind::Enum) {
                    out.symbols.push(symbol);
                }
            }
            NODE_TRAIT => {
                if let Some(symbol) = self.definition(code, node, SymbolKind::Interface) {
                    out.symbols.push(symbol);
                }
            }
            NODE_MOD => {
                if let Some(symbol) = self.definition(code, node, SymbolKind::Module) {
                    out.symbols.push(symbol);
                }
            }
            NODE_CONST | NODE_STATIC => {
                if let Some(symbol) = self.definition(code, node, SymbolKind::Const) {
                    out.symbols.push(symbol);
                }
            }
            NODE_TYPE_ALIAS => {
                if let Some(symbol) = self.definition(code, node, SymbolKind::Type) {
                    out.symbols.push(symbol);
                }
            }
            NODE_USE => {
                self.use_declaration(code, node, out);
                return;
            }
            NODE_CALL => {
                if let Some(call) = self.call_site(code, node) {
                    out.calls.push(call);
                }
            }
            _ => {}
        }
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.collect(code, child, out, depth + 1);
        }
    }

    fn inside_impl_or_trait(&self, node: Node) -> bool {
        let mut current = node.parent();
        while let Some(parent) = current {
            match parent.kind() {
                NODE_IMPL | NODE_TRAIT => return true,
                NODE_FUNCTION | NODE_MOD => return false,
                _ => current = parent.parent(),
            }
        }
        false
    }

    fn definition(&self, code: &str, node: Node, kind: SymbolKind) -> Option<ParsedSymbol> {
        let name_node = node.child_by_field_name("name")?;
        let name = ast::node_text(code, name_node).to_string();
        let (exported, visibility) = self.visibility_of(code, node);
        Some(ParsedSymbol {
            name,
            kind,
            range: ast::node_range(node),
            signature: Some(ast::signature_line(code, node, 160)),
            doc: ast::leading_doc_comment(code, node),
            exported,
            visibility,
            ast_fingerprint: ast::fingerprint_node(code, node),
        })
    }

    /// `use a::b::{c, d as e};` binds the leaf names.
    fn use_declaration(&self, code: &str, node: Node, out: &mut ParsedFile) {
        let range = ast::node_range(node);
        let raw = ast::node_text(code, node);
        // Drop any visibility prefix along with the `use` keyword itself.
        let text = raw
            .find("use")
            .map(|at| &raw[at + 3..])
            .unwrap_or(raw)
            .trim_end_matches(';')
            .trim()
            .to_string();

        for binding in Self::expand_use_tree(&text) {
            let (path, leaf) = binding;
            if leaf == "*" {
                out.imports.push(ParsedImport {
                    module_path: path,
                    kind: ImportKind::Bare,
                    range,
                });
                continue;
            }
            let (name, alias) = match leaf.split_once(" as ") {
                Some((name, alias)) => (name.trim().to_string(), Some(alias.trim().to_string())),
                None => (leaf, None),
            };
            out.imports.push(ParsedImport {
                module_path: path,
                kind: ImportKind::Named { name, alias },
                range,
            });
        }
    }

    /// Flatten a use tree into (module path, leaf binding) pairs.
    fn expand_use_tree(text: &str) -> Vec<(String, String)> {
        if let Some(open) = text.find('{') {
            let prefix = text[..open].trim_end_matches("::").trim().to_string();
            let Some(close) = text.rfind('}') else {
                return Vec::new();
            };
            let inner = &text[open + 1..close];
            let mut out = Vec::new();
            let mut depth = 0usize;
            let mut start = 0usize;
            for (i, c) in inner.char_indices() {
                match c {
                    '{' => depth += 1,
                    '}' => depth = depth.saturating_sub(1),
                    ',' if depth == 0 => {
                        let part = inner[start..i].trim();
                        if !part.is_empty() {
                            out.extend(Self::expand_use_tree(&format!("{prefix}::{part}")));
                        }
                        start = i + 1;
                    }
                    _ => {}
                }
            }
            let part = inner[start..].trim();
            if !part.is_empty() {
                out.extend(Self::expand_use_tree(&format!("{prefix}::{part}")));
            }
            return out;
        }

        let leaf = text.rsplit("::").next().unwrap_or(text).trim().to_string();
        if leaf.is_empty() {
            return Vec::new();
        }
        vec![(text.to_string(), leaf)]
    }

    fn call_site(&self, code: &str, node: Node) -> Option<CallSite> {
        let function = node.child_by_field_name("function")?;
        let callee = match function.kind() {
            NODE_IDENTIFIER => ast::node_text(code, function).to_string(),
            NODE_SCOPED_IDENTIFIER => {
                // `module::function` keeps only the last two segments, which
                // is what the namespace maps key on.
                let text = ast::node_text(code, function);
                let segments: Vec<&str> = text.split("::").collect();
                match segments.as_slice() {
                    [.., ns, member] => format!("{ns}.{member}"),
                    _ => text.to_string(),
                }
            }
            NODE_FIELD_EXPRESSION => {
                let field = function.child_by_field_name("field")?;
                ast::node_text(code, field).to_string()
            }
            _ => return None,
        };
        Some(CallSite {
            caller: ast::enclosing_definition_name(code, node, CALLER_KINDS),
            callee,
            range: ast::node_range(node),
        })
    }
}

impl LanguageAdapter for RustAdapter {
    fn language_id(&self) -> &'static str {
        "rust"
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        Self::EXTENSIONS
    }

    fn parse(&mut self, content: &str, path: &str) -> EngineResult<ParsedFile> {
        let tree = self.parse_tree(content, path)?;
        let mut out = ParsedFile::default();
        self.collect(content, tree.root_node(), &mut out, 0);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(code: &str) -> ParsedFile {
        RustAdapter::new().unwrap().parse(code, "src/sample.rs").unwrap()
    }

    #[test]
    fn functions_and_methods() {
        let parsed = parse(
            "pub fn free() {}\n\nstruct S;\n\nimpl S {\n    pub fn method(&self) { free(); }\n}\n",
        );
        let free = parsed.symbols.iter().find(|s| s.name == "free").unwrap();
        assert_eq!(free.kind, SymbolKind::Function);
        assert!(free.exported);
        let method = parsed.symbols.iter().find(|s| s.name == "method").unwrap();
        assert_eq!(method.kind, SymbolKind::Method);
    }

    #[test]
    fn items_map_to_kinds() {
        let parsed = parse(
            "pub struct Store;\npub enum Tier { A }\npub trait Walk {}\npub mod inner {}\npub const LIMIT: usize = 1;\npub type Alias = u32;\n",
        );
        let kind_of = |name: &str| {
            parsed
                .symbols
                .iter()
                .find(|s| s.name == name)
                .map(|s| s.kind)
        };
        assert_eq!(kind_of("Store"), Some(SymbolKind::Class));
        assert_eq!(kind_of("Tier"), Some(SymbolKind::Enum));
        assert_eq!(kind_of("Walk"), Some(SymbolKind::Interface));
        assert_eq!(kind_of("inner"), Some(SymbolKind::Module));
        assert_eq!(kind_of("LIMIT"), Some(SymbolKind::Const));
        assert_eq!(kind_of("Alias"), Some(SymbolKind::Type));
    }

    #[test]
    fn visibility_levels() {
        let parsed = parse("pub fn a() {}\npub(crate) fn b() {}\nfn c() {}\n");
        let vis = |name: &str| {
            parsed
                .symbols
                .iter()
                .find(|s| s.name == name)
                .map(|s| s.visibility)
        };
        assert_eq!(vis("a"), Some(Visibility::Public));
        assert_eq!(vis("b"), Some(Visibility::Module));
        assert_eq!(vis("c"), Some(Visibility::Private));
    }

    #[test]
    fn use_tree_expansion() {
        let bindings = RustAdapter::expand_use_tree("crate::store::{Store, migrations as mig}");
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].1, "Store");
        assert!(bindings[1].1.contains("as mig"));

        let parsed = parse("use crate::slice::{SliceBuilder, card::SymbolCard};\n");
        let names: Vec<_> = parsed
            .imports
            .iter()
            .filter_map(|i| match &i.kind {
                ImportKind::Named { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect();
        assert!(names.contains(&"SliceBuilder"));
        assert!(names.contains(&"SymbolCard"));
    }

    #[test]
    fn call_forms() {
        let parsed = parse(
            "fn run() {\n    helper();\n    store::open();\n    value.finish();\n}\n",
        );
        let callees: Vec<_> = parsed.calls.iter().map(|c| c.callee.as_str()).collect();
        assert!(callees.contains(&"helper"));
        assert!(callees.contains(&"store.open"));
        assert!(callees.contains(&"finish"));
    }
}
