//! Java adapter.

use crate::error::{EngineError, EngineResult};
use crate::types::{SymbolKind, Visibility};
use tree_sitter::{Node, Parser, Tree};

use super::adapter::{
    AdapterFactory, CallSite, ImportKind, LanguageAdapter, ParsedFile, ParsedImport, ParsedSymbol,
};
use super::ast;

const NODE_CLASS: &str = "class_declaration";
const NODE_INTERFACE: &str = "interface_declaration";
const NODE_ENUM: &str = "enum_declaration";
const NODE_RECORD: &str = "record_declaration";
const NODE_METHOD: &str = "method_declaration";
const NODE_CONSTRUCTOR: &str = "constructor_declaration";
const NODE_FIELD: &str = "field_declaration";
const NODE_IMPORT: &str = "import_declaration";
const NODE_INVOCATION: &str = "method_invocation";
const NODE_OBJECT_CREATION: &str = "object_creation_expression";
const NODE_MODIFIERS: &str = "modifiers";
const NODE_IDENTIFIER: &str = "identifier";
const NODE_VARIABLE_DECLARATOR: &str = "variable_declarator";

const CALLER_KINDS: &[&str] = &[NODE_METHOD, NODE_CONSTRUCTOR, NODE_CLASS];

pub struct JavaAdapter {
    parser: Parser,
}

pub struct JavaFactory;

impl AdapterFactory for JavaFactory {
    fn create(&self) -> EngineResult<Box<dyn LanguageAdapter>> {
        Ok(Box::new(JavaAdapter::new()?))
    }
}

impl JavaAdapter {
    pub const EXTENSIONS: &'static [&'static str] = &["java"];

    pub fn new() -> EngineResult<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_java::LANGUAGE.into())
            .map_err(|e| EngineError::Plugin {
                language: "java".into(),
                reason: format!("grammar init failed: {e}"),
            })?;
        Ok(Self { parser })
    }

    fn parse_tree(&mut self, content: &str, path: &str) -> EngineResult<Tree> {
        self.parser
            .parse(content, None)
            .ok_or_else(|| EngineError::Parse {
                path: path.into(),
                language: "java".into(),
                reason: "tree-sitter returned no tree".into(),
            })
    }

    /// Visibility from the modifiers child; package-private maps to Module.
    fn visibility_of(&self, code: &str, node: Node) -> (bool, Visibility) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind() == NODE_MODIFIERS {
                let text = ast::node_text(code, child);
                if text.contains("public") {
                    return (true, Visibility::Public);
                }
                if text.contains("private") {
                    return (false, Visibility::Private);
                }
                return (false, Visibility::Module);
            }
        }
        (false, Visibility::Module)
    }

    fn is_final(&self, code: &str, node: Node) -> bool {
        let mut cursor = node.walk();
        node.children(&mut cursor)
            .any(|c| c.kind() == NODE_MODIFIERS && ast::node_text(code, c).contains("final"))
    }

    fn collect(&self, code: &str, node: Node, out: &mut ParsedFile, depth: usize) {
        if depth > ast::MAX_AST_DEPTH {
            return;
        }
        match node.kind() {
            NODE_CLASS | NODE_RECORD => {
                if let Some(symbol) = self.definition(code, node, SymbolKind::Class) {
                    out.symbols.push(symbol);
                }
            }
            NODE_INTERFACE => {
                if let Some(symbol) = self.definition(code, node, SymbolKind::Interface) {
                    out.symbols.push(symbol);
                }
            }
            NODE_ENUM => {
                if let Some(symbol) = self.definition(code, node, SymbolKind::Enum) {
                    out.symbols.push(symbol);
                }
            }
            NODE_METHOD | NODE_CONSTRUCTOR => {
                if let Some(symbol) = self.definition(code, node, SymbolKind::Method) {
                    out.symbols.push(symbol);
                }
            }
            NODE_FIELD => {
                self.field(code, node, out);
            }
            NODE_IMPORT => {
                self.import(code, node, out);
                return;
            }
            NODE_INVOCATION => {
                if let Some(call) = self.invocation(code, node) {
                    out.calls.push(call);
                }
            }
            NODE_OBJECT_CREATION => {
                if let Some(call) = self.constructor_call(code, node) {
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

    fn field(&self, code: &str, node: Node, out: &mut ParsedFile) {
        let kind = if self.is_final(code, node) {
            SymbolKind::Const
        } else {
            SymbolKind::Variable
        };
        let (exported, visibility) = self.visibility_of(code, node);
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if child.kind() != NODE_VARIABLE_DECLARATOR {
                continue;
            }
            let Some(name_node) = child.child_by_field_name("name") else {
                continue;
            };
            out.symbols.push(ParsedSymbol {
                name: ast::node_text(code, name_node).to_string(),
                kind,
                range: ast::node_range(child),
                signature: Some(ast::signature_line(code, node, 160)),
                doc: None,
                exported,
                visibility,
                ast_fingerprint: ast::fingerprint_node(code, child),
            });
        }
    }

    /// `import a.b.C;` binds `C`; `import a.b.*;` binds nothing nameable.
    fn import(&self, code: &str, node: Node, out: &mut ParsedFile) {
        let text = ast::node_text(code, node)
            .trim_start_matches("import")
            .trim_end_matches(';')
            .trim();
        let text = text.strip_prefix("static ").unwrap_or(text).trim();
        let range = ast::node_range(node);
        if text.ends_with(".*") {
            out.imports.push(ParsedImport {
                module_path: text.trim_end_matches(".*").to_string(),
                kind: ImportKind::Bare,
                range,
            });
            return;
        }
        let leaf = text.rsplit('.').next().unwrap_or(text).to_string();
        out.imports.push(ParsedImport {
            module_path: text.to_string(),
            kind: ImportKind::Named {
                name: leaf,
                alias: None,
            },
            range,
        });
    }

    fn invocation(&self, code: &str, node: Node) -> Option<CallSite> {
        let name = node.child_by_field_name("name")?;
        let callee = match node.child_by_field_name("object") {
            Some(object) if object.kind() == NODE_IDENTIFIER => {
                format!(
                    "{}.{}",
                    ast::node_text(code, object),
                    ast::node_text(code, name)
                )
            }
            _ => ast::node_text(code, name).to_string(),
        };
        Some(CallSite {
            caller: ast::enclosing_definition_name(code, node, CALLER_KINDS),
            callee,
            range: ast::node_range(node),
        })
    }

    fn constructor_call(&self, code: &str, node: Node) -> Option<CallSite> {
        let type_node = node.child_by_field_name("type")?;
        Some(CallSite {
            caller: ast::enclosing_definition_name(code, node, CALLER_KINDS),
            callee: ast::node_text(code, type_node).to_string(),
            range: ast::node_range(node),
        })
    }
}

impl LanguageAdapter for JavaAdapter {
    fn language_id(&self) -> &'static str {
        "java"
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

    /// `a.b.C` may live at `a/b/C.java` from any source root.
    fn import_candidates(&self, _importer_rel_path: &str, module_path: &str) -> Vec<String> {
        if module_path.is_empty() {
            return Vec::new();
        }
        vec![format!("{}.java", module_path.replace('.', "/"))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(code: &str) -> ParsedFile {
        JavaAdapter::new().unwrap().parse(code, "src/Sample.java").unwrap()
    }

    #[test]
    fn class_method_and_visibility() {
        let parsed = parse(
            "public class Indexer {\n  public void run() { helper(); }\n  private int helper() { return 1; }\n}\n",
        );
        let indexer = parsed.symbols.iter().find(|s| s.name == "Indexer").unwrap();
        assert_eq!(indexer.kind, SymbolKind::Class);
        assert!(indexer.exported);
        let helper = parsed.symbols.iter().find(|s| s.name == "helper").unwrap();
        assert_eq!(helper.visibility, Visibility::Private);
        assert!(!helper.exported);
    }

    #[test]
    fn final_fields_are_consts() {
        let parsed = parse(
            "class C {\n  public static final int LIMIT = 10;\n  private int count;\n}\n",
        );
        let limit = parsed.symbols.iter().find(|s| s.name == "LIMIT").unwrap();
        assert_eq!(limit.kind, SymbolKind::Const);
        let count = parsed.symbols.iter().find(|s| s.name == "count").unwrap();
        assert_eq!(count.kind, SymbolKind::Variable);
    }

    #[test]
    fn imports_bind_leaf_names() {
        let parsed = parse("import java.util.List;\nimport java.io.*;\nclass C {}\n");
        assert!(parsed.imports.iter().any(|i| matches!(
            &i.kind,
            ImportKind::Named { name, .. } if name == "List"
        )));
        assert!(parsed
            .imports
            .iter()
            .any(|i| i.kind == ImportKind::Bare && i.module_path == "java.io"));
    }

    #[test]
    fn invocations_and_construction() {
        let parsed = parse(
            "class C {\n  void run() {\n    helper();\n    logger.info(\"x\");\n    new Scanner();\n  }\n  void helper() {}\n}\n",
        );
        let callees: Vec<_> = parsed.calls.iter().map(|c| c.callee.as_str()).collect();
        assert!(callees.contains(&"helper"));
        assert!(callees.contains(&"logger.info"));
        assert!(callees.contains(&"Scanner"));
        let helper_call = parsed.calls.iter().find(|c| c.callee == "helper").unwrap();
        assert_eq!(helper_call.caller.as_deref(), Some("run"));
    }

    #[test]
    fn interface_and_enum() {
        let parsed = parse("interface Walker { void walk(); }\nenum Tier { A, B }\n");
        assert!(parsed
            .symbols
            .iter()
            .any(|s| s.name == "Walker" && s.kind == SymbolKind::Interface));
        assert!(parsed
            .symbols
            .iter()
            .any(|s| s.name == "Tier" && s.kind == SymbolKind::Enum));
    }
}
