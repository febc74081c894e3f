//! Go adapter.

use crate::error::{EngineError, EngineResult};
use crate::types::{SymbolKind, Visibility};
use tree_sitter::{Node, Parser, Tree};

use super::adapter::{
    AdapterFactory, CallSite, ImportKind, LanguageAdapter, ParsedFile, ParsedImport, ParsedSymbol,
};
use super::ast;

const NODE_FUNCTION: &str = "function_declaration";
const NODE_METHOD: &str = "method_declaration";
const NODE_TYPE_DECL: &str = "type_declaration";
const NODE_TYPE_SPEC: &str = "type_spec";
const NODE_CONST_DECL: &str = "const_declaration";
const NODE_VAR_DECL: &str = "var_declaration";
const NODE_SPEC_CONST: &str = "const_spec";
const NODE_SPEC_VAR: &str = "var_spec";
const NODE_IMPORT_DECL: &str = "import_declaration";
const NODE_IMPORT_SPEC: &str = "import_spec";
const NODE_CALL: &str = "call_expression";
const NODE_SELECTOR: &str = "selector_expression";
const NODE_IDENTIFIER: &str = "identifier";
const NODE_STRUCT_TYPE: &str = "struct_type";
const NODE_INTERFACE_TYPE: &str = "interface_type";
const NODE_SOURCE_FILE: &str = "source_file";

const CALLER_KINDS: &[&str] = &[NODE_FUNCTION, NODE_METHOD];

pub struct GoAdapter {
    parser: Parser,
}

pub struct GoFactory;

impl AdapterFactory for GoFactory {
    fn create(&self) -> EngineResult<Box<dyn LanguageAdapter>> {
        Ok(Box::new(GoAdapter::new()?))
    }
}

impl GoAdapter {
    pub const EXTENSIONS: &'static [&'static str] = &["go"];

    pub fn new() -> EngineResult<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_go::LANGUAGE.into())
            .map_err(|e| EngineError::Plugin {
                language: "go".into(),
                reason: format!("grammar init failed: {e}"),
            })?;
        Ok(Self { parser })
    }

    fn parse_tree(&mut self, content: &str, path: &str) -> EngineResult<Tree> {
        self.parser
            .parse(content, None)
            .ok_or_else(|| EngineError::Parse {
                path: path.into(),
                language: "go".into(),
                reason: "tree-sitter returned no tree".into(),
            })
    }

    /// Go visibility is by identifier case.
    fn visibility_for(name: &str) -> (bool, Visibility) {
        if name.chars().next().is_some_and(|c| c.is_uppercase()) {
            (true, Visibility::Public)
        } else {
            (false, Visibility::Module)
        }
    }

    fn collect(&self, code: &str, node: Node, out: &mut ParsedFile, depth: usize) {
        if depth > ast::MAX_AST_DEPTH {
            return;
        }
        match node.kind() {
            NODE_FUNCTION => {
                if let Some(symbol) = self.named_definition(code, node, SymbolKind::Function) {
                    out.symbols.push(symbol);
                }
            }
            NODE_METHOD => {
                if let Some(symbol) = self.named_definition(code, node, SymbolKind::Method) {
                    out.symbols.push(symbol);
                }
            }
            NODE_TYPE_DECL => {
                let mut cursor = node.walk();
                for spec in node.named_children(&mut cursor) {
                    if spec.kind() == NODE_TYPE_SPEC {
                        if let Some(symbol) = self.type_spec(code, node, spec) {
                            out.symbols.push(symbol);
                        }
                    }
                }
            }
            NODE_CONST_DECL | NODE_VAR_DECL => {
                if self.is_top_level(node) {
                    let kind = if node.kind() == NODE_CONST_DECL {
                        SymbolKind::Const
                    } else {
                        SymbolKind::Variable
                    };
                    self.value_specs(code, node, kind, out);
                }
            }
            NODE_IMPORT_DECL => {
                self.imports(code, node, out);
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

    fn is_top_level(&self, node: Node) -> bool {
        node.parent().is_none_or(|p| p.kind() == NODE_SOURCE_FILE)
    }

    fn named_definition(&self, code: &str, node: Node, kind: SymbolKind) -> Option<ParsedSymbol> {
        let name_node = node.child_by_field_name("name")?;
        let name = ast::node_text(code, name_node).to_string();
        let (exported, visibility) = Self::visibility_for(&name);
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

    fn type_spec(&self, code: &str, decl: Node, spec: Node) -> Option<ParsedSymbol> {
        let name_node = spec.child_by_field_name("name")?;
        let name = ast::node_text(code, name_node).to_string();
        let kind = match spec.child_by_field_name("type").map(|t| t.kind()) {
            Some(NODE_STRUCT_TYPE) => SymbolKind::Class,
            Some(NODE_INTERFACE_TYPE) => SymbolKind::Interface,
            _ => SymbolKind::Type,
        };
        let (exported, visibility) = Self::visibility_for(&name);
        Some(ParsedSymbol {
            name,
            kind,
            range: ast::node_range(spec),
            signature: Some(ast::signature_line(code, spec, 160)),
            doc: ast::leading_doc_comment(code, decl),
            exported,
            visibility,
            ast_fingerprint: ast::fingerprint_node(code, spec),
        })
    }

    fn value_specs(&self, code: &str, decl: Node, kind: SymbolKind, out: &mut ParsedFile) {
        let mut cursor = decl.walk();
        for spec in decl.named_children(&mut cursor) {
            if spec.kind() != NODE_SPEC_CONST && spec.kind() != NODE_SPEC_VAR {
                continue;
            }
            // Declared names live under the `name` field; identifiers on the
            // value side are expressions and must not become symbols.
            let mut spec_cursor = spec.walk();
            let names: Vec<Node> = spec
                .children_by_field_name("name", &mut spec_cursor)
                .filter(|n| n.kind() == NODE_IDENTIFIER)
                .collect();
            for child in names {
                let name = ast::node_text(code, child).to_string();
                let (exported, visibility) = Self::visibility_for(&name);
                out.symbols.push(ParsedSymbol {
                    name,
                    kind,
                    range: ast::node_range(spec),
                    signature: Some(ast::signature_line(code, spec, 160)),
                    doc: None,
                    exported,
                    visibility,
                    ast_fingerprint: ast::fingerprint_node(code, spec),
                });
            }
        }
    }

    /// Go imports bind the package under its base name or explicit alias.
    fn imports(&self, code: &str, node: Node, out: &mut ParsedFile) {
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            let mut cursor = current.walk();
            for child in current.named_children(&mut cursor) {
                if child.kind() == NODE_IMPORT_SPEC {
                    let Some(path_node) = child.child_by_field_name("path") else {
                        continue;
                    };
                    let module_path = ast::node_text(code, path_node)
                        .trim_matches('"')
                        .to_string();
                    let alias = child
                        .child_by_field_name("name")
                        .map(|n| ast::node_text(code, n).to_string())
                        .unwrap_or_else(|| {
                            module_path
                                .rsplit('/')
                                .next()
                                .unwrap_or(&module_path)
                                .to_string()
                        });
                    out.imports.push(ParsedImport {
                        module_path,
                        kind: ImportKind::Namespace { alias },
                        range: ast::node_range(child),
                    });
                } else {
                    stack.push(child);
                }
            }
        }
    }

    fn call_site(&self, code: &str, node: Node) -> Option<CallSite> {
        let function = node.child_by_field_name("function")?;
        let callee = match function.kind() {
            NODE_IDENTIFIER => ast::node_text(code, function).to_string(),
            NODE_SELECTOR => {
                let operand = function.child_by_field_name("operand")?;
                let field = function.child_by_field_name("field")?;
                if operand.kind() == NODE_IDENTIFIER {
                    format!(
                        "{}.{}",
                        ast::node_text(code, operand),
                        ast::node_text(code, field)
                    )
                } else {
                    ast::node_text(code, field).to_string()
                }
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

impl LanguageAdapter for GoAdapter {
    fn language_id(&self) -> &'static str {
        "go"
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
        GoAdapter::new().unwrap().parse(code, "pkg/sample.go").unwrap()
    }

    #[test]
    fn functions_methods_and_export_case() {
        let parsed = parse(
            "package pkg\n\nfunc Public() int { return helper() }\n\nfunc helper() int { return 1 }\n\nfunc (s *Scanner) Run() {}\n",
        );
        let public = parsed.symbols.iter().find(|s| s.name == "Public").unwrap();
        assert!(public.exported);
        assert_eq!(public.kind, SymbolKind::Function);
        let helper = parsed.symbols.iter().find(|s| s.name == "helper").unwrap();
        assert!(!helper.exported);
        let run = parsed.symbols.iter().find(|s| s.name == "Run").unwrap();
        assert_eq!(run.kind, SymbolKind::Method);
    }

    #[test]
    fn struct_and_interface_types() {
        let parsed = parse(
            "package pkg\n\ntype Scanner struct{ root string }\n\ntype Walker interface{ Walk() }\n\ntype Alias = Scanner\n",
        );
        let scanner = parsed.symbols.iter().find(|s| s.name == "Scanner").unwrap();
        assert_eq!(scanner.kind, SymbolKind::Class);
        let walker = parsed.symbols.iter().find(|s| s.name == "Walker").unwrap();
        assert_eq!(walker.kind, SymbolKind::Interface);
    }

    #[test]
    fn consts_and_vars() {
        let parsed = parse("package pkg\n\nconst Limit = 10\n\nvar count int\n");
        let limit = parsed.symbols.iter().find(|s| s.name == "Limit").unwrap();
        assert_eq!(limit.kind, SymbolKind::Const);
        let count = parsed.symbols.iter().find(|s| s.name == "count").unwrap();
        assert_eq!(count.kind, SymbolKind::Variable);
    }

    #[test]
    fn imports_bind_namespaces() {
        let parsed = parse(
            "package pkg\n\nimport (\n\t\"fmt\"\n\tosexec \"os/exec\"\n)\n\nfunc f() { fmt.Println(1) }\n",
        );
        assert!(parsed.imports.iter().any(|i| matches!(
            &i.kind,
            ImportKind::Namespace { alias } if alias == "fmt"
        )));
        assert!(parsed.imports.iter().any(|i| matches!(
            &i.kind,
            ImportKind::Namespace { alias } if alias == "osexec"
        )));
        assert!(parsed.calls.iter().any(|c| c.callee == "fmt.Println"));
    }
}
