//! TypeScript / JavaScript adapter (covers ts, tsx, js, jsx).
//!
//! One adapter serves the whole family; the grammar is picked per file
//! extension and parsers are created on first use per dialect.

use crate::error::{EngineError, EngineResult};
use crate::types::{SymbolKind, Visibility};
use tree_sitter::{Node, Parser, Tree};

use super::adapter::{
    AdapterFactory, CallSite, ImportKind, LanguageAdapter, ParsedFile, ParsedImport, ParsedSymbol,
};
use super::ast;

const NODE_FUNCTION: &str = "function_declaration";
const NODE_GENERATOR: &str = "generator_function_declaration";
const NODE_CLASS: &str = "class_declaration";
const NODE_METHOD: &str = "method_definition";
const NODE_INTERFACE: &str = "interface_declaration";
const NODE_ENUM: &str = "enum_declaration";
const NODE_TYPE_ALIAS: &str = "type_alias_declaration";
const NODE_NAMESPACE: &str = "internal_module";
const NODE_LEXICAL_DECL: &str = "lexical_declaration";
const NODE_VARIABLE_DECL: &str = "variable_declaration";
const NODE_VARIABLE_DECLARATOR: &str = "variable_declarator";
const NODE_EXPORT: &str = "export_statement";
const NODE_IMPORT: &str = "import_statement";
const NODE_CALL: &str = "call_expression";
const NODE_NEW: &str = "new_expression";
const NODE_MEMBER: &str = "member_expression";
const NODE_IDENTIFIER: &str = "identifier";
const NODE_PROGRAM: &str = "program";

/// Definition kinds that can enclose a call site.
const CALLER_KINDS: &[&str] = &[NODE_FUNCTION, NODE_GENERATOR, NODE_METHOD, NODE_CLASS];

#[derive(Debug, Clone, Copy, PartialEq)]
enum Dialect {
    TypeScript,
    Tsx,
    JavaScript,
}

impl Dialect {
    fn for_extension(ext: &str) -> Self {
        match ext {
            "tsx" => Self::Tsx,
            "js" | "jsx" => Self::JavaScript,
            _ => Self::TypeScript,
        }
    }
}

pub struct TypeScriptAdapter {
    ts_parser: Option<Parser>,
    tsx_parser: Option<Parser>,
    js_parser: Option<Parser>,
}

pub struct TypeScriptFactory;

impl AdapterFactory for TypeScriptFactory {
    fn create(&self) -> EngineResult<Box<dyn LanguageAdapter>> {
        Ok(Box::new(TypeScriptAdapter::new()))
    }
}

impl TypeScriptAdapter {
    pub const EXTENSIONS: &'static [&'static str] = &["ts", "tsx", "js", "jsx"];

    pub fn new() -> Self {
        Self {
            ts_parser: None,
            tsx_parser: None,
            js_parser: None,
        }
    }

    fn parser_for(&mut self, dialect: Dialect) -> EngineResult<&mut Parser> {
        let (slot, language) = match dialect {
            Dialect::TypeScript => (
                &mut self.ts_parser,
                tree_sitter::Language::from(tree_sitter_typescript::LANGUAGE_TYPESCRIPT),
            ),
            Dialect::Tsx => (
                &mut self.tsx_parser,
                tree_sitter::Language::from(tree_sitter_typescript::LANGUAGE_TSX),
            ),
            Dialect::JavaScript => (
                &mut self.js_parser,
                tree_sitter::Language::from(tree_sitter_javascript::LANGUAGE),
            ),
        };
        if slot.is_none() {
            let mut parser = Parser::new();
            parser
                .set_language(&language)
                .map_err(|e| EngineError::Plugin {
                    language: "typescript".into(),
                    reason: format!("grammar init failed: {e}"),
                })?;
            *slot = Some(parser);
        }
        Ok(slot.as_mut().expect("slot populated above"))
    }

    fn parse_tree(&mut self, content: &str, path: &str) -> EngineResult<Tree> {
        let ext = path.rsplit('.').next().unwrap_or("ts").to_ascii_lowercase();
        let parser = self.parser_for(Dialect::for_extension(&ext))?;
        parser.parse(content, None).ok_or_else(|| EngineError::Parse {
            path: path.into(),
            language: "typescript".into(),
            reason: "tree-sitter returned no tree".into(),
        })
    }

    fn collect(&self, code: &str, node: Node, out: &mut ParsedFile, depth: usize) {
        if depth > ast::MAX_AST_DEPTH {
            return;
        }
        match node.kind() {
            NODE_FUNCTION | NODE_GENERATOR => {
                if let Some(symbol) = self.definition(code, node, SymbolKind::Function) {
                    out.symbols.push(symbol);
                }
            }
            NODE_CLASS => {
                if let Some(symbol) = self.definition(code, node, SymbolKind::Class) {
                    out.symbols.push(symbol);
                }
            }
            NODE_METHOD => {
                if let Some(symbol) = self.definition(code, node, SymbolKind::Method) {
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
            NODE_TYPE_ALIAS => {
                if let Some(symbol) = self.definition(code, node, SymbolKind::Type) {
                    out.symbols.push(symbol);
                }
            }
            NODE_NAMESPACE => {
                if let Some(symbol) = self.definition(code, node, SymbolKind::Module) {
                    out.symbols.push(symbol);
                }
            }
            NODE_LEXICAL_DECL | NODE_VARIABLE_DECL => {
                // Module-level bindings only; locals are not symbols.
                if self.is_top_level(node) {
                    let kind = if ast::node_text(code, node).starts_with("const") {
                        SymbolKind::Const
                    } else {
                        SymbolKind::Variable
                    };
                    let mut cursor = node.walk();
                    for child in node.named_children(&mut cursor) {
                        if child.kind() == NODE_VARIABLE_DECLARATOR {
                            if let Some(symbol) = self.declarator(code, node, child, kind) {
                                out.symbols.push(symbol);
                            }
                        }
                    }
                }
            }
            NODE_IMPORT => {
                self.import(code, node, out);
                return;
            }
            NODE_CALL | NODE_NEW => {
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
        match node.parent() {
            Some(parent) => {
                parent.kind() == NODE_PROGRAM
                    || (parent.kind() == NODE_EXPORT
                        && parent
                            .parent()
                            .is_some_and(|gp| gp.kind() == NODE_PROGRAM))
            }
            None => true,
        }
    }

    fn is_exported(&self, node: Node) -> bool {
        node.parent().is_some_and(|p| p.kind() == NODE_EXPORT)
    }

    fn definition(&self, code: &str, node: Node, kind: SymbolKind) -> Option<ParsedSymbol> {
        let name_node = node.child_by_field_name("name")?;
        let name = ast::node_text(code, name_node).to_string();
        let exported = self.is_exported(node);
        // The export wrapper owns the doc comment when present.
        let doc_anchor = if exported { node.parent()? } else { node };
        Some(ParsedSymbol {
            name,
            kind,
            range: ast::node_range(node),
            signature: Some(ast::signature_line(code, node, 160)),
            doc: ast::leading_doc_comment(code, doc_anchor),
            exported,
            visibility: if exported {
                Visibility::Public
            } else {
                Visibility::Module
            },
            ast_fingerprint: ast::fingerprint_node(code, node),
        })
    }

    fn declarator(
        &self,
        code: &str,
        decl: Node,
        declarator: Node,
        kind: SymbolKind,
    ) -> Option<ParsedSymbol> {
        let name_node = declarator.child_by_field_name("name")?;
        if name_node.kind() != NODE_IDENTIFIER {
            // Destructuring patterns do not produce stable symbol names.
            return None;
        }
        let exported = self.is_exported(decl);
        Some(ParsedSymbol {
            name: ast::node_text(code, name_node).to_string(),
            kind,
            range: ast::node_range(declarator),
            signature: Some(ast::signature_line(code, decl, 160)),
            doc: ast::leading_doc_comment(code, if exported { decl.parent()? } else { decl }),
            exported,
            visibility: if exported {
                Visibility::Public
            } else {
                Visibility::Module
            },
            ast_fingerprint: ast::fingerprint_node(code, declarator),
        })
    }

    fn import(&self, code: &str, node: Node, out: &mut ParsedFile) {
        let Some(source) = node.child_by_field_name("source") else {
            return;
        };
        let module_path = ast::node_text(code, source)
            .trim_matches(|c| c == '"' || c == '\'' || c == '`')
            .to_string();
        let range = ast::node_range(node);

        let mut bound_any = false;
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if child.kind() != "import_clause" {
                continue;
            }
            let mut clause_cursor = child.walk();
            for clause in child.named_children(&mut clause_cursor) {
                match clause.kind() {
                    NODE_IDENTIFIER => {
                        // Default import binds the local name.
                        out.imports.push(ParsedImport {
                            module_path: module_path.clone(),
                            kind: ImportKind::Named {
                                name: ast::node_text(code, clause).to_string(),
                                alias: None,
                            },
                            range,
                        });
                        bound_any = true;
                    }
                    "namespace_import" => {
                        let mut ns_cursor = clause.walk();
                        for part in clause.named_children(&mut ns_cursor) {
                            if part.kind() == NODE_IDENTIFIER {
                                out.imports.push(ParsedImport {
                                    module_path: module_path.clone(),
                                    kind: ImportKind::Namespace {
                                        alias: ast::node_text(code, part).to_string(),
                                    },
                                    range,
                                });
                                bound_any = true;
                            }
                        }
                    }
                    "named_imports" => {
                        let mut spec_cursor = clause.walk();
                        for spec in clause.named_children(&mut spec_cursor) {
                            if spec.kind() != "import_specifier" {
                                continue;
                            }
                            let Some(name_node) = spec.child_by_field_name("name") else {
                                continue;
                            };
                            let alias = spec
                                .child_by_field_name("alias")
                                .map(|a| ast::node_text(code, a).to_string());
                            out.imports.push(ParsedImport {
                                module_path: module_path.clone(),
                                kind: ImportKind::Named {
                                    name: ast::node_text(code, name_node).to_string(),
                                    alias,
                                },
                                range,
                            });
                            bound_any = true;
                        }
                    }
                    _ => {}
                }
            }
        }

        if !bound_any {
            out.imports.push(ParsedImport {
                module_path,
                kind: ImportKind::Bare,
                range,
            });
        }
    }

    fn call_site(&self, code: &str, node: Node) -> Option<CallSite> {
        let callee_node = node
            .child_by_field_name("function")
            .or_else(|| node.child_by_field_name("constructor"))?;
        let callee = match callee_node.kind() {
            NODE_IDENTIFIER => ast::node_text(code, callee_node).to_string(),
            NODE_MEMBER => {
                let object = callee_node.child_by_field_name("object")?;
                let property = callee_node.child_by_field_name("property")?;
                if object.kind() == NODE_IDENTIFIER {
                    format!(
                        "{}.{}",
                        ast::node_text(code, object),
                        ast::node_text(code, property)
                    )
                } else {
                    // Chained or computed receivers fall back to the member
                    // name alone.
                    ast::node_text(code, property).to_string()
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

impl Default for TypeScriptAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageAdapter for TypeScriptAdapter {
    fn language_id(&self) -> &'static str {
        "typescript"
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
        TypeScriptAdapter::new().parse(code, "src/sample.ts").unwrap()
    }

    #[test]
    fn extracts_exported_function_with_doc() {
        let parsed = parse(
            "/** Loads the config. */\nexport function loadConfig(path: string) {\n  return read(path);\n}\n",
        );
        assert_eq!(parsed.symbols.len(), 1);
        let symbol = &parsed.symbols[0];
        assert_eq!(symbol.name, "loadConfig");
        assert_eq!(symbol.kind, SymbolKind::Function);
        assert!(symbol.exported);
        assert_eq!(symbol.visibility, Visibility::Public);
        assert_eq!(symbol.doc.as_deref(), Some("Loads the config."));
        assert_eq!(symbol.ast_fingerprint.len(), 64);
    }

    #[test]
    fn extracts_class_and_methods() {
        let parsed = parse(
            "export class Scanner {\n  scan(root: string) { return walk(root); }\n  count() { return 0; }\n}\n",
        );
        let names: Vec<_> = parsed
            .symbols
            .iter()
            .map(|s| (s.name.as_str(), s.kind))
            .collect();
        assert!(names.contains(&("Scanner", SymbolKind::Class)));
        assert!(names.contains(&("scan", SymbolKind::Method)));
        assert!(names.contains(&("count", SymbolKind::Method)));
    }

    #[test]
    fn top_level_const_vs_local_binding() {
        let parsed = parse(
            "export const LIMIT = 10;\nfunction f() { const local = 1; return local; }\n",
        );
        let names: Vec<_> = parsed.symbols.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"LIMIT"));
        assert!(!names.contains(&"local"));
        let limit = parsed.symbols.iter().find(|s| s.name == "LIMIT").unwrap();
        assert_eq!(limit.kind, SymbolKind::Const);
    }

    #[test]
    fn import_kinds() {
        let parsed = parse(
            "import { readFile, stat as statFile } from \"../fs/ops\";\nimport * as path from \"./path\";\nimport config from \"./config\";\nimport \"./side-effect\";\n",
        );
        assert_eq!(parsed.imports.len(), 5);

        let named: Vec<_> = parsed
            .imports
            .iter()
            .filter_map(|i| match &i.kind {
                ImportKind::Named { name, alias } => Some((name.as_str(), alias.as_deref())),
                _ => None,
            })
            .collect();
        assert!(named.contains(&("readFile", None)));
        assert!(named.contains(&("stat", Some("statFile"))));
        assert!(named.contains(&("config", None)));

        assert!(parsed.imports.iter().any(|i| matches!(
            &i.kind,
            ImportKind::Namespace { alias } if alias == "path"
        )));
        assert!(parsed
            .imports
            .iter()
            .any(|i| i.kind == ImportKind::Bare && i.module_path == "./side-effect"));
    }

    #[test]
    fn call_sites_with_callers_and_receivers() {
        let parsed = parse(
            "import * as fs from \"./fs\";\nexport function run() {\n  helper();\n  fs.readFile(\"x\");\n  new Scanner();\n}\n",
        );
        let callees: Vec<_> = parsed.calls.iter().map(|c| c.callee.as_str()).collect();
        assert!(callees.contains(&"helper"));
        assert!(callees.contains(&"fs.readFile"));
        assert!(callees.contains(&"Scanner"));
        for call in &parsed.calls {
            assert_eq!(call.caller.as_deref(), Some("run"));
        }
    }

    #[test]
    fn interface_enum_and_type_alias() {
        let parsed = parse(
            "export interface Card { id: string }\nenum Tier { A, B }\ntype Id = string;\n",
        );
        let kinds: Vec<_> = parsed.symbols.iter().map(|s| s.kind).collect();
        assert!(kinds.contains(&SymbolKind::Interface));
        assert!(kinds.contains(&SymbolKind::Enum));
        assert!(kinds.contains(&SymbolKind::Type));
    }

    #[test]
    fn jsx_parses_with_tsx_grammar() {
        let mut adapter = TypeScriptAdapter::new();
        let parsed = adapter
            .parse(
                "export function App() { return <div onClick={() => handle()} />; }\n",
                "src/app.tsx",
            )
            .unwrap();
        assert!(parsed.symbols.iter().any(|s| s.name == "App"));
        assert!(parsed.calls.iter().any(|c| c.callee == "handle"));
    }
}
