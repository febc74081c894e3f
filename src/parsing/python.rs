//! Python adapter.

use crate::error::{EngineError, EngineResult};
use crate::types::{SymbolKind, Visibility};
use tree_sitter::{Node, Parser, Tree};

use super::adapter::{
    AdapterFactory, CallSite, ImportKind, LanguageAdapter, ParsedFile, ParsedImport, ParsedSymbol,
};
use super::ast;
use super::resolution;

const NODE_FUNCTION: &str = "function_definition";
const NODE_CLASS: &str = "class_definition";
const NODE_DECORATED: &str = "decorated_definition";
const NODE_ASSIGNMENT: &str = "assignment";
const NODE_EXPRESSION_STATEMENT: &str = "expression_statement";
const NODE_IMPORT: &str = "import_statement";
const NODE_IMPORT_FROM: &str = "import_from_statement";
const NODE_CALL: &str = "call";
const NODE_ATTRIBUTE: &str = "attribute";
const NODE_IDENTIFIER: &str = "identifier";
const NODE_MODULE: &str = "module";

const CALLER_KINDS: &[&str] = &[NODE_FUNCTION, NODE_CLASS];

pub struct PythonAdapter {
    parser: Parser,
}

pub struct PythonFactory;

impl AdapterFactory for PythonFactory {
    fn create(&self) -> EngineResult<Box<dyn LanguageAdapter>> {
        Ok(Box::new(PythonAdapter::new()?))
    }
}

impl PythonAdapter {
    pub const EXTENSIONS: &'static [&'static str] = &["py"];

    pub fn new() -> EngineResult<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .map_err(|e| EngineError::Plugin {
                language: "python".into(),
                reason: format!("grammar init failed: {e}"),
            })?;
        Ok(Self { parser })
    }

    fn parse_tree(&mut self, content: &str, path: &str) -> EngineResult<Tree> {
        self.parser
            .parse(content, None)
            .ok_or_else(|| EngineError::Parse {
                path: path.into(),
                language: "python".into(),
                reason: "tree-sitter returned no tree".into(),
            })
    }

    fn collect(&self, code: &str, node: Node, out: &mut ParsedFile, depth: usize) {
        if depth > ast::MAX_AST_DEPTH {
            return;
        }
        match node.kind() {
            NODE_FUNCTION => {
                let kind = if self.inside_class(node) {
                    SymbolKind::Method
                } else {
                    SymbolKind::Function
                };
                if let Some(symbol) = self.definition(code, node, kind) {
                    out.symbols.push(symbol);
                }
            }
            NODE_CLASS => {
                if let Some(symbol) = self.definition(code, node, SymbolKind::Class) {
                    out.symbols.push(symbol);
                }
            }
            NODE_ASSIGNMENT => {
                if self.is_module_level(node) {
                    if let Some(symbol) = self.module_binding(code, node) {
                        out.symbols.push(symbol);
                    }
                }
            }
            NODE_IMPORT => {
                self.plain_import(code, node, out);
                return;
            }
            NODE_IMPORT_FROM => {
                self.from_import(code, node, out);
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

    fn inside_class(&self, node: Node) -> bool {
        let mut current = node.parent();
        while let Some(parent) = current {
            match parent.kind() {
                NODE_CLASS => return true,
                NODE_FUNCTION => return false,
                _ => current = parent.parent(),
            }
        }
        false
    }

    fn is_module_level(&self, node: Node) -> bool {
        // assignment -> expression_statement -> module
        node.parent()
            .filter(|p| p.kind() == NODE_EXPRESSION_STATEMENT)
            .and_then(|p| p.parent())
            .is_some_and(|gp| gp.kind() == NODE_MODULE)
    }

    fn visibility_for(name: &str) -> (bool, Visibility) {
        if name.starts_with('_') {
            (false, Visibility::Private)
        } else {
            (true, Visibility::Public)
        }
    }

    fn definition(&self, code: &str, node: Node, kind: SymbolKind) -> Option<ParsedSymbol> {
        let name_node = node.child_by_field_name("name")?;
        let name = ast::node_text(code, name_node).to_string();
        let (exported, visibility) = Self::visibility_for(&name);
        // A decorator wrapper owns the position of any leading comment.
        let doc_anchor = node
            .parent()
            .filter(|p| p.kind() == NODE_DECORATED)
            .unwrap_or(node);
        Some(ParsedSymbol {
            name,
            kind,
            range: ast::node_range(node),
            signature: Some(ast::signature_line(code, node, 160)),
            doc: self
                .docstring(code, node)
                .or_else(|| ast::leading_doc_comment(code, doc_anchor)),
            exported,
            visibility,
            ast_fingerprint: ast::fingerprint_node(code, node),
        })
    }

    /// First string expression in the body, Python's documentation convention.
    fn docstring(&self, code: &str, node: Node) -> Option<String> {
        let body = node.child_by_field_name("body")?;
        let first = body.named_child(0)?;
        if first.kind() != NODE_EXPRESSION_STATEMENT {
            return None;
        }
        let expr = first.named_child(0)?;
        if expr.kind() != "string" {
            return None;
        }
        let raw = ast::node_text(code, expr);
        let cleaned = raw
            .trim_matches(|c| c == '"' || c == '\'')
            .trim()
            .to_string();
        if cleaned.is_empty() { None } else { Some(cleaned) }
    }

    fn module_binding(&self, code: &str, node: Node) -> Option<ParsedSymbol> {
        let left = node.child_by_field_name("left")?;
        if left.kind() != NODE_IDENTIFIER {
            return None;
        }
        let name = ast::node_text(code, left).to_string();
        let kind = if name.chars().all(|c| !c.is_ascii_lowercase()) {
            SymbolKind::Const
        } else {
            SymbolKind::Variable
        };
        let (exported, visibility) = Self::visibility_for(&name);
        Some(ParsedSymbol {
            name,
            kind,
            range: ast::node_range(node),
            signature: Some(ast::signature_line(code, node, 160)),
            doc: None,
            exported,
            visibility,
            ast_fingerprint: ast::fingerprint_node(code, node),
        })
    }

    /// `import os.path as p` binds a namespace alias.
    fn plain_import(&self, code: &str, node: Node, out: &mut ParsedFile) {
        let range = ast::node_range(node);
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            match child.kind() {
                "dotted_name" => {
                    let path = ast::node_text(code, child).to_string();
                    let alias = path.rsplit('.').next().unwrap_or(&path).to_string();
                    out.imports.push(ParsedImport {
                        module_path: path,
                        kind: ImportKind::Namespace { alias },
                        range,
                    });
                }
                "aliased_import" => {
                    let Some(name) = child.child_by_field_name("name") else {
                        continue;
                    };
                    let Some(alias) = child.child_by_field_name("alias") else {
                        continue;
                    };
                    out.imports.push(ParsedImport {
                        module_path: ast::node_text(code, name).to_string(),
                        kind: ImportKind::Namespace {
                            alias: ast::node_text(code, alias).to_string(),
                        },
                        range,
                    });
                }
                _ => {}
            }
        }
    }

    /// `from .config import load as l` binds named imports.
    fn from_import(&self, code: &str, node: Node, out: &mut ParsedFile) {
        let range = ast::node_range(node);
        let Some(module) = node.child_by_field_name("module_name") else {
            return;
        };
        let module_path = ast::node_text(code, module).to_string();

        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            // The module name node itself appears among named children.
            if child.id() == module.id() {
                continue;
            }
            match child.kind() {
                "dotted_name" | NODE_IDENTIFIER => {
                    out.imports.push(ParsedImport {
                        module_path: module_path.clone(),
                        kind: ImportKind::Named {
                            name: ast::node_text(code, child).to_string(),
                            alias: None,
                        },
                        range,
                    });
                }
                "aliased_import" => {
                    let Some(name) = child.child_by_field_name("name") else {
                        continue;
                    };
                    let alias = child
                        .child_by_field_name("alias")
                        .map(|a| ast::node_text(code, a).to_string());
                    out.imports.push(ParsedImport {
                        module_path: module_path.clone(),
                        kind: ImportKind::Named {
                            name: ast::node_text(code, name).to_string(),
                            alias,
                        },
                        range,
                    });
                }
                "wildcard_import" => {
                    out.imports.push(ParsedImport {
                        module_path: module_path.clone(),
                        kind: ImportKind::Bare,
                        range,
                    });
                }
                _ => {}
            }
        }
    }

    fn call_site(&self, code: &str, node: Node) -> Option<CallSite> {
        let function = node.child_by_field_name("function")?;
        let callee = match function.kind() {
            NODE_IDENTIFIER => ast::node_text(code, function).to_string(),
            NODE_ATTRIBUTE => {
                let object = function.child_by_field_name("object")?;
                let attribute = function.child_by_field_name("attribute")?;
                if object.kind() == NODE_IDENTIFIER {
                    format!(
                        "{}.{}",
                        ast::node_text(code, object),
                        ast::node_text(code, attribute)
                    )
                } else {
                    ast::node_text(code, attribute).to_string()
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

    /// Dotted (possibly relative) module path to slash form for candidates.
    fn module_path_to_slashes(module_path: &str) -> String {
        let leading_dots = module_path.chars().take_while(|&c| c == '.').count();
        let rest = &module_path[leading_dots..];
        let slashed = rest.replace('.', "/");
        match leading_dots {
            0 => slashed,
            1 => format!("./{slashed}"),
            n => {
                let ups = "../".repeat(n - 1);
                format!("{ups}{slashed}")
            }
        }
    }
}

impl LanguageAdapter for PythonAdapter {
    fn language_id(&self) -> &'static str {
        "python"
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

    fn import_candidates(&self, importer_rel_path: &str, module_path: &str) -> Vec<String> {
        python_import_candidates(importer_rel_path, module_path)
    }
}

/// Candidate repo paths for a Python import, package `__init__.py` included.
pub fn python_import_candidates(importer_rel_path: &str, module_path: &str) -> Vec<String> {
    if !module_path.starts_with('.') {
        return Vec::new();
    }
    let slashed = PythonAdapter::module_path_to_slashes(module_path);
    let mut candidates =
        resolution::relative_import_candidates(importer_rel_path, &slashed, &["py"]);
    let extra: Vec<String> = candidates
        .iter()
        .filter(|c| !c.ends_with(".py"))
        .map(|c| format!("{c}/__init__.py"))
        .collect();
    for candidate in extra {
        if !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(code: &str) -> ParsedFile {
        PythonAdapter::new().unwrap().parse(code, "pkg/sample.py").unwrap()
    }

    #[test]
    fn functions_classes_and_methods() {
        let parsed = parse(
            "def top():\n    return 1\n\nclass Indexer:\n    def run(self):\n        return top()\n",
        );
        let kinds: Vec<_> = parsed
            .symbols
            .iter()
            .map(|s| (s.name.as_str(), s.kind))
            .collect();
        assert!(kinds.contains(&("top", SymbolKind::Function)));
        assert!(kinds.contains(&("Indexer", SymbolKind::Class)));
        assert!(kinds.contains(&("run", SymbolKind::Method)));
    }

    #[test]
    fn docstring_becomes_doc() {
        let parsed = parse("def load(path):\n    \"\"\"Load a config file.\"\"\"\n    return path\n");
        assert_eq!(parsed.symbols[0].doc.as_deref(), Some("Load a config file."));
    }

    #[test]
    fn underscore_prefix_is_private() {
        let parsed = parse("def _internal():\n    pass\n\ndef public():\n    pass\n");
        let internal = parsed.symbols.iter().find(|s| s.name == "_internal").unwrap();
        assert!(!internal.exported);
        assert_eq!(internal.visibility, Visibility::Private);
        let public = parsed.symbols.iter().find(|s| s.name == "public").unwrap();
        assert!(public.exported);
    }

    #[test]
    fn module_constants_and_variables() {
        let parsed = parse("LIMIT = 10\ncurrent = 0\n\ndef f():\n    local = 1\n    return local\n");
        let limit = parsed.symbols.iter().find(|s| s.name == "LIMIT").unwrap();
        assert_eq!(limit.kind, SymbolKind::Const);
        let current = parsed.symbols.iter().find(|s| s.name == "current").unwrap();
        assert_eq!(current.kind, SymbolKind::Variable);
        assert!(!parsed.symbols.iter().any(|s| s.name == "local"));
    }

    #[test]
    fn import_forms() {
        let parsed = parse(
            "import os.path\nimport json as j\nfrom .config import load, save as persist\n",
        );
        assert!(parsed.imports.iter().any(|i| matches!(
            &i.kind,
            ImportKind::Namespace { alias } if alias == "path"
        )));
        assert!(parsed.imports.iter().any(|i| matches!(
            &i.kind,
            ImportKind::Namespace { alias } if alias == "j"
        )));
        assert!(parsed.imports.iter().any(|i| matches!(
            &i.kind,
            ImportKind::Named { name, alias: None } if name == "load"
        )));
        assert!(parsed.imports.iter().any(|i| matches!(
            &i.kind,
            ImportKind::Named { name, alias: Some(a) } if name == "save" && a == "persist"
        )));
    }

    #[test]
    fn call_sites() {
        let parsed = parse("import os\n\ndef run():\n    helper()\n    os.getcwd()\n");
        let callees: Vec<_> = parsed.calls.iter().map(|c| c.callee.as_str()).collect();
        assert!(callees.contains(&"helper"));
        assert!(callees.contains(&"os.getcwd"));
    }

    #[test]
    fn relative_candidates_include_package_init() {
        let candidates = python_import_candidates("pkg/sub/mod.py", "..config");
        assert!(candidates.contains(&"pkg/config.py".to_string()));
        assert!(candidates.contains(&"pkg/config/__init__.py".to_string()));
        assert!(python_import_candidates("pkg/mod.py", "json").is_empty());
    }

    #[test]
    fn dotted_path_conversion() {
        assert_eq!(PythonAdapter::module_path_to_slashes(".config"), "./config");
        assert_eq!(
            PythonAdapter::module_path_to_slashes("..pkg.mod"),
            "../pkg/mod"
        );
        assert_eq!(PythonAdapter::module_path_to_slashes("a.b"), "a/b");
    }
}
