//! The extraction contract every language adapter implements.

use crate::error::EngineResult;
use crate::types::{Range, ResolutionStrategy, SymbolId, SymbolKind, Visibility};
use serde::{Deserialize, Serialize};

use super::resolution::{ResolutionContext, resolve_call_default};

/// Everything extracted from one source file.
#[derive(Debug, Clone, Default)]
pub struct ParsedFile {
    pub symbols: Vec<ParsedSymbol>,
    pub imports: Vec<ParsedImport>,
    pub calls: Vec<CallSite>,
}

/// One extracted definition, before persistence assigns its id.
#[derive(Debug, Clone)]
pub struct ParsedSymbol {
    pub name: String,
    pub kind: SymbolKind,
    pub range: Range,
    pub signature: Option<String>,
    /// Leading doc comment, used to seed the summary.
    pub doc: Option<String>,
    pub exported: bool,
    pub visibility: Visibility,
    /// SHA-256 over the normalized token stream of the defining node.
    pub ast_fingerprint: String,
}

/// How an import binds names into the importing file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum ImportKind {
    /// `import { name as alias } from "..."` and equivalents.
    Named { name: String, alias: Option<String> },
    /// `import * as alias from "..."`, `import module` and equivalents.
    Namespace { alias: String },
    /// Side-effect import binding nothing.
    Bare,
}

/// One import statement (or one clause of a multi-clause statement).
#[derive(Debug, Clone)]
pub struct ParsedImport {
    /// Module specifier as written in source, e.g. `../config` or `os.path`.
    pub module_path: String,
    pub kind: ImportKind,
    pub range: Range,
}

/// One call site awaiting resolution.
#[derive(Debug, Clone)]
pub struct CallSite {
    /// Name of the enclosing definition, when the call occurs inside one.
    pub caller: Option<String>,
    /// Callee as written: a bare identifier or a qualified `ns.member` path.
    pub callee: String,
    pub range: Range,
}

impl CallSite {
    /// Split a qualified callee into namespace and member.
    ///
    /// `a.b.c` yields `("a", "c")`: the head names the namespace binding,
    /// the tail is the member looked up inside it.
    pub fn qualified_parts(&self) -> Option<(&str, &str)> {
        let (head, rest) = self.callee.split_once('.')?;
        let member = rest.rsplit('.').next().unwrap_or(rest);
        Some((head, member))
    }
}

/// Outcome of resolving one call site.
#[derive(Debug, Clone, PartialEq)]
pub struct CallResolution {
    pub strategy: ResolutionStrategy,
    /// Resolved targets; a single synthetic id when unresolved.
    pub target_symbol_ids: Vec<SymbolId>,
    /// Number of candidates considered; drives the ambiguity penalty.
    pub candidate_count: usize,
    /// Adapter-supplied baseline override, replacing the strategy default.
    pub base_confidence: Option<f32>,
}

impl CallResolution {
    pub fn is_resolved(&self) -> bool {
        self.strategy != ResolutionStrategy::Unresolved
    }
}

/// A language adapter: parse + extract, and optionally custom resolution.
pub trait LanguageAdapter: Send {
    /// Stable language identifier, e.g. `typescript`.
    fn language_id(&self) -> &'static str;

    /// Extensions this adapter claims, lowercase without the dot.
    fn file_extensions(&self) -> &'static [&'static str];

    /// Parse source text and extract symbols, imports, and call sites.
    fn parse(&mut self, content: &str, path: &str) -> EngineResult<ParsedFile>;

    /// Resolve one call against the repo's name maps.
    ///
    /// The default policy covers every bundled language; adapters override
    /// only to change baselines or add language-specific lookups.
    fn resolve_call(&self, call: &CallSite, context: &ResolutionContext) -> CallResolution {
        resolve_call_default(call, context)
    }

    /// Candidate repo-relative paths an import specifier may refer to.
    ///
    /// The default expands relative slash-style specifiers; languages with
    /// dotted or rooted module paths override.
    fn import_candidates(&self, importer_rel_path: &str, module_path: &str) -> Vec<String> {
        super::resolution::relative_import_candidates(
            importer_rel_path,
            module_path,
            self.file_extensions(),
        )
    }
}

/// Creates adapter instances; registered once per extension.
pub trait AdapterFactory: Send + Sync {
    fn create(&self) -> EngineResult<Box<dyn LanguageAdapter>>;
}
