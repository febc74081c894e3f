//! Core identifier and enum types shared across the engine.
//!
//! Symbol identity is content-addressed: a [`SymbolId`] is the SHA-256 of the
//! symbol's coordinates plus its AST fingerprint, so an unchanged symbol keeps
//! its id across index runs. Unresolved call targets use a synthetic
//! `unresolved:<kind>:<name>` id in the same field.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Content-addressed symbol identifier.
///
/// Either a 64-char lowercase hex digest or an `unresolved:<kind>:<name>`
/// placeholder for edges whose target could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SymbolId(Box<str>);

impl SymbolId {
    pub fn new(id: impl Into<Box<str>>) -> Self {
        Self(id.into())
    }

    /// Synthetic id for an edge endpoint that did not resolve.
    pub fn unresolved(kind: &str, name: &str) -> Self {
        Self(format!("unresolved:{kind}:{name}").into())
    }

    pub fn is_unresolved(&self) -> bool {
        self.0.starts_with("unresolved:")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SymbolId {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

/// Surrogate row id for a file within the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub i64);

impl FileId {
    pub fn value(&self) -> i64 {
        self.0
    }
}

/// Identifier of a committed index version. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(Box<str>);

impl VersionId {
    pub fn new(id: impl Into<Box<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source range of a symbol or call site. Lines and columns are zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Range {
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl Range {
    pub fn new(start_line: u32, start_column: u32, end_line: u32, end_column: u32) -> Self {
        Self {
            start_line,
            start_column,
            end_line,
            end_column,
        }
    }

    /// Compact wire form: `[sl, sc, el, ec]`.
    pub fn to_array(&self) -> [u32; 4] {
        [
            self.start_line,
            self.start_column,
            self.end_line,
            self.end_column,
        ]
    }

    pub fn from_array(a: [u32; 4]) -> Self {
        Self::new(a[0], a[1], a[2], a[3])
    }
}

/// Kind of a defined symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Class,
    Method,
    Variable,
    Const,
    Type,
    Interface,
    Enum,
    Module,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Method => "method",
            Self::Variable => "variable",
            Self::Const => "const",
            Self::Type => "type",
            Self::Interface => "interface",
            Self::Enum => "enum",
            Self::Module => "module",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "function" => Some(Self::Function),
            "class" => Some(Self::Class),
            "method" => Some(Self::Method),
            "variable" => Some(Self::Variable),
            "const" => Some(Self::Const),
            "type" => Some(Self::Type),
            "interface" => Some(Self::Interface),
            "enum" => Some(Self::Enum),
            "module" => Some(Self::Module),
            _ => None,
        }
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeType {
    Import,
    Call,
    Config,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::Call => "call",
            Self::Config => "config",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "import" => Some(Self::Import),
            "call" => Some(Self::Call),
            "config" => Some(Self::Config),
            _ => None,
        }
    }

    /// Score weight applied during slice expansion.
    pub fn slice_weight(&self) -> f32 {
        match self {
            Self::Call => 1.0,
            Self::Import => 0.7,
            Self::Config => 0.4,
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a call edge's target was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStrategy {
    Exact,
    Heuristic,
    Unresolved,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Heuristic => "heuristic",
            Self::Unresolved => "unresolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "exact" => Some(Self::Exact),
            "heuristic" => Some(Self::Heuristic),
            "unresolved" => Some(Self::Unresolved),
            _ => None,
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Symbol visibility as declared in source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    #[default]
    Module,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Module => "module",
            Self::Private => "private",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Self::Public),
            "module" => Some(Self::Module),
            "private" => Some(Self::Private),
            _ => None,
        }
    }
}

/// Context detail level, in ascending cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Rung {
    Card,
    Skeleton,
    HotPath,
    Raw,
}

impl Rung {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::Skeleton => "skeleton",
            Self::HotPath => "hotPath",
            Self::Raw => "raw",
        }
    }

    /// The next cheaper level, used when a policy downgrades a request.
    pub fn downgrade(&self) -> Option<Self> {
        match self {
            Self::Raw => Some(Self::HotPath),
            Self::HotPath => Some(Self::Skeleton),
            Self::Skeleton => Some(Self::Card),
            Self::Card => None,
        }
    }
}

impl fmt::Display for Rung {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_id_unresolved_form() {
        let id = SymbolId::unresolved("call", "fetchUser");
        assert_eq!(id.as_str(), "unresolved:call:fetchUser");
        assert!(id.is_unresolved());

        let real = SymbolId::new("ab12".repeat(16));
        assert!(!real.is_unresolved());
    }

    #[test]
    fn symbol_id_ordering_is_lexicographic() {
        let a = SymbolId::new("aaa");
        let b = SymbolId::new("bbb");
        assert!(a < b);
    }

    #[test]
    fn range_array_round_trip() {
        let r = Range::new(3, 4, 7, 1);
        assert_eq!(Range::from_array(r.to_array()), r);
    }

    #[test]
    fn kind_parse_matches_as_str() {
        for kind in [
            SymbolKind::Function,
            SymbolKind::Class,
            SymbolKind::Method,
            SymbolKind::Variable,
            SymbolKind::Const,
            SymbolKind::Type,
            SymbolKind::Interface,
            SymbolKind::Enum,
            SymbolKind::Module,
        ] {
            assert_eq!(SymbolKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(SymbolKind::parse("struct"), None);
    }

    #[test]
    fn edge_type_weights() {
        assert_eq!(EdgeType::Call.slice_weight(), 1.0);
        assert_eq!(EdgeType::Import.slice_weight(), 0.7);
        assert_eq!(EdgeType::Config.slice_weight(), 0.4);
    }

    #[test]
    fn rung_downgrade_chain() {
        assert_eq!(Rung::Raw.downgrade(), Some(Rung::HotPath));
        assert_eq!(Rung::HotPath.downgrade(), Some(Rung::Skeleton));
        assert_eq!(Rung::Skeleton.downgrade(), Some(Rung::Card));
        assert_eq!(Rung::Card.downgrade(), None);
    }

    #[test]
    fn serde_lowercase_names() {
        assert_eq!(
            serde_json::to_string(&SymbolKind::Interface).unwrap(),
            "\"interface\""
        );
        assert_eq!(serde_json::to_string(&EdgeType::Call).unwrap(), "\"call\"");
        assert_eq!(
            serde_json::to_string(&ResolutionStrategy::Heuristic).unwrap(),
            "\"heuristic\""
        );
        assert_eq!(serde_json::to_string(&Rung::HotPath).unwrap(), "\"hotPath\"");
    }
}
