//! Language adapters: per-language extraction of symbols, imports, and calls.
//!
//! Each adapter wraps a tree-sitter grammar and reduces the parse tree to the
//! engine's extraction contract. Call resolution is shared: adapters supply
//! the raw call sites, the default resolution policy turns them into edges.

pub mod adapter;
pub mod ast;
pub mod confidence;
pub mod go;
pub mod java;
pub mod python;
pub mod registry;
pub mod resolution;
pub mod rust;
pub mod typescript;

pub use adapter::{
    AdapterFactory, CallResolution, CallSite, ImportKind, LanguageAdapter, ParsedFile,
    ParsedImport, ParsedSymbol,
};
pub use confidence::calibrate_confidence;
pub use registry::{AdapterRegistry, adapter_for_extension, supported_extension};
pub use resolution::{ResolutionContext, relative_import_candidates, resolve_call_default};
