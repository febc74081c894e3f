//! Extension-keyed adapter registry with lazily resolved factories.
//!
//! The factory set is built once per registry; adapter instances are created
//! per caller (tree-sitter parsers are not shareable across threads).

use crate::error::{EngineError, EngineResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;

use super::adapter::{AdapterFactory, LanguageAdapter};
use super::{go, java, python, rust, typescript};

/// Registry of adapter factories keyed by lowercase extension.
pub struct AdapterRegistry {
    factories: HashMap<&'static str, Arc<dyn AdapterFactory>>,
}

impl AdapterRegistry {
    /// Registry with every bundled language.
    pub fn with_builtin_languages() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register(
            typescript::TypeScriptAdapter::EXTENSIONS,
            Arc::new(typescript::TypeScriptFactory),
        );
        registry.register(
            python::PythonAdapter::EXTENSIONS,
            Arc::new(python::PythonFactory),
        );
        registry.register(rust::RustAdapter::EXTENSIONS, Arc::new(rust::RustFactory));
        registry.register(go::GoAdapter::EXTENSIONS, Arc::new(go::GoFactory));
        registry.register(java::JavaAdapter::EXTENSIONS, Arc::new(java::JavaFactory));
        registry
    }

    fn register(&mut self, extensions: &'static [&'static str], factory: Arc<dyn AdapterFactory>) {
        for ext in extensions {
            self.factories.insert(*ext, Arc::clone(&factory));
        }
    }

    /// Whether any bundled adapter claims the extension.
    pub fn supports(&self, ext: &str) -> bool {
        self.factories.contains_key(ext.to_ascii_lowercase().as_str())
    }

    /// Create a fresh adapter instance for the extension.
    pub fn create(&self, ext: &str) -> EngineResult<Box<dyn LanguageAdapter>> {
        let key = ext.to_ascii_lowercase();
        let factory = self
            .factories
            .get(key.as_str())
            .ok_or_else(|| EngineError::Plugin {
                language: key.clone(),
                reason: "no adapter registered for extension".into(),
            })?;
        factory.create()
    }

    pub fn registered_extensions(&self) -> Vec<&'static str> {
        let mut extensions: Vec<_> = self.factories.keys().copied().collect();
        extensions.sort_unstable();
        extensions
    }
}

/// Process-wide registry, built on first use.
pub fn global_registry() -> &'static AdapterRegistry {
    static REGISTRY: OnceLock<AdapterRegistry> = OnceLock::new();
    REGISTRY.get_or_init(AdapterRegistry::with_builtin_languages)
}

/// Create an adapter for an extension from the process-wide registry.
pub fn adapter_for_extension(ext: &str) -> EngineResult<Box<dyn LanguageAdapter>> {
    global_registry().create(ext)
}

/// Whether the process-wide registry bundles an adapter for the extension.
pub fn supported_extension(ext: &str) -> bool {
    global_registry().supports(ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_extensions_are_registered() {
        let registry = AdapterRegistry::with_builtin_languages();
        for ext in ["ts", "tsx", "js", "jsx", "py", "rs", "go", "java"] {
            assert!(registry.supports(ext), "missing adapter for {ext}");
        }
        assert!(!registry.supports("md"));
    }

    #[test]
    fn extension_lookup_is_case_insensitive() {
        let registry = AdapterRegistry::with_builtin_languages();
        assert!(registry.supports("TS"));
        assert!(registry.create("PY").is_ok());
    }

    #[test]
    fn created_adapters_claim_their_extension() {
        let registry = AdapterRegistry::with_builtin_languages();
        let adapter = registry.create("go").unwrap();
        assert!(adapter.file_extensions().contains(&"go"));
        assert_eq!(adapter.language_id(), "go");
    }
}
