//! Content hashing and stable identity derivation.
//!
//! Everything persisted is addressed by SHA-256: file contents, symbol ids,
//! version ids, and canonical-JSON card hashes. Two identical inputs always
//! produce identical digests, which is what makes delta computation and cache
//! keys sound.

use crate::types::{SymbolId, SymbolKind, VersionId};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Separator for the normalized AST token stream fed into fingerprints.
const TOKEN_SEPARATOR: u8 = 0x1f;

fn hex_digest(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// SHA-256 of raw bytes, lowercase hex. Used for file content hashes.
pub fn hash_content(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_digest(hasher)
}

/// Stable symbol identity: SHA-256 over the symbol's coordinates.
///
/// The fingerprint participates, so a symbol whose body changes gets a new
/// id while an untouched symbol keeps its id across runs.
pub fn symbol_id(
    repo_id: &str,
    rel_path: &str,
    kind: SymbolKind,
    name: &str,
    ast_fingerprint: &str,
) -> SymbolId {
    let mut hasher = Sha256::new();
    hasher.update(repo_id.as_bytes());
    hasher.update(b":");
    hasher.update(rel_path.as_bytes());
    hasher.update(b":");
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(name.as_bytes());
    hasher.update(b":");
    hasher.update(ast_fingerprint.as_bytes());
    SymbolId::new(hex_digest(hasher))
}

/// Fingerprint of a normalized AST token stream.
///
/// Identical fingerprints are treated as identical behavior by the delta
/// engine, so the caller must feed tokens with comments and whitespace
/// already stripped.
pub fn ast_fingerprint<S: AsRef<str>>(tokens: &[S]) -> String {
    let mut hasher = Sha256::new();
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 {
            hasher.update([TOKEN_SEPARATOR]);
        }
        hasher.update(token.as_ref().as_bytes());
    }
    hex_digest(hasher)
}

/// Version identity for a committed index run.
pub fn version_id(repo_id: &str, created_at_ms: i64, reason: &str) -> VersionId {
    let mut hasher = Sha256::new();
    hasher.update(repo_id.as_bytes());
    hasher.update(b":");
    hasher.update(created_at_ms.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(reason.as_bytes());
    VersionId::new(hex_digest(hasher))
}

/// Hash of the canonical JSON encoding of a value.
///
/// Canonical means object keys sorted recursively and no insignificant
/// whitespace, so logically equal cards hash equal regardless of field
/// insertion order.
pub fn hash_card(value: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(value, &mut canonical);
    hash_content(canonical.as_bytes())
}

/// Canonical JSON text for hashing. Exposed so tests can assert key order.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("string serializes"));
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => {
            out.push_str(&serde_json::to_string(other).expect("scalar serializes"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_hash_is_stable_and_hex() {
        let a = hash_content(b"hello");
        let b = hash_content(b"hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(hash_content(b"hello"), hash_content(b"hello2"));
    }

    #[test]
    fn symbol_id_changes_with_fingerprint() {
        let a = symbol_id("repo", "src/a.ts", SymbolKind::Function, "f", "fp1");
        let b = symbol_id("repo", "src/a.ts", SymbolKind::Function, "f", "fp2");
        let c = symbol_id("repo", "src/a.ts", SymbolKind::Function, "f", "fp1");
        assert_ne!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn fingerprint_is_separator_sensitive() {
        // "ab" + "c" must not collide with "a" + "bc"
        assert_ne!(ast_fingerprint(&["ab", "c"]), ast_fingerprint(&["a", "bc"]));
        assert_eq!(ast_fingerprint(&["a", "b"]), ast_fingerprint(&["a", "b"]));
    }

    #[test]
    fn canonical_json_sorts_keys_recursively() {
        let v = json!({"b": 1, "a": {"z": true, "m": [3, 2]}});
        assert_eq!(canonical_json(&v), r#"{"a":{"m":[3,2],"z":true},"b":1}"#);
    }

    #[test]
    fn card_hash_ignores_key_order() {
        let a = json!({"name": "f", "kind": "function", "metrics": {"fanIn": 1, "fanOut": 2}});
        let b = json!({"metrics": {"fanOut": 2, "fanIn": 1}, "kind": "function", "name": "f"});
        assert_eq!(hash_card(&a), hash_card(&b));
    }

    #[test]
    fn card_and_content_hash_agree_on_identical_text() {
        // hashCard over a canonicalized value equals hashContent over the
        // canonical text, so the two hash paths cannot drift apart.
        let v = json!({"x": [1, 2, 3]});
        assert_eq!(hash_card(&v), hash_content(canonical_json(&v).as_bytes()));
    }
}
