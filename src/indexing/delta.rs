//! Delta computation between two committed versions.
//!
//! Loads both symbol snapshots, classifies every symbol as added, removed,
//! or modified, and derives staleness tiers per change. A version with no
//! snapshot yields a structured `NoSnapshot` error, never a crash.

use crate::error::{EngineError, EngineResult};
use crate::store::{SnapshotRecord, Store};
use crate::types::{SymbolId, VersionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Staleness scoring weights; together they cover the full 100-point scale.
pub const INTERFACE_WEIGHT: u32 = 40;
pub const BEHAVIOR_WEIGHT: u32 = 40;
pub const SIDE_EFFECT_WEIGHT: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    Removed,
    Modified,
}

/// Before/after signature pair, present only when they differ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureDiff {
    pub before: Option<String>,
    pub after: Option<String>,
}

/// Added/removed sets over a string list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// Three-flag staleness classification with a risk score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Staleness {
    pub interface_stable: bool,
    pub behavior_stable: bool,
    pub side_effects_stable: bool,
    pub stability_score: u32,
    pub risk_score: u32,
}

impl Staleness {
    pub fn from_flags(interface: bool, behavior: bool, side_effects: bool) -> Self {
        let stability_score = (INTERFACE_WEIGHT * interface as u32
            + BEHAVIOR_WEIGHT * behavior as u32
            + SIDE_EFFECT_WEIGHT * side_effects as u32)
            .min(100);
        Self {
            interface_stable: interface,
            behavior_stable: behavior,
            side_effects_stable: side_effects,
            stability_score,
            risk_score: 100 - stability_score,
        }
    }

    /// All-unstable classification used for added and removed symbols.
    pub fn unstable() -> Self {
        Self::from_flags(false, false, false)
    }
}

/// One symbol's change between the two versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolChange {
    pub symbol_id: SymbolId,
    pub name: String,
    pub rel_path: String,
    pub change_type: ChangeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_diff: Option<SignatureDiff>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invariant_diff: Option<SetDiff>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub side_effect_diff: Option<SetDiff>,
    pub staleness: Staleness,
}

/// Full delta between two versions of one repo.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delta {
    pub repo_id: String,
    pub from_version: VersionId,
    pub to_version: VersionId,
    pub added: Vec<SymbolChange>,
    pub removed: Vec<SymbolChange>,
    pub modified: Vec<SymbolChange>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// Signatures compare after JSON canonicalization when they parse as JSON.
fn canonical_signature(signature: &Option<String>) -> Option<String> {
    let raw = signature.as_deref()?;
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => Some(crate::identity::canonical_json(&value)),
        Err(_) => Some(raw.to_string()),
    }
}

fn set_diff(before: &[String], after: &[String]) -> Option<SetDiff> {
    let before: BTreeSet<&String> = before.iter().collect();
    let after: BTreeSet<&String> = after.iter().collect();
    if before == after {
        return None;
    }
    Some(SetDiff {
        added: after.difference(&before).map(|s| (*s).clone()).collect(),
        removed: before.difference(&after).map(|s| (*s).clone()).collect(),
    })
}

/// Classify one symbol present in both versions. Returns None if unchanged.
pub fn classify_modified(from: &SnapshotRecord, to: &SnapshotRecord) -> Option<SymbolChange> {
    let before_sig = canonical_signature(&from.signature);
    let after_sig = canonical_signature(&to.signature);
    let signature_diff = (before_sig != after_sig).then(|| SignatureDiff {
        before: from.signature.clone(),
        after: to.signature.clone(),
    });
    let invariant_diff = set_diff(&from.invariants, &to.invariants);
    let side_effect_diff = set_diff(&from.side_effects, &to.side_effects);

    let fingerprint_changed = from.ast_fingerprint != to.ast_fingerprint;
    let summary_changed = from.summary != to.summary;

    let changed = signature_diff.is_some()
        || invariant_diff.is_some()
        || side_effect_diff.is_some()
        || fingerprint_changed
        || summary_changed;
    if !changed {
        return None;
    }

    let staleness = Staleness::from_flags(
        signature_diff.is_none(),
        !fingerprint_changed && !summary_changed,
        side_effect_diff.is_none(),
    );

    Some(SymbolChange {
        symbol_id: to.symbol_id.clone(),
        name: to.name.clone(),
        rel_path: to.rel_path.clone(),
        change_type: ChangeType::Modified,
        signature_diff,
        invariant_diff,
        side_effect_diff,
        staleness,
    })
}

fn terminal_change(snapshot: &SnapshotRecord, change_type: ChangeType) -> SymbolChange {
    SymbolChange {
        symbol_id: snapshot.symbol_id.clone(),
        name: snapshot.name.clone(),
        rel_path: snapshot.rel_path.clone(),
        change_type,
        signature_diff: None,
        invariant_diff: None,
        side_effect_diff: None,
        staleness: Staleness::unstable(),
    }
}

/// Compute the delta between two versions of a repo.
pub fn compute_delta(
    store: &Store,
    repo_id: &str,
    from_version: &VersionId,
    to_version: &VersionId,
) -> EngineResult<Delta> {
    for version in [from_version, to_version] {
        if store.version(repo_id, version)?.is_none() {
            return Err(EngineError::NoSnapshot {
                repo_id: repo_id.to_string(),
                version: version.clone(),
            });
        }
    }

    let from = store.snapshots_for_version(from_version)?;
    let to = store.snapshots_for_version(to_version)?;

    let mut delta = Delta {
        repo_id: repo_id.to_string(),
        from_version: from_version.clone(),
        to_version: to_version.clone(),
        added: Vec::new(),
        removed: Vec::new(),
        modified: Vec::new(),
    };

    for (symbol_id, to_snapshot) in &to {
        match from.get(symbol_id) {
            None => delta
                .added
                .push(terminal_change(to_snapshot, ChangeType::Added)),
            Some(from_snapshot) => {
                if let Some(change) = classify_modified(from_snapshot, to_snapshot) {
                    delta.modified.push(change);
                }
            }
        }
    }
    for (symbol_id, from_snapshot) in &from {
        if !to.contains_key(symbol_id) {
            delta
                .removed
                .push(terminal_change(from_snapshot, ChangeType::Removed));
        }
    }

    // Deterministic output regardless of map iteration order.
    for list in [&mut delta.added, &mut delta.removed, &mut delta.modified] {
        list.sort_by(|a, b| a.symbol_id.cmp(&b.symbol_id));
    }

    Ok(delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SymbolKind;

    fn snapshot(id: &str, fingerprint: &str) -> SnapshotRecord {
        SnapshotRecord {
            version_id: VersionId::new("v"),
            symbol_id: SymbolId::new(id),
            repo_id: "r".into(),
            name: "f".into(),
            kind: SymbolKind::Function,
            rel_path: "src/a.ts".into(),
            ast_fingerprint: fingerprint.into(),
            signature: Some("function f()".into()),
            summary: Some("does f".into()),
            invariants: Vec::new(),
            side_effects: Vec::new(),
        }
    }

    #[test]
    fn unchanged_symbol_is_not_modified() {
        let a = snapshot("s1", "fp");
        assert!(classify_modified(&a, &a.clone()).is_none());
    }

    #[test]
    fn side_effect_change_scores_eighty() {
        let from = snapshot("s1", "fp");
        let mut to = snapshot("s1", "fp");
        to.side_effects = vec!["io".into()];

        let change = classify_modified(&from, &to).unwrap();
        assert!(change.staleness.interface_stable);
        assert!(change.staleness.behavior_stable);
        assert!(!change.staleness.side_effects_stable);
        assert_eq!(change.staleness.stability_score, 80);
        assert_eq!(change.staleness.risk_score, 20);
        let diff = change.side_effect_diff.unwrap();
        assert_eq!(diff.added, vec!["io".to_string()]);
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn fingerprint_change_breaks_behavior() {
        let from = snapshot("s1", "fp1");
        let to = snapshot("s1", "fp2");
        let change = classify_modified(&from, &to).unwrap();
        assert!(change.staleness.interface_stable);
        assert!(!change.staleness.behavior_stable);
        assert!(change.staleness.side_effects_stable);
        assert_eq!(change.staleness.stability_score, 60);
        assert_eq!(change.staleness.risk_score, 40);
        assert!(change.signature_diff.is_none());
    }

    #[test]
    fn signature_change_produces_diff() {
        let from = snapshot("s1", "fp");
        let mut to = snapshot("s1", "fp");
        to.signature = Some("function f(x)".into());
        let change = classify_modified(&from, &to).unwrap();
        let diff = change.signature_diff.unwrap();
        assert_eq!(diff.before.as_deref(), Some("function f()"));
        assert_eq!(diff.after.as_deref(), Some("function f(x)"));
        assert!(!change.staleness.interface_stable);
    }

    #[test]
    fn json_signatures_compare_canonically() {
        let mut from = snapshot("s1", "fp");
        let mut to = snapshot("s1", "fp");
        from.signature = Some(r#"{"params": [], "returns": "void"}"#.into());
        to.signature = Some(r#"{"returns": "void", "params": []}"#.into());
        // Same canonical form, so not a signature change.
        assert!(classify_modified(&from, &to).is_none());
    }

    #[test]
    fn added_and_removed_are_fully_unstable() {
        let change = terminal_change(&snapshot("s1", "fp"), ChangeType::Added);
        assert_eq!(change.staleness.risk_score, 100);
        assert_eq!(change.staleness.stability_score, 0);
        assert!(!change.staleness.interface_stable);
    }

    #[test]
    fn missing_version_is_no_snapshot_error() {
        let store = Store::in_memory().unwrap();
        let err = compute_delta(
            &store,
            "r",
            &VersionId::new("missing-a"),
            &VersionId::new("missing-b"),
        )
        .unwrap_err();
        match err {
            EngineError::NoSnapshot { repo_id, version } => {
                assert_eq!(repo_id, "r");
                assert_eq!(version.as_str(), "missing-a");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
