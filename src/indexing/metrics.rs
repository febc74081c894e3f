//! Derived per-symbol metrics: fan-in/out, churn, test references.
//!
//! Recomputed whenever a version commits. Test references resolve through
//! the `symbol_references` inverted index; churn counts fingerprint changes
//! across snapshots committed within the trailing 30 days.

use crate::error::EngineResult;
use crate::store::{MetricsRecord, Store, TestRef};
use crate::types::SymbolId;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

/// Churn lookback window.
pub const CHURN_WINDOW_MS: i64 = 30 * 24 * 60 * 60 * 1000;

/// Compute metrics for every symbol currently in the repo.
///
/// `now_ms` anchors the churn window; pass the committing version's
/// timestamp so reruns are reproducible.
pub fn compute_metrics(store: &Store, repo_id: &str, now_ms: i64) -> EngineResult<Vec<MetricsRecord>> {
    let symbols = store.symbols_for_repo(repo_id)?;
    let edges = store.edges_for_repo(repo_id)?;
    let references = store.references_by_name(repo_id)?;
    let churn = churn_by_symbol(store, repo_id, now_ms)?;

    let mut fan_out: HashMap<&SymbolId, u32> = HashMap::new();
    let mut fan_in: HashMap<&SymbolId, u32> = HashMap::new();
    for edge in &edges {
        *fan_out.entry(&edge.from_symbol_id).or_default() += 1;
        *fan_in.entry(&edge.to_symbol_id).or_default() += 1;
    }

    Ok(symbols
        .iter()
        .map(|symbol| MetricsRecord {
            symbol_id: symbol.symbol_id.clone(),
            repo_id: repo_id.to_string(),
            fan_in: fan_in.get(&symbol.symbol_id).copied().unwrap_or(0),
            fan_out: fan_out.get(&symbol.symbol_id).copied().unwrap_or(0),
            churn_30d: churn.get(&symbol.symbol_id).copied().unwrap_or(0),
            test_refs: references.get(&symbol.name).cloned().unwrap_or_default(),
            updated_at: now_ms,
        })
        .collect())
}

/// Fingerprint changes per symbol across snapshots inside the window.
///
/// The version immediately preceding the window participates as the
/// comparison base, so a change right at the window edge still counts once.
fn churn_by_symbol(
    store: &Store,
    repo_id: &str,
    now_ms: i64,
) -> EngineResult<HashMap<SymbolId, u32>> {
    let versions = store.versions_for_repo(repo_id)?;
    let cutoff = now_ms - CHURN_WINDOW_MS;

    let mut relevant: Vec<&crate::store::VersionRecord> = Vec::new();
    for (i, version) in versions.iter().enumerate() {
        if version.created_at >= cutoff {
            if relevant.is_empty() && i > 0 {
                relevant.push(&versions[i - 1]);
            }
            relevant.push(version);
        }
    }

    let mut churn: HashMap<SymbolId, u32> = HashMap::new();
    let mut previous: Option<HashMap<SymbolId, String>> = None;
    for version in relevant {
        let snapshot = store.snapshots_for_version(&version.version_id)?;
        let fingerprints: HashMap<SymbolId, String> = snapshot
            .into_iter()
            .map(|(id, record)| (id, record.ast_fingerprint))
            .collect();
        if let Some(prev) = &previous {
            for (symbol_id, fingerprint) in &fingerprints {
                match prev.get(symbol_id) {
                    Some(old) if old != fingerprint => {
                        *churn.entry(symbol_id.clone()).or_default() += 1;
                    }
                    None => {
                        *churn.entry(symbol_id.clone()).or_default() += 1;
                    }
                    _ => {}
                }
            }
        }
        previous = Some(fingerprints);
    }
    Ok(churn)
}

/// Read-through cache for test-reference lookups, keyed by repo.
///
/// Invalidate on version commit; entries are shared snapshots.
#[derive(Default)]
pub struct MetricsCache {
    test_refs: DashMap<String, Arc<HashMap<String, Vec<TestRef>>>>,
}

impl MetricsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test references for `symbol_name`, loading the repo's index once.
    pub fn test_refs(
        &self,
        store: &Store,
        repo_id: &str,
        symbol_name: &str,
    ) -> EngineResult<Vec<TestRef>> {
        if let Some(cached) = self.test_refs.get(repo_id) {
            return Ok(cached.get(symbol_name).cloned().unwrap_or_default());
        }
        let loaded = Arc::new(store.references_by_name(repo_id)?);
        let result = loaded.get(symbol_name).cloned().unwrap_or_default();
        self.test_refs.insert(repo_id.to_string(), loaded);
        Ok(result)
    }

    /// Drop a repo's cached references; called on version commit.
    pub fn invalidate_repo(&self, repo_id: &str) {
        self.test_refs.remove(repo_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ReferenceRecord, SnapshotRecord, VersionRecord};
    use crate::types::{SymbolKind, VersionId};

    fn snapshot(version: &str, symbol: &str, fingerprint: &str) -> SnapshotRecord {
        SnapshotRecord {
            version_id: VersionId::new(version),
            symbol_id: SymbolId::new(symbol),
            repo_id: "r".into(),
            name: symbol.to_string(),
            kind: SymbolKind::Function,
            rel_path: "src/a.ts".into(),
            ast_fingerprint: fingerprint.into(),
            signature: None,
            summary: None,
            invariants: Vec::new(),
            side_effects: Vec::new(),
        }
    }

    fn commit(store: &Store, version: &str, created_at: i64, snapshots: Vec<SnapshotRecord>) {
        store
            .commit_version(
                &VersionRecord {
                    version_id: VersionId::new(version),
                    repo_id: "r".into(),
                    created_at,
                    reason: "test".into(),
                },
                &snapshots,
                &[],
            )
            .unwrap();
    }

    #[test]
    fn churn_counts_fingerprint_changes_in_window() {
        let store = Store::in_memory().unwrap();
        let now: i64 = 100 * CHURN_WINDOW_MS;

        // Old change outside the window, two changes inside.
        commit(&store, "v1", now - 2 * CHURN_WINDOW_MS, vec![snapshot("v1", "s", "a")]);
        commit(&store, "v2", now - CHURN_WINDOW_MS + 1000, vec![snapshot("v2", "s", "b")]);
        commit(&store, "v3", now - 1000, vec![snapshot("v3", "s", "c")]);
        commit(&store, "v4", now, vec![snapshot("v4", "s", "c")]);

        let churn = churn_by_symbol(&store, "r", now).unwrap();
        // v1->v2 counts (v1 is the pre-window base), v2->v3 counts, v3->v4
        // is no change.
        assert_eq!(churn.get(&SymbolId::new("s")).copied(), Some(2));
    }

    #[test]
    fn metrics_cache_loads_once_and_invalidates() {
        let store = Store::in_memory().unwrap();
        store
            .replace_file_extraction(
                "r",
                "tests/a.test.ts",
                "h",
                "typescript",
                10,
                0,
                &[],
                &[],
                &[ReferenceRecord {
                    symbol_name: "f".into(),
                    line_number: 3,
                }],
            )
            .unwrap();

        let cache = MetricsCache::new();
        let refs = cache.test_refs(&store, "r", "f").unwrap();
        assert_eq!(refs.len(), 1);

        // A write invisible to the cache until invalidation.
        store
            .replace_file_extraction(
                "r",
                "tests/b.test.ts",
                "h2",
                "typescript",
                10,
                0,
                &[],
                &[],
                &[ReferenceRecord {
                    symbol_name: "f".into(),
                    line_number: 9,
                }],
            )
            .unwrap();
        assert_eq!(cache.test_refs(&store, "r", "f").unwrap().len(), 1);

        cache.invalidate_repo("r");
        assert_eq!(cache.test_refs(&store, "r", "f").unwrap().len(), 2);
    }
}
