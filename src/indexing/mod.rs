//! Index orchestration: two-pass extraction, deltas, derived metrics.

pub mod delta;
pub mod indexer;
pub mod metrics;

pub use delta::{ChangeType, Delta, SetDiff, SignatureDiff, Staleness, SymbolChange, compute_delta};
pub use indexer::{IndexOptions, Indexer};
pub use metrics::{MetricsCache, compute_metrics};

use crate::types::VersionId;
use serde::{Deserialize, Serialize};

/// Outcome counters for one index run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub files_scanned: usize,
    pub files_parsed: usize,
    pub files_skipped: usize,
    pub files_removed: usize,
    pub symbols: usize,
    pub edges: usize,
    pub errors: usize,
    pub duration_ms: u64,
    pub version_id: Option<VersionId>,
}

/// Whether a path is test-named, for the symbol-reference inverted index.
///
/// Union of the conventions of the bundled languages: a `tests` or
/// `__tests__` directory segment, a `.test.`/`.spec.`/`_test.` stem, or a
/// `test_` prefix.
pub fn is_test_file(rel_path: &str) -> bool {
    let segments: Vec<&str> = rel_path.split('/').collect();
    if segments
        .iter()
        .take(segments.len().saturating_sub(1))
        .any(|s| *s == "tests" || *s == "__tests__" || *s == "test")
    {
        return true;
    }
    let file_name = segments.last().copied().unwrap_or(rel_path);
    file_name.contains(".test.")
        || file_name.contains(".spec.")
        || file_name.contains("_test.")
        || file_name.starts_with("test_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_detection() {
        assert!(is_test_file("tests/indexer.rs"));
        assert!(is_test_file("src/__tests__/slice.ts"));
        assert!(is_test_file("src/config.test.ts"));
        assert!(is_test_file("src/config.spec.js"));
        assert!(is_test_file("pkg/scanner_test.go"));
        assert!(is_test_file("pkg/test_scanner.py"));
        assert!(!is_test_file("src/config.ts"));
        assert!(!is_test_file("src/latest.ts"));
        assert!(!is_test_file("contest/entry.py"));
    }
}
