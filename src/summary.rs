//! Narrow contract for the external summariser.
//!
//! The engine never talks to a model directly; an injected provider returns
//! a summary string plus a divergence score describing how far the new
//! summary drifted from the previous one. Absent a provider, symbol
//! summaries fall back to leading doc comments.

use crate::error::EngineResult;
use crate::types::SymbolKind;

/// Everything a provider gets to see about one symbol.
#[derive(Debug, Clone)]
pub struct SummaryRequest {
    pub repo_id: String,
    pub rel_path: String,
    pub name: String,
    pub kind: SymbolKind,
    pub signature: Option<String>,
    pub doc: Option<String>,
    pub previous_summary: Option<String>,
}

/// Provider output.
#[derive(Debug, Clone)]
pub struct SummaryOutcome {
    pub summary: String,
    /// How far this summary diverges from the previous one, in [0, 1].
    pub divergence: f32,
}

/// The summariser seam. Implementations may suspend (network, model call).
pub trait SummaryProvider: Send + Sync {
    fn summarize(&self, request: &SummaryRequest) -> EngineResult<SummaryOutcome>;
}

/// Provider that produces no summaries; doc comments win.
pub struct NullSummaryProvider;

impl SummaryProvider for NullSummaryProvider {
    fn summarize(&self, request: &SummaryRequest) -> EngineResult<SummaryOutcome> {
        Ok(SummaryOutcome {
            summary: request.doc.clone().unwrap_or_default(),
            divergence: 0.0,
        })
    }
}

/// First sentence-ish prefix of a doc comment, used as the summary seed.
pub fn summary_from_doc(doc: &str) -> Option<String> {
    let first = doc.lines().next()?.trim();
    if first.is_empty() {
        return None;
    }
    let mut out = first.to_string();
    if out.len() > 200 {
        let mut boundary = 200;
        while boundary > 0 && !out.is_char_boundary(boundary) {
            boundary -= 1;
        }
        out.truncate(boundary);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_provider_echoes_doc() {
        let provider = NullSummaryProvider;
        let outcome = provider
            .summarize(&SummaryRequest {
                repo_id: "r".into(),
                rel_path: "src/a.ts".into(),
                name: "f".into(),
                kind: SymbolKind::Function,
                signature: None,
                doc: Some("Reads a file.".into()),
                previous_summary: None,
            })
            .unwrap();
        assert_eq!(outcome.summary, "Reads a file.");
        assert_eq!(outcome.divergence, 0.0);
    }

    #[test]
    fn doc_summary_takes_first_line() {
        assert_eq!(
            summary_from_doc("Reads a file.\nMore detail.").as_deref(),
            Some("Reads a file.")
        );
        assert_eq!(summary_from_doc("\n\n"), None);
        let long = "x".repeat(300);
        assert_eq!(summary_from_doc(&long).unwrap().len(), 200);
    }
}
