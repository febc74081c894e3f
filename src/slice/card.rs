//! Symbol cards: the per-symbol metadata unit served to agents.

use crate::identity;
use crate::store::{MetricsRecord, SymbolRecord};
use crate::types::{Range, Rung, SymbolId, SymbolKind, Visibility};
use serde::{Deserialize, Serialize};

/// Prose characters per estimated token.
const PROSE_CHARS_PER_TOKEN: f32 = 3.5;

/// Labels never exceed this many characters.
const MAX_LABEL_LEN: usize = 40;

/// Dependency counts surfaced on a card.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardDeps {
    pub imports: u32,
    pub calls: u32,
}

/// Metric summary surfaced on a card.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardMetrics {
    pub fan_in: u32,
    pub fan_out: u32,
    pub churn_30d: u32,
    pub test_refs: u32,
}

/// Structured metadata describing one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolCard {
    pub symbol_id: SymbolId,
    pub file: String,
    pub range: Range,
    pub kind: SymbolKind,
    pub name: String,
    pub exported: bool,
    pub visibility: Visibility,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub invariants: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub side_effects: Vec<String>,
    pub deps: CardDeps,
    pub metrics: CardMetrics,
    pub detail_level: Rung,
    pub ast_fingerprint: String,
}

impl SymbolCard {
    /// Assemble a card from persisted state.
    pub fn from_records(
        symbol: &SymbolRecord,
        metrics: Option<&MetricsRecord>,
        deps: CardDeps,
        detail_level: Rung,
    ) -> Self {
        let card_metrics = metrics
            .map(|m| CardMetrics {
                fan_in: m.fan_in,
                fan_out: m.fan_out,
                churn_30d: m.churn_30d,
                test_refs: m.test_refs.len() as u32,
            })
            .unwrap_or_default();
        Self {
            symbol_id: symbol.symbol_id.clone(),
            file: symbol.rel_path.clone(),
            range: symbol.range,
            kind: symbol.kind,
            name: symbol.name.clone(),
            exported: symbol.exported,
            visibility: symbol.visibility,
            summary: symbol.summary.clone(),
            invariants: symbol.invariants.clone(),
            side_effects: symbol.side_effects.clone(),
            deps,
            metrics: card_metrics,
            detail_level,
            ast_fingerprint: symbol.ast_fingerprint.clone(),
        }
    }

    /// Estimated token cost: structural JSON characters count 1:1, prose
    /// counts one token per 3.5 characters, summed and ceiled.
    pub fn estimated_tokens(&self) -> usize {
        let prose_chars: usize = self.summary.as_deref().map(str::len).unwrap_or(0)
            + self.invariants.iter().map(String::len).sum::<usize>()
            + self.side_effects.iter().map(String::len).sum::<usize>();

        let mut structural = self.clone();
        structural.summary = None;
        structural.invariants = Vec::new();
        structural.side_effects = Vec::new();
        let structural_chars = serde_json::to_string(&structural)
            .map(|s| s.len())
            .unwrap_or(0);

        (structural_chars as f32 + prose_chars as f32 / PROSE_CHARS_PER_TOKEN).ceil() as usize
    }

    /// Content hash of the card, used as its etag.
    pub fn etag(&self) -> String {
        let value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        identity::hash_card(&value)
    }

    /// Human-facing label; never a bare 64-hex id when a name exists.
    pub fn label(&self) -> String {
        display_label(Some(&self.name), &self.symbol_id)
    }
}

/// Reference to a cached card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardRef {
    pub symbol_id: SymbolId,
    pub etag: String,
    pub detail_level: Rung,
}

/// Build a display label, preferring the readable name over an opaque id.
///
/// Opaque 64-hex ids are elided to a short prefix; everything is truncated
/// to 40 characters.
pub fn display_label(name: Option<&str>, symbol_id: &SymbolId) -> String {
    let raw = match name {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => {
            let id = symbol_id.as_str();
            if id.len() == 64 && id.chars().all(|c| c.is_ascii_hexdigit()) {
                format!("sym:{}", &id[..12])
            } else {
                id.to_string()
            }
        }
    };
    let mut label = raw;
    if label.len() > MAX_LABEL_LEN {
        let mut boundary = MAX_LABEL_LEN;
        while boundary > 0 && !label.is_char_boundary(boundary) {
            boundary -= 1;
        }
        label.truncate(boundary);
    }
    label
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TestRef;
    use crate::types::FileId;

    fn symbol(name: &str, summary: Option<&str>) -> SymbolRecord {
        SymbolRecord {
            symbol_id: SymbolId::new("a".repeat(64)),
            repo_id: "r".into(),
            rel_path: "src/a.ts".into(),
            file_id: FileId(1),
            kind: SymbolKind::Function,
            name: name.into(),
            range: Range::new(0, 0, 3, 1),
            signature: Some(format!("function {name}()")),
            ast_fingerprint: "f".repeat(64),
            summary: summary.map(String::from),
            invariants: Vec::new(),
            side_effects: Vec::new(),
            exported: true,
            visibility: Visibility::Public,
        }
    }

    #[test]
    fn card_carries_metrics() {
        let record = MetricsRecord {
            symbol_id: SymbolId::new("a".repeat(64)),
            repo_id: "r".into(),
            fan_in: 3,
            fan_out: 2,
            churn_30d: 1,
            test_refs: vec![TestRef {
                rel_path: "tests/a.test.ts".into(),
                line: 4,
            }],
            updated_at: 0,
        };
        let card = SymbolCard::from_records(
            &symbol("f", None),
            Some(&record),
            CardDeps { imports: 1, calls: 2 },
            Rung::Card,
        );
        assert_eq!(card.metrics.fan_in, 3);
        assert_eq!(card.metrics.test_refs, 1);
        assert_eq!(card.deps.calls, 2);
    }

    #[test]
    fn prose_is_cheaper_than_structure() {
        let without = SymbolCard::from_records(
            &symbol("f", None),
            None,
            CardDeps::default(),
            Rung::Card,
        );
        let with = SymbolCard::from_records(
            &symbol("f", Some("Does a thing to the thing.")),
            None,
            CardDeps::default(),
            Rung::Card,
        );
        let base = without.estimated_tokens();
        let extra = with.estimated_tokens() - base;
        // 26 prose chars at 3.5 chars/token is ~8 tokens, far below 26.
        assert!(extra >= 7 && extra <= 9, "prose delta was {extra}");
    }

    #[test]
    fn etag_is_stable_and_content_sensitive() {
        let a = SymbolCard::from_records(&symbol("f", None), None, CardDeps::default(), Rung::Card);
        let b = a.clone();
        assert_eq!(a.etag(), b.etag());

        let c = SymbolCard::from_records(
            &symbol("f", Some("changed")),
            None,
            CardDeps::default(),
            Rung::Card,
        );
        assert_ne!(a.etag(), c.etag());
    }

    #[test]
    fn labels_prefer_names_and_truncate() {
        let id = SymbolId::new("b".repeat(64));
        assert_eq!(display_label(Some("loadConfig"), &id), "loadConfig");

        let anonymous = display_label(None, &id);
        assert!(anonymous.starts_with("sym:bbbbbbbbbbbb"));
        assert!(anonymous.len() <= 40);

        let long_name = "x".repeat(80);
        assert_eq!(display_label(Some(&long_name), &id).len(), 40);

        let unresolved = SymbolId::unresolved("call", "ghost");
        assert_eq!(display_label(None, &unresolved), "unresolved:call:ghost");
    }
}
