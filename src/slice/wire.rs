//! Compact wire encoding for slices (version 1).
//!
//! Field names are abbreviated per the negotiated table; empty arrays are
//! omitted entirely. `decode(encode(slice)) == slice` holds on the set of
//! non-empty fields. The standard format is plain serde with full names.

use crate::error::{EngineError, EngineResult};
use crate::types::{EdgeType, Range, Rung, SymbolId, SymbolKind, VersionId, Visibility};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

use super::card::{CardDeps, CardMetrics, CardRef, SymbolCard};
use super::{
    FrontierEntry, HowToResume, Slice, SliceBudget, SliceEdge, Truncation,
};

/// Only compact version understood by this codec.
pub const WIRE_FORMAT_VERSION: u32 = 1;

fn err(reason: impl Into<String>) -> EngineError {
    EngineError::General(format!("compact wire: {}", reason.into()))
}

/// Encode a slice into compact wire form.
pub fn encode_compact(slice: &Slice) -> Value {
    let mut out = Map::new();
    out.insert("rid".into(), json!(slice.repo_id));
    out.insert("vid".into(), json!(slice.version_id.as_str()));
    out.insert(
        "b".into(),
        json!({"mc": slice.budget.max_cards, "mt": slice.budget.max_estimated_tokens}),
    );
    if !slice.start_symbols.is_empty() {
        out.insert(
            "ss".into(),
            Value::Array(
                slice
                    .start_symbols
                    .iter()
                    .map(|id| json!(id.as_str()))
                    .collect(),
            ),
        );
    }
    if !slice.symbol_index.is_empty() {
        let mut index = Map::new();
        for (sid, position) in &slice.symbol_index {
            index.insert(sid.clone(), json!(position));
        }
        out.insert("si".into(), Value::Object(index));
    }
    if !slice.cards.is_empty() {
        out.insert(
            "c".into(),
            Value::Array(slice.cards.iter().map(encode_card).collect()),
        );
    }
    if !slice.card_refs.is_empty() {
        out.insert(
            "cr".into(),
            Value::Array(
                slice
                    .card_refs
                    .iter()
                    .map(|r| {
                        json!({
                            "sid": r.symbol_id.as_str(),
                            "e": r.etag,
                            "dl": r.detail_level.as_str(),
                        })
                    })
                    .collect(),
            ),
        );
    }
    if !slice.edges.is_empty() {
        out.insert(
            "e".into(),
            Value::Array(
                slice
                    .edges
                    .iter()
                    .map(|edge| {
                        json!([
                            edge.from_idx,
                            edge.to_idx,
                            edge.edge_type.as_str(),
                            (edge.confidence * 100.0).round() as i64,
                        ])
                    })
                    .collect(),
            ),
        );
    }
    if !slice.frontier.is_empty() {
        out.insert(
            "f".into(),
            Value::Array(
                slice
                    .frontier
                    .iter()
                    .map(|entry| {
                        json!({
                            "sid": entry.symbol_id.as_str(),
                            "s": entry.score,
                            "w": entry.why,
                        })
                    })
                    .collect(),
            ),
        );
    }
    if let Some(truncation) = &slice.truncation {
        let (resume_type, resume_value) = match &truncation.how_to_resume {
            HowToResume::Cursor(id) => ("cursor", json!(id.as_str())),
            HowToResume::TokenOffset(offset) => ("tokenOffset", json!(offset)),
        };
        out.insert(
            "t".into(),
            json!({
                "tr": truncation.truncated,
                "dc": truncation.dropped_cards,
                "de": truncation.dropped_edges,
                "res": {"t": resume_type, "v": resume_value},
            }),
        );
    }
    Value::Object(out)
}

fn encode_card(card: &SymbolCard) -> Value {
    let mut out = Map::new();
    out.insert("sid".into(), json!(card.symbol_id.as_str()));
    out.insert("f".into(), json!(card.file));
    out.insert("r".into(), json!(card.range.to_array()));
    out.insert("k".into(), json!(card.kind.as_str()));
    out.insert("n".into(), json!(card.name));
    out.insert("x".into(), json!(card.exported));
    out.insert("v".into(), json!(card.visibility.as_str()));
    if let Some(summary) = &card.summary {
        out.insert("sum".into(), json!(summary));
    }
    if !card.invariants.is_empty() {
        out.insert("inv".into(), json!(card.invariants));
    }
    if !card.side_effects.is_empty() {
        out.insert("se".into(), json!(card.side_effects));
    }
    out.insert(
        "d".into(),
        json!({"i": card.deps.imports, "c": card.deps.calls}),
    );
    out.insert(
        "m".into(),
        json!({
            "fi": card.metrics.fan_in,
            "fo": card.metrics.fan_out,
            "ch": card.metrics.churn_30d,
            "t": card.metrics.test_refs,
        }),
    );
    out.insert("dl".into(), json!(card.detail_level.as_str()));
    out.insert("af".into(), json!(card.ast_fingerprint));
    Value::Object(out)
}

fn get_str(value: &Value, key: &str) -> EngineResult<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| err(format!("missing string field '{key}'")))
}

fn get_u64(value: &Value, key: &str) -> EngineResult<u64> {
    value
        .get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| err(format!("missing numeric field '{key}'")))
}

fn get_bool(value: &Value, key: &str) -> EngineResult<bool> {
    value
        .get(key)
        .and_then(Value::as_bool)
        .ok_or_else(|| err(format!("missing boolean field '{key}'")))
}

fn opt_array<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value.get(key).and_then(Value::as_array).map_or(&[], Vec::as_slice)
}

fn string_list(value: &Value, key: &str) -> Vec<String> {
    opt_array(value, key)
        .iter()
        .filter_map(Value::as_str)
        .map(String::from)
        .collect()
}

/// Decode the compact wire form back into a slice.
pub fn decode_compact(value: &Value) -> EngineResult<Slice> {
    let budget_value = value.get("b").ok_or_else(|| err("missing budget 'b'"))?;
    let budget = SliceBudget {
        max_cards: get_u64(budget_value, "mc")? as usize,
        max_estimated_tokens: get_u64(budget_value, "mt")? as usize,
    };

    let start_symbols: Vec<SymbolId> = opt_array(value, "ss")
        .iter()
        .filter_map(Value::as_str)
        .map(SymbolId::from)
        .collect();

    let mut symbol_index = BTreeMap::new();
    if let Some(index) = value.get("si").and_then(Value::as_object) {
        for (sid, position) in index {
            let position = position
                .as_u64()
                .ok_or_else(|| err("symbol index position must be numeric"))?;
            symbol_index.insert(sid.clone(), position as usize);
        }
    }

    let cards = opt_array(value, "c")
        .iter()
        .map(decode_card)
        .collect::<EngineResult<Vec<_>>>()?;

    let card_refs = opt_array(value, "cr")
        .iter()
        .map(|entry| {
            Ok(CardRef {
                symbol_id: SymbolId::new(get_str(entry, "sid")?),
                etag: get_str(entry, "e")?,
                detail_level: decode_rung(&get_str(entry, "dl")?)?,
            })
        })
        .collect::<EngineResult<Vec<_>>>()?;

    let edges = opt_array(value, "e")
        .iter()
        .map(|entry| {
            let tuple = entry
                .as_array()
                .filter(|t| t.len() == 4)
                .ok_or_else(|| err("edge tuple must have 4 elements"))?;
            let edge_type = tuple[2]
                .as_str()
                .and_then(EdgeType::parse)
                .ok_or_else(|| err("bad edge type"))?;
            Ok(SliceEdge {
                from_idx: tuple[0].as_u64().ok_or_else(|| err("bad edge index"))? as u32,
                to_idx: tuple[1].as_u64().ok_or_else(|| err("bad edge index"))? as u32,
                edge_type,
                confidence: (tuple[3].as_f64().ok_or_else(|| err("bad confidence"))? / 100.0)
                    as f32,
            })
        })
        .collect::<EngineResult<Vec<_>>>()?;

    let frontier = opt_array(value, "f")
        .iter()
        .map(|entry| {
            Ok(FrontierEntry {
                symbol_id: SymbolId::new(get_str(entry, "sid")?),
                score: entry
                    .get("s")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| err("missing frontier score"))? as f32,
                why: get_str(entry, "w")?,
            })
        })
        .collect::<EngineResult<Vec<_>>>()?;

    let truncation = match value.get("t") {
        None => None,
        Some(t) => {
            let resume = t.get("res").ok_or_else(|| err("missing resume record"))?;
            let resume_type = get_str(resume, "t")?;
            let how_to_resume = match resume_type.as_str() {
                "cursor" => HowToResume::Cursor(SymbolId::new(get_str(resume, "v")?)),
                "tokenOffset" => HowToResume::TokenOffset(get_u64(resume, "v")?),
                other => return Err(err(format!("unknown resume type '{other}'"))),
            };
            Some(Truncation {
                truncated: get_bool(t, "tr")?,
                dropped_cards: get_u64(t, "dc")? as u32,
                dropped_edges: get_u64(t, "de")? as u32,
                how_to_resume,
            })
        }
    };

    Ok(Slice {
        repo_id: get_str(value, "rid")?,
        version_id: VersionId::new(get_str(value, "vid")?),
        budget,
        start_symbols,
        symbol_index,
        cards,
        card_refs,
        edges,
        frontier,
        truncation,
    })
}

fn decode_rung(raw: &str) -> EngineResult<Rung> {
    match raw {
        "card" => Ok(Rung::Card),
        "skeleton" => Ok(Rung::Skeleton),
        "hotPath" => Ok(Rung::HotPath),
        "raw" => Ok(Rung::Raw),
        other => Err(err(format!("unknown detail level '{other}'"))),
    }
}

fn decode_card(value: &Value) -> EngineResult<SymbolCard> {
    let range_values: Vec<u32> = opt_array(value, "r")
        .iter()
        .filter_map(Value::as_u64)
        .map(|v| v as u32)
        .collect();
    if range_values.len() != 4 {
        return Err(err("card range must have 4 elements"));
    }
    let deps_value = value.get("d").ok_or_else(|| err("missing deps 'd'"))?;
    let metrics_value = value.get("m").ok_or_else(|| err("missing metrics 'm'"))?;
    let kind = SymbolKind::parse(&get_str(value, "k")?).ok_or_else(|| err("bad symbol kind"))?;
    let visibility =
        Visibility::parse(&get_str(value, "v")?).ok_or_else(|| err("bad visibility"))?;

    Ok(SymbolCard {
        symbol_id: SymbolId::new(get_str(value, "sid")?),
        file: get_str(value, "f")?,
        range: Range::from_array([
            range_values[0],
            range_values[1],
            range_values[2],
            range_values[3],
        ]),
        kind,
        name: get_str(value, "n")?,
        exported: get_bool(value, "x")?,
        visibility,
        summary: value
            .get("sum")
            .and_then(Value::as_str)
            .map(String::from),
        invariants: string_list(value, "inv"),
        side_effects: string_list(value, "se"),
        deps: CardDeps {
            imports: get_u64(deps_value, "i")? as u32,
            calls: get_u64(deps_value, "c")? as u32,
        },
        metrics: CardMetrics {
            fan_in: get_u64(metrics_value, "fi")? as u32,
            fan_out: get_u64(metrics_value, "fo")? as u32,
            churn_30d: get_u64(metrics_value, "ch")? as u32,
            test_refs: get_u64(metrics_value, "t")? as u32,
        },
        detail_level: decode_rung(&get_str(value, "dl")?)?,
        ast_fingerprint: get_str(value, "af")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_card(name: &str) -> SymbolCard {
        SymbolCard {
            symbol_id: SymbolId::new(format!("{name}-id")),
            file: "src/a.ts".into(),
            range: Range::new(1, 0, 9, 1),
            kind: SymbolKind::Function,
            name: name.into(),
            exported: true,
            visibility: Visibility::Public,
            summary: Some("Does things.".into()),
            invariants: vec!["input non-empty".into()],
            side_effects: Vec::new(),
            deps: CardDeps { imports: 1, calls: 2 },
            metrics: CardMetrics {
                fan_in: 3,
                fan_out: 2,
                churn_30d: 1,
                test_refs: 4,
            },
            detail_level: Rung::Card,
            ast_fingerprint: "af-1".into(),
        }
    }

    fn sample_slice() -> Slice {
        let cards = vec![sample_card("alpha"), sample_card("beta")];
        let symbol_index = cards
            .iter()
            .enumerate()
            .map(|(i, c)| (c.symbol_id.as_str().to_string(), i))
            .collect();
        Slice {
            repo_id: "demo".into(),
            version_id: VersionId::new("v-1"),
            budget: SliceBudget {
                max_cards: 2,
                max_estimated_tokens: 5000,
            },
            start_symbols: vec![SymbolId::new("alpha-id")],
            symbol_index,
            card_refs: cards
                .iter()
                .map(|c| CardRef {
                    symbol_id: c.symbol_id.clone(),
                    etag: c.etag(),
                    detail_level: c.detail_level,
                })
                .collect(),
            cards,
            edges: vec![SliceEdge {
                from_idx: 0,
                to_idx: 1,
                edge_type: EdgeType::Call,
                confidence: 0.92,
            }],
            frontier: vec![FrontierEntry {
                symbol_id: SymbolId::new("gamma-id"),
                score: 0.5,
                why: "call from alpha".into(),
            }],
            truncation: Some(Truncation {
                truncated: true,
                dropped_cards: 3,
                dropped_edges: 2,
                how_to_resume: HowToResume::Cursor(SymbolId::new("gamma-id")),
            }),
        }
    }

    #[test]
    fn round_trip_preserves_everything() {
        let slice = sample_slice();
        let encoded = encode_compact(&slice);
        let decoded = decode_compact(&encoded).unwrap();
        assert_eq!(decoded, slice);
    }

    #[test]
    fn compact_keys_are_abbreviated() {
        let encoded = encode_compact(&sample_slice());
        assert!(encoded.get("rid").is_some());
        assert!(encoded.get("vid").is_some());
        assert!(encoded.get("repoId").is_none());
        let card = &encoded["c"][0];
        assert!(card.get("sid").is_some());
        assert!(card.get("symbolId").is_none());
        assert_eq!(card["m"]["fi"], 3);
        // Edge tuples carry confidence x100.
        assert_eq!(encoded["e"][0][3], 92);
    }

    #[test]
    fn empty_arrays_are_omitted() {
        let mut slice = sample_slice();
        slice.frontier.clear();
        slice.edges.clear();
        slice.truncation = None;
        let encoded = encode_compact(&slice);
        assert!(encoded.get("f").is_none());
        assert!(encoded.get("e").is_none());
        assert!(encoded.get("t").is_none());
        // Cards with empty side effects omit the field.
        assert!(encoded["c"][0].get("se").is_none());

        let decoded = decode_compact(&encoded).unwrap();
        assert!(decoded.frontier.is_empty());
        assert!(decoded.edges.is_empty());
        assert!(decoded.truncation.is_none());
    }

    #[test]
    fn token_offset_resume_round_trips() {
        let mut slice = sample_slice();
        slice.truncation = Some(Truncation {
            truncated: true,
            dropped_cards: 1,
            dropped_edges: 0,
            how_to_resume: HowToResume::TokenOffset(4096),
        });
        let decoded = decode_compact(&encode_compact(&slice)).unwrap();
        assert_eq!(decoded, slice);
    }

    #[test]
    fn malformed_input_is_a_structured_error() {
        assert!(decode_compact(&json!({})).is_err());
        assert!(decode_compact(&json!({"rid": "r"})).is_err());
        let bad_edge = json!({
            "rid": "r", "vid": "v", "b": {"mc": 1, "mt": 10},
            "e": [[0, 1, "call"]]
        });
        assert!(decode_compact(&bad_edge).is_err());
    }

    #[test]
    fn standard_format_uses_full_names() {
        let slice = sample_slice();
        let standard = serde_json::to_value(&slice).unwrap();
        assert!(standard.get("repoId").is_some());
        assert!(standard.get("versionId").is_some());
        assert!(standard["cards"][0].get("symbolId").is_some());
    }
}
