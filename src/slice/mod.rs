//! Budget-bounded graph slices.
//!
//! A slice expands entry symbols across the persisted edge graph best-first
//! (score-ordered frontier, explicit visited set since call graphs are
//! cyclic) and admits symbol cards until the card or token budget trips.
//! Truncated slices carry a resume cursor and drop counts.

pub mod card;
pub mod wire;

pub use card::{CardDeps, CardMetrics, CardRef, SymbolCard, display_label};

use crate::error::{EngineError, EngineResult};
use crate::identity;
use crate::store::{EdgeRecord, Store, SymbolRecord};
use crate::types::{Rung, SymbolId, VersionId};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Traversal cap guarding pathological graphs during reachability counting.
const MAX_REACHABLE: usize = 10_000;

/// Frontier entries surfaced on the slice for resumption.
const MAX_FRONTIER_ENTRIES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SliceBudget {
    pub max_cards: usize,
    pub max_estimated_tokens: usize,
}

impl Default for SliceBudget {
    fn default() -> Self {
        Self {
            max_cards: 60,
            max_estimated_tokens: 12_000,
        }
    }
}

/// Input to the slice builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SliceRequest {
    pub repo_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<VersionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_text: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub entry_symbols: Vec<SymbolId>,
    #[serde(default)]
    pub budget: SliceBudget,
}

impl SliceRequest {
    pub fn new(repo_id: impl Into<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            version_id: None,
            task_text: None,
            entry_symbols: Vec::new(),
            budget: SliceBudget::default(),
        }
    }
}

/// An edge between two admitted cards, by card index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SliceEdge {
    pub from_idx: u32,
    pub to_idx: u32,
    pub edge_type: crate::types::EdgeType,
    pub confidence: f32,
}

/// A boundary symbol retained for future resumption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontierEntry {
    pub symbol_id: SymbolId,
    pub score: f32,
    pub why: String,
}

/// How to continue a truncated slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum HowToResume {
    Cursor(SymbolId),
    TokenOffset(u64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Truncation {
    pub truncated: bool,
    pub dropped_cards: u32,
    pub dropped_edges: u32,
    pub how_to_resume: HowToResume,
}

/// A bounded subgraph of symbol cards plus edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slice {
    pub repo_id: String,
    pub version_id: VersionId,
    pub budget: SliceBudget,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub start_symbols: Vec<SymbolId>,
    /// Symbol id -> card position, for O(1) lookups on the consumer side.
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub symbol_index: BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub cards: Vec<SymbolCard>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub card_refs: Vec<CardRef>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub edges: Vec<SliceEdge>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub frontier: Vec<FrontierEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncation: Option<Truncation>,
}

/// Builder output: the slice plus its token estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SliceResult {
    pub slice: Slice,
    pub estimated_tokens: usize,
}

struct FrontierItem {
    score: f64,
    symbol_id: SymbolId,
    why: String,
}

impl PartialEq for FrontierItem {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.symbol_id == other.symbol_id
    }
}
impl Eq for FrontierItem {}

impl Ord for FrontierItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher score wins; ties prefer the lower symbol id.
        self.score
            .partial_cmp(&other.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.symbol_id.cmp(&self.symbol_id))
    }
}
impl PartialOrd for FrontierItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Expands entry symbols into budget-bounded slices.
pub struct SliceBuilder {
    store: Store,
    max_entry_candidates: usize,
}

impl SliceBuilder {
    pub fn new(store: Store, max_entry_candidates: usize) -> Self {
        Self {
            store,
            max_entry_candidates: max_entry_candidates.max(1),
        }
    }

    pub fn build(&self, request: &SliceRequest) -> EngineResult<SliceResult> {
        let repo_id = request.repo_id.as_str();
        let version_id = match &request.version_id {
            Some(version) => version.clone(),
            None => self
                .store
                .latest_version(repo_id)?
                .map(|v| v.version_id)
                .ok_or_else(|| EngineError::NoSnapshot {
                    repo_id: repo_id.to_string(),
                    version: VersionId::new("latest"),
                })?,
        };

        let symbols: HashMap<SymbolId, SymbolRecord> = self
            .store
            .symbols_for_repo(repo_id)?
            .into_iter()
            .map(|s| (s.symbol_id.clone(), s))
            .collect();
        let edges = self.store.edges_for_repo(repo_id)?;

        let mut outgoing: HashMap<&SymbolId, Vec<&EdgeRecord>> = HashMap::new();
        let mut incoming: HashMap<&SymbolId, Vec<&EdgeRecord>> = HashMap::new();
        for edge in &edges {
            outgoing.entry(&edge.from_symbol_id).or_default().push(edge);
            incoming.entry(&edge.to_symbol_id).or_default().push(edge);
        }

        let entries = self.entry_symbols(request, &symbols)?;

        // Total reachable set, used for honest drop counts on truncation.
        let reachable = reachable_set(&entries, &outgoing, &incoming, &symbols);

        let mut heap: BinaryHeap<FrontierItem> = entries
            .iter()
            .map(|symbol_id| FrontierItem {
                score: 1.0,
                symbol_id: symbol_id.clone(),
                why: "entry".to_string(),
            })
            .collect();

        let mut visited: HashSet<SymbolId> = HashSet::new();
        let mut cards: Vec<SymbolCard> = Vec::new();
        let mut admitted_order: Vec<SymbolId> = Vec::new();
        let mut estimated_tokens = 0usize;
        let mut truncation: Option<Truncation> = None;
        let mut leftover: Vec<FrontierItem> = Vec::new();

        while let Some(item) = heap.pop() {
            if visited.contains(&item.symbol_id) {
                continue;
            }
            let Some(symbol) = symbols.get(&item.symbol_id) else {
                // Unresolved placeholder or foreign id; never a card.
                continue;
            };

            if cards.len() >= request.budget.max_cards {
                truncation = Some(self.truncate(
                    &item,
                    &visited,
                    &reachable,
                    &edges,
                    cards.len(),
                ));
                leftover.push(item);
                break;
            }

            let deps = dep_counts(&item.symbol_id, &outgoing);
            let metrics = self.store.metrics_for(&item.symbol_id)?;
            let card = SymbolCard::from_records(symbol, metrics.as_ref(), deps, Rung::Card);
            let card_tokens = card.estimated_tokens();
            if estimated_tokens + card_tokens > request.budget.max_estimated_tokens {
                truncation = Some(self.truncate(
                    &item,
                    &visited,
                    &reachable,
                    &edges,
                    cards.len(),
                ));
                leftover.push(item);
                break;
            }

            visited.insert(item.symbol_id.clone());
            estimated_tokens += card_tokens;
            admitted_order.push(item.symbol_id.clone());

            let neighbors = outgoing
                .get(&item.symbol_id)
                .into_iter()
                .flatten()
                .map(|edge| (edge, &edge.to_symbol_id))
                .chain(
                    incoming
                        .get(&item.symbol_id)
                        .into_iter()
                        .flatten()
                        .map(|edge| (edge, &edge.from_symbol_id)),
                );
            for (edge, neighbor) in neighbors {
                if visited.contains(neighbor) || neighbor.is_unresolved() {
                    continue;
                }
                let score =
                    item.score * edge.confidence as f64 * edge.edge_type.slice_weight() as f64;
                heap.push(FrontierItem {
                    score,
                    symbol_id: neighbor.clone(),
                    why: format!("{} from {}", edge.edge_type, card.label()),
                });
            }

            cards.push(card);
        }

        // Index and intra-slice edges.
        let index_of: HashMap<&SymbolId, usize> = admitted_order
            .iter()
            .enumerate()
            .map(|(i, id)| (id, i))
            .collect();
        let symbol_index: BTreeMap<String, usize> = admitted_order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str().to_string(), i))
            .collect();
        let slice_edges: Vec<SliceEdge> = edges
            .iter()
            .filter_map(|edge| {
                let from = *index_of.get(&edge.from_symbol_id)?;
                let to = *index_of.get(&edge.to_symbol_id)?;
                Some(SliceEdge {
                    from_idx: from as u32,
                    to_idx: to as u32,
                    edge_type: edge.edge_type,
                    confidence: edge.confidence,
                })
            })
            .collect();

        let card_refs: Vec<CardRef> = cards
            .iter()
            .map(|card| CardRef {
                symbol_id: card.symbol_id.clone(),
                etag: card.etag(),
                detail_level: card.detail_level,
            })
            .collect();

        // Remaining boundary, deduplicated, best first.
        let mut seen = HashSet::new();
        let mut frontier: Vec<FrontierEntry> = leftover
            .into_iter()
            .chain(heap.into_sorted_vec().into_iter().rev())
            .filter(|item| {
                !visited.contains(&item.symbol_id)
                    && symbols.contains_key(&item.symbol_id)
                    && seen.insert(item.symbol_id.clone())
            })
            .take(MAX_FRONTIER_ENTRIES)
            .map(|item| FrontierEntry {
                symbol_id: item.symbol_id,
                score: item.score as f32,
                why: item.why,
            })
            .collect();
        frontier.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.symbol_id.cmp(&b.symbol_id))
        });

        let slice = Slice {
            repo_id: repo_id.to_string(),
            version_id,
            budget: request.budget,
            start_symbols: entries,
            symbol_index,
            cards,
            card_refs,
            edges: slice_edges,
            frontier,
            truncation,
        };
        Ok(SliceResult {
            slice,
            estimated_tokens,
        })
    }

    fn truncate(
        &self,
        cursor: &FrontierItem,
        visited: &HashSet<SymbolId>,
        reachable: &HashSet<SymbolId>,
        edges: &[EdgeRecord],
        admitted: usize,
    ) -> Truncation {
        let dropped_cards = reachable.len().saturating_sub(admitted) as u32;
        let dropped_edges = edges
            .iter()
            .filter(|edge| {
                let from_in = visited.contains(&edge.from_symbol_id);
                let to_in = visited.contains(&edge.to_symbol_id);
                let from_reachable = reachable.contains(&edge.from_symbol_id);
                let to_reachable = reachable.contains(&edge.to_symbol_id);
                from_reachable && to_reachable && !(from_in && to_in)
            })
            .count() as u32;
        Truncation {
            truncated: true,
            dropped_cards,
            dropped_edges,
            how_to_resume: HowToResume::Cursor(cursor.symbol_id.clone()),
        }
    }

    fn entry_symbols(
        &self,
        request: &SliceRequest,
        symbols: &HashMap<SymbolId, SymbolRecord>,
    ) -> EngineResult<Vec<SymbolId>> {
        if !request.entry_symbols.is_empty() {
            let mut entries: Vec<SymbolId> = request
                .entry_symbols
                .iter()
                .filter(|id| symbols.contains_key(*id))
                .cloned()
                .collect();
            entries.sort();
            entries.dedup();
            if entries.is_empty() {
                return Err(EngineError::NoEntries);
            }
            return Ok(entries);
        }

        let tokens: Vec<String> = request
            .task_text
            .as_deref()
            .unwrap_or("")
            .to_ascii_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() >= 3)
            .map(String::from)
            .collect();
        let matches = self
            .store
            .search_symbols(&request.repo_id, &tokens, self.max_entry_candidates)?;
        let entries: Vec<SymbolId> = matches.into_iter().map(|s| s.symbol_id).collect();
        if entries.is_empty() {
            return Err(EngineError::NoEntries);
        }
        Ok(entries)
    }
}

fn dep_counts(
    symbol_id: &SymbolId,
    outgoing: &HashMap<&SymbolId, Vec<&EdgeRecord>>,
) -> CardDeps {
    let mut deps = CardDeps::default();
    for edge in outgoing.get(symbol_id).into_iter().flatten() {
        match edge.edge_type {
            crate::types::EdgeType::Import => deps.imports += 1,
            crate::types::EdgeType::Call => deps.calls += 1,
            crate::types::EdgeType::Config => {}
        }
    }
    deps
}

/// Symbols reachable from the entries along either edge direction.
fn reachable_set(
    entries: &[SymbolId],
    outgoing: &HashMap<&SymbolId, Vec<&EdgeRecord>>,
    incoming: &HashMap<&SymbolId, Vec<&EdgeRecord>>,
    symbols: &HashMap<SymbolId, SymbolRecord>,
) -> HashSet<SymbolId> {
    let mut reachable: HashSet<SymbolId> = HashSet::new();
    let mut queue: VecDeque<SymbolId> = entries
        .iter()
        .filter(|id| symbols.contains_key(*id))
        .cloned()
        .collect();
    for id in &queue {
        reachable.insert(id.clone());
    }
    while let Some(current) = queue.pop_front() {
        if reachable.len() >= MAX_REACHABLE {
            break;
        }
        let neighbors = outgoing
            .get(&current)
            .into_iter()
            .flatten()
            .map(|e| &e.to_symbol_id)
            .chain(
                incoming
                    .get(&current)
                    .into_iter()
                    .flatten()
                    .map(|e| &e.from_symbol_id),
            );
        for neighbor in neighbors {
            if neighbor.is_unresolved() || !symbols.contains_key(neighbor) {
                continue;
            }
            if reachable.insert(neighbor.clone()) {
                queue.push_back(neighbor.clone());
            }
        }
    }
    reachable
}

/// Keyed slice cache, invalidated per repo when a new version commits.
pub struct SliceCache {
    entries: DashMap<String, (String, Arc<SliceResult>)>,
    capacity: usize,
}

impl SliceCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// `SHA256(repoId:versionId:taskText:sortedEntrySymbols:budget)`.
    pub fn key(request: &SliceRequest, version_id: &VersionId) -> String {
        let mut entry_ids: Vec<&str> = request
            .entry_symbols
            .iter()
            .map(|id| id.as_str())
            .collect();
        entry_ids.sort_unstable();
        let raw = format!(
            "{}:{}:{}:{}:{}:{}",
            request.repo_id,
            version_id,
            request.task_text.as_deref().unwrap_or(""),
            entry_ids.join(","),
            request.budget.max_cards,
            request.budget.max_estimated_tokens,
        );
        identity::hash_content(raw.as_bytes())
    }

    pub fn get(&self, key: &str) -> Option<Arc<SliceResult>> {
        self.entries.get(key).map(|entry| Arc::clone(&entry.1))
    }

    pub fn put(&self, key: String, repo_id: &str, result: Arc<SliceResult>) {
        if self.entries.len() >= self.capacity {
            // Over capacity: drop an arbitrary entry; correctness comes from
            // version invalidation, not recency.
            if let Some(victim) = self.entries.iter().next().map(|e| e.key().clone()) {
                self.entries.remove(&victim);
            }
        }
        self.entries.insert(key, (repo_id.to_string(), result));
    }

    pub fn invalidate_repo(&self, repo_id: &str) {
        self.entries.retain(|_, (repo, _)| repo != repo_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
