//! Prefetch prediction from tool-call traces.
//!
//! A first-order bigram model with add-1 smoothing, trained per task type
//! over a sliding window of trace events. Predictions below the confidence
//! threshold fall back to a deterministic next-rung table.

use crate::config::PrefetchConfig;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

/// One observed tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolTraceEvent {
    pub repo_id: String,
    pub task_type: String,
    pub tool: String,
}

/// Prediction with its smoothed probability.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub tool: String,
    pub confidence: f32,
}

/// Frequency bigram over tool sequences, bucketed by task type.
#[derive(Debug, Default)]
pub struct PrefetchModel {
    /// task type -> current tool -> next tool -> count
    transitions: HashMap<String, HashMap<String, HashMap<String, u32>>>,
    vocabulary: HashSet<String>,
    samples: usize,
}

impl PrefetchModel {
    /// Train from a window of events. Consecutive events within the same
    /// (repo, task type) form a sequence.
    pub fn train(events: &[ToolTraceEvent]) -> Self {
        let mut model = Self::default();
        for window in events.windows(2) {
            let (prev, next) = (&window[0], &window[1]);
            model.vocabulary.insert(prev.tool.clone());
            model.vocabulary.insert(next.tool.clone());
            if prev.repo_id != next.repo_id || prev.task_type != next.task_type {
                continue;
            }
            *model
                .transitions
                .entry(next.task_type.clone())
                .or_default()
                .entry(prev.tool.clone())
                .or_default()
                .entry(next.tool.clone())
                .or_default() += 1;
            model.samples += 1;
        }
        model
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Argmax successor of `current` for the task type, add-1 smoothed.
    ///
    /// `previous` participates in the signature for call-site symmetry but a
    /// first-order model conditions on `current` alone.
    pub fn predict_next_tool(
        &self,
        task_type: &str,
        _previous: Option<&str>,
        current: &str,
    ) -> Option<Prediction> {
        let successors = self.transitions.get(task_type)?.get(current)?;
        if successors.is_empty() || self.vocabulary.is_empty() {
            return None;
        }
        let total: u32 = successors.values().sum();
        let vocab = self.vocabulary.len() as f32;

        let (tool, count) = successors
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))?;
        let confidence = (*count as f32 + 1.0) / (total as f32 + vocab);
        Some(Prediction {
            tool: tool.clone(),
            confidence,
        })
    }
}

/// Deterministic fallback: the next rung up for each known tool.
pub fn deterministic_next_tool(tool: &str) -> Option<&'static str> {
    match tool {
        "searchSymbols" | "getSlice" => Some("getCard"),
        "getCard" => Some("getSkeleton"),
        "getSkeleton" => Some("getHotPath"),
        "getHotPath" => Some("getRaw"),
        _ => None,
    }
}

/// Owns the trace window and retrains the model on an interval.
pub struct Prefetcher {
    config: PrefetchConfig,
    events: Mutex<VecDeque<ToolTraceEvent>>,
    model: RwLock<PrefetchModel>,
    last_trained: Mutex<Option<Instant>>,
}

impl Prefetcher {
    pub fn new(config: PrefetchConfig) -> Self {
        Self {
            config,
            events: Mutex::new(VecDeque::new()),
            model: RwLock::new(PrefetchModel::default()),
            last_trained: Mutex::new(None),
        }
    }

    /// Record a tool call into the sliding window.
    pub fn record(&self, event: ToolTraceEvent) {
        let mut events = self.events.lock();
        events.push_back(event);
        while events.len() > self.config.trace_window {
            events.pop_front();
        }
    }

    /// Retrain when the interval elapsed (or never trained yet).
    pub fn maybe_retrain(&self) {
        let mut last = self.last_trained.lock();
        let due = match *last {
            None => true,
            Some(at) => at.elapsed().as_millis() as u64 >= self.config.retrain_interval_ms,
        };
        if !due {
            return;
        }
        let events: Vec<ToolTraceEvent> = self.events.lock().iter().cloned().collect();
        *self.model.write() = PrefetchModel::train(&events);
        *last = Some(Instant::now());
    }

    /// Gated suggestion for what to warm next.
    ///
    /// Returns nothing when disabled or under-sampled; falls back to the
    /// deterministic rung table when the model's confidence is below the
    /// threshold and fallback is enabled.
    pub fn suggest(
        &self,
        task_type: &str,
        previous: Option<&str>,
        current: &str,
    ) -> Option<String> {
        if !self.config.enabled {
            return None;
        }
        self.maybe_retrain();
        let model = self.model.read();
        if model.samples() < self.config.min_samples_for_prediction {
            return self.fallback(current);
        }
        match model.predict_next_tool(task_type, previous, current) {
            Some(prediction) if prediction.confidence >= self.config.confidence_threshold => {
                Some(prediction.tool)
            }
            _ => self.fallback(current),
        }
    }

    fn fallback(&self, current: &str) -> Option<String> {
        if self.config.fallback_to_deterministic {
            deterministic_next_tool(current).map(String::from)
        } else {
            None
        }
    }
}
