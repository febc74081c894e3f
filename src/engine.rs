//! Process-wide engine context.
//!
//! Owns the store handle, adapter registry, parser pool, limiter pair,
//! caches, policy engine, prefetcher, and audit log, and exposes the
//! high-level operations. Nothing here is a global: callers construct an
//! `Engine` from settings and pass it around explicitly.

use crate::audit::AuditLog;
use crate::cache::LruCardCache;
use crate::config::Settings;
use crate::error::{EngineError, EngineResult};
use crate::indexing::{Delta, IndexOptions, IndexStats, Indexer, MetricsCache, compute_delta};
use crate::limiter::IoLimiter;
use crate::parsing::registry::AdapterRegistry;
use crate::policy::{PolicyEngine, RequestContext};
use crate::pool::ParserPool;
use crate::prefetch::{Prefetcher, ToolTraceEvent};
use crate::slice::card::{CardDeps, SymbolCard};
use crate::slice::{SliceBuilder, SliceCache, SliceRequest, SliceResult};
use crate::store::Store;
use crate::summary::SummaryProvider;
use crate::types::{EdgeType, Rung, SymbolId, VersionId};
use serde_json::json;
use std::sync::Arc;

pub struct Engine {
    settings: Settings,
    store: Store,
    registry: Arc<AdapterRegistry>,
    pool: Arc<ParserPool>,
    file_io: IoLimiter,
    db_io: IoLimiter,
    slice_builder: SliceBuilder,
    slice_cache: SliceCache,
    card_cache: LruCardCache,
    metrics_cache: MetricsCache,
    policy: PolicyEngine,
    prefetcher: Prefetcher,
    audit: AuditLog,
    summary_provider: Option<Arc<dyn SummaryProvider>>,
}

impl Engine {
    /// Open the store at the configured path and assemble the context.
    pub fn new(settings: Settings) -> EngineResult<Self> {
        let store = Store::open(&settings.db_path)?;
        Ok(Self::with_store(settings, store))
    }

    /// Assemble around an existing store (tests use in-memory stores).
    pub fn with_store(settings: Settings, store: Store) -> Self {
        let registry = Arc::new(AdapterRegistry::with_builtin_languages());
        let pool = Arc::new(ParserPool::new(
            settings.parser_pool_size(),
            Arc::clone(&registry),
        ));
        let slice_builder =
            SliceBuilder::new(store.clone(), settings.slice.max_entry_candidates);
        Self {
            file_io: IoLimiter::new(settings.indexing.file_io_limit),
            db_io: IoLimiter::new(settings.indexing.db_io_limit),
            slice_cache: SliceCache::new(settings.slice.cache_entries),
            card_cache: LruCardCache::new(
                settings.slice.card_cache_entries,
                settings.slice.card_cache_bytes,
            ),
            metrics_cache: MetricsCache::new(),
            policy: PolicyEngine::with_default_rules(),
            prefetcher: Prefetcher::new(settings.prefetch.clone()),
            audit: AuditLog::new(store.clone()),
            slice_builder,
            registry,
            pool,
            store,
            settings,
            summary_provider: None,
        }
    }

    pub fn set_summary_provider(&mut self, provider: Arc<dyn SummaryProvider>) {
        self.summary_provider = Some(provider);
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Index one configured repo and invalidate derived caches.
    pub fn index_repo(&self, repo_id: &str, force: bool) -> EngineResult<IndexStats> {
        let repo = self
            .settings
            .repo(repo_id)
            .ok_or_else(|| EngineError::UnknownRepo {
                repo_id: repo_id.to_string(),
            })?
            .clone();

        let previous_version = self.store.latest_version(repo_id)?;

        let indexer = Indexer::new(
            self.store.clone(),
            Arc::clone(&self.pool),
            Arc::clone(&self.registry),
            self.file_io.clone(),
            self.db_io.clone(),
            self.summary_provider.clone(),
            self.settings.indexing.clone(),
        );
        let reason = if force { "force-index" } else { "index" };
        let stats = indexer.index_repo(
            &repo,
            &IndexOptions {
                force,
                reason: reason.to_string(),
            },
        )?;

        self.slice_cache.invalidate_repo(repo_id);
        self.metrics_cache.invalidate_repo(repo_id);
        if let Some(previous) = previous_version {
            self.card_cache.invalidate_version(previous.version_id.as_str());
        }
        Ok(stats)
    }

    /// Index every configured repo; per-repo failures do not stop the rest.
    pub fn index_all(&self, force: bool) -> Vec<(String, EngineResult<IndexStats>)> {
        self.settings
            .repos
            .iter()
            .map(|repo| (repo.repo_id.clone(), self.index_repo(&repo.repo_id, force)))
            .collect()
    }

    /// Build (or serve from cache) a policy-gated slice.
    pub fn build_slice(&self, request: &SliceRequest) -> EngineResult<Arc<SliceResult>> {
        let policy_config = self.settings.policy_for(&request.repo_id);
        let context = RequestContext {
            request_type: "getSlice".into(),
            repo_id: request.repo_id.clone(),
            budget: Some(request.budget),
            ..RequestContext::default()
        };
        let decision = self.policy.evaluate(&context, policy_config);
        self.audit
            .record_policy_decision("getSlice", Some(&request.repo_id), None, &decision);
        if let Some(error) = decision.to_error() {
            return Err(error);
        }

        let version_id = match &request.version_id {
            Some(version) => version.clone(),
            None => self
                .store
                .latest_version(&request.repo_id)?
                .map(|v| v.version_id)
                .ok_or_else(|| EngineError::NoSnapshot {
                    repo_id: request.repo_id.clone(),
                    version: VersionId::new("latest"),
                })?,
        };

        let key = SliceCache::key(request, &version_id);
        if let Some(cached) = self.slice_cache.get(&key) {
            tracing::debug!(target: "slice", "cache hit for {}", request.repo_id);
            return Ok(cached);
        }

        let result = Arc::new(self.slice_builder.build(request)?);
        self.slice_cache
            .put(key, &request.repo_id, Arc::clone(&result));
        self.audit.record_tool_call(
            "getSlice",
            Some(&request.repo_id),
            None,
            json!({
                "cards": result.slice.cards.len(),
                "estimatedTokens": result.estimated_tokens,
                "truncated": result.slice.truncation.is_some(),
            }),
        );
        Ok(result)
    }

    /// Policy-gated card lookup through the LRU card cache.
    pub fn symbol_card(&self, repo_id: &str, symbol_id: &SymbolId) -> EngineResult<SymbolCard> {
        let policy_config = self.settings.policy_for(repo_id);
        let context = RequestContext {
            request_type: "getCard".into(),
            repo_id: repo_id.to_string(),
            symbol_id: Some(symbol_id.clone()),
            ..RequestContext::default()
        };
        let decision = self.policy.evaluate(&context, policy_config);
        self.audit
            .record_policy_decision("getCard", Some(repo_id), Some(symbol_id.as_str()), &decision);
        if let Some(error) = decision.to_error() {
            return Err(error);
        }

        let version = self
            .store
            .latest_version(repo_id)?
            .map(|v| v.version_id)
            .ok_or_else(|| EngineError::NoSnapshot {
                repo_id: repo_id.to_string(),
                version: VersionId::new("latest"),
            })?;

        let key = LruCardCache::key(
            repo_id,
            version.as_str(),
            symbol_id.as_str(),
            Rung::Card.as_str(),
        );
        if let Some(cached) = self.card_cache.get(&key) {
            if let Ok(card) = serde_json::from_str::<SymbolCard>(&cached) {
                return Ok(card);
            }
        }

        let symbol = self
            .store
            .symbol(symbol_id)?
            .ok_or_else(|| EngineError::General(format!("unknown symbol '{symbol_id}'")))?;
        let mut deps = CardDeps::default();
        for edge in self.store.edges_for_repo(repo_id)? {
            if &edge.from_symbol_id == symbol_id {
                match edge.edge_type {
                    EdgeType::Import => deps.imports += 1,
                    EdgeType::Call => deps.calls += 1,
                    EdgeType::Config => {}
                }
            }
        }
        let metrics = self.store.metrics_for(symbol_id)?;
        let card = SymbolCard::from_records(&symbol, metrics.as_ref(), deps, Rung::Card);
        if let Ok(serialized) = serde_json::to_string(&card) {
            self.card_cache.set(key, serialized);
        }
        Ok(card)
    }

    /// Delta between two committed versions.
    pub fn delta(
        &self,
        repo_id: &str,
        from_version: &VersionId,
        to_version: &VersionId,
    ) -> EngineResult<Delta> {
        let delta = compute_delta(&self.store, repo_id, from_version, to_version)?;
        self.audit.record_tool_call(
            "getDelta",
            Some(repo_id),
            None,
            json!({
                "from": from_version.as_str(),
                "to": to_version.as_str(),
                "added": delta.added.len(),
                "removed": delta.removed.len(),
                "modified": delta.modified.len(),
            }),
        );
        Ok(delta)
    }

    /// Observe a tool call and return the artefact worth prefetching next.
    pub fn observe_tool_call(
        &self,
        repo_id: &str,
        task_type: &str,
        previous_tool: Option<&str>,
        tool: &str,
    ) -> Option<String> {
        self.prefetcher.record(ToolTraceEvent {
            repo_id: repo_id.to_string(),
            task_type: task_type.to_string(),
            tool: tool.to_string(),
        });
        self.prefetcher.suggest(task_type, previous_tool, tool)
    }

    pub fn card_cache(&self) -> &LruCardCache {
        &self.card_cache
    }

    pub fn slice_cache(&self) -> &SliceCache {
        &self.slice_cache
    }

    pub fn metrics_cache(&self) -> &MetricsCache {
        &self.metrics_cache
    }

    /// Teardown: stop accepting parse work and let in-flight jobs finish.
    pub fn shutdown(&mut self) {
        self.pool.clear_queue("engine shutting down");
        self.pool.drain();
        // The pool joins its workers when the last handle drops.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepoConfig;
    use crate::slice::SliceBudget;
    use std::fs;
    use tempfile::TempDir;

    fn engine_with_repo(temp: &TempDir) -> Engine {
        let mut settings = Settings::default();
        settings.repos.push(RepoConfig::new("demo", temp.path()));
        Engine::with_store(settings, Store::in_memory().unwrap())
    }

    fn write_repo(temp: &TempDir) {
        fs::create_dir_all(temp.path().join("src")).unwrap();
        fs::write(
            temp.path().join("src/util.ts"),
            "export function helper() { return 1; }\n",
        )
        .unwrap();
        fs::write(
            temp.path().join("src/main.ts"),
            "import { helper } from \"./util\";\nexport function run() { return helper(); }\n",
        )
        .unwrap();
    }

    #[test]
    fn end_to_end_index_and_slice() {
        let temp = TempDir::new().unwrap();
        write_repo(&temp);
        let engine = engine_with_repo(&temp);

        let stats = engine.index_repo("demo", false).unwrap();
        assert_eq!(stats.files_parsed, 2);

        let mut request = SliceRequest::new("demo");
        request.task_text = Some("helper".into());
        let result = engine.build_slice(&request).unwrap();
        assert!(!result.slice.cards.is_empty());

        // Second identical request hits the cache (same Arc).
        let again = engine.build_slice(&request).unwrap();
        assert!(Arc::ptr_eq(&result, &again));
    }

    #[test]
    fn reindex_invalidates_slice_cache() {
        let temp = TempDir::new().unwrap();
        write_repo(&temp);
        let engine = engine_with_repo(&temp);
        engine.index_repo("demo", false).unwrap();

        let mut request = SliceRequest::new("demo");
        request.task_text = Some("helper".into());
        engine.build_slice(&request).unwrap();
        assert!(!engine.slice_cache().is_empty());

        engine.index_repo("demo", true).unwrap();
        assert!(engine.slice_cache().is_empty());
    }

    #[test]
    fn oversized_budget_is_denied_by_policy() {
        let temp = TempDir::new().unwrap();
        write_repo(&temp);
        let engine = engine_with_repo(&temp);
        engine.index_repo("demo", false).unwrap();

        let mut request = SliceRequest::new("demo");
        request.task_text = Some("helper".into());
        request.budget = SliceBudget {
            max_cards: 100,
            max_estimated_tokens: 50_000,
        };
        match engine.build_slice(&request) {
            Err(EngineError::Policy { .. }) => {}
            other => panic!("expected policy denial, got {other:?}"),
        }

        // The denial is on the audit trail.
        let trail = engine.audit().trail(Some("demo"), Some(5)).unwrap();
        assert!(trail.iter().any(|e| e.decision == "deny"));
    }

    #[test]
    fn card_lookup_uses_lru_cache() {
        let temp = TempDir::new().unwrap();
        write_repo(&temp);
        let engine = engine_with_repo(&temp);
        engine.index_repo("demo", false).unwrap();

        let symbols = engine.store().symbols_for_repo("demo").unwrap();
        let helper = symbols.iter().find(|s| s.name == "helper").unwrap();

        let card = engine.symbol_card("demo", &helper.symbol_id).unwrap();
        assert_eq!(card.name, "helper");
        let misses = engine.card_cache().miss_count();
        let _ = engine.symbol_card("demo", &helper.symbol_id).unwrap();
        assert_eq!(engine.card_cache().miss_count(), misses);
        assert!(engine.card_cache().hit_count() >= 1);
    }

    #[test]
    fn unknown_repo_is_an_error() {
        let temp = TempDir::new().unwrap();
        let engine = engine_with_repo(&temp);
        match engine.index_repo("ghost", false) {
            Err(EngineError::UnknownRepo { repo_id }) => assert_eq!(repo_id, "ghost"),
            other => panic!("expected UnknownRepo, got {other:?}"),
        }
    }
}
