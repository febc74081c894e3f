//! Two-pass index orchestration.
//!
//! Pass 1 runs per file in parallel: read, hash, skip-if-unchanged, parse
//! through the worker pool, persist extraction in one transaction per file.
//! Pass 2 runs once per repo after pass 1 completes: build the name maps
//! from persisted state, resolve every extracted call, persist edges. The
//! run ends with an immutable version commit (snapshots, metrics, audit).
//!
//! Per-file parse failures are counted and logged; a storage failure aborts
//! the run and no version is committed.

use crate::config::{IndexingConfig, RepoConfig};
use crate::error::{EngineError, EngineResult};
use crate::identity;
use crate::limiter::IoLimiter;
use crate::parsing::adapter::{CallSite, ImportKind, LanguageAdapter, ParsedFile};
use crate::parsing::confidence::calibrate_confidence;
use crate::parsing::registry::AdapterRegistry;
use crate::parsing::resolution::ResolutionContext;
use crate::pool::{ParseJob, ParserPool};
use crate::scanner::{self, ScannedFile};
use crate::store::{
    EdgeRecord, ImportRecord, ReferenceRecord, SnapshotRecord, Store, SymbolRecord, VersionRecord,
};
use crate::summary::{SummaryProvider, SummaryRequest, summary_from_doc};
use crate::types::{
    EdgeType, FileId, Range, ResolutionStrategy, SymbolId, SymbolKind, Visibility,
};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use super::{IndexStats, compute_metrics, is_test_file};

/// Per-run options.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Reindex files whose content hash is unchanged.
    pub force: bool,
    /// Recorded on the committed version.
    pub reason: String,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            force: false,
            reason: "index".to_string(),
        }
    }
}

/// What pass 2 needs from one re-parsed file.
struct FileExtraction {
    rel_path: String,
    ext: String,
    module_symbol_id: SymbolId,
    /// (name, id, range) for caller attribution.
    symbols: Vec<(String, SymbolId, Range)>,
    calls: Vec<CallSite>,
}

/// Orchestrates index runs against one store.
pub struct Indexer {
    store: Store,
    pool: Arc<ParserPool>,
    registry: Arc<AdapterRegistry>,
    file_io: IoLimiter,
    db_io: IoLimiter,
    summary_provider: Option<Arc<dyn SummaryProvider>>,
    indexing: IndexingConfig,
}

impl Indexer {
    pub fn new(
        store: Store,
        pool: Arc<ParserPool>,
        registry: Arc<AdapterRegistry>,
        file_io: IoLimiter,
        db_io: IoLimiter,
        summary_provider: Option<Arc<dyn SummaryProvider>>,
        indexing: IndexingConfig,
    ) -> Self {
        Self {
            store,
            pool,
            registry,
            file_io,
            db_io,
            summary_provider,
            indexing,
        }
    }

    /// Run a full index pass for one repo and commit a version.
    pub fn index_repo(
        &self,
        repo: &RepoConfig,
        options: &IndexOptions,
    ) -> EngineResult<IndexStats> {
        let started = Instant::now();
        let repo_id = repo.repo_id.as_str();
        tracing::info!(target: "indexer", "indexing repo '{repo_id}'");

        let scanned = scanner::scan(&repo.root_path, repo)?;
        let known_hashes = self.db_io.run(|| self.store.file_hashes(repo_id))?;

        // Files that disappeared since the last run.
        let scanned_paths: HashSet<&str> = scanned.iter().map(|f| f.rel_path.as_str()).collect();
        let mut files_removed = 0usize;
        for rel_path in known_hashes.keys() {
            if !scanned_paths.contains(rel_path.as_str()) {
                self.db_io.run(|| self.store.remove_file(repo_id, rel_path))?;
                files_removed += 1;
            }
        }

        let errors = AtomicUsize::new(0);
        let skipped = AtomicUsize::new(0);

        // Pass 1: extract and persist, one transaction per file.
        let extractions: Vec<FileExtraction> = scanned
            .par_iter()
            .map(|file| self.index_file(repo, file, &known_hashes, options, &errors, &skipped))
            .collect::<EngineResult<Vec<Option<FileExtraction>>>>()?
            .into_iter()
            .flatten()
            .collect();

        // Pass 2: resolve calls against the full persisted graph.
        let edges = self.resolve_edges(repo_id, &extractions)?;

        // Version commit: snapshots, then metrics, atomically.
        let now_ms = chrono::Utc::now().timestamp_millis();
        let version = VersionRecord {
            version_id: identity::version_id(repo_id, now_ms, &options.reason),
            repo_id: repo_id.to_string(),
            created_at: now_ms,
            reason: options.reason.clone(),
        };
        let all_symbols = self.db_io.run(|| self.store.symbols_for_repo(repo_id))?;
        let snapshots: Vec<SnapshotRecord> = all_symbols
            .iter()
            .map(|s| SnapshotRecord {
                version_id: version.version_id.clone(),
                symbol_id: s.symbol_id.clone(),
                repo_id: s.repo_id.clone(),
                name: s.name.clone(),
                kind: s.kind,
                rel_path: s.rel_path.clone(),
                ast_fingerprint: s.ast_fingerprint.clone(),
                signature: s.signature.clone(),
                summary: s.summary.clone(),
                invariants: s.invariants.clone(),
                side_effects: s.side_effects.clone(),
            })
            .collect();
        let metrics = compute_metrics(&self.store, repo_id, now_ms)?;
        self.db_io
            .run(|| self.store.commit_version(&version, &snapshots, &metrics))?;

        let stats = IndexStats {
            files_scanned: scanned.len(),
            files_parsed: extractions.len(),
            files_skipped: skipped.load(Ordering::SeqCst),
            files_removed,
            symbols: all_symbols.len(),
            edges,
            errors: errors.load(Ordering::SeqCst),
            duration_ms: started.elapsed().as_millis() as u64,
            version_id: Some(version.version_id.clone()),
        };

        // Audit failures are logged, never propagated.
        let details = serde_json::to_value(&stats).unwrap_or(serde_json::Value::Null);
        if let Err(e) =
            self.store
                .append_audit("index", "committed", Some(repo_id), None, &details)
        {
            tracing::error!(target: "indexer", "audit append failed: {e}");
        }

        tracing::info!(
            target: "indexer",
            "repo '{repo_id}' indexed: {} parsed, {} skipped, {} errors, {} edges in {}ms",
            stats.files_parsed,
            stats.files_skipped,
            stats.errors,
            stats.edges,
            stats.duration_ms
        );
        Ok(stats)
    }

    /// Pass-1 work for one file. `Ok(None)` means skipped or non-fatal error.
    fn index_file(
        &self,
        repo: &RepoConfig,
        file: &ScannedFile,
        known_hashes: &HashMap<String, String>,
        options: &IndexOptions,
        errors: &AtomicUsize,
        skipped: &AtomicUsize,
    ) -> EngineResult<Option<FileExtraction>> {
        let repo_id = repo.repo_id.as_str();
        let rel_path = file.rel_path.as_str();
        let abs_path = repo.root_path.join(rel_path);

        let bytes = match self.file_io.run(|| std::fs::read(&abs_path)) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(target: "indexer", "read failed for {rel_path}: {e}");
                errors.fetch_add(1, Ordering::SeqCst);
                return Ok(None);
            }
        };
        let content_hash = identity::hash_content(&bytes);
        if !options.force && known_hashes.get(rel_path) == Some(&content_hash) {
            skipped.fetch_add(1, Ordering::SeqCst);
            return Ok(None);
        }

        let ext = rel_path
            .rsplit('.')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        if !self.registry.supports(&ext) {
            // Accepted language tag without a bundled adapter.
            skipped.fetch_add(1, Ordering::SeqCst);
            return Ok(None);
        }

        let content = String::from_utf8_lossy(&bytes).into_owned();
        let mut job = ParseJob::new(rel_path, content.clone(), ext.clone());
        job.queue_timeout_ms = self.indexing.queue_timeout_ms;
        job.task_timeout_ms = self.indexing.task_timeout_ms;
        let parsed: ParsedFile = match self.pool.parse(job)?.wait() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(target: "indexer", "parse failed for {rel_path}: {e}");
                errors.fetch_add(1, Ordering::SeqCst);
                return Ok(None);
            }
        };

        let language = language_for_ext(&ext);
        let line_count = content.lines().count() as u32;

        // Every file gets a module-level symbol; top-level calls and import
        // edges attach to it. Its fingerprint is the content hash, so it
        // changes exactly when the file does.
        let module_name = rel_path
            .rsplit('/')
            .next()
            .and_then(|f| f.split('.').next())
            .unwrap_or(rel_path)
            .to_string();
        let module_symbol_id = identity::symbol_id(
            repo_id,
            rel_path,
            SymbolKind::Module,
            &module_name,
            &content_hash,
        );

        let mut records: Vec<SymbolRecord> = Vec::with_capacity(parsed.symbols.len() + 1);
        records.push(SymbolRecord {
            symbol_id: module_symbol_id.clone(),
            repo_id: repo_id.to_string(),
            rel_path: rel_path.to_string(),
            file_id: FileId(0),
            kind: SymbolKind::Module,
            name: module_name.clone(),
            range: Range::new(0, 0, line_count, 0),
            signature: None,
            ast_fingerprint: content_hash.clone(),
            summary: None,
            invariants: Vec::new(),
            side_effects: Vec::new(),
            exported: true,
            visibility: Visibility::Public,
        });

        for symbol in &parsed.symbols {
            let symbol_id = identity::symbol_id(
                repo_id,
                rel_path,
                symbol.kind,
                &symbol.name,
                &symbol.ast_fingerprint,
            );
            let summary = self.summarize(repo_id, rel_path, symbol);
            records.push(SymbolRecord {
                symbol_id,
                repo_id: repo_id.to_string(),
                rel_path: rel_path.to_string(),
                file_id: FileId(0),
                kind: symbol.kind,
                name: symbol.name.clone(),
                range: symbol.range,
                signature: symbol.signature.clone(),
                ast_fingerprint: symbol.ast_fingerprint.clone(),
                summary,
                invariants: Vec::new(),
                side_effects: Vec::new(),
                exported: symbol.exported,
                visibility: symbol.visibility,
            });
        }

        let imports: Vec<ImportRecord> = parsed
            .imports
            .iter()
            .map(|import| {
                let (kind, name, alias) = match &import.kind {
                    ImportKind::Named { name, alias } => {
                        ("named", Some(name.clone()), alias.clone())
                    }
                    ImportKind::Namespace { alias } => ("namespace", None, Some(alias.clone())),
                    ImportKind::Bare => ("bare", None, None),
                };
                ImportRecord {
                    repo_id: repo_id.to_string(),
                    file_id: FileId(0),
                    rel_path: rel_path.to_string(),
                    module_path: import.module_path.clone(),
                    kind: kind.to_string(),
                    name,
                    alias,
                    line_number: import.range.start_line,
                }
            })
            .collect();

        // Test-named files feed the inverted reference index.
        let references: Vec<ReferenceRecord> = if is_test_file(rel_path) {
            let mut refs: Vec<ReferenceRecord> = parsed
                .calls
                .iter()
                .map(|call| ReferenceRecord {
                    symbol_name: call
                        .callee
                        .rsplit('.')
                        .next()
                        .unwrap_or(&call.callee)
                        .to_string(),
                    line_number: call.range.start_line,
                })
                .collect();
            refs.extend(parsed.imports.iter().filter_map(|import| {
                match &import.kind {
                    ImportKind::Named { name, .. } => Some(ReferenceRecord {
                        symbol_name: name.clone(),
                        line_number: import.range.start_line,
                    }),
                    _ => None,
                }
            }));
            refs
        } else {
            Vec::new()
        };

        // A storage failure here aborts the whole run.
        self.db_io.run(|| {
            self.store.replace_file_extraction(
                repo_id,
                rel_path,
                &content_hash,
                language,
                file.byte_size,
                file.mtime,
                &records,
                &imports,
                &references,
            )
        })?;

        Ok(Some(FileExtraction {
            rel_path: rel_path.to_string(),
            ext,
            module_symbol_id,
            symbols: records
                .iter()
                .map(|r| (r.name.clone(), r.symbol_id.clone(), r.range))
                .collect(),
            calls: parsed.calls,
        }))
    }

    fn summarize(
        &self,
        repo_id: &str,
        rel_path: &str,
        symbol: &crate::parsing::adapter::ParsedSymbol,
    ) -> Option<String> {
        if let Some(provider) = &self.summary_provider {
            let request = SummaryRequest {
                repo_id: repo_id.to_string(),
                rel_path: rel_path.to_string(),
                name: symbol.name.clone(),
                kind: symbol.kind,
                signature: symbol.signature.clone(),
                doc: symbol.doc.clone(),
                previous_summary: None,
            };
            match provider.summarize(&request) {
                Ok(outcome) if !outcome.summary.is_empty() => {
                    if outcome.divergence > 0.8 {
                        tracing::debug!(
                            target: "indexer",
                            "high summary divergence ({:.2}) for {}::{}",
                            outcome.divergence,
                            rel_path,
                            symbol.name
                        );
                    }
                    return Some(outcome.summary);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        target: "indexer",
                        "summary provider failed for {}::{}: {e}",
                        rel_path,
                        symbol.name
                    );
                }
            }
        }
        symbol.doc.as_deref().and_then(summary_from_doc)
    }

    /// Pass 2: name-map construction and call resolution.
    fn resolve_edges(
        &self,
        repo_id: &str,
        extractions: &[FileExtraction],
    ) -> EngineResult<usize> {
        if extractions.is_empty() {
            return Ok(0);
        }

        let all_symbols = self.db_io.run(|| self.store.symbols_for_repo(repo_id))?;
        let all_imports = self.db_io.run(|| self.store.imports_for_repo(repo_id))?;

        let mut name_to_ids: HashMap<String, Vec<SymbolId>> = HashMap::new();
        let mut by_path: HashMap<&str, Vec<&SymbolRecord>> = HashMap::new();
        for symbol in &all_symbols {
            name_to_ids
                .entry(symbol.name.clone())
                .or_default()
                .push(symbol.symbol_id.clone());
            by_path
                .entry(symbol.rel_path.as_str())
                .or_default()
                .push(symbol);
        }
        let mut imports_by_path: HashMap<&str, Vec<&ImportRecord>> = HashMap::new();
        for import in &all_imports {
            imports_by_path
                .entry(import.rel_path.as_str())
                .or_default()
                .push(import);
        }

        let mut adapters: HashMap<String, Box<dyn LanguageAdapter>> = HashMap::new();
        let mut total_edges = 0usize;

        for extraction in extractions {
            if !adapters.contains_key(&extraction.ext) {
                adapters.insert(extraction.ext.clone(), self.registry.create(&extraction.ext)?);
            }
            let adapter = adapters
                .get(&extraction.ext)
                .expect("adapter inserted above");

            let file_imports = imports_by_path
                .get(extraction.rel_path.as_str())
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let (context, mut edges) = self.bind_imports(
                repo_id,
                extraction,
                file_imports,
                &by_path,
                &name_to_ids,
                adapter.as_ref(),
            );

            for call in &extraction.calls {
                let resolution = adapter.resolve_call(call, &context);
                let confidence = calibrate_confidence(&resolution);
                let from_symbol_id = self.caller_symbol(extraction, call);
                for target in &resolution.target_symbol_ids {
                    edges.push(EdgeRecord {
                        repo_id: repo_id.to_string(),
                        from_symbol_id: from_symbol_id.clone(),
                        to_symbol_id: target.clone(),
                        edge_type: EdgeType::Call,
                        confidence,
                        resolution_strategy: resolution.strategy,
                        range: call.range,
                    });
                }
            }

            total_edges += edges.len();
            self.db_io.run(|| self.store.insert_edges(&edges))?;
        }

        Ok(total_edges)
    }

    /// Bind a file's imports into a resolution context plus import edges.
    fn bind_imports(
        &self,
        repo_id: &str,
        extraction: &FileExtraction,
        file_imports: &[&ImportRecord],
        by_path: &HashMap<&str, Vec<&SymbolRecord>>,
        name_to_ids: &HashMap<String, Vec<SymbolId>>,
        adapter: &dyn LanguageAdapter,
    ) -> (ResolutionContext, Vec<EdgeRecord>) {
        let mut context = ResolutionContext {
            name_to_symbol_ids: name_to_ids.clone(),
            ..ResolutionContext::default()
        };
        let mut edges = Vec::new();

        let import_edge = |to: &SymbolId, range: Range, edges: &mut Vec<EdgeRecord>| {
            edges.push(EdgeRecord {
                repo_id: repo_id.to_string(),
                from_symbol_id: extraction.module_symbol_id.clone(),
                to_symbol_id: to.clone(),
                edge_type: EdgeType::Import,
                confidence: crate::parsing::confidence::EXACT_BASE,
                resolution_strategy: ResolutionStrategy::Exact,
                range,
            });
        };

        for import in file_imports {
            let candidates = adapter.import_candidates(&extraction.rel_path, &import.module_path);
            let range = Range::new(import.line_number, 0, import.line_number, 0);
            match import.kind.as_str() {
                "named" => {
                    let Some(name) = &import.name else { continue };
                    let local = import.alias.clone().unwrap_or_else(|| name.clone());
                    for candidate in &candidates {
                        let Some(symbols) = by_path.get(candidate.as_str()) else {
                            continue;
                        };
                        for symbol in symbols.iter().filter(|s| s.exported && s.name == *name) {
                            context
                                .imported_name_to_symbol_ids
                                .entry(local.clone())
                                .or_default()
                                .push(symbol.symbol_id.clone());
                            import_edge(&symbol.symbol_id, range, &mut edges);
                        }
                    }
                }
                "namespace" => {
                    let Some(alias) = &import.alias else { continue };
                    for candidate in &candidates {
                        let Some(symbols) = by_path.get(candidate.as_str()) else {
                            continue;
                        };
                        let members = context
                            .namespace_imports
                            .entry(alias.clone())
                            .or_default();
                        for symbol in symbols.iter().filter(|s| s.exported) {
                            if symbol.kind == SymbolKind::Module {
                                import_edge(&symbol.symbol_id, range, &mut edges);
                            } else {
                                members
                                    .entry(symbol.name.clone())
                                    .or_insert_with(|| symbol.symbol_id.clone());
                            }
                        }
                        break;
                    }
                }
                _ => {}
            }
        }

        (context, edges)
    }

    /// Attribute a call to its enclosing symbol, defaulting to the module.
    fn caller_symbol(&self, extraction: &FileExtraction, call: &CallSite) -> SymbolId {
        if let Some(caller_name) = &call.caller {
            let mut best: Option<(&SymbolId, u64)> = None;
            for (name, symbol_id, range) in &extraction.symbols {
                if name != caller_name {
                    continue;
                }
                let encloses = range.start_line <= call.range.start_line
                    && range.end_line >= call.range.end_line;
                if !encloses {
                    continue;
                }
                let span = (range.end_line - range.start_line) as u64;
                if best.is_none_or(|(_, best_span)| span < best_span) {
                    best = Some((symbol_id, span));
                }
            }
            if let Some((symbol_id, _)) = best {
                return symbol_id.clone();
            }
            // Fall back to any same-named symbol in the file.
            if let Some((_, symbol_id, _)) =
                extraction.symbols.iter().find(|(name, _, _)| name == caller_name)
            {
                return symbol_id.clone();
            }
        }
        extraction.module_symbol_id.clone()
    }
}

fn language_for_ext(ext: &str) -> &'static str {
    match ext {
        "ts" | "tsx" => "typescript",
        "js" | "jsx" => "javascript",
        "py" => "python",
        "rs" => "rust",
        "go" => "go",
        "java" => "java",
        "cs" => "csharp",
        "c" => "c",
        "cpp" => "cpp",
        "php" => "php",
        "kt" => "kotlin",
        "sh" => "shell",
        _ => "unknown",
    }
}
