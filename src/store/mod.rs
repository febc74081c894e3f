//! Embedded relational store over SQLite.
//!
//! The store exclusively owns all persisted entities. Writes during an index
//! run are grouped into one transaction per file; version commits (snapshot,
//! metrics, audit) are one transaction. Readers get plain record structs and
//! never see connection handles.

pub mod migrations;

use crate::config::DB_QUERY_LIMIT_MAX;
use crate::error::{EngineError, EngineResult};
use crate::types::{
    EdgeType, FileId, Range, ResolutionStrategy, SymbolId, SymbolKind, VersionId, Visibility,
};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Persisted symbol row.
#[derive(Debug, Clone)]
pub struct SymbolRecord {
    pub symbol_id: SymbolId,
    pub repo_id: String,
    pub rel_path: String,
    pub file_id: FileId,
    pub kind: SymbolKind,
    pub name: String,
    pub range: Range,
    pub signature: Option<String>,
    pub ast_fingerprint: String,
    pub summary: Option<String>,
    pub invariants: Vec<String>,
    pub side_effects: Vec<String>,
    pub exported: bool,
    pub visibility: Visibility,
}

/// Persisted import row, joined with its file's rel path.
#[derive(Debug, Clone)]
pub struct ImportRecord {
    pub repo_id: String,
    pub file_id: FileId,
    pub rel_path: String,
    pub module_path: String,
    /// `named`, `namespace`, or `bare`.
    pub kind: String,
    pub name: Option<String>,
    pub alias: Option<String>,
    pub line_number: u32,
}

/// Persisted dependency edge.
#[derive(Debug, Clone)]
pub struct EdgeRecord {
    pub repo_id: String,
    pub from_symbol_id: SymbolId,
    pub to_symbol_id: SymbolId,
    pub edge_type: EdgeType,
    pub confidence: f32,
    pub resolution_strategy: ResolutionStrategy,
    pub range: Range,
}

/// Committed index version.
#[derive(Debug, Clone)]
pub struct VersionRecord {
    pub version_id: VersionId,
    pub repo_id: String,
    pub created_at: i64,
    pub reason: String,
}

/// Immutable snapshot of one symbol at one version.
#[derive(Debug, Clone)]
pub struct SnapshotRecord {
    pub version_id: VersionId,
    pub symbol_id: SymbolId,
    pub repo_id: String,
    pub name: String,
    pub kind: SymbolKind,
    pub rel_path: String,
    pub ast_fingerprint: String,
    pub signature: Option<String>,
    pub summary: Option<String>,
    pub invariants: Vec<String>,
    pub side_effects: Vec<String>,
}

/// A test file's textual reference to a symbol name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRef {
    pub rel_path: String,
    pub line: u32,
}

/// Derived per-symbol metrics.
#[derive(Debug, Clone)]
pub struct MetricsRecord {
    pub symbol_id: SymbolId,
    pub repo_id: String,
    pub fan_in: u32,
    pub fan_out: u32,
    pub churn_30d: u32,
    pub test_refs: Vec<TestRef>,
    pub updated_at: i64,
}

/// Inverted-index row: a bare name referenced from a test-named file.
#[derive(Debug, Clone)]
pub struct ReferenceRecord {
    pub symbol_name: String,
    pub line_number: u32,
}

/// One append-only audit row.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub event_id: i64,
    pub timestamp: i64,
    pub tool: String,
    pub decision: String,
    pub repo_id: Option<String>,
    pub symbol_id: Option<String>,
    pub details: serde_json::Value,
}

fn json_list(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

fn parse_json_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

/// Handle to the embedded database. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database file, register UDFs, run migrations.
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| EngineError::database("create db directory", e))?;
            }
        }
        let conn = Connection::open(path).map_err(|e| EngineError::database("open database", e))?;
        Self::from_connection(conn)
    }

    /// In-memory store, used by tests and ephemeral runs.
    pub fn in_memory() -> EngineResult<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| EngineError::database("open database", e))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> EngineResult<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON").ok();
        migrations::register_functions(&conn)?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ------------------------------------------------------------------
    // Files
    // ------------------------------------------------------------------

    /// Current content hash per rel path for a repo.
    pub fn file_hashes(&self, repo_id: &str) -> EngineResult<HashMap<String, String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT rel_path, content_hash FROM files WHERE repo_id = ?1")
            .map_err(|e| EngineError::database("prepare file_hashes", e))?;
        let rows = stmt
            .query_map([repo_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| EngineError::database("query file_hashes", e))?;
        let mut out = HashMap::new();
        for row in rows {
            let (rel_path, hash) = row.map_err(|e| EngineError::database("read file_hashes", e))?;
            out.insert(rel_path, hash);
        }
        Ok(out)
    }

    /// Replace a file's extraction output in one transaction.
    ///
    /// Deletes the file's previous symbols (and the edges they originate),
    /// imports, and test references, then writes the new rows. Returns the
    /// file's surrogate id.
    #[allow(clippy::too_many_arguments)]
    pub fn replace_file_extraction(
        &self,
        repo_id: &str,
        rel_path: &str,
        content_hash: &str,
        language: &str,
        byte_size: u64,
        mtime: i64,
        symbols: &[SymbolRecord],
        imports: &[ImportRecord],
        references: &[ReferenceRecord],
    ) -> EngineResult<FileId> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| EngineError::database("begin file transaction", e))?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT file_id FROM files WHERE repo_id = ?1 AND rel_path = ?2",
                params![repo_id, rel_path],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| EngineError::database("lookup file", e))?;

        let directory = rel_path.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
        let now = chrono::Utc::now().timestamp_millis();

        let file_id: i64 = match existing {
            Some(file_id) => {
                // Old edges from this file's symbols die with the symbols.
                tx.execute(
                    "DELETE FROM edges WHERE from_symbol_id IN
                        (SELECT symbol_id FROM symbols WHERE file_id = ?1)",
                    params![file_id],
                )
                .map_err(|e| EngineError::database("delete stale edges", e))?;
                tx.execute("DELETE FROM symbols WHERE file_id = ?1", params![file_id])
                    .map_err(|e| EngineError::database("delete stale symbols", e))?;
                tx.execute("DELETE FROM imports WHERE file_id = ?1", params![file_id])
                    .map_err(|e| EngineError::database("delete stale imports", e))?;
                tx.execute(
                    "DELETE FROM symbol_references WHERE file_id = ?1",
                    params![file_id],
                )
                .map_err(|e| EngineError::database("delete stale references", e))?;
                tx.execute(
                    "UPDATE files SET content_hash = ?1, language = ?2, byte_size = ?3,
                        last_indexed_at = ?4, directory = ?5, mtime = ?6 WHERE file_id = ?7",
                    params![content_hash, language, byte_size as i64, now, directory, mtime, file_id],
                )
                .map_err(|e| EngineError::database("update file", e))?;
                file_id
            }
            None => {
                tx.execute(
                    "INSERT INTO files
                        (repo_id, rel_path, content_hash, language, byte_size,
                         last_indexed_at, directory, mtime)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![repo_id, rel_path, content_hash, language, byte_size as i64, now, directory, mtime],
                )
                .map_err(|e| EngineError::database("insert file", e))?;
                tx.last_insert_rowid()
            }
        };

        for symbol in symbols {
            tx.execute(
                "INSERT OR REPLACE INTO symbols
                    (symbol_id, repo_id, rel_path, file_id, kind, name,
                     start_line, start_col, end_line, end_col,
                     signature_json, ast_fingerprint, summary,
                     invariants_json, side_effects_json, exported, visibility)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                params![
                    symbol.symbol_id.as_str(),
                    repo_id,
                    rel_path,
                    file_id,
                    symbol.kind.as_str(),
                    symbol.name,
                    symbol.range.start_line,
                    symbol.range.start_column,
                    symbol.range.end_line,
                    symbol.range.end_column,
                    symbol.signature,
                    symbol.ast_fingerprint,
                    symbol.summary,
                    json_list(&symbol.invariants),
                    json_list(&symbol.side_effects),
                    symbol.exported as i64,
                    symbol.visibility.as_str(),
                ],
            )
            .map_err(|e| EngineError::database("insert symbol", e))?;
        }

        for import in imports {
            tx.execute(
                "INSERT INTO imports
                    (repo_id, file_id, module_path, kind, name, alias, line_number)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    repo_id,
                    file_id,
                    import.module_path,
                    import.kind,
                    import.name,
                    import.alias,
                    import.line_number,
                ],
            )
            .map_err(|e| EngineError::database("insert import", e))?;
        }

        for reference in references {
            tx.execute(
                "INSERT INTO symbol_references
                    (repo_id, symbol_name, file_id, line_number, rel_path)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    repo_id,
                    reference.symbol_name,
                    file_id,
                    reference.line_number,
                    rel_path,
                ],
            )
            .map_err(|e| EngineError::database("insert reference", e))?;
        }

        tx.commit()
            .map_err(|e| EngineError::database("commit file transaction", e))?;
        Ok(FileId(file_id))
    }

    /// Drop a file and everything hanging off it.
    pub fn remove_file(&self, repo_id: &str, rel_path: &str) -> EngineResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| EngineError::database("begin remove transaction", e))?;
        let existing: Option<i64> = tx
            .query_row(
                "SELECT file_id FROM files WHERE repo_id = ?1 AND rel_path = ?2",
                params![repo_id, rel_path],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| EngineError::database("lookup file", e))?;
        if let Some(file_id) = existing {
            tx.execute(
                "DELETE FROM edges WHERE from_symbol_id IN
                    (SELECT symbol_id FROM symbols WHERE file_id = ?1)",
                params![file_id],
            )
            .map_err(|e| EngineError::database("delete edges", e))?;
            tx.execute("DELETE FROM symbols WHERE file_id = ?1", params![file_id])
                .map_err(|e| EngineError::database("delete symbols", e))?;
            tx.execute("DELETE FROM imports WHERE file_id = ?1", params![file_id])
                .map_err(|e| EngineError::database("delete imports", e))?;
            tx.execute(
                "DELETE FROM symbol_references WHERE file_id = ?1",
                params![file_id],
            )
            .map_err(|e| EngineError::database("delete references", e))?;
            tx.execute("DELETE FROM files WHERE file_id = ?1", params![file_id])
                .map_err(|e| EngineError::database("delete file", e))?;
        }
        tx.commit()
            .map_err(|e| EngineError::database("commit remove transaction", e))
    }

    // ------------------------------------------------------------------
    // Symbols
    // ------------------------------------------------------------------

    fn symbol_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SymbolRecord> {
        Ok(SymbolRecord {
            symbol_id: SymbolId::new(row.get::<_, String>(0)?),
            repo_id: row.get(1)?,
            rel_path: row.get(2)?,
            file_id: FileId(row.get(3)?),
            kind: SymbolKind::parse(&row.get::<_, String>(4)?).unwrap_or(SymbolKind::Function),
            name: row.get(5)?,
            range: Range::new(row.get(6)?, row.get(7)?, row.get(8)?, row.get(9)?),
            signature: row.get(10)?,
            ast_fingerprint: row.get(11)?,
            summary: row.get(12)?,
            invariants: parse_json_list(&row.get::<_, String>(13)?),
            side_effects: parse_json_list(&row.get::<_, String>(14)?),
            exported: row.get::<_, i64>(15)? != 0,
            visibility: Visibility::parse(&row.get::<_, String>(16)?)
                .unwrap_or(Visibility::Module),
        })
    }

    const SYMBOL_COLUMNS: &'static str = "symbol_id, repo_id, rel_path, file_id, kind, name,
        start_line, start_col, end_line, end_col, signature_json, ast_fingerprint, summary,
        invariants_json, side_effects_json, exported, visibility";

    pub fn symbols_for_repo(&self, repo_id: &str) -> EngineResult<Vec<SymbolRecord>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM symbols WHERE repo_id = ?1 ORDER BY rel_path, start_line",
            Self::SYMBOL_COLUMNS
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| EngineError::database("prepare symbols_for_repo", e))?;
        let rows = stmt
            .query_map([repo_id], Self::symbol_from_row)
            .map_err(|e| EngineError::database("query symbols_for_repo", e))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| EngineError::database("read symbols_for_repo", e))
    }

    pub fn symbol(&self, symbol_id: &SymbolId) -> EngineResult<Option<SymbolRecord>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM symbols WHERE symbol_id = ?1",
            Self::SYMBOL_COLUMNS
        );
        conn.query_row(&sql, [symbol_id.as_str()], Self::symbol_from_row)
            .optional()
            .map_err(|e| EngineError::database("query symbol", e))
    }

    /// Token match against names and summaries, for slice entry derivation.
    pub fn search_symbols(
        &self,
        repo_id: &str,
        tokens: &[String],
        limit: usize,
    ) -> EngineResult<Vec<SymbolRecord>> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let all = self.symbols_for_repo(repo_id)?;
        let mut scored: Vec<(usize, SymbolRecord)> = all
            .into_iter()
            .filter_map(|symbol| {
                let name = symbol.name.to_ascii_lowercase();
                let summary = symbol
                    .summary
                    .as_deref()
                    .unwrap_or("")
                    .to_ascii_lowercase();
                let hits = tokens
                    .iter()
                    .filter(|t| name.contains(t.as_str()) || summary.contains(t.as_str()))
                    .count();
                (hits > 0).then_some((hits, symbol))
            })
            .collect();
        scored.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| a.1.symbol_id.cmp(&b.1.symbol_id))
        });
        Ok(scored
            .into_iter()
            .take(limit.min(DB_QUERY_LIMIT_MAX))
            .map(|(_, symbol)| symbol)
            .collect())
    }

    // ------------------------------------------------------------------
    // Imports & edges
    // ------------------------------------------------------------------

    pub fn imports_for_repo(&self, repo_id: &str) -> EngineResult<Vec<ImportRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT i.repo_id, i.file_id, f.rel_path, i.module_path, i.kind,
                        i.name, i.alias, i.line_number
                 FROM imports i JOIN files f ON f.file_id = i.file_id
                 WHERE i.repo_id = ?1",
            )
            .map_err(|e| EngineError::database("prepare imports_for_repo", e))?;
        let rows = stmt
            .query_map([repo_id], |row| {
                Ok(ImportRecord {
                    repo_id: row.get(0)?,
                    file_id: FileId(row.get(1)?),
                    rel_path: row.get(2)?,
                    module_path: row.get(3)?,
                    kind: row.get(4)?,
                    name: row.get(5)?,
                    alias: row.get(6)?,
                    line_number: row.get(7)?,
                })
            })
            .map_err(|e| EngineError::database("query imports_for_repo", e))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| EngineError::database("read imports_for_repo", e))
    }

    /// Insert edges in one transaction. Confidence is clamped to [0, 1].
    pub fn insert_edges(&self, edges: &[EdgeRecord]) -> EngineResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| EngineError::database("begin edges transaction", e))?;
        for edge in edges {
            tx.execute(
                "INSERT INTO edges
                    (repo_id, from_symbol_id, to_symbol_id, edge_type, confidence,
                     resolution_strategy, start_line, start_col, end_line, end_col)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    edge.repo_id,
                    edge.from_symbol_id.as_str(),
                    edge.to_symbol_id.as_str(),
                    edge.edge_type.as_str(),
                    edge.confidence.clamp(0.0, 1.0),
                    edge.resolution_strategy.as_str(),
                    edge.range.start_line,
                    edge.range.start_column,
                    edge.range.end_line,
                    edge.range.end_column,
                ],
            )
            .map_err(|e| EngineError::database("insert edge", e))?;
        }
        tx.commit()
            .map_err(|e| EngineError::database("commit edges transaction", e))
    }

    pub fn edges_for_repo(&self, repo_id: &str) -> EngineResult<Vec<EdgeRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT repo_id, from_symbol_id, to_symbol_id, edge_type, confidence,
                        resolution_strategy, start_line, start_col, end_line, end_col
                 FROM edges WHERE repo_id = ?1",
            )
            .map_err(|e| EngineError::database("prepare edges_for_repo", e))?;
        let rows = stmt
            .query_map([repo_id], |row| {
                Ok(EdgeRecord {
                    repo_id: row.get(0)?,
                    from_symbol_id: SymbolId::new(row.get::<_, String>(1)?),
                    to_symbol_id: SymbolId::new(row.get::<_, String>(2)?),
                    edge_type: EdgeType::parse(&row.get::<_, String>(3)?)
                        .unwrap_or(EdgeType::Call),
                    confidence: row.get(4)?,
                    resolution_strategy: ResolutionStrategy::parse(&row.get::<_, String>(5)?)
                        .unwrap_or(ResolutionStrategy::Unresolved),
                    range: Range::new(row.get(6)?, row.get(7)?, row.get(8)?, row.get(9)?),
                })
            })
            .map_err(|e| EngineError::database("query edges_for_repo", e))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| EngineError::database("read edges_for_repo", e))
    }

    // ------------------------------------------------------------------
    // Versions, snapshots, metrics
    // ------------------------------------------------------------------

    /// Commit a version: version row, symbol snapshots, metrics — atomically.
    pub fn commit_version(
        &self,
        version: &VersionRecord,
        snapshots: &[SnapshotRecord],
        metrics: &[MetricsRecord],
    ) -> EngineResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| EngineError::database("begin version transaction", e))?;

        tx.execute(
            "INSERT INTO versions (version_id, repo_id, created_at, reason)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                version.version_id.as_str(),
                version.repo_id,
                version.created_at,
                version.reason,
            ],
        )
        .map_err(|e| EngineError::database("insert version", e))?;

        for snapshot in snapshots {
            tx.execute(
                "INSERT INTO symbol_versions
                    (version_id, symbol_id, repo_id, name, kind, rel_path,
                     ast_fingerprint, signature_json, summary,
                     invariants_json, side_effects_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    snapshot.version_id.as_str(),
                    snapshot.symbol_id.as_str(),
                    snapshot.repo_id,
                    snapshot.name,
                    snapshot.kind.as_str(),
                    snapshot.rel_path,
                    snapshot.ast_fingerprint,
                    snapshot.signature,
                    snapshot.summary,
                    json_list(&snapshot.invariants),
                    json_list(&snapshot.side_effects),
                ],
            )
            .map_err(|e| EngineError::database("insert snapshot", e))?;
        }

        tx.execute(
            "DELETE FROM metrics WHERE repo_id = ?1",
            params![version.repo_id],
        )
        .map_err(|e| EngineError::database("clear metrics", e))?;
        for metric in metrics {
            tx.execute(
                "INSERT INTO metrics
                    (symbol_id, repo_id, fan_in, fan_out, churn_30d, test_refs_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    metric.symbol_id.as_str(),
                    metric.repo_id,
                    metric.fan_in,
                    metric.fan_out,
                    metric.churn_30d,
                    serde_json::to_string(&metric.test_refs).unwrap_or_else(|_| "[]".into()),
                    metric.updated_at,
                ],
            )
            .map_err(|e| EngineError::database("insert metrics", e))?;
        }

        tx.commit()
            .map_err(|e| EngineError::database("commit version transaction", e))
    }

    fn version_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<VersionRecord> {
        Ok(VersionRecord {
            version_id: VersionId::new(row.get::<_, String>(0)?),
            repo_id: row.get(1)?,
            created_at: row.get(2)?,
            reason: row.get(3)?,
        })
    }

    /// Newest committed version for a repo, addressable as "latest".
    pub fn latest_version(&self, repo_id: &str) -> EngineResult<Option<VersionRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT version_id, repo_id, created_at, reason FROM versions
             WHERE repo_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT 1",
            [repo_id],
            Self::version_from_row,
        )
        .optional()
        .map_err(|e| EngineError::database("query latest_version", e))
    }

    pub fn version(
        &self,
        repo_id: &str,
        version_id: &VersionId,
    ) -> EngineResult<Option<VersionRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT version_id, repo_id, created_at, reason FROM versions
             WHERE repo_id = ?1 AND version_id = ?2",
            params![repo_id, version_id.as_str()],
            Self::version_from_row,
        )
        .optional()
        .map_err(|e| EngineError::database("query version", e))
    }

    /// Versions for a repo, oldest first.
    pub fn versions_for_repo(&self, repo_id: &str) -> EngineResult<Vec<VersionRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT version_id, repo_id, created_at, reason FROM versions
                 WHERE repo_id = ?1 ORDER BY created_at ASC, rowid ASC",
            )
            .map_err(|e| EngineError::database("prepare versions_for_repo", e))?;
        let rows = stmt
            .query_map([repo_id], Self::version_from_row)
            .map_err(|e| EngineError::database("query versions_for_repo", e))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| EngineError::database("read versions_for_repo", e))
    }

    /// Full snapshot map for one version; empty map means no snapshot.
    pub fn snapshots_for_version(
        &self,
        version_id: &VersionId,
    ) -> EngineResult<HashMap<SymbolId, SnapshotRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT version_id, symbol_id, repo_id, name, kind, rel_path,
                        ast_fingerprint, signature_json, summary,
                        invariants_json, side_effects_json
                 FROM symbol_versions WHERE version_id = ?1",
            )
            .map_err(|e| EngineError::database("prepare snapshots_for_version", e))?;
        let rows = stmt
            .query_map([version_id.as_str()], |row| {
                Ok(SnapshotRecord {
                    version_id: VersionId::new(row.get::<_, String>(0)?),
                    symbol_id: SymbolId::new(row.get::<_, String>(1)?),
                    repo_id: row.get(2)?,
                    name: row.get(3)?,
                    kind: SymbolKind::parse(&row.get::<_, String>(4)?)
                        .unwrap_or(SymbolKind::Function),
                    rel_path: row.get(5)?,
                    ast_fingerprint: row.get(6)?,
                    signature: row.get(7)?,
                    summary: row.get(8)?,
                    invariants: parse_json_list(&row.get::<_, String>(9)?),
                    side_effects: parse_json_list(&row.get::<_, String>(10)?),
                })
            })
            .map_err(|e| EngineError::database("query snapshots_for_version", e))?;
        let mut out = HashMap::new();
        for row in rows {
            let snapshot = row.map_err(|e| EngineError::database("read snapshot", e))?;
            out.insert(snapshot.symbol_id.clone(), snapshot);
        }
        Ok(out)
    }

    pub fn metrics_for(&self, symbol_id: &SymbolId) -> EngineResult<Option<MetricsRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT symbol_id, repo_id, fan_in, fan_out, churn_30d, test_refs_json, updated_at
             FROM metrics WHERE symbol_id = ?1",
            [symbol_id.as_str()],
            |row| {
                Ok(MetricsRecord {
                    symbol_id: SymbolId::new(row.get::<_, String>(0)?),
                    repo_id: row.get(1)?,
                    fan_in: row.get(2)?,
                    fan_out: row.get(3)?,
                    churn_30d: row.get(4)?,
                    test_refs: serde_json::from_str(&row.get::<_, String>(5)?)
                        .unwrap_or_default(),
                    updated_at: row.get(6)?,
                })
            },
        )
        .optional()
        .map_err(|e| EngineError::database("query metrics", e))
    }

    /// Test references for a bare symbol name.
    pub fn references_for_name(
        &self,
        repo_id: &str,
        symbol_name: &str,
    ) -> EngineResult<Vec<TestRef>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT rel_path, line_number FROM symbol_references
                 WHERE repo_id = ?1 AND symbol_name = ?2
                 ORDER BY rel_path, line_number",
            )
            .map_err(|e| EngineError::database("prepare references_for_name", e))?;
        let rows = stmt
            .query_map(params![repo_id, symbol_name], |row| {
                Ok(TestRef {
                    rel_path: row.get(0)?,
                    line: row.get(1)?,
                })
            })
            .map_err(|e| EngineError::database("query references_for_name", e))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| EngineError::database("read references_for_name", e))
    }

    /// All reference names for a repo grouped by name.
    pub fn references_by_name(
        &self,
        repo_id: &str,
    ) -> EngineResult<HashMap<String, Vec<TestRef>>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT symbol_name, rel_path, line_number FROM symbol_references
                 WHERE repo_id = ?1 ORDER BY symbol_name, rel_path, line_number",
            )
            .map_err(|e| EngineError::database("prepare references_by_name", e))?;
        let rows = stmt
            .query_map([repo_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    TestRef {
                        rel_path: row.get(1)?,
                        line: row.get(2)?,
                    },
                ))
            })
            .map_err(|e| EngineError::database("query references_by_name", e))?;
        let mut out: HashMap<String, Vec<TestRef>> = HashMap::new();
        for row in rows {
            let (name, reference) =
                row.map_err(|e| EngineError::database("read references_by_name", e))?;
            out.entry(name).or_default().push(reference);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Audit
    // ------------------------------------------------------------------

    pub fn append_audit(
        &self,
        tool: &str,
        decision: &str,
        repo_id: Option<&str>,
        symbol_id: Option<&str>,
        details: &serde_json::Value,
    ) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO audit_events (timestamp, tool, decision, repo_id, symbol_id, details_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                chrono::Utc::now().timestamp_millis(),
                tool,
                decision,
                repo_id,
                symbol_id,
                details.to_string(),
            ],
        )
        .map_err(|e| EngineError::database("append audit", e))?;
        Ok(())
    }

    /// Newest-first audit events; limit capped by [`DB_QUERY_LIMIT_MAX`].
    pub fn audit_trail(
        &self,
        repo_id: Option<&str>,
        limit: Option<usize>,
    ) -> EngineResult<Vec<AuditRecord>> {
        let limit = limit.unwrap_or(DB_QUERY_LIMIT_MAX).min(DB_QUERY_LIMIT_MAX) as i64;
        let conn = self.conn.lock();
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<AuditRecord> {
            Ok(AuditRecord {
                event_id: row.get(0)?,
                timestamp: row.get(1)?,
                tool: row.get(2)?,
                decision: row.get(3)?,
                repo_id: row.get(4)?,
                symbol_id: row.get(5)?,
                details: serde_json::from_str(&row.get::<_, String>(6)?)
                    .unwrap_or(serde_json::Value::Null),
            })
        };
        let mut out = Vec::new();
        match repo_id {
            Some(repo) => {
                let mut stmt = conn
                    .prepare(
                        "SELECT event_id, timestamp, tool, decision, repo_id, symbol_id, details_json
                         FROM audit_events WHERE repo_id = ?1
                         ORDER BY timestamp DESC, event_id DESC LIMIT ?2",
                    )
                    .map_err(|e| EngineError::database("prepare audit_trail", e))?;
                let rows = stmt
                    .query_map(params![repo, limit], map_row)
                    .map_err(|e| EngineError::database("query audit_trail", e))?;
                for row in rows {
                    out.push(row.map_err(|e| EngineError::database("read audit_trail", e))?);
                }
            }
            None => {
                let mut stmt = conn
                    .prepare(
                        "SELECT event_id, timestamp, tool, decision, repo_id, symbol_id, details_json
                         FROM audit_events ORDER BY timestamp DESC, event_id DESC LIMIT ?1",
                    )
                    .map_err(|e| EngineError::database("prepare audit_trail", e))?;
                let rows = stmt
                    .query_map(params![limit], map_row)
                    .map_err(|e| EngineError::database("query audit_trail", e))?;
                for row in rows {
                    out.push(row.map_err(|e| EngineError::database("read audit_trail", e))?);
                }
            }
        }
        Ok(out)
    }
}
