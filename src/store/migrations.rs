//! Ordered schema migrations.
//!
//! Migrations are applied monotonically by name; each applied name is
//! stamped in `_migrations` and skipped on later startups. Execution errors
//! whose message marks the object as already present are stamped rather than
//! raised, which adopts databases created before stamping existed.

use crate::error::{EngineError, EngineResult};
use rusqlite::Connection;
use rusqlite::functions::FunctionFlags;

pub struct Migration {
    pub name: &'static str,
    pub sql: &'static str,
}

/// The full ordered migration set. Append only; never reorder or edit an
/// entry that has shipped.
pub fn migrations() -> &'static [Migration] {
    &[
        Migration {
            name: "0001_create_files",
            sql: "CREATE TABLE files (
                    file_id INTEGER PRIMARY KEY,
                    repo_id TEXT NOT NULL,
                    rel_path TEXT NOT NULL,
                    content_hash TEXT NOT NULL,
                    language TEXT NOT NULL,
                    byte_size INTEGER NOT NULL,
                    last_indexed_at INTEGER NOT NULL,
                    directory TEXT NOT NULL,
                    UNIQUE (repo_id, rel_path)
                );
                CREATE INDEX idx_files_repo ON files (repo_id);",
        },
        Migration {
            name: "0002_create_symbols",
            sql: "CREATE TABLE symbols (
                    symbol_id TEXT PRIMARY KEY,
                    repo_id TEXT NOT NULL,
                    rel_path TEXT NOT NULL,
                    file_id INTEGER NOT NULL,
                    kind TEXT NOT NULL,
                    name TEXT NOT NULL,
                    start_line INTEGER NOT NULL,
                    start_col INTEGER NOT NULL,
                    end_line INTEGER NOT NULL,
                    end_col INTEGER NOT NULL,
                    signature_json TEXT,
                    ast_fingerprint TEXT NOT NULL,
                    summary TEXT,
                    invariants_json TEXT NOT NULL DEFAULT '[]',
                    side_effects_json TEXT NOT NULL DEFAULT '[]',
                    exported INTEGER NOT NULL DEFAULT 0,
                    visibility TEXT NOT NULL DEFAULT 'module'
                );
                CREATE INDEX idx_symbols_repo_name ON symbols (repo_id, name);
                CREATE INDEX idx_symbols_file ON symbols (file_id);",
        },
        Migration {
            name: "0003_create_imports",
            sql: "CREATE TABLE imports (
                    import_id INTEGER PRIMARY KEY,
                    repo_id TEXT NOT NULL,
                    file_id INTEGER NOT NULL,
                    module_path TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    name TEXT,
                    alias TEXT,
                    line_number INTEGER NOT NULL DEFAULT 0
                );
                CREATE INDEX idx_imports_file ON imports (file_id);",
        },
        Migration {
            name: "0004_create_edges",
            sql: "CREATE TABLE edges (
                    edge_id INTEGER PRIMARY KEY,
                    repo_id TEXT NOT NULL,
                    from_symbol_id TEXT NOT NULL,
                    to_symbol_id TEXT NOT NULL,
                    edge_type TEXT NOT NULL,
                    confidence REAL NOT NULL,
                    resolution_strategy TEXT NOT NULL,
                    start_line INTEGER NOT NULL DEFAULT 0,
                    start_col INTEGER NOT NULL DEFAULT 0,
                    end_line INTEGER NOT NULL DEFAULT 0,
                    end_col INTEGER NOT NULL DEFAULT 0
                );
                CREATE INDEX idx_edges_from ON edges (from_symbol_id);
                CREATE INDEX idx_edges_to ON edges (to_symbol_id);
                CREATE INDEX idx_edges_repo ON edges (repo_id);",
        },
        Migration {
            name: "0005_create_versions",
            sql: "CREATE TABLE versions (
                    version_id TEXT PRIMARY KEY,
                    repo_id TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    reason TEXT NOT NULL
                );
                CREATE INDEX idx_versions_repo ON versions (repo_id, created_at);",
        },
        Migration {
            name: "0006_create_symbol_versions",
            sql: "CREATE TABLE symbol_versions (
                    version_id TEXT NOT NULL,
                    symbol_id TEXT NOT NULL,
                    repo_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    rel_path TEXT NOT NULL,
                    ast_fingerprint TEXT NOT NULL,
                    signature_json TEXT,
                    summary TEXT,
                    invariants_json TEXT NOT NULL DEFAULT '[]',
                    side_effects_json TEXT NOT NULL DEFAULT '[]',
                    PRIMARY KEY (version_id, symbol_id)
                );",
        },
        Migration {
            name: "0007_create_symbol_references",
            sql: "CREATE TABLE symbol_references (
                    reference_id INTEGER PRIMARY KEY,
                    repo_id TEXT NOT NULL,
                    symbol_name TEXT NOT NULL,
                    file_id INTEGER NOT NULL,
                    line_number INTEGER NOT NULL,
                    rel_path TEXT NOT NULL
                );
                CREATE INDEX idx_refs_repo_name ON symbol_references (repo_id, symbol_name);
                CREATE INDEX idx_refs_file ON symbol_references (file_id);",
        },
        Migration {
            name: "0008_create_metrics",
            sql: "CREATE TABLE metrics (
                    symbol_id TEXT PRIMARY KEY,
                    repo_id TEXT NOT NULL,
                    fan_in INTEGER NOT NULL DEFAULT 0,
                    fan_out INTEGER NOT NULL DEFAULT 0,
                    churn_30d INTEGER NOT NULL DEFAULT 0,
                    test_refs_json TEXT NOT NULL DEFAULT '[]',
                    updated_at INTEGER NOT NULL
                );
                CREATE INDEX idx_metrics_repo ON metrics (repo_id);",
        },
        Migration {
            name: "0009_create_audit_events",
            sql: "CREATE TABLE audit_events (
                    event_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    timestamp INTEGER NOT NULL,
                    tool TEXT NOT NULL,
                    decision TEXT NOT NULL,
                    repo_id TEXT,
                    symbol_id TEXT,
                    details_json TEXT NOT NULL DEFAULT '{}'
                );
                CREATE INDEX idx_audit_repo_time ON audit_events (repo_id, timestamp);",
        },
        Migration {
            name: "0010_add_files_mtime",
            sql: "ALTER TABLE files ADD COLUMN mtime INTEGER NOT NULL DEFAULT 0;",
        },
    ]
}

/// Messages SQLite emits when a migration's objects already exist.
fn is_already_applied(message: &str) -> bool {
    message.contains("already exists") || message.contains("duplicate column name")
}

/// Register user-defined SQL functions. Must run before migrations so any
/// script referencing them executes.
pub fn register_functions(conn: &Connection) -> EngineResult<()> {
    conn.create_scalar_function(
        "reverse",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let input: String = ctx.get(0)?;
            Ok(input.chars().rev().collect::<String>())
        },
    )
    .map_err(|e| EngineError::database("register reverse()", e))
}

/// Apply every unapplied migration, in order, stamping each.
pub fn run_migrations(conn: &Connection) -> EngineResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            applied_at INTEGER NOT NULL
        );",
    )
    .map_err(|e| EngineError::database("create _migrations", e))?;

    for migration in migrations() {
        let applied: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM _migrations WHERE name = ?1",
                [migration.name],
                |row| row.get::<_, i64>(0),
            )
            .map(|count| count > 0)
            .map_err(|e| EngineError::database("check migration stamp", e))?;
        if applied {
            continue;
        }

        if let Err(e) = conn.execute_batch(migration.sql) {
            let message = e.to_string();
            if is_already_applied(&message) {
                tracing::debug!(
                    target: "store",
                    "migration {} objects already present, stamping",
                    migration.name
                );
            } else {
                return Err(EngineError::database(
                    format!("apply migration {}", migration.name),
                    message,
                ));
            }
        }

        conn.execute(
            "INSERT INTO _migrations (name, applied_at) VALUES (?1, ?2)",
            rusqlite::params![migration.name, chrono::Utc::now().timestamp_millis()],
        )
        .map_err(|e| EngineError::database("stamp migration", e))?;

        tracing::debug!(target: "store", "applied migration {}", migration.name);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        register_functions(&conn).unwrap();
        conn
    }

    #[test]
    fn migrations_apply_and_stamp() {
        let conn = open();
        run_migrations(&conn).unwrap();

        let stamped: i64 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(stamped as usize, migrations().len());

        // All tables exist.
        for table in [
            "files",
            "symbols",
            "imports",
            "edges",
            "versions",
            "symbol_versions",
            "symbol_references",
            "metrics",
            "audit_events",
        ] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {table}");
        }
    }

    #[test]
    fn rerunning_is_a_no_op() {
        let conn = open();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        let stamped: i64 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(stamped as usize, migrations().len());
    }

    #[test]
    fn pre_stamping_database_is_adopted() {
        let conn = open();
        // Simulate a database whose tables exist but were never stamped.
        run_migrations(&conn).unwrap();
        conn.execute("DELETE FROM _migrations", []).unwrap();

        run_migrations(&conn).unwrap();
        let stamped: i64 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(stamped as usize, migrations().len());
    }

    #[test]
    fn reverse_function_is_registered() {
        let conn = open();
        let reversed: String = conn
            .query_row("SELECT reverse('slice')", [], |r| r.get(0))
            .unwrap();
        assert_eq!(reversed, "ecils");
    }

    #[test]
    fn already_applied_detection() {
        assert!(is_already_applied("table files already exists"));
        assert!(is_already_applied("duplicate column name: mtime"));
        assert!(!is_already_applied("syntax error near SELECT"));
    }
}
