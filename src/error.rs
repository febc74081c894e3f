//! Error types for the indexing and slicing engine.
//!
//! Structured errors via thiserror. Per-file parse errors and per-call
//! resolution errors are absorbed into run counters and never abort an index
//! run; everything else surfaces to the caller. Policy denials carry enough
//! context to render the structured error envelope.

use crate::types::{Rung, VersionId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Undefined environment variable '${{{name}}}' referenced in configuration")]
    ConfigEnvExpansion { name: String },

    #[error("Database operation failed during {operation}: {cause}")]
    Database { operation: String, cause: String },

    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Per-file, non-fatal: counted and logged, never aborts a run.
    #[error("Failed to parse {language} file '{path}': {reason}")]
    Parse {
        path: PathBuf,
        language: String,
        reason: String,
    },

    /// Per-call, non-fatal: the edge is persisted as unresolved.
    #[error("Could not resolve call to '{callee}' in '{path}'")]
    Resolution { path: PathBuf, callee: String },

    #[error("Policy denied request: {message}")]
    Policy {
        message: String,
        code: String,
        next_best_action: Option<String>,
        required_fields_for_next: Vec<String>,
    },

    #[error("No symbol snapshot for version '{version}' of repo '{repo_id}'")]
    NoSnapshot { repo_id: String, version: VersionId },

    #[error("No entry symbols: task text matched nothing and no entries were supplied")]
    NoEntries,

    #[error("Task timed out after {waited_ms}ms in the parser queue")]
    QueueTimeout { waited_ms: u64 },

    #[error("Task exceeded its execution deadline of {timeout_ms}ms")]
    TaskTimeout { timeout_ms: u64 },

    #[error("Language adapter failure for '{language}': {reason}")]
    Plugin { language: String, reason: String },

    #[error("Unknown repo '{repo_id}'")]
    UnknownRepo { repo_id: String },

    #[error("Configuration validation failed:\n{}", format_validation(.failures))]
    Validation { failures: Vec<FieldFailure> },

    #[error("{0}")]
    General(String),
}

fn format_validation(failures: &[FieldFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("  {}: {}", f.path, f.reason))
        .collect::<Vec<_>>()
        .join("\n")
}

/// One failed field in an aggregated validation error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldFailure {
    pub path: String,
    pub reason: String,
}

impl EngineError {
    pub fn database(operation: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::Database {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }

    /// Whether an index run can continue past this error.
    pub fn is_recoverable_in_run(&self) -> bool {
        matches!(self, Self::Parse { .. } | Self::Resolution { .. })
    }

    /// Machine-readable code for the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config { .. } | Self::ConfigEnvExpansion { .. } | Self::Validation { .. } => {
                "CONFIG_ERROR"
            }
            Self::Database { .. } => "DATABASE_ERROR",
            Self::FileRead { .. } => "FILE_READ_ERROR",
            Self::Parse { .. } => "PARSE_ERROR",
            Self::Resolution { .. } => "RESOLUTION_ERROR",
            Self::Policy { .. } => "POLICY_DENIED",
            Self::NoSnapshot { .. } => "NO_SNAPSHOT",
            Self::NoEntries => "NO_ENTRIES",
            Self::QueueTimeout { .. } => "QUEUE_TIMEOUT",
            Self::TaskTimeout { .. } => "TASK_TIMEOUT",
            Self::Plugin { .. } => "PLUGIN_ERROR",
            Self::UnknownRepo { .. } => "UNKNOWN_REPO",
            Self::General(_) => "INTERNAL_ERROR",
        }
    }

    /// Recovery hints surfaced alongside the error envelope.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::Database { .. } => vec![
                "Re-run with --force to rebuild the index from scratch",
                "Check disk space and permissions for the database path",
            ],
            Self::NoSnapshot { .. } => vec![
                "Run an index pass so the version has a symbol snapshot",
                "List versions with the audit trail to find a valid pair",
            ],
            Self::NoEntries => vec![
                "Provide entrySymbols explicitly",
                "Use more specific task text mentioning symbol names",
            ],
            Self::ConfigEnvExpansion { .. } => {
                vec!["Define the variable or remove the ${...} reference from the config"]
            }
            _ => vec![],
        }
    }
}

/// Structured envelope for policy denials and hard failures (wire shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub message: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_best_action: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub required_fields_for_next: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub suggestions: Vec<String>,
}

impl ErrorEnvelope {
    pub fn from_error(err: &EngineError) -> Self {
        let (next_best_action, required_fields_for_next) = match err {
            EngineError::Policy {
                next_best_action,
                required_fields_for_next,
                ..
            } => (next_best_action.clone(), required_fields_for_next.clone()),
            _ => (None, Vec::new()),
        };
        Self {
            error: ErrorBody {
                message: err.to_string(),
                code: err.code().to_string(),
                next_best_action,
                required_fields_for_next,
                suggestions: err
                    .recovery_suggestions()
                    .into_iter()
                    .map(String::from)
                    .collect(),
            },
        }
    }
}

/// Suggested tool for a downgraded rung, carried in policy errors.
pub fn next_best_action_for(rung: Rung) -> &'static str {
    match rung {
        Rung::Card => "getCard",
        Rung::Skeleton => "getSkeleton",
        Rung::HotPath => "getHotPath",
        Rung::Raw => "getRaw",
    }
}

/// Result alias used across the engine.
pub type EngineResult<T> = Result<T, EngineError>;
