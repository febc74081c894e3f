//! Layered configuration for the engine.
//!
//! Sources, lowest precedence first: built-in defaults, the JSON config file,
//! environment variables. The config file path defaults to `codeslice.json`
//! and can be overridden with `SDL_CONFIG` or `SDL_CONFIG_PATH`. Environment
//! variables use the `CODESLICE_` prefix with double underscores between
//! nesting levels, e.g. `CODESLICE_POLICY__MAX_WINDOW_LINES=200`.
//!
//! `${NAME}` occurrences inside string values are expanded from the process
//! environment before parsing; referencing an undefined variable is a load
//! error, not a silent empty string.

use crate::error::{EngineError, EngineResult, FieldFailure};
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Language tags accepted in `repos[].languages`.
pub const LANGUAGE_TAGS: &[&str] = &[
    "ts", "tsx", "js", "jsx", "py", "go", "java", "cs", "c", "cpp", "php", "rs", "kt", "sh",
];

/// Hard cap applied to every read-query limit.
pub const DB_QUERY_LIMIT_MAX: usize = 500;

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Repositories to ingest.
    #[serde(default)]
    pub repos: Vec<RepoConfig>,

    /// Embedded database file location.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Process-wide policy defaults; repos may override.
    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub indexing: IndexingConfig,

    #[serde(default)]
    pub slice: SliceConfig,

    #[serde(default)]
    pub prefetch: PrefetchConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RepoConfig {
    /// Stable identifier, unique process-wide.
    pub repo_id: String,

    /// Repository root on disk.
    pub root_path: PathBuf,

    /// Active language tags; absent means the full supported set.
    #[serde(default)]
    pub languages: Option<Vec<String>>,

    /// Ignore globs, relative to the repo root.
    #[serde(default)]
    pub ignore: Vec<String>,

    /// Files larger than this are silently skipped. A file of exactly this
    /// size is still indexed.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Workspace roots whose build output directories are pruned.
    #[serde(default)]
    pub workspace_globs: Vec<String>,

    /// Per-repo policy override.
    #[serde(default)]
    pub policy: Option<PolicyConfig>,
}

impl RepoConfig {
    pub fn new(repo_id: impl Into<String>, root_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_id: repo_id.into(),
            root_path: root_path.into(),
            languages: None,
            ignore: Vec::new(),
            max_file_bytes: default_max_file_bytes(),
            workspace_globs: Vec::new(),
            policy: None,
        }
    }

    /// Active language tags, defaulting to every supported tag.
    pub fn active_languages(&self) -> Vec<String> {
        match &self.languages {
            Some(tags) if !tags.is_empty() => {
                tags.iter().map(|t| t.to_ascii_lowercase()).collect()
            }
            _ => LANGUAGE_TAGS.iter().map(|t| t.to_string()).collect(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyConfig {
    #[serde(default = "default_max_window_lines")]
    pub max_window_lines: u32,

    #[serde(default = "default_max_window_tokens")]
    pub max_window_tokens: u32,

    /// When set, context requests must name at least one identifier.
    #[serde(default)]
    pub require_identifiers: bool,

    /// Break-glass override for raw-code requests.
    #[serde(default)]
    pub allow_break_glass: bool,

    #[serde(default = "default_true")]
    pub default_deny_raw: bool,

    #[serde(default)]
    pub budget_caps: BudgetCaps,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BudgetCaps {
    #[serde(default = "default_max_cards")]
    pub max_cards: usize,

    #[serde(default = "default_max_estimated_tokens")]
    pub max_estimated_tokens: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct IndexingConfig {
    /// Parser pool size; 0 means `max(1, cores - 1)`.
    #[serde(default)]
    pub parser_workers: usize,

    #[serde(default = "default_io_limit")]
    pub file_io_limit: usize,

    #[serde(default = "default_io_limit")]
    pub db_io_limit: usize,

    /// Queue wait deadline for parse jobs, when set.
    #[serde(default)]
    pub queue_timeout_ms: Option<u64>,

    /// Execution deadline for parse jobs, when set.
    #[serde(default)]
    pub task_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SliceConfig {
    #[serde(default = "default_max_cards")]
    pub max_cards: usize,

    #[serde(default = "default_max_estimated_tokens")]
    pub max_estimated_tokens: usize,

    /// Entry candidates derived from task text when none are supplied.
    #[serde(default = "default_entry_candidates")]
    pub max_entry_candidates: usize,

    /// Cached slices kept per process.
    #[serde(default = "default_slice_cache_entries")]
    pub cache_entries: usize,

    /// Card cache bounds.
    #[serde(default = "default_card_cache_entries")]
    pub card_cache_entries: usize,

    #[serde(default = "default_card_cache_bytes")]
    pub card_cache_bytes: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PrefetchConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_min_samples")]
    pub min_samples_for_prediction: usize,

    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    #[serde(default = "default_true")]
    pub fallback_to_deterministic: bool,

    #[serde(default = "default_retrain_interval")]
    pub retrain_interval_ms: u64,

    /// Sliding window of trace events kept for training.
    #[serde(default = "default_trace_window")]
    pub trace_window: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module level overrides.
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_db_path() -> PathBuf {
    PathBuf::from(".codeslice/index.db")
}
fn default_max_file_bytes() -> u64 {
    1_048_576
}
fn default_max_window_lines() -> u32 {
    180
}
fn default_max_window_tokens() -> u32 {
    1400
}
fn default_max_cards() -> usize {
    60
}
fn default_max_estimated_tokens() -> usize {
    12_000
}
fn default_io_limit() -> usize {
    10
}
fn default_entry_candidates() -> usize {
    5
}
fn default_slice_cache_entries() -> usize {
    64
}
fn default_card_cache_entries() -> usize {
    512
}
fn default_card_cache_bytes() -> usize {
    4 * 1024 * 1024
}
fn default_min_samples() -> usize {
    20
}
fn default_confidence_threshold() -> f32 {
    0.55
}
fn default_retrain_interval() -> u64 {
    60_000
}
fn default_trace_window() -> usize {
    500
}
fn default_log_level() -> String {
    "warn".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            repos: Vec::new(),
            db_path: default_db_path(),
            policy: PolicyConfig::default(),
            indexing: IndexingConfig::default(),
            slice: SliceConfig::default(),
            prefetch: PrefetchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_window_lines: default_max_window_lines(),
            max_window_tokens: default_max_window_tokens(),
            require_identifiers: false,
            allow_break_glass: false,
            default_deny_raw: true,
            budget_caps: BudgetCaps::default(),
        }
    }
}

impl Default for BudgetCaps {
    fn default() -> Self {
        Self {
            max_cards: default_max_cards(),
            max_estimated_tokens: default_max_estimated_tokens(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            parser_workers: 0,
            file_io_limit: default_io_limit(),
            db_io_limit: default_io_limit(),
            queue_timeout_ms: None,
            task_timeout_ms: None,
        }
    }
}

impl Default for SliceConfig {
    fn default() -> Self {
        Self {
            max_cards: default_max_cards(),
            max_estimated_tokens: default_max_estimated_tokens(),
            max_entry_candidates: default_entry_candidates(),
            cache_entries: default_slice_cache_entries(),
            card_cache_entries: default_card_cache_entries(),
            card_cache_bytes: default_card_cache_bytes(),
        }
    }
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_samples_for_prediction: default_min_samples(),
            confidence_threshold: default_confidence_threshold(),
            fallback_to_deterministic: true,
            retrain_interval_ms: default_retrain_interval(),
            trace_window: default_trace_window(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Resolve the config file path: `SDL_CONFIG`, then `SDL_CONFIG_PATH`,
    /// then `codeslice.json` in the working directory.
    pub fn config_path() -> PathBuf {
        std::env::var("SDL_CONFIG")
            .or_else(|_| std::env::var("SDL_CONFIG_PATH"))
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("codeslice.json"))
    }

    /// Load from the resolved config path plus environment overrides.
    pub fn load() -> EngineResult<Self> {
        Self::load_from(Self::config_path())
    }

    /// Load from a specific file. A missing file yields pure defaults plus
    /// environment overrides.
    pub fn load_from(path: impl AsRef<std::path::Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let mut figment = Figment::new().merge(Serialized::defaults(Settings::default()));

        if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|e| EngineError::Config {
                reason: format!("cannot read '{}': {e}", path.display()),
            })?;
            let expanded = expand_env_vars(&raw)?;
            figment = figment.merge(Json::string(&expanded));
        }

        let settings: Settings = figment
            .merge(Env::prefixed("CODESLICE_").map(|key| {
                // `POLICY__MAX_WINDOW_LINES` -> `policy.maxWindowLines`,
                // matching the camelCase wire names.
                key.as_str()
                    .to_lowercase()
                    .split("__")
                    .map(camelize)
                    .collect::<Vec<_>>()
                    .join(".")
                    .into()
            }))
            .extract()
            .map_err(|e| EngineError::Config {
                reason: e.to_string(),
            })?;

        settings.validate()?;
        Ok(settings)
    }

    /// Aggregate-validate the whole tree; every failure is reported at once.
    pub fn validate(&self) -> EngineResult<()> {
        let mut failures = Vec::new();

        let mut seen = std::collections::HashSet::new();
        for (i, repo) in self.repos.iter().enumerate() {
            if repo.repo_id.trim().is_empty() {
                failures.push(FieldFailure {
                    path: format!("repos[{i}].repoId"),
                    reason: "must not be empty".into(),
                });
            }
            if !seen.insert(repo.repo_id.clone()) {
                failures.push(FieldFailure {
                    path: format!("repos[{i}].repoId"),
                    reason: format!("duplicate repo id '{}'", repo.repo_id),
                });
            }
            if repo.max_file_bytes == 0 {
                failures.push(FieldFailure {
                    path: format!("repos[{i}].maxFileBytes"),
                    reason: "must be positive".into(),
                });
            }
            if let Some(tags) = &repo.languages {
                for tag in tags {
                    if !LANGUAGE_TAGS.contains(&tag.to_ascii_lowercase().as_str()) {
                        failures.push(FieldFailure {
                            path: format!("repos[{i}].languages"),
                            reason: format!("unknown language tag '{tag}'"),
                        });
                    }
                }
            }
        }

        for (path, policy) in std::iter::once(("policy".to_string(), &self.policy)).chain(
            self.repos.iter().enumerate().filter_map(|(i, r)| {
                r.policy.as_ref().map(|p| (format!("repos[{i}].policy"), p))
            }),
        ) {
            if policy.max_window_lines == 0 {
                failures.push(FieldFailure {
                    path: format!("{path}.maxWindowLines"),
                    reason: "must be positive".into(),
                });
            }
            if policy.budget_caps.max_cards == 0 {
                failures.push(FieldFailure {
                    path: format!("{path}.budgetCaps.maxCards"),
                    reason: "must be positive".into(),
                });
            }
        }

        if !(0.0..=1.0).contains(&self.prefetch.confidence_threshold) {
            failures.push(FieldFailure {
                path: "prefetch.confidenceThreshold".into(),
                reason: "must be within [0, 1]".into(),
            });
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Validation { failures })
        }
    }

    /// Effective policy for a repo, honoring per-repo overrides.
    pub fn policy_for(&self, repo_id: &str) -> &PolicyConfig {
        self.repos
            .iter()
            .find(|r| r.repo_id == repo_id)
            .and_then(|r| r.policy.as_ref())
            .unwrap_or(&self.policy)
    }

    pub fn repo(&self, repo_id: &str) -> Option<&RepoConfig> {
        self.repos.iter().find(|r| r.repo_id == repo_id)
    }

    /// Parser pool size honoring the `0 = auto` convention.
    pub fn parser_pool_size(&self) -> usize {
        if self.indexing.parser_workers > 0 {
            self.indexing.parser_workers
        } else {
            num_cpus::get().saturating_sub(1).max(1)
        }
    }
}

/// `max_window_lines` -> `maxWindowLines`.
fn camelize(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut upper_next = false;
    for c in segment.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Expand `${NAME}` references from the process environment.
///
/// An undefined variable is an error naming the variable, so configs fail
/// loudly rather than producing half-expanded paths.
pub fn expand_env_vars(raw: &str) -> EngineResult<String> {
    let pattern = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static pattern compiles");
    let mut missing: Option<String> = None;
    let expanded = pattern.replace_all(raw, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        match std::env::var(name) {
            Ok(value) => value,
            Err(_) => {
                if missing.is_none() {
                    missing = Some(name.to_string());
                }
                String::new()
            }
        }
    });
    if let Some(name) = missing {
        return Err(EngineError::ConfigEnvExpansion { name });
    }
    Ok(expanded.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.policy.max_window_lines, 180);
        assert_eq!(settings.policy.max_window_tokens, 1400);
        assert_eq!(settings.policy.budget_caps.max_cards, 60);
        assert_eq!(settings.policy.budget_caps.max_estimated_tokens, 12_000);
        assert!(settings.policy.default_deny_raw);
        assert_eq!(settings.indexing.file_io_limit, 10);
        assert_eq!(settings.indexing.db_io_limit, 10);
        assert!(settings.parser_pool_size() >= 1);
    }

    #[test]
    fn load_from_json_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("codeslice.json");
        fs::write(
            &path,
            r#"{
                "repos": [{
                    "repoId": "demo",
                    "rootPath": "/tmp/demo",
                    "languages": ["ts", "py"],
                    "ignore": ["vendor/**"],
                    "maxFileBytes": 2048
                }],
                "dbPath": "/tmp/demo.db",
                "policy": {"maxWindowLines": 120}
            }"#,
        )
        .unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.repos.len(), 1);
        assert_eq!(settings.repos[0].repo_id, "demo");
        assert_eq!(settings.repos[0].max_file_bytes, 2048);
        assert_eq!(
            settings.repos[0].active_languages(),
            vec!["ts".to_string(), "py".to_string()]
        );
        assert_eq!(settings.policy.max_window_lines, 120);
        // Untouched fields keep their defaults.
        assert_eq!(settings.policy.max_window_tokens, 1400);
    }

    #[test]
    fn absent_languages_means_full_set() {
        let repo = RepoConfig::new("r", "/tmp/r");
        assert_eq!(repo.active_languages().len(), LANGUAGE_TAGS.len());
    }

    #[test]
    fn env_expansion_succeeds_and_fails_loudly() {
        unsafe {
            std::env::set_var("CODESLICE_TEST_ROOT", "/srv/code");
        }
        let expanded = expand_env_vars(r#"{"rootPath": "${CODESLICE_TEST_ROOT}/app"}"#).unwrap();
        assert!(expanded.contains("/srv/code/app"));

        let err = expand_env_vars(r#"{"x": "${CODESLICE_TEST_UNDEFINED_VAR}"}"#).unwrap_err();
        match err {
            EngineError::ConfigEnvExpansion { name } => {
                assert_eq!(name, "CODESLICE_TEST_UNDEFINED_VAR")
            }
            other => panic!("unexpected error: {other}"),
        }
        unsafe {
            std::env::remove_var("CODESLICE_TEST_ROOT");
        }
    }

    #[test]
    fn validation_aggregates_failures() {
        let mut settings = Settings::default();
        let mut repo = RepoConfig::new("", "/tmp/x");
        repo.max_file_bytes = 0;
        repo.languages = Some(vec!["cobol".into()]);
        settings.repos.push(repo);

        let err = settings.validate().unwrap_err();
        match err {
            EngineError::Validation { failures } => {
                assert_eq!(failures.len(), 3);
                assert!(failures.iter().any(|f| f.path == "repos[0].maxFileBytes"));
                assert!(failures.iter().any(|f| f.path == "repos[0].languages"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn camelize_segments() {
        assert_eq!(camelize("max_window_lines"), "maxWindowLines");
        assert_eq!(camelize("policy"), "policy");
        assert_eq!(camelize("db_path"), "dbPath");
    }

    #[test]
    fn env_variables_override_file_values() {
        unsafe {
            std::env::set_var("CODESLICE_INDEXING__FILE_IO_LIMIT", "22");
        }
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("codeslice.json");
        fs::write(&path, r#"{"indexing": {"fileIoLimit": 4}}"#).unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.indexing.file_io_limit, 22);
        unsafe {
            std::env::remove_var("CODESLICE_INDEXING__FILE_IO_LIMIT");
        }
    }

    #[test]
    fn per_repo_policy_override() {
        let mut settings = Settings::default();
        let mut repo = RepoConfig::new("strict", "/tmp/s");
        repo.policy = Some(PolicyConfig {
            max_window_lines: 60,
            ..PolicyConfig::default()
        });
        settings.repos.push(repo);
        settings.repos.push(RepoConfig::new("lax", "/tmp/l"));

        assert_eq!(settings.policy_for("strict").max_window_lines, 60);
        assert_eq!(settings.policy_for("lax").max_window_lines, 180);
        assert_eq!(settings.policy_for("unknown").max_window_lines, 180);
    }
}
