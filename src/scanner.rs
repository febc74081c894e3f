//! Source file discovery for a configured repository.
//!
//! Emits only files whose extension belongs to the repo's active language
//! set, prunes ignore globs and derived workspace build directories, drops
//! oversized files, and returns repo-relative forward-slash paths sorted
//! lexicographically so index runs are deterministic.

use crate::config::RepoConfig;
use crate::error::{EngineError, EngineResult};
use ignore::WalkBuilder;
use ignore::overrides::OverrideBuilder;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Directories pruned under every workspace glob.
const WORKSPACE_EXCLUDED_DIRS: &[&str] = &["node_modules", "dist", "build"];

/// One candidate source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    /// Repo-relative path, forward slashes on every host OS.
    pub rel_path: String,
    pub byte_size: u64,
    /// Modification time, seconds since the epoch; 0 when unavailable.
    pub mtime: i64,
}

/// Enumerate candidate files under `root` for the given repo config.
pub fn scan(root: &Path, config: &RepoConfig) -> EngineResult<Vec<ScannedFile>> {
    let extensions = config.active_languages();

    let mut overrides = OverrideBuilder::new(root);
    for pattern in &config.ignore {
        overrides.add(&format!("!{pattern}")).map_err(|e| EngineError::Config {
            reason: format!("invalid ignore glob '{pattern}': {e}"),
        })?;
    }
    for ws in &config.workspace_globs {
        let ws = ws.trim_end_matches('/');
        for dir in WORKSPACE_EXCLUDED_DIRS {
            let pattern = format!("!{ws}/**/{dir}/**");
            overrides.add(&pattern).map_err(|e| EngineError::Config {
                reason: format!("invalid workspace glob '{ws}': {e}"),
            })?;
        }
    }
    let overrides = overrides.build().map_err(|e| EngineError::Config {
        reason: format!("failed to build ignore overrides: {e}"),
    })?;

    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(true)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(true)
        .follow_links(false)
        .require_git(false)
        .overrides(overrides);

    let mut files = Vec::new();
    for entry in builder.build() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::debug!(target: "scanner", "skipping unreadable entry: {err}");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }

        let path = entry.path();
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !extensions.iter().any(|tag| tag.eq_ignore_ascii_case(ext)) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                tracing::debug!(target: "scanner", "no metadata for {}: {err}", path.display());
                continue;
            }
        };
        // A file of exactly max_file_bytes is still indexed.
        if metadata.len() > config.max_file_bytes {
            tracing::debug!(
                target: "scanner",
                "dropping oversized file {} ({} bytes)",
                path.display(),
                metadata.len()
            );
            continue;
        }

        let rel = path.strip_prefix(root).unwrap_or(path);
        let rel_path = normalize_rel_path(rel);
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        files.push(ScannedFile {
            rel_path,
            byte_size: metadata.len(),
            mtime,
        });
    }

    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(files)
}

/// Forward-slash normalization regardless of host separator.
pub fn normalize_rel_path(path: &Path) -> String {
    let mut out = String::new();
    for component in path.components() {
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(&component.as_os_str().to_string_lossy());
    }
    out
}
