//! Default call-resolution policy and import path candidate expansion.
//!
//! Resolution consults three maps built from the persisted graph, in order:
//! namespace imports for qualified callees, explicit imports for bare names,
//! then the whole-repo name index as a heuristic. Ambiguity is resolved
//! deterministically (lexicographically smallest symbol id) but recorded so
//! the confidence calibration can penalize it.

use crate::types::{ResolutionStrategy, SymbolId};
use std::collections::HashMap;

use super::adapter::{CallResolution, CallSite};

/// Name maps supplied to call resolution.
#[derive(Debug, Default, Clone)]
pub struct ResolutionContext {
    /// Explicitly imported bare names in the calling file.
    pub imported_name_to_symbol_ids: HashMap<String, Vec<SymbolId>>,
    /// Namespace alias -> member name -> symbol id, per calling file.
    pub namespace_imports: HashMap<String, HashMap<String, SymbolId>>,
    /// Every symbol in the repo by bare name.
    pub name_to_symbol_ids: HashMap<String, Vec<SymbolId>>,
}

/// Apply the shared resolution policy to one call site.
pub fn resolve_call_default(call: &CallSite, context: &ResolutionContext) -> CallResolution {
    // Qualified callees resolve only through a namespace import; a qualified
    // name whose head is not a known namespace stays unresolved rather than
    // guessing across receivers.
    if let Some((ns, member)) = call.qualified_parts() {
        if let Some(members) = context.namespace_imports.get(ns) {
            if let Some(target) = members.get(member) {
                return CallResolution {
                    strategy: ResolutionStrategy::Exact,
                    target_symbol_ids: vec![target.clone()],
                    candidate_count: 1,
                    base_confidence: None,
                };
            }
        }
        return unresolved(call);
    }

    if let Some(candidates) = context.imported_name_to_symbol_ids.get(&call.callee) {
        match candidates.len() {
            0 => {}
            1 => {
                return CallResolution {
                    strategy: ResolutionStrategy::Exact,
                    target_symbol_ids: vec![candidates[0].clone()],
                    candidate_count: 1,
                    base_confidence: None,
                };
            }
            n => return ambiguous(candidates, n),
        }
    }

    if let Some(candidates) = context.name_to_symbol_ids.get(&call.callee) {
        match candidates.len() {
            0 => {}
            1 => {
                return CallResolution {
                    strategy: ResolutionStrategy::Heuristic,
                    target_symbol_ids: vec![candidates[0].clone()],
                    candidate_count: 1,
                    base_confidence: None,
                };
            }
            n => return ambiguous(candidates, n),
        }
    }

    unresolved(call)
}

fn ambiguous(candidates: &[SymbolId], count: usize) -> CallResolution {
    let chosen = candidates
        .iter()
        .min()
        .expect("candidate set is non-empty")
        .clone();
    CallResolution {
        strategy: ResolutionStrategy::Heuristic,
        target_symbol_ids: vec![chosen],
        candidate_count: count,
        base_confidence: None,
    }
}

fn unresolved(call: &CallSite) -> CallResolution {
    CallResolution {
        strategy: ResolutionStrategy::Unresolved,
        target_symbol_ids: vec![SymbolId::unresolved("call", &call.callee)],
        candidate_count: 0,
        base_confidence: None,
    }
}

/// Expand a relative import specifier into candidate repo paths.
///
/// For `../config` imported from `src/mcp/tools/list.ts` this yields the
/// bare form `src/mcp/config` plus `.ts`/`.js` and `index` variants, with
/// duplicates removed and forward slashes throughout.
pub fn relative_import_candidates(
    importer_rel_path: &str,
    specifier: &str,
    extensions: &[&str],
) -> Vec<String> {
    if !specifier.starts_with('.') {
        return Vec::new();
    }

    let importer_dir = match importer_rel_path.rsplit_once('/') {
        Some((dir, _)) => dir,
        None => "",
    };

    let mut segments: Vec<&str> = importer_dir.split('/').filter(|s| !s.is_empty()).collect();
    for part in specifier.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    let base = segments.join("/");

    let mut candidates = Vec::new();
    let mut push = |candidate: String| {
        if !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    };

    push(base.clone());
    for ext in extensions {
        push(format!("{base}.{ext}"));
    }
    for ext in extensions {
        push(format!("{base}/index.{ext}"));
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Range;

    fn call(callee: &str) -> CallSite {
        CallSite {
            caller: None,
            callee: callee.to_string(),
            range: Range::default(),
        }
    }

    fn sid(s: &str) -> SymbolId {
        SymbolId::new(s)
    }

    #[test]
    fn qualified_resolves_through_namespace_import() {
        let mut context = ResolutionContext::default();
        let mut members = HashMap::new();
        members.insert("readFile".to_string(), sid("target-1"));
        context.namespace_imports.insert("fs".to_string(), members);

        let resolution = resolve_call_default(&call("fs.readFile"), &context);
        assert_eq!(resolution.strategy, ResolutionStrategy::Exact);
        assert_eq!(resolution.target_symbol_ids, vec![sid("target-1")]);
    }

    #[test]
    fn qualified_with_unknown_namespace_is_unresolved() {
        let context = ResolutionContext::default();
        let resolution = resolve_call_default(&call("mystery.thing"), &context);
        assert_eq!(resolution.strategy, ResolutionStrategy::Unresolved);
        assert_eq!(
            resolution.target_symbol_ids[0].as_str(),
            "unresolved:call:mystery.thing"
        );
    }

    #[test]
    fn single_import_is_exact() {
        let mut context = ResolutionContext::default();
        context
            .imported_name_to_symbol_ids
            .insert("loadConfig".to_string(), vec![sid("t1")]);

        let resolution = resolve_call_default(&call("loadConfig"), &context);
        assert_eq!(resolution.strategy, ResolutionStrategy::Exact);
        assert_eq!(resolution.candidate_count, 1);
    }

    #[test]
    fn unique_repo_name_is_heuristic() {
        let mut context = ResolutionContext::default();
        context
            .name_to_symbol_ids
            .insert("helper".to_string(), vec![sid("only")]);

        let resolution = resolve_call_default(&call("helper"), &context);
        assert_eq!(resolution.strategy, ResolutionStrategy::Heuristic);
        assert!(resolution.is_resolved());
    }

    #[test]
    fn ambiguous_picks_lexicographically_smallest() {
        let mut context = ResolutionContext::default();
        context.name_to_symbol_ids.insert(
            "foo".to_string(),
            vec![sid("ccc"), sid("aaa"), sid("bbb")],
        );

        let resolution = resolve_call_default(&call("foo"), &context);
        assert_eq!(resolution.strategy, ResolutionStrategy::Heuristic);
        assert_eq!(resolution.target_symbol_ids, vec![sid("aaa")]);
        assert_eq!(resolution.candidate_count, 3);
    }

    #[test]
    fn unknown_name_synthesizes_placeholder() {
        let context = ResolutionContext::default();
        let resolution = resolve_call_default(&call("ghost"), &context);
        assert_eq!(resolution.strategy, ResolutionStrategy::Unresolved);
        assert_eq!(
            resolution.target_symbol_ids[0].as_str(),
            "unresolved:call:ghost"
        );
        assert!(!resolution.is_resolved());
    }

    #[test]
    fn relative_candidates_match_expected_set() {
        let candidates = relative_import_candidates(
            "src/mcp/tools/list.ts",
            "../config",
            &["ts", "js"],
        );
        assert_eq!(
            candidates,
            vec![
                "src/mcp/config".to_string(),
                "src/mcp/config.ts".to_string(),
                "src/mcp/config.js".to_string(),
                "src/mcp/config/index.ts".to_string(),
                "src/mcp/config/index.js".to_string(),
            ]
        );
        assert!(candidates.iter().all(|c| !c.contains('\\')));
    }

    #[test]
    fn non_relative_specifiers_yield_nothing() {
        assert!(relative_import_candidates("src/a.ts", "lodash", &["ts"]).is_empty());
    }

    #[test]
    fn current_dir_specifier() {
        let candidates = relative_import_candidates("src/a.ts", "./util", &["ts"]);
        assert_eq!(candidates[0], "src/util");
        assert_eq!(candidates[1], "src/util.ts");
    }
}
