//! Append-only audit trail over the store.
//!
//! Recording never propagates failures: a broken audit write is traced and
//! swallowed so it cannot take down the operation being audited.

use crate::config::DB_QUERY_LIMIT_MAX;
use crate::error::EngineResult;
use crate::policy::PolicyDecision;
use crate::store::{AuditRecord, Store};
use serde_json::json;

/// Facade for appending and reading audit events.
#[derive(Clone)]
pub struct AuditLog {
    store: Store,
}

impl AuditLog {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Record a tool call. Never fails the caller.
    pub fn record_tool_call(
        &self,
        tool: &str,
        repo_id: Option<&str>,
        symbol_id: Option<&str>,
        details: serde_json::Value,
    ) {
        if let Err(e) = self
            .store
            .append_audit(tool, "invoked", repo_id, symbol_id, &details)
        {
            tracing::error!(target: "audit", "failed to record tool call '{tool}': {e}");
        }
    }

    /// Record a policy decision with its audit hash.
    pub fn record_policy_decision(
        &self,
        tool: &str,
        repo_id: Option<&str>,
        symbol_id: Option<&str>,
        decision: &PolicyDecision,
    ) {
        let details = json!({
            "auditHash": decision.audit_hash,
            "evidence": decision.evidence,
        });
        if let Err(e) = self.store.append_audit(
            tool,
            &decision.decision_label(),
            repo_id,
            symbol_id,
            &details,
        ) {
            tracing::error!(target: "audit", "failed to record policy decision: {e}");
        }
    }

    /// Events newest-first; limit capped at [`DB_QUERY_LIMIT_MAX`].
    pub fn trail(
        &self,
        repo_id: Option<&str>,
        limit: Option<usize>,
    ) -> EngineResult<Vec<AuditRecord>> {
        self.store
            .audit_trail(repo_id, Some(limit.unwrap_or(DB_QUERY_LIMIT_MAX)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;
    use crate::policy::{PolicyEngine, RequestContext};

    #[test]
    fn records_and_reads_back_in_order() {
        let store = Store::in_memory().unwrap();
        let audit = AuditLog::new(store);

        audit.record_tool_call("getCard", Some("r"), Some("s1"), json!({"n": 1}));
        audit.record_tool_call("getSlice", Some("r"), None, json!({"n": 2}));

        let trail = audit.trail(Some("r"), None).unwrap();
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[0].tool, "getSlice");
        assert_eq!(trail[1].tool, "getCard");
        assert_eq!(trail[1].decision, "invoked");
    }

    #[test]
    fn policy_decisions_carry_their_hash() {
        let store = Store::in_memory().unwrap();
        let audit = AuditLog::new(store);

        let engine = PolicyEngine::with_default_rules();
        let decision = engine.evaluate(
            &RequestContext {
                request_type: "getCard".into(),
                repo_id: "r".into(),
                ..RequestContext::default()
            },
            &PolicyConfig::default(),
        );
        audit.record_policy_decision("getCard", Some("r"), None, &decision);

        let trail = audit.trail(Some("r"), Some(1)).unwrap();
        assert_eq!(trail[0].decision, "approve");
        assert_eq!(
            trail[0].details["auditHash"].as_str().unwrap(),
            decision.audit_hash
        );
    }

    #[test]
    fn limit_is_capped() {
        let store = Store::in_memory().unwrap();
        let audit = AuditLog::new(store);
        audit.record_tool_call("x", None, None, json!({}));
        let trail = audit.trail(None, Some(10_000)).unwrap();
        assert_eq!(trail.len(), 1);
    }
}
