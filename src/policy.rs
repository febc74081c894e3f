//! Policy evaluation for context requests.
//!
//! Rules run in ascending priority; the first failing rule terminates the
//! evaluation with a denial or a downgrade to a cheaper rung. Every decision
//! carries an audit hash over the request coordinates and the evidence used.

use crate::config::PolicyConfig;
use crate::error::{EngineError, next_best_action_for};
use crate::identity;
use crate::slice::SliceBudget;
use crate::types::{Rung, SymbolId};
use serde::{Deserialize, Serialize};

/// Priority bands: 1-10 critical, 11-20 feature, 21-30 optional.
pub const PRIORITY_CRITICAL_MAX: u8 = 10;
pub const PRIORITY_FEATURE_MAX: u8 = 20;

/// One incoming request, as the rules see it.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Tool name, e.g. `getCard`, `getSlice`, `getRaw`.
    pub request_type: String,
    pub repo_id: String,
    pub symbol_id: Option<SymbolId>,
    pub expected_lines: Option<u32>,
    pub estimated_tokens: Option<u32>,
    pub identifiers_to_find: Vec<String>,
    pub budget: Option<SliceBudget>,
    /// Raw source requested rather than derived context.
    pub raw_requested: bool,
    /// Explicit break-glass override supplied by the caller.
    pub break_glass: bool,
}

/// Result of one rule evaluation.
#[derive(Debug, Clone)]
pub struct RuleOutcome {
    pub passed: bool,
    pub evidence: String,
    pub downgrade_to: Option<Rung>,
}

impl RuleOutcome {
    pub fn pass(evidence: impl Into<String>) -> Self {
        Self {
            passed: true,
            evidence: evidence.into(),
            downgrade_to: None,
        }
    }

    pub fn fail(evidence: impl Into<String>) -> Self {
        Self {
            passed: false,
            evidence: evidence.into(),
            downgrade_to: None,
        }
    }

    pub fn downgrade(evidence: impl Into<String>, to: Rung) -> Self {
        Self {
            passed: false,
            evidence: evidence.into(),
            downgrade_to: Some(to),
        }
    }
}

/// A policy rule. Priority orders evaluation; disabled rules are skipped.
pub trait PolicyRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn priority(&self) -> u8;
    fn enabled(&self) -> bool {
        true
    }
    fn evaluate(&self, context: &RequestContext, config: &PolicyConfig) -> RuleOutcome;
}

/// Terminal decision for a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum Verdict {
    Approve,
    Deny { rule: String },
    Downgrade { rule: String, to: Rung },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDecision {
    pub verdict: Verdict,
    pub evidence: Vec<String>,
    pub audit_hash: String,
    pub timestamp_ms: i64,
}

impl PolicyDecision {
    pub fn is_approved(&self) -> bool {
        self.verdict == Verdict::Approve
    }

    /// Decision label for the audit log.
    pub fn decision_label(&self) -> String {
        match &self.verdict {
            Verdict::Approve => "approve".to_string(),
            Verdict::Deny { .. } => "deny".to_string(),
            Verdict::Downgrade { to, .. } => format!("downgrade-to-{}", to.as_str()),
        }
    }

    /// Convert a non-approval into the structured policy error.
    pub fn to_error(&self) -> Option<EngineError> {
        match &self.verdict {
            Verdict::Approve => None,
            Verdict::Deny { rule } => Some(EngineError::Policy {
                message: format!("request denied by rule '{rule}'"),
                code: "POLICY_DENIED".into(),
                next_best_action: None,
                required_fields_for_next: Vec::new(),
            }),
            Verdict::Downgrade { rule, to } => Some(EngineError::Policy {
                message: format!("request downgraded to {} by rule '{rule}'", to.as_str()),
                code: "POLICY_DOWNGRADE".into(),
                next_best_action: Some(next_best_action_for(*to).to_string()),
                required_fields_for_next: vec!["symbolId".into(), "repoId".into()],
            }),
        }
    }
}

// ---------------------------------------------------------------------
// Standard rules
// ---------------------------------------------------------------------

/// P1: requested window must fit the configured line ceiling.
pub struct MaxWindowLines;

impl PolicyRule for MaxWindowLines {
    fn name(&self) -> &'static str {
        "maxWindowLines"
    }
    fn priority(&self) -> u8 {
        1
    }
    fn evaluate(&self, context: &RequestContext, config: &PolicyConfig) -> RuleOutcome {
        match context.expected_lines {
            Some(lines) if lines > config.max_window_lines => RuleOutcome::downgrade(
                format!(
                    "expectedLines {lines} exceeds maxWindowLines {}",
                    config.max_window_lines
                ),
                Rung::Skeleton,
            ),
            Some(lines) => RuleOutcome::pass(format!(
                "expectedLines {lines} within {}",
                config.max_window_lines
            )),
            None => RuleOutcome::pass("no expectedLines supplied"),
        }
    }
}

/// P2: token ceiling; failures downgrade to skeleton.
pub struct MaxWindowTokens;

impl PolicyRule for MaxWindowTokens {
    fn name(&self) -> &'static str {
        "maxWindowTokens"
    }
    fn priority(&self) -> u8 {
        2
    }
    fn evaluate(&self, context: &RequestContext, config: &PolicyConfig) -> RuleOutcome {
        match context.estimated_tokens {
            Some(tokens) if tokens > config.max_window_tokens => RuleOutcome::downgrade(
                format!(
                    "estimatedTokens {tokens} exceeds maxWindowTokens {}",
                    config.max_window_tokens
                ),
                Rung::Skeleton,
            ),
            Some(tokens) => RuleOutcome::pass(format!(
                "estimatedTokens {tokens} within {}",
                config.max_window_tokens
            )),
            None => RuleOutcome::pass("no estimatedTokens supplied"),
        }
    }
}

/// P11: when configured, requests must name identifiers to find.
pub struct RequireIdentifiers;

impl PolicyRule for RequireIdentifiers {
    fn name(&self) -> &'static str {
        "requireIdentifiers"
    }
    fn priority(&self) -> u8 {
        11
    }
    fn evaluate(&self, context: &RequestContext, config: &PolicyConfig) -> RuleOutcome {
        if config.require_identifiers && context.identifiers_to_find.is_empty() {
            RuleOutcome::fail("identifiersToFind is empty but required")
        } else {
            RuleOutcome::pass("identifiers requirement satisfied")
        }
    }
}

/// P12: slice budgets may not exceed the configured caps.
pub struct BudgetCaps;

impl PolicyRule for BudgetCaps {
    fn name(&self) -> &'static str {
        "budgetCaps"
    }
    fn priority(&self) -> u8 {
        12
    }
    fn evaluate(&self, context: &RequestContext, config: &PolicyConfig) -> RuleOutcome {
        let Some(budget) = &context.budget else {
            return RuleOutcome::pass("no budget supplied");
        };
        let caps = &config.budget_caps;
        if budget.max_cards > caps.max_cards
            || budget.max_estimated_tokens > caps.max_estimated_tokens
        {
            RuleOutcome::fail(format!(
                "budget {}x{} exceeds caps {}x{}",
                budget.max_cards,
                budget.max_estimated_tokens,
                caps.max_cards,
                caps.max_estimated_tokens
            ))
        } else {
            RuleOutcome::pass("budget within caps")
        }
    }
}

/// P13: raw code is denied unless break-glass is both allowed and invoked.
pub struct DefaultDenyRaw;

impl PolicyRule for DefaultDenyRaw {
    fn name(&self) -> &'static str {
        "defaultDenyRaw"
    }
    fn priority(&self) -> u8 {
        13
    }
    fn evaluate(&self, context: &RequestContext, config: &PolicyConfig) -> RuleOutcome {
        if !context.raw_requested || !config.default_deny_raw {
            return RuleOutcome::pass("not a raw request");
        }
        if config.allow_break_glass && context.break_glass {
            RuleOutcome::pass("raw request allowed via break-glass")
        } else {
            RuleOutcome::fail("raw code requests are denied by default")
        }
    }
}

/// Prioritized rule list with first-failure semantics.
pub struct PolicyEngine {
    rules: Vec<Box<dyn PolicyRule>>,
}

impl PolicyEngine {
    /// Engine with the standard rule set.
    pub fn with_default_rules() -> Self {
        let mut engine = Self { rules: Vec::new() };
        engine.add_rule(Box::new(MaxWindowLines));
        engine.add_rule(Box::new(MaxWindowTokens));
        engine.add_rule(Box::new(RequireIdentifiers));
        engine.add_rule(Box::new(BudgetCaps));
        engine.add_rule(Box::new(DefaultDenyRaw));
        engine
    }

    pub fn add_rule(&mut self, rule: Box<dyn PolicyRule>) {
        self.rules.push(rule);
        self.rules.sort_by_key(|r| r.priority());
    }

    pub fn evaluate(&self, context: &RequestContext, config: &PolicyConfig) -> PolicyDecision {
        let timestamp_ms = chrono::Utc::now().timestamp_millis();
        let mut evidence = Vec::new();
        let mut verdict = Verdict::Approve;

        for rule in &self.rules {
            if !rule.enabled() {
                continue;
            }
            let outcome = rule.evaluate(context, config);
            evidence.push(format!("{}: {}", rule.name(), outcome.evidence));
            if !outcome.passed {
                verdict = match outcome.downgrade_to {
                    Some(to) => Verdict::Downgrade {
                        rule: rule.name().to_string(),
                        to,
                    },
                    None => Verdict::Deny {
                        rule: rule.name().to_string(),
                    },
                };
                break;
            }
        }

        let audit_hash = audit_hash(timestamp_ms, context, &evidence);
        PolicyDecision {
            verdict,
            evidence,
            audit_hash,
            timestamp_ms,
        }
    }
}

fn audit_hash(timestamp_ms: i64, context: &RequestContext, evidence: &[String]) -> String {
    let payload = format!(
        "{}:{}:{}:{}:{}",
        timestamp_ms,
        context.request_type,
        context.repo_id,
        context
            .symbol_id
            .as_ref()
            .map(|id| id.as_str())
            .unwrap_or(""),
        evidence.join("|"),
    );
    identity::hash_content(payload.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> PolicyEngine {
        PolicyEngine::with_default_rules()
    }

    fn context() -> RequestContext {
        RequestContext {
            request_type: "getCard".into(),
            repo_id: "r".into(),
            ..RequestContext::default()
        }
    }

    #[test]
    fn clean_request_approves_with_full_evidence() {
        let decision = engine().evaluate(&context(), &PolicyConfig::default());
        assert!(decision.is_approved());
        // Every standard rule contributed evidence.
        assert_eq!(decision.evidence.len(), 5);
        assert_eq!(decision.audit_hash.len(), 64);
    }

    #[test]
    fn window_lines_boundary() {
        let config = PolicyConfig::default();
        let mut ctx = context();

        ctx.expected_lines = Some(180);
        assert!(engine().evaluate(&ctx, &config).is_approved());

        ctx.expected_lines = Some(181);
        let decision = engine().evaluate(&ctx, &config);
        match &decision.verdict {
            Verdict::Downgrade { rule, to } => {
                assert_eq!(rule, "maxWindowLines");
                assert_eq!(*to, Rung::Skeleton);
            }
            other => panic!("expected downgrade, got {other:?}"),
        }
        assert_eq!(decision.decision_label(), "downgrade-to-skeleton");
    }

    #[test]
    fn oversized_window_downgrades_with_next_best_action() {
        let mut ctx = context();
        ctx.expected_lines = Some(200);
        let decision = engine().evaluate(&ctx, &PolicyConfig::default());
        let error = decision.to_error().unwrap();
        match error {
            EngineError::Policy {
                next_best_action,
                required_fields_for_next,
                ..
            } => {
                assert_eq!(next_best_action.as_deref(), Some("getSkeleton"));
                assert!(required_fields_for_next.contains(&"symbolId".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn token_ceiling_downgrades_to_skeleton() {
        let mut ctx = context();
        ctx.estimated_tokens = Some(1401);
        let decision = engine().evaluate(&ctx, &PolicyConfig::default());
        assert!(matches!(
            decision.verdict,
            Verdict::Downgrade {
                to: Rung::Skeleton,
                ..
            }
        ));
    }

    #[test]
    fn first_failure_wins_by_priority() {
        // Both the line rule (P1) and raw rule (P13) would fail; P1 decides.
        let mut ctx = context();
        ctx.expected_lines = Some(500);
        ctx.raw_requested = true;
        let decision = engine().evaluate(&ctx, &PolicyConfig::default());
        match &decision.verdict {
            Verdict::Downgrade { rule, .. } => assert_eq!(rule, "maxWindowLines"),
            other => panic!("expected line rule to fire first, got {other:?}"),
        }
        // Evaluation stopped at the first failure.
        assert_eq!(decision.evidence.len(), 1);
    }

    #[test]
    fn require_identifiers_only_when_configured() {
        let mut config = PolicyConfig::default();
        let ctx = context();
        assert!(engine().evaluate(&ctx, &config).is_approved());

        config.require_identifiers = true;
        let decision = engine().evaluate(&ctx, &config);
        assert!(matches!(decision.verdict, Verdict::Deny { .. }));

        let mut with_ids = context();
        with_ids.identifiers_to_find = vec!["loadConfig".into()];
        assert!(engine().evaluate(&with_ids, &config).is_approved());
    }

    #[test]
    fn budget_caps_enforced() {
        let mut ctx = context();
        ctx.budget = Some(SliceBudget {
            max_cards: 61,
            max_estimated_tokens: 12_000,
        });
        let decision = engine().evaluate(&ctx, &PolicyConfig::default());
        match &decision.verdict {
            Verdict::Deny { rule } => assert_eq!(rule, "budgetCaps"),
            other => panic!("expected deny, got {other:?}"),
        }

        ctx.budget = Some(SliceBudget {
            max_cards: 60,
            max_estimated_tokens: 12_000,
        });
        assert!(engine().evaluate(&ctx, &PolicyConfig::default()).is_approved());
    }

    #[test]
    fn raw_requests_need_break_glass_on_both_sides() {
        let mut config = PolicyConfig::default();
        let mut ctx = context();
        ctx.request_type = "getRaw".into();
        ctx.raw_requested = true;

        // Denied by default.
        assert!(matches!(
            engine().evaluate(&ctx, &config).verdict,
            Verdict::Deny { .. }
        ));

        // Caller break-glass alone is not enough.
        ctx.break_glass = true;
        assert!(matches!(
            engine().evaluate(&ctx, &config).verdict,
            Verdict::Deny { .. }
        ));

        // Config must also allow it.
        config.allow_break_glass = true;
        assert!(engine().evaluate(&ctx, &config).is_approved());
    }
}
