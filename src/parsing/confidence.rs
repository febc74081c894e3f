//! Edge confidence calibration.
//!
//! Baselines per resolution strategy, an ambiguity penalty proportional to
//! the candidate count, and a clamp into [0, 1]. An exact edge can never
//! fall below 0.7 because the penalty only applies to heuristic ambiguity.

use crate::types::ResolutionStrategy;

use super::adapter::CallResolution;

pub const EXACT_BASE: f32 = 0.92;
pub const HEURISTIC_BASE: f32 = 0.72;
pub const UNRESOLVED_BASE: f32 = 0.20;

/// Penalty per extra candidate, capped.
const AMBIGUITY_PENALTY_PER_CANDIDATE: f32 = 0.04;
const AMBIGUITY_PENALTY_CAP: f32 = 0.35;

/// Calibrate a resolution into a confidence score.
pub fn calibrate_confidence(resolution: &CallResolution) -> f32 {
    let base = resolution.base_confidence.unwrap_or(match resolution.strategy {
        ResolutionStrategy::Exact => EXACT_BASE,
        ResolutionStrategy::Heuristic => HEURISTIC_BASE,
        ResolutionStrategy::Unresolved => UNRESOLVED_BASE,
    });

    // Only heuristic resolutions carry ambiguous candidate sets.
    let penalty = if resolution.strategy == ResolutionStrategy::Heuristic
        && resolution.candidate_count > 1
    {
        (resolution.candidate_count as f32 * AMBIGUITY_PENALTY_PER_CANDIDATE)
            .min(AMBIGUITY_PENALTY_CAP)
    } else {
        0.0
    };

    (base - penalty).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SymbolId;

    fn resolution(
        strategy: ResolutionStrategy,
        candidate_count: usize,
        base_confidence: Option<f32>,
    ) -> CallResolution {
        CallResolution {
            strategy,
            target_symbol_ids: vec![SymbolId::new("x")],
            candidate_count,
            base_confidence,
        }
    }

    #[test]
    fn baselines() {
        assert_eq!(
            calibrate_confidence(&resolution(ResolutionStrategy::Exact, 1, None)),
            0.92
        );
        assert_eq!(
            calibrate_confidence(&resolution(ResolutionStrategy::Heuristic, 1, None)),
            0.72
        );
        assert_eq!(
            calibrate_confidence(&resolution(ResolutionStrategy::Unresolved, 0, None)),
            0.20
        );
    }

    #[test]
    fn three_candidate_ambiguity() {
        // 0.72 - min(0.35, 3 * 0.04) = 0.60
        let confidence =
            calibrate_confidence(&resolution(ResolutionStrategy::Heuristic, 3, None));
        assert!((confidence - 0.60).abs() < 1e-6);
    }

    #[test]
    fn penalty_caps_at_035() {
        // 20 candidates would be 0.80 of penalty uncapped.
        let confidence =
            calibrate_confidence(&resolution(ResolutionStrategy::Heuristic, 20, None));
        assert!((confidence - (0.72 - 0.35)).abs() < 1e-6);
    }

    #[test]
    fn base_override_replaces_baseline() {
        let confidence = calibrate_confidence(&resolution(
            ResolutionStrategy::Heuristic,
            3,
            Some(0.9),
        ));
        assert!((confidence - (0.9 - 0.12)).abs() < 1e-6);
    }

    #[test]
    fn clamped_to_unit_interval() {
        let confidence = calibrate_confidence(&resolution(
            ResolutionStrategy::Unresolved,
            20,
            Some(0.1),
        ));
        assert!(confidence >= 0.0);

        let confidence = calibrate_confidence(&resolution(
            ResolutionStrategy::Exact,
            1,
            Some(2.0),
        ));
        assert_eq!(confidence, 1.0);
    }

    #[test]
    fn exact_edges_stay_above_policy_floor() {
        for count in [1usize, 2, 5, 50] {
            let resolution = resolution(ResolutionStrategy::Exact, count, None);
            assert!(calibrate_confidence(&resolution) >= 0.7);
        }
    }
}
