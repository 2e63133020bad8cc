//! Baseline tier scoring policy.
//!
//! This is the deterministic, hand-tuned layer underneath the learner. It maps
//! a feature snapshot to a score per tier and a single baseline
//! recommendation, used both as the fallback when learning is bypassed
//! (rollback, empty eligible set) and as one arm the learner can choose.
//!
//! The policy is expressed as data: base preferences, task-affinity lookups,
//! and eligibility thresholds live in per-tier tables on [`TierPolicy`]
//! rather than in branching code, so the whole thing is auditable and tunable
//! from configuration. [`score_tiers`] itself is a pure function so it can be
//! unit-tested with literal feature vectors.

use serde::{Deserialize, Serialize};

use crate::{FeatureSnapshot, Tier, TIEBREAK_EPS};

/// Tunable tables and weights for the baseline policy.
///
/// Per-tier arrays are indexed by [`Tier::index`]; the affinity table is
/// indexed `[tier][task]` with [`crate::TaskKind::index`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierPolicy {
    /// Fixed base preference per tier.
    pub base_preference: [f64; 3],
    /// Task-category affinity per tier (lookup table, `[tier][task]`).
    pub task_affinity: [[f64; 7]; 3],
    /// Weight on `memory_scale * heaviness`: favors heavier tiers as memory grows.
    pub scale_weight: f64,
    /// Weight on `entropy * heaviness`: favors heavier tiers as memory disorganizes.
    pub entropy_weight: f64,
    /// Bonus when the prior decision used this tier and succeeded.
    pub continuity_bonus: f64,
    /// Minimum `memory_scale` per tier; below it the tier is ineligible.
    pub min_memory_scale: [f64; 3],
    /// Minimum `session_scale` per tier; below it the tier is ineligible.
    pub min_session_scale: [f64; 3],
    /// A present cost budget below this forces the fast-heuristic tier.
    pub cost_budget_floor: f64,
    /// A present latency budget (ms) below this forces the fast-heuristic tier.
    pub latency_budget_floor_ms: f64,
    /// Confidence reported for budget-forced decisions. Must be >= 0.9.
    pub forced_fast_confidence: f64,
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self {
            base_preference: [0.30, 0.20, 0.10],
            // [tier][task]: store, retrieve, consolidate, light-reflect,
            // deep-reflect, graph-update, context-select.
            task_affinity: [
                [0.30, 0.25, 0.05, 0.15, 0.00, 0.10, 0.25],
                [0.10, 0.20, 0.30, 0.20, 0.15, 0.20, 0.15],
                [0.00, 0.10, 0.25, 0.10, 0.40, 0.30, 0.10],
            ],
            scale_weight: 0.5,
            entropy_weight: 0.4,
            continuity_bonus: 0.10,
            min_memory_scale: [0.0, 0.05, 0.15],
            min_session_scale: [0.0, 0.0, 0.10],
            cost_budget_floor: 1.0,
            latency_budget_floor_ms: 50.0,
            forced_fast_confidence: 0.95,
        }
    }
}

impl TierPolicy {
    /// Whether a tier's scale minimums are satisfied by this snapshot.
    ///
    /// Mirrored by arm eligibility: an arm is only selectable when its tier
    /// would be eligible here.
    pub fn tier_eligible(&self, tier: Tier, snap: &FeatureSnapshot) -> bool {
        let i = tier.index();
        snap.memory_scale >= self.min_memory_scale[i]
            && snap.session_scale >= self.min_session_scale[i]
    }

    /// Whether a present budget is tight enough to force the fast tier.
    pub fn budget_forces_fast(&self, snap: &FeatureSnapshot) -> bool {
        let cost_tight = snap
            .cost_budget
            .map(|b| b < self.cost_budget_floor)
            .unwrap_or(false);
        let latency_tight = snap
            .latency_budget_ms
            .map(|b| b < self.latency_budget_floor_ms)
            .unwrap_or(false);
        cost_tight || latency_tight
    }

    fn validate_table(name: &str, xs: &[f64]) -> Result<(), crate::Error> {
        for x in xs {
            if !x.is_finite() {
                return Err(crate::Error::InvalidConfig(format!(
                    "{name} contains a non-finite entry"
                )));
            }
        }
        Ok(())
    }

    /// Startup validation. Non-finite tables or a forced confidence below 0.9
    /// are configuration errors.
    pub fn validate(&self) -> Result<(), crate::Error> {
        Self::validate_table("base_preference", &self.base_preference)?;
        for row in &self.task_affinity {
            Self::validate_table("task_affinity", row)?;
        }
        Self::validate_table("min_memory_scale", &self.min_memory_scale)?;
        Self::validate_table("min_session_scale", &self.min_session_scale)?;
        if !(self.forced_fast_confidence.is_finite() && self.forced_fast_confidence >= 0.9) {
            return Err(crate::Error::InvalidConfig(format!(
                "forced_fast_confidence={} must be >= 0.9",
                self.forced_fast_confidence
            )));
        }
        if self.min_memory_scale[0] > 0.0 || self.min_session_scale[0] > 0.0 {
            return Err(crate::Error::InvalidConfig(
                "the fast-heuristic tier must always be eligible (zero minimums)".to_string(),
            ));
        }
        Ok(())
    }
}

/// The baseline recommendation for one decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineChoice {
    /// The recommended tier.
    pub tier: Tier,
    /// Confidence in the recommendation, in `[0, 1]`.
    pub confidence: f64,
    /// True when a tight budget forced the fast tier, bypassing scoring.
    pub budget_forced: bool,
}

/// Output of [`score_tiers`]: per-tier scores plus the baseline choice.
#[derive(Debug, Clone, PartialEq)]
pub struct TierScores {
    /// Score per tier ([`Tier::index`] order); `None` when the tier's
    /// eligibility minimums were unmet.
    pub scores: [Option<f64>; 3],
    /// The single best tier under the baseline policy.
    pub baseline: BaselineChoice,
}

impl TierScores {
    /// Tiers whose minimums were satisfied, lightest first.
    pub fn eligible_tiers(&self) -> Vec<Tier> {
        Tier::ALL
            .into_iter()
            .filter(|t| self.scores[t.index()].is_some())
            .collect()
    }
}

/// Score all tiers for a snapshot and produce the baseline recommendation.
///
/// Pure function: same policy + same snapshot → same output, no hidden state.
///
/// Scoring per tier: base preference + task affinity + scale and entropy
/// terms weighted by tier heaviness + a continuity bonus when the prior
/// decision used this tier and succeeded. Eligibility thresholds apply after
/// scoring (an ineligible tier gets `None`). A tight budget overrides
/// everything: the fast-heuristic tier is returned with the fixed forced
/// confidence. Ties break toward the lighter tier.
///
/// The fast tier has zero minimums (enforced by [`TierPolicy::validate`]), so
/// a baseline recommendation always exists.
pub fn score_tiers(policy: &TierPolicy, snap: &FeatureSnapshot) -> TierScores {
    // Hard constraint first: tight budgets bypass scoring entirely.
    if policy.budget_forces_fast(snap) {
        let mut scores = [None; 3];
        scores[Tier::FastHeuristic.index()] = Some(policy.base_preference[0]);
        return TierScores {
            scores,
            baseline: BaselineChoice {
                tier: Tier::FastHeuristic,
                confidence: policy.forced_fast_confidence,
                budget_forced: true,
            },
        };
    }

    let task = snap.task.index();
    let mut scores = [None; 3];
    for tier in Tier::ALL {
        if !policy.tier_eligible(tier, snap) {
            continue;
        }
        let i = tier.index();
        let mut s = policy.base_preference[i] + policy.task_affinity[i][task];
        s += policy.scale_weight * snap.memory_scale * tier.heaviness();
        s += policy.entropy_weight * snap.entropy * tier.heaviness();
        if snap.prior_tier == Some(tier) && snap.prior_tier_succeeded {
            s += policy.continuity_bonus;
        }
        scores[i] = Some(s);
    }

    // Best tier, ties broken toward the lighter one (ALL iterates lightest
    // first and the comparison is strict beyond the tie epsilon).
    let mut best_tier = Tier::FastHeuristic;
    let mut best_score = f64::NEG_INFINITY;
    let mut second_score = f64::NEG_INFINITY;
    for tier in Tier::ALL {
        if let Some(s) = scores[tier.index()] {
            if s > best_score + TIEBREAK_EPS {
                second_score = best_score;
                best_score = s;
                best_tier = tier;
            } else if s > second_score {
                second_score = s;
            }
        }
    }

    // Confidence from the winner's margin over the runner-up, mapped into
    // [0.5, 0.9]. A lone eligible tier gets the top of the band.
    let confidence = if second_score == f64::NEG_INFINITY {
        0.9
    } else {
        let margin = (best_score - second_score) / (best_score.abs() + second_score.abs() + 1e-9);
        0.5 + 0.4 * margin.clamp(0.0, 1.0)
    };

    TierScores {
        scores,
        baseline: BaselineChoice {
            tier: best_tier,
            confidence,
            budget_forced: false,
        },
    }
}
