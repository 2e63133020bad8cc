//! Reward computation from operation outcomes.
//!
//! `reward = w_q * quality − w_c * cost − w_s * stability − penalty`.
//!
//! Quality aggregates the caller's retrieval metrics; cost combines the
//! tier's cost multiplier with the observed spend and a latency-overrun ramp;
//! stability folds in drift measurements and level churn; catastrophic
//! penalties are fixed, additive deductions for severe binary failures.
//! The result is roughly in `[−10, +1]` and is deliberately **not** clamped
//! so downstream statistics retain severity information.

use serde::{Deserialize, Serialize};

use crate::{Error, OutcomeRecord, Tier};

/// Weights and penalty values for the reward calculator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardConfig {
    /// Weight on the quality term.
    pub quality_weight: f64,
    /// Weight on the cost term.
    pub cost_weight: f64,
    /// Weight on the stability term.
    pub stability_weight: f64,

    /// Quality component weights. Documented to sum to 1.0 so the quality
    /// term reads as a weighted average of `[0, 1]` metrics; this is not
    /// enforced numerically.
    pub rr_weight: f64,
    pub hit_weight: f64,
    pub precision_weight: f64,
    pub orr_weight: f64,

    /// Cost multiplier per tier ([`Tier::index`] order), applied to the
    /// observed cost units.
    pub tier_cost_multiplier: [f64; 3],
    /// Latency ramp start as a fraction of the latency budget.
    pub latency_soft_ratio: f64,
    /// Scale of the latency-overrun penalty.
    pub latency_overrun_weight: f64,
    /// Quadratic acceleration factor applied beyond 100% of the budget.
    pub latency_accel: f64,

    /// Stability component weights.
    pub memory_drift_weight: f64,
    pub structural_drift_weight: f64,
    pub churn_weight: f64,
    /// Number of recent decisions the level-churn fraction is computed over.
    pub churn_window: usize,

    /// Catastrophic penalties (additive; multiple conditions stack).
    pub penalty_zero_relevance: f64,
    pub penalty_error: f64,
    pub penalty_budget_violation: f64,
    pub penalty_quality_collapse: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            quality_weight: 1.0,
            cost_weight: 0.3,
            stability_weight: 0.2,
            // Sums to 1.0: rr dominates because ranking quality is the
            // primary signal the memory system optimizes.
            rr_weight: 0.4,
            hit_weight: 0.25,
            precision_weight: 0.2,
            orr_weight: 0.15,
            tier_cost_multiplier: [1.0, 2.5, 6.0],
            latency_soft_ratio: 0.8,
            latency_overrun_weight: 0.5,
            latency_accel: 4.0,
            memory_drift_weight: 0.4,
            structural_drift_weight: 0.3,
            churn_weight: 0.3,
            churn_window: 10,
            penalty_zero_relevance: 2.0,
            penalty_error: 3.0,
            penalty_budget_violation: 2.0,
            penalty_quality_collapse: 2.0,
        }
    }
}

impl RewardConfig {
    /// Startup validation: weights and penalties must be finite and
    /// non-negative, the soft ratio must sit in `(0, 1]`.
    pub fn validate(&self) -> Result<(), Error> {
        let named = [
            ("quality_weight", self.quality_weight),
            ("cost_weight", self.cost_weight),
            ("stability_weight", self.stability_weight),
            ("rr_weight", self.rr_weight),
            ("hit_weight", self.hit_weight),
            ("precision_weight", self.precision_weight),
            ("orr_weight", self.orr_weight),
            ("latency_overrun_weight", self.latency_overrun_weight),
            ("latency_accel", self.latency_accel),
            ("memory_drift_weight", self.memory_drift_weight),
            ("structural_drift_weight", self.structural_drift_weight),
            ("churn_weight", self.churn_weight),
            ("penalty_zero_relevance", self.penalty_zero_relevance),
            ("penalty_error", self.penalty_error),
            ("penalty_budget_violation", self.penalty_budget_violation),
            ("penalty_quality_collapse", self.penalty_quality_collapse),
        ];
        for (name, x) in named {
            if !x.is_finite() || x < 0.0 {
                return Err(Error::InvalidConfig(format!("{name}={x} must be >= 0")));
            }
        }
        for m in self.tier_cost_multiplier {
            if !m.is_finite() || m < 0.0 {
                return Err(Error::InvalidConfig(
                    "tier_cost_multiplier entries must be >= 0".to_string(),
                ));
            }
        }
        if !self.latency_soft_ratio.is_finite() || !(0.0..=1.0).contains(&self.latency_soft_ratio)
        {
            return Err(Error::InvalidConfig(format!(
                "latency_soft_ratio={} outside [0,1]",
                self.latency_soft_ratio
            )));
        }
        if self.churn_window == 0 {
            return Err(Error::InvalidConfig("churn_window must be >= 1".to_string()));
        }
        Ok(())
    }
}

/// The reward components, kept for monitoring/debugging; `reward` is the
/// scalar the learner consumes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardBreakdown {
    pub quality: f64,
    pub cost: f64,
    pub stability: f64,
    pub penalty: f64,
    pub reward: f64,
}

/// Level churn over a recent tier history: the fraction of adjacent decision
/// pairs that used a different tier. Empty or single-entry histories churn 0.
pub fn level_churn(recent_tiers: &[Tier]) -> f64 {
    if recent_tiers.len() < 2 {
        return 0.0;
    }
    let switches = recent_tiers
        .windows(2)
        .filter(|w| w[0] != w[1])
        .count();
    switches as f64 / (recent_tiers.len() - 1) as f64
}

/// Latency-overrun penalty: zero below `soft_ratio` of the budget, linear up
/// to 100%, quadratic acceleration beyond it. `None` budget means no penalty.
fn latency_penalty(cfg: &RewardConfig, latency_ms: f64, budget_ms: Option<f64>) -> f64 {
    let Some(budget) = budget_ms else {
        return 0.0;
    };
    if budget <= 0.0 || !latency_ms.is_finite() {
        return 0.0;
    }
    let ratio = latency_ms / budget;
    let soft = cfg.latency_soft_ratio;
    if ratio <= soft {
        return 0.0;
    }
    let ramp_span = (1.0 - soft).max(1e-9);
    let ramp = ((ratio - soft) / ramp_span).min(1.0);
    let overrun = (ratio - 1.0).max(0.0);
    cfg.latency_overrun_weight * (ramp + overrun + cfg.latency_accel * overrun * overrun)
}

/// Compute the reward for one outcome.
///
/// `tier` is the tier that actually executed; `cost_budget`/`latency_budget`
/// come from the decision's feature snapshot; `churn` is the level-churn
/// fraction over the controller's recent tier history (see [`level_churn`]).
pub fn compute_reward(
    cfg: &RewardConfig,
    tier: Tier,
    outcome: &OutcomeRecord,
    cost_budget: Option<f64>,
    latency_budget_ms: Option<f64>,
    churn: f64,
) -> RewardBreakdown {
    let quality = cfg.rr_weight * outcome.reciprocal_rank
        + cfg.hit_weight * outcome.hit_rate
        + cfg.precision_weight * outcome.precision
        + cfg.orr_weight * outcome.optimal_retrieval_ratio;

    let cost = cfg.tier_cost_multiplier[tier.index()] * outcome.cost_units.max(0.0)
        + latency_penalty(cfg, outcome.latency_ms, latency_budget_ms);

    let stability = cfg.memory_drift_weight * outcome.memory_drift.max(0.0)
        + cfg.structural_drift_weight * outcome.structural_drift.max(0.0)
        + cfg.churn_weight * churn.clamp(0.0, 1.0);

    // Catastrophic conditions stack.
    let mut penalty = 0.0;
    if outcome.results_expected && outcome.reciprocal_rank <= 0.0 {
        penalty += cfg.penalty_zero_relevance;
    }
    if outcome.error {
        penalty += cfg.penalty_error;
    }
    if let Some(budget) = cost_budget {
        if outcome.cost_units > budget {
            penalty += cfg.penalty_budget_violation;
        }
    }
    if outcome.baseline_quality > 0.0 && quality < 0.5 * outcome.baseline_quality {
        penalty += cfg.penalty_quality_collapse;
    }

    let reward = cfg.quality_weight * quality
        - cfg.cost_weight * cost
        - cfg.stability_weight * stability
        - penalty;

    RewardBreakdown {
        quality,
        cost,
        stability,
        penalty,
        reward,
    }
}
