//! Decision envelope for controller outputs.
//!
//! Every call to `decide` produces one audit-friendly record: it can be
//! logged for debugging, replayed for offline evaluation, and referenced
//! later when the outcome for the operation arrives.
//!
//! This module provides the [`DecisionRecord`] struct and a typed
//! [`DecisionNote`] list that the selector and safety guard attach to explain
//! why a choice happened. Overrides are never silent: whenever the returned
//! arm differs from what the raw policy computed, a note says which rule fired.

use serde::{Deserialize, Serialize};

use crate::{FeatureSnapshot, Tier};

/// Stable identity of a selectable arm: one (tier, strategy) pair.
///
/// Arms are defined at configuration time and never created or destroyed at
/// runtime; only their `enabled` flag toggles. The `Ord` derive gives the
/// stable catalog order used for explore-first selection and tie-breaking
/// (lighter tier first, then strategy name).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArmId {
    pub tier: Tier,
    pub strategy: String,
}

impl ArmId {
    pub fn new(tier: Tier, strategy: impl Into<String>) -> Self {
        Self {
            tier,
            strategy: strategy.into(),
        }
    }
}

impl std::fmt::Display for ArmId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.tier, self.strategy)
    }
}

/// Audit-friendly notes attached to a decision.
///
/// Notes are small, typed, and stable; new conditions get new variants
/// rather than repurposed existing ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DecisionNote {
    /// A present cost or latency budget was below the configured floor, so
    /// the fast-heuristic tier was forced and scoring was bypassed entirely.
    BudgetForcedFastTier,

    /// The eligible arm set was empty; the baseline recommendation was used
    /// without invoking the bandit.
    NoEligibleArms,

    /// The selector picked an untried arm (stable-order exploration).
    ExploreFirst,

    /// The selector explored via upper-confidence-bound scoring.
    UcbExploration {
        score: f64,
        /// Whether the context bucket contributed a bonus term.
        context_bonus_applied: bool,
    },

    /// The rolling exploration budget was exhausted, so an exploration round
    /// was converted into exploitation.
    ExplorationBudgetExhausted,

    /// The selector exploited the best known mean.
    Exploitation {
        /// True when the per-context mean (not the global mean) drove the pick.
        context_informed: bool,
    },

    /// The selector returned the baseline recommendation verbatim
    /// (`trust_baseline` exploitation mode).
    BaselineTrusted,

    /// Rollback is active: the learner was bypassed in favor of the baseline.
    RollbackOverride,

    /// The deployment profile disallowed the selected tier; the decision was
    /// downgraded to the next lighter allowed tier.
    ProfileDowngrade { from: Tier, to: Tier },

    /// Recent error rate exceeded the threshold; the heaviest tier was
    /// excluded and the replacement search penalized the middle tier.
    ErrorRateGuard { from: ArmId },

    /// The selected arm was on the banned list and was substituted with the
    /// best remaining eligible arm.
    BannedArmReplaced { from: ArmId },
}

/// A single controller decision.
///
/// Created once per `decide` call, handed to the caller, referenced later by
/// sequence number when the outcome arrives, then archived by the monitor.
/// Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Monotonically increasing decision sequence number; the outcome
    /// reference for [`crate::Controller::record_outcome`].
    pub seq: u64,
    /// The arm the caller should execute with.
    pub arm: ArmId,
    /// Whether this pick was exploration (true) or exploitation (false).
    pub explored: bool,
    /// Confidence in the chosen arm, in `[0, 1]`.
    pub confidence: f64,
    /// The feature snapshot this decision was made from.
    pub snapshot: FeatureSnapshot,
    /// Audit notes describing why this choice happened.
    pub notes: Vec<DecisionNote>,
}
