//! Hard safety constraints over the selector's output.
//!
//! The guard is an ordered pipeline of override rules, each a plain function
//! taking and returning a candidate decision. Rules run in a fixed order and
//! every later rule sees the candidate produced by the earlier ones, so an
//! override can itself be overridden (a rollback substitution is still
//! subject to the banned-arm check, for example). Each rule is exported so it
//! can be unit-tested in isolation; [`run_pipeline`] is the composition the
//! controller uses.
//!
//! Order:
//! 1. [`rollback_override`]: rollback active, so the baseline wins
//!    unconditionally.
//! 2. [`profile_downgrade`]: tier disallowed by the deployment profile, so
//!    the next lighter allowed tier substitutes.
//! 3. [`error_rate_guard`]: error-rate spike, so the heaviest tier is
//!    excluded and the middle tier penalized in the replacement search.
//! 4. [`banned_arm_guard`]: banned arm, so the best remaining eligible arm
//!    substitutes.

use serde::{Deserialize, Serialize};

use crate::{ArmChoice, ArmId, ArmRegistry, DecisionNote, Error, Tier};

/// Deployment-profile constraints: which tiers and arms are permitted at all,
/// and how the error-rate guard behaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyProfile {
    /// Allowed tiers, indexed by [`Tier::index`].
    pub allowed_tiers: [bool; 3],
    /// Arms that must never be returned.
    pub banned_arms: Vec<ArmId>,
    /// Recent error rate above this triggers the error-rate guard.
    pub max_error_rate: f64,
    /// Score penalty applied to middle-tier arms when the error-rate guard
    /// searches for a replacement (penalized, not excluded).
    pub middle_tier_penalty: f64,
}

impl Default for SafetyProfile {
    fn default() -> Self {
        Self {
            allowed_tiers: [true, true, true],
            banned_arms: Vec::new(),
            max_error_rate: 0.25,
            middle_tier_penalty: 0.1,
        }
    }
}

impl SafetyProfile {
    /// A conservative profile for production deployments: the heaviest tier
    /// is never permitted.
    pub fn production() -> Self {
        Self {
            allowed_tiers: [true, true, false],
            ..Self::default()
        }
    }

    pub fn tier_allowed(&self, tier: Tier) -> bool {
        self.allowed_tiers[tier.index()]
    }

    pub fn is_banned(&self, id: &ArmId) -> bool {
        self.banned_arms.contains(id)
    }

    /// Startup validation: the fast tier must always be allowed, otherwise
    /// the guard has no floor to degrade to.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.tier_allowed(Tier::FastHeuristic) {
            return Err(Error::InvalidConfig(
                "safety profile must allow the fast-heuristic tier".to_string(),
            ));
        }
        if !self.max_error_rate.is_finite() || !(0.0..=1.0).contains(&self.max_error_rate) {
            return Err(Error::InvalidConfig(format!(
                "max_error_rate={} outside [0,1]",
                self.max_error_rate
            )));
        }
        Ok(())
    }
}

/// Read-only inputs shared by every guard rule.
#[derive(Debug, Clone, Copy)]
pub struct GuardContext<'a> {
    pub registry: &'a ArmRegistry,
    /// Eligible arms for this snapshot, stable order.
    pub eligible: &'a [ArmId],
    /// Concrete arm behind the baseline recommendation.
    pub baseline: &'a ArmId,
    /// Confidence carried by a baseline substitution.
    pub baseline_confidence: f64,
    /// Recent error rate from the feature snapshot.
    pub error_rate: f64,
    /// Whether the degradation detector currently has rollback active.
    pub rollback_active: bool,
    pub profile: &'a SafetyProfile,
}

/// One override rule: takes a candidate, returns a (possibly replaced)
/// candidate.
pub type GuardRule = fn(ArmChoice, &GuardContext<'_>) -> ArmChoice;

/// The ordered pipeline applied after selection, before returning a decision.
pub const PIPELINE: [GuardRule; 4] = [
    rollback_override,
    profile_downgrade,
    error_rate_guard,
    banned_arm_guard,
];

/// Apply every rule in order, each seeing the previous rule's output.
pub fn run_pipeline(candidate: ArmChoice, ctx: &GuardContext<'_>) -> ArmChoice {
    PIPELINE
        .iter()
        .fold(candidate, |c, rule| rule(c, ctx))
}

/// Rule 1: while rollback is active the learner is bypassed entirely; the
/// baseline recommendation is returned no matter what the selector chose.
pub fn rollback_override(mut c: ArmChoice, ctx: &GuardContext<'_>) -> ArmChoice {
    if !ctx.rollback_active {
        return c;
    }
    c.arm = ctx.baseline.clone();
    c.explored = false;
    c.confidence = ctx.baseline_confidence;
    c.notes.push(DecisionNote::RollbackOverride);
    c
}

/// Rule 2: a tier the deployment profile disallows is downgraded to the next
/// lighter allowed tier (walking down until one is permitted; the fast tier
/// always is, enforced by [`SafetyProfile::validate`]).
pub fn profile_downgrade(mut c: ArmChoice, ctx: &GuardContext<'_>) -> ArmChoice {
    if ctx.profile.tier_allowed(c.arm.tier) {
        return c;
    }
    let from = c.arm.tier;
    let mut target = c.arm.tier;
    while let Some(lighter) = target.lighter() {
        target = lighter;
        if ctx.profile.tier_allowed(target) {
            break;
        }
    }
    let replacement = ctx
        .eligible
        .iter()
        .find(|id| id.tier == target)
        .cloned()
        .or_else(|| ctx.registry.representative(target, ctx.profile))
        .unwrap_or_else(|| ctx.baseline.clone());
    c.arm = replacement;
    c.notes.push(DecisionNote::ProfileDowngrade { from, to: target });
    c
}

/// Rule 3: when the recent error rate spikes, the heaviest tier is forcibly
/// excluded. The replacement search runs over the remaining eligible arms
/// with the middle tier penalized (not eliminated), so a clearly better
/// middle-tier arm can still win over a mediocre fast one.
pub fn error_rate_guard(mut c: ArmChoice, ctx: &GuardContext<'_>) -> ArmChoice {
    if ctx.error_rate <= ctx.profile.max_error_rate || c.arm.tier != Tier::AdaptiveHybrid {
        return c;
    }
    let from = c.arm.clone();
    let penalty = ctx.profile.middle_tier_penalty.max(0.0);
    let replacement = ctx
        .registry
        .best_by_mean(
            ctx.eligible.iter().filter(|id| id.tier != Tier::AdaptiveHybrid),
            |id| {
                if id.tier == Tier::InfoTheoretic {
                    penalty
                } else {
                    0.0
                }
            },
        )
        .unwrap_or_else(|| ctx.baseline.clone());
    c.arm = replacement;
    c.notes.push(DecisionNote::ErrorRateGuard { from });
    c
}

/// Rule 4: a banned arm is substituted with the best remaining eligible arm.
///
/// Eligibility filtering already excludes banned arms from selection; this
/// rule is the backstop for candidates produced by earlier overrides or by a
/// ban list that changed between selection and guarding.
pub fn banned_arm_guard(mut c: ArmChoice, ctx: &GuardContext<'_>) -> ArmChoice {
    if !ctx.profile.is_banned(&c.arm) {
        return c;
    }
    let from = c.arm.clone();
    let replacement = ctx
        .registry
        .best_by_mean(
            ctx.eligible.iter().filter(|id| !ctx.profile.is_banned(id)),
            |_| 0.0,
        )
        .unwrap_or_else(|| ctx.baseline.clone());
    c.arm = replacement;
    c.notes.push(DecisionNote::BannedArmReplaced { from });
    c
}
