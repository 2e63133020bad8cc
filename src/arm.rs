//! Arm catalog and online statistics.
//!
//! An arm is one (tier, strategy) pair. The catalog is fixed at configuration
//! time; learning only ever updates counters and the `enabled` flag. The
//! registry is explicitly owned by the controller instance (never
//! package-level state) so multiple controllers can coexist per tenant or per
//! test without interference.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{ArmId, Error, FeatureSnapshot, SafetyProfile, Tier, TierPolicy};

/// Configuration-time definition of one arm, optionally seeded with prior
/// pseudo-observations so a fresh deployment does not start from a flat
/// landscape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmSpec {
    pub id: ArmId,
    /// Arms start enabled unless configured otherwise.
    pub enabled: bool,
    /// Prior pseudo-pull count folded into the initial stats.
    pub prior_pulls: u64,
    /// Prior mean reward paired with `prior_pulls`.
    pub prior_mean: f64,
}

impl ArmSpec {
    pub fn new(tier: Tier, strategy: impl Into<String>) -> Self {
        Self {
            id: ArmId::new(tier, strategy),
            enabled: true,
            prior_pulls: 0,
            prior_mean: 0.0,
        }
    }

    /// Seed the arm with prior pseudo-observations.
    pub fn with_prior(mut self, pulls: u64, mean: f64) -> Self {
        self.prior_pulls = pulls;
        self.prior_mean = mean;
        self
    }
}

/// Per-context-bucket running statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextStats {
    pub pulls: u64,
    pub mean_reward: f64,
}

/// Online statistics for one arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmStats {
    /// Total times this arm was chosen and received an outcome.
    pub pulls: u64,
    /// Sum of all observed rewards.
    pub cumulative_reward: f64,
    /// Running mean reward (`cumulative_reward / pulls` when pulls > 0).
    pub mean_reward: f64,
    /// Disabled arms are never eligible.
    pub enabled: bool,
    /// Per-context-bucket statistics, keyed by [`crate::context_key`] output.
    ///
    /// The key space is bounded by the discretization granularity
    /// ([`crate::CONTEXT_KEY_SPACE`]), so this map never needs eviction.
    pub context: BTreeMap<String, ContextStats>,
}

impl ArmStats {
    fn from_spec(spec: &ArmSpec) -> Self {
        let pulls = spec.prior_pulls;
        let mean = if pulls > 0 { spec.prior_mean } else { 0.0 };
        Self {
            pulls,
            cumulative_reward: mean * pulls as f64,
            mean_reward: mean,
            enabled: spec.enabled,
            context: BTreeMap::new(),
        }
    }

    /// Context-bucket mean when the bucket has at least `min_obs`
    /// observations, else `None`.
    pub fn context_mean(&self, key: &str, min_obs: u64) -> Option<f64> {
        self.context
            .get(key)
            .filter(|c| c.pulls >= min_obs)
            .map(|c| c.mean_reward)
    }
}

/// The fixed catalog of arms plus their online statistics.
#[derive(Debug, Clone)]
pub struct ArmRegistry {
    arms: BTreeMap<ArmId, ArmStats>,
}

impl ArmRegistry {
    /// Build a registry from the configured catalog.
    ///
    /// An empty catalog or a duplicate (tier, strategy) pair is a fatal
    /// configuration error.
    pub fn from_catalog(specs: &[ArmSpec]) -> Result<Self, Error> {
        if specs.is_empty() {
            return Err(Error::InvalidConfig("arm catalog is empty".to_string()));
        }
        let mut arms = BTreeMap::new();
        for spec in specs {
            if arms
                .insert(spec.id.clone(), ArmStats::from_spec(spec))
                .is_some()
            {
                return Err(Error::InvalidConfig(format!(
                    "duplicate arm in catalog: {}",
                    spec.id
                )));
            }
        }
        Ok(Self { arms })
    }

    /// Arm ids in stable catalog order (lighter tier first, then strategy).
    pub fn arm_ids(&self) -> impl Iterator<Item = &ArmId> + '_ {
        self.arms.keys()
    }

    /// Number of arms in the catalog.
    pub fn len(&self) -> usize {
        self.arms.len()
    }

    /// Whether the catalog is empty (never true after construction).
    pub fn is_empty(&self) -> bool {
        self.arms.is_empty()
    }

    /// Statistics for one arm.
    pub fn stats(&self, id: &ArmId) -> Option<&ArmStats> {
        self.arms.get(id)
    }

    /// Total pulls across all arms.
    pub fn total_pulls(&self) -> u64 {
        self.arms.values().map(|s| s.pulls).sum()
    }

    /// Toggle an arm's enabled flag. Unknown ids are ignored (the catalog is
    /// fixed; there is nothing to create).
    pub fn set_enabled(&mut self, id: &ArmId, enabled: bool) {
        if let Some(s) = self.arms.get_mut(id) {
            s.enabled = enabled;
        }
    }

    /// Fold one observed reward into an arm's global and per-context stats.
    ///
    /// Unknown ids are ignored; outcomes may race a configuration reload.
    pub fn record(&mut self, id: &ArmId, reward: f64, context_key: &str) {
        let Some(s) = self.arms.get_mut(id) else {
            return;
        };
        if !reward.is_finite() {
            return;
        }
        s.pulls = s.pulls.saturating_add(1);
        s.cumulative_reward += reward;
        s.mean_reward = s.cumulative_reward / s.pulls as f64;

        let c = s.context.entry(context_key.to_string()).or_default();
        c.pulls = c.pulls.saturating_add(1);
        // Incremental running mean keeps the bucket independent of the
        // global cumulative sum.
        c.mean_reward += (reward - c.mean_reward) / c.pulls as f64;
    }

    /// Overwrite one arm's learned counters from persisted state.
    ///
    /// The `enabled` flag is configuration, not learned state, so it is left
    /// untouched. Unknown ids are ignored: a persisted arm that is no longer
    /// in the catalog simply drops its history.
    pub fn restore_counters(
        &mut self,
        id: &ArmId,
        pulls: u64,
        cumulative_reward: f64,
        mean_reward: f64,
        context: BTreeMap<String, ContextStats>,
    ) {
        let Some(s) = self.arms.get_mut(id) else {
            return;
        };
        if !cumulative_reward.is_finite() || !mean_reward.is_finite() {
            return;
        }
        s.pulls = pulls;
        s.cumulative_reward = cumulative_reward;
        s.mean_reward = mean_reward;
        s.context = context
            .into_iter()
            .filter(|(_, c)| c.mean_reward.is_finite())
            .collect();
    }

    /// Arms selectable for this snapshot, in stable order.
    ///
    /// Eligibility requires: arm enabled, tier allowed under the deployment
    /// profile, arm not banned, and the tier's scale minimums satisfied
    /// (mirroring the baseline scorer's thresholds).
    pub fn eligible(
        &self,
        snap: &FeatureSnapshot,
        policy: &TierPolicy,
        profile: &SafetyProfile,
    ) -> Vec<ArmId> {
        self.arms
            .iter()
            .filter(|(id, stats)| {
                stats.enabled
                    && profile.tier_allowed(id.tier)
                    && !profile.is_banned(id)
                    && policy.tier_eligible(id.tier, snap)
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// The enabled arm with the highest mean reward among `candidates`,
    /// scored with an optional per-tier penalty. Ties break toward the
    /// lighter tier (stable map order) via strict comparison.
    pub fn best_by_mean<'a>(
        &self,
        candidates: impl Iterator<Item = &'a ArmId>,
        penalty: impl Fn(&ArmId) -> f64,
    ) -> Option<ArmId> {
        let mut best: Option<(ArmId, f64)> = None;
        for id in candidates {
            let Some(stats) = self.arms.get(id) else {
                continue;
            };
            let score = stats.mean_reward - penalty(id);
            match &best {
                Some((_, b)) if score <= *b + crate::TIEBREAK_EPS => {}
                _ => best = Some((id.clone(), score)),
            }
        }
        best.map(|(id, _)| id)
    }

    /// First enabled arm of `tier` in stable order, ignoring banned arms.
    ///
    /// This is the concrete arm behind a tier-level baseline recommendation.
    pub fn representative(&self, tier: Tier, profile: &SafetyProfile) -> Option<ArmId> {
        self.arms
            .iter()
            .find(|(id, stats)| id.tier == tier && stats.enabled && !profile.is_banned(id))
            .map(|(id, _)| id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<ArmSpec> {
        vec![
            ArmSpec::new(Tier::FastHeuristic, "recency-probe"),
            ArmSpec::new(Tier::FastHeuristic, "frequency-probe"),
            ArmSpec::new(Tier::InfoTheoretic, "surprise-rank"),
            ArmSpec::new(Tier::AdaptiveHybrid, "graph-blend"),
        ]
    }

    #[test]
    fn empty_catalog_is_a_config_error() {
        assert!(matches!(
            ArmRegistry::from_catalog(&[]),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn duplicate_arm_is_a_config_error() {
        let specs = vec![
            ArmSpec::new(Tier::FastHeuristic, "recency-probe"),
            ArmSpec::new(Tier::FastHeuristic, "recency-probe"),
        ];
        assert!(ArmRegistry::from_catalog(&specs).is_err());
    }

    #[test]
    fn record_updates_running_means() {
        let mut r = ArmRegistry::from_catalog(&catalog()).unwrap();
        let id = ArmId::new(Tier::FastHeuristic, "recency-probe");
        r.record(&id, 1.0, "k");
        r.record(&id, 0.0, "k");
        let s = r.stats(&id).unwrap();
        assert_eq!(s.pulls, 2);
        assert!((s.mean_reward - 0.5).abs() < 1e-12);
        assert_eq!(s.context.get("k").unwrap().pulls, 2);
        assert!((s.context.get("k").unwrap().mean_reward - 0.5).abs() < 1e-12);
    }

    #[test]
    fn context_buckets_are_independent() {
        let mut r = ArmRegistry::from_catalog(&catalog()).unwrap();
        let id = ArmId::new(Tier::InfoTheoretic, "surprise-rank");
        r.record(&id, 1.0, "a");
        r.record(&id, -1.0, "b");
        let s = r.stats(&id).unwrap();
        assert!((s.context.get("a").unwrap().mean_reward - 1.0).abs() < 1e-12);
        assert!((s.context.get("b").unwrap().mean_reward + 1.0).abs() < 1e-12);
        assert_eq!(s.context_mean("a", 1), Some(1.0));
        assert_eq!(s.context_mean("a", 2), None, "below min observations");
    }

    #[test]
    fn non_finite_rewards_are_dropped() {
        let mut r = ArmRegistry::from_catalog(&catalog()).unwrap();
        let id = ArmId::new(Tier::FastHeuristic, "recency-probe");
        r.record(&id, f64::NAN, "k");
        assert_eq!(r.stats(&id).unwrap().pulls, 0);
    }

    #[test]
    fn priors_seed_initial_stats() {
        let specs = vec![ArmSpec::new(Tier::FastHeuristic, "recency-probe").with_prior(10, 0.4)];
        let r = ArmRegistry::from_catalog(&specs).unwrap();
        let s = r.stats(&ArmId::new(Tier::FastHeuristic, "recency-probe")).unwrap();
        assert_eq!(s.pulls, 10);
        assert!((s.mean_reward - 0.4).abs() < 1e-12);
        assert!((s.cumulative_reward - 4.0).abs() < 1e-12);
    }

    #[test]
    fn eligibility_respects_enabled_profile_and_minimums() {
        let mut r = ArmRegistry::from_catalog(&catalog()).unwrap();
        let policy = TierPolicy::default();
        let mut profile = SafetyProfile::default();
        let mut snap = FeatureSnapshot::default();
        snap.memory_scale = 1.0;
        snap.session_scale = 1.0;

        assert_eq!(r.eligible(&snap, &policy, &profile).len(), 4);

        // Disabled arm drops out.
        r.set_enabled(&ArmId::new(Tier::FastHeuristic, "frequency-probe"), false);
        assert_eq!(r.eligible(&snap, &policy, &profile).len(), 3);

        // Profile disallows the heavy tier.
        profile.allowed_tiers[Tier::AdaptiveHybrid.index()] = false;
        assert_eq!(r.eligible(&snap, &policy, &profile).len(), 2);

        // Scale minimums exclude heavier tiers.
        profile.allowed_tiers[Tier::AdaptiveHybrid.index()] = true;
        snap.memory_scale = 0.01;
        snap.session_scale = 0.0;
        let ids = r.eligible(&snap, &policy, &profile);
        assert!(ids.iter().all(|id| id.tier == Tier::FastHeuristic));
    }

    #[test]
    fn best_by_mean_applies_penalty_and_prefers_lighter_on_tie() {
        let mut r = ArmRegistry::from_catalog(&catalog()).unwrap();
        let fast = ArmId::new(Tier::FastHeuristic, "recency-probe");
        let mid = ArmId::new(Tier::InfoTheoretic, "surprise-rank");
        r.record(&mid, 0.8, "k");
        r.record(&fast, 0.8, "k");

        let ids: Vec<ArmId> = r.arm_ids().cloned().collect();
        // Tie on mean: lighter tier (stable order) wins.
        let best = r.best_by_mean(ids.iter(), |_| 0.0).unwrap();
        assert_eq!(best.tier, Tier::FastHeuristic);

        // Penalizing the fast tier flips the pick.
        let best = r
            .best_by_mean(ids.iter(), |id| {
                if id.tier == Tier::FastHeuristic {
                    0.5
                } else {
                    0.0
                }
            })
            .unwrap();
        assert_eq!(best, mid);
    }

    #[test]
    fn representative_skips_banned_and_disabled() {
        let mut r = ArmRegistry::from_catalog(&catalog()).unwrap();
        let mut profile = SafetyProfile::default();
        profile.banned_arms = vec![ArmId::new(Tier::FastHeuristic, "frequency-probe")];
        r.set_enabled(&ArmId::new(Tier::FastHeuristic, "recency-probe"), false);
        // frequency-probe is banned and recency-probe disabled; no fast arm left.
        assert_eq!(r.representative(Tier::FastHeuristic, &profile), None);
        assert!(r.representative(Tier::InfoTheoretic, &profile).is_some());
    }
}
