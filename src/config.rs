//! Controller configuration.
//!
//! Everything tunable lives here: the baseline policy tables, selector knobs,
//! reward weights, degradation thresholds, the safety profile, the monitor
//! thresholds, and the arm catalog with its priors. Start from
//! [`ControllerConfig::default()`] and adjust via the builder helpers, then
//! hand the result to [`crate::Controller::new`]. Validation runs once at
//! construction; an invalid configuration refuses to start.

use serde::{Deserialize, Serialize};

use crate::{
    ArmSpec, DegradationConfig, Error, MonitorConfig, RewardConfig, SafetyProfile, SelectorConfig,
    Tier, TierPolicy,
};

/// Full configuration for one controller instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// The fixed arm catalog, with optional priors.
    pub catalog: Vec<ArmSpec>,
    /// Baseline tier-scoring tables and thresholds.
    pub policy: TierPolicy,
    /// Bandit selector knobs (exploration rate, caps, UCB coefficient, seed).
    pub selector: SelectorConfig,
    /// Reward component weights and catastrophic penalties.
    pub reward: RewardConfig,
    /// Degradation detection and rollback thresholds.
    pub degradation: DegradationConfig,
    /// Deployment-profile constraints (allowed tiers, banned arms).
    pub profile: SafetyProfile,
    /// Monitor/reporter anomaly thresholds.
    pub monitor: MonitorConfig,
    /// Flush persisted state every this many outcome updates.
    pub persist_every: u64,
    /// Upper bound on decisions awaiting an outcome; the oldest pending entry
    /// is dropped beyond this (its outcome, if it ever arrives, is then
    /// treated as unknown and ignored).
    pub max_pending: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            catalog: default_catalog(),
            policy: TierPolicy::default(),
            selector: SelectorConfig::default(),
            reward: RewardConfig::default(),
            degradation: DegradationConfig::default(),
            profile: SafetyProfile::default(),
            monitor: MonitorConfig::default(),
            persist_every: 50,
            max_pending: 4096,
        }
    }
}

/// The standard four-arm catalog: two fast strategies, one per heavier tier.
pub fn default_catalog() -> Vec<ArmSpec> {
    vec![
        ArmSpec::new(Tier::FastHeuristic, "recency-probe"),
        ArmSpec::new(Tier::FastHeuristic, "frequency-probe"),
        ArmSpec::new(Tier::InfoTheoretic, "surprise-rank"),
        ArmSpec::new(Tier::AdaptiveHybrid, "graph-blend"),
    ]
}

impl ControllerConfig {
    /// Replace the arm catalog.
    pub fn with_catalog(mut self, catalog: Vec<ArmSpec>) -> Self {
        self.catalog = catalog;
        self
    }

    /// Replace the baseline policy tables.
    pub fn with_policy(mut self, policy: TierPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the selector configuration.
    pub fn with_selector(mut self, selector: SelectorConfig) -> Self {
        self.selector = selector;
        self
    }

    /// Replace the reward configuration.
    pub fn with_reward(mut self, reward: RewardConfig) -> Self {
        self.reward = reward;
        self
    }

    /// Replace the degradation thresholds.
    pub fn with_degradation(mut self, degradation: DegradationConfig) -> Self {
        self.degradation = degradation;
        self
    }

    /// Replace the deployment profile.
    pub fn with_profile(mut self, profile: SafetyProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Replace the monitor thresholds.
    pub fn with_monitor(mut self, monitor: MonitorConfig) -> Self {
        self.monitor = monitor;
        self
    }

    /// Set the RNG seed for the selector's exploration gate.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.selector.seed = seed;
        self
    }

    /// Set the exploration rate (still clamped by the configured cap).
    pub fn with_exploration_rate(mut self, rate: f64) -> Self {
        self.selector.exploration_rate = rate;
        self
    }

    /// Exploitation returns the baseline recommendation verbatim instead of
    /// the highest-mean arm.
    pub fn with_trust_baseline(mut self, trust: bool) -> Self {
        self.selector.trust_baseline = trust;
        self
    }

    /// Set the persistence flush interval (in outcome updates).
    pub fn with_persist_every(mut self, every: u64) -> Self {
        self.persist_every = every;
        self
    }

    /// Validate the whole configuration. Any failure is fatal at startup.
    ///
    /// Beyond the per-section validators this checks the cross-cutting floor:
    /// the catalog must contain at least one enabled, non-banned
    /// fast-heuristic arm, otherwise the guard has no arm to degrade to.
    pub fn validate(&self) -> Result<(), Error> {
        self.policy.validate()?;
        self.selector.validate()?;
        self.reward.validate()?;
        self.degradation.validate()?;
        self.profile.validate()?;
        self.monitor.validate()?;
        if self.catalog.is_empty() {
            return Err(Error::InvalidConfig("arm catalog is empty".to_string()));
        }
        for spec in &self.catalog {
            if !spec.prior_mean.is_finite() {
                return Err(Error::InvalidConfig(format!(
                    "arm {} has a non-finite prior mean",
                    spec.id
                )));
            }
        }
        let has_fast_floor = self.catalog.iter().any(|spec| {
            spec.id.tier == Tier::FastHeuristic && spec.enabled && !self.profile.is_banned(&spec.id)
        });
        if !has_fast_floor {
            return Err(Error::InvalidConfig(
                "catalog must contain an enabled, non-banned fast-heuristic arm".to_string(),
            ));
        }
        if self.persist_every == 0 {
            return Err(Error::InvalidConfig("persist_every must be >= 1".to_string()));
        }
        if self.max_pending == 0 {
            return Err(Error::InvalidConfig("max_pending must be >= 1".to_string()));
        }
        Ok(())
    }
}
