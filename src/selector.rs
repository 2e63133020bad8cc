//! Bandit arm selection: UCB exploration with a contextual bonus.
//!
//! The selector sits between the baseline scorer and the safety guard. Per
//! decision it either *explores* (upper-confidence-bound scoring over the
//! eligible arms, plus a context bonus where the current bucket has enough
//! observations) or *exploits* (the baseline verbatim, or the best known
//! mean). Exploration is gated three ways: untried arms are always taken
//! first in stable order, the configured rate is clamped by a hard cap, and a
//! rolling budget converts excess exploration rounds into exploitation.
//!
//! The selector is **seedable** and deterministic by default: given the same
//! seed, arm statistics, and call sequence, it reproduces the same choices.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{ArmId, ArmRegistry, DecisionNote, Error, TIEBREAK_EPS};

/// Configuration knobs for the bandit selector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// Probability of taking an exploration round.
    pub exploration_rate: f64,
    /// Hard cap on the effective exploration rate.
    pub max_exploration_rate: f64,
    /// Rolling budget: when the exploration fraction over the last
    /// `exploration_window` rounds reaches this, exploration rounds are
    /// converted to exploitation until the fraction drops.
    pub exploration_budget: f64,
    /// Number of recent rounds the budget is measured over.
    pub exploration_window: usize,
    /// UCB exploration coefficient.
    pub ucb_c: f64,
    /// Weight on the per-context mean added to the UCB score.
    pub context_weight: f64,
    /// Minimum observations a context bucket needs before its mean counts.
    pub min_context_obs: u64,
    /// Exploitation mode: return the baseline recommendation verbatim
    /// instead of the highest-mean arm.
    pub trust_baseline: bool,
    /// RNG seed (deterministic by default).
    pub seed: u64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            exploration_rate: 0.15,
            max_exploration_rate: 0.30,
            exploration_budget: 0.40,
            exploration_window: 50,
            ucb_c: 0.7,
            context_weight: 0.3,
            min_context_obs: 5,
            trust_baseline: false,
            seed: 0,
        }
    }
}

impl SelectorConfig {
    /// Startup validation; rates and weights must be finite and in range.
    pub fn validate(&self) -> Result<(), Error> {
        for (name, x) in [
            ("exploration_rate", self.exploration_rate),
            ("max_exploration_rate", self.max_exploration_rate),
            ("exploration_budget", self.exploration_budget),
        ] {
            if !x.is_finite() || !(0.0..=1.0).contains(&x) {
                return Err(Error::InvalidConfig(format!("{name}={x} outside [0,1]")));
            }
        }
        for (name, x) in [("ucb_c", self.ucb_c), ("context_weight", self.context_weight)] {
            if !x.is_finite() || x < 0.0 {
                return Err(Error::InvalidConfig(format!("{name}={x} must be >= 0")));
            }
        }
        if self.exploration_window == 0 {
            return Err(Error::InvalidConfig(
                "exploration_window must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The exploration probability actually used (rate clamped by the cap).
    pub fn effective_rate(&self) -> f64 {
        self.exploration_rate.min(self.max_exploration_rate)
    }
}

/// The selector's pick for one decision, before safety overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct ArmChoice {
    pub arm: ArmId,
    pub explored: bool,
    pub confidence: f64,
    pub notes: Vec<DecisionNote>,
}

/// Seedable UCB bandit selector.
#[derive(Debug)]
pub struct BanditSelector {
    cfg: SelectorConfig,
    rng: StdRng,
    /// Recent rounds; `true` = exploration. Bounded by `exploration_window`.
    recent: VecDeque<bool>,
}

impl BanditSelector {
    pub fn new(cfg: SelectorConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(cfg.seed),
            cfg,
            recent: VecDeque::new(),
        }
    }

    /// Fraction of recent rounds that explored.
    pub fn recent_exploration_fraction(&self) -> f64 {
        if self.recent.is_empty() {
            return 0.0;
        }
        let explored = self.recent.iter().filter(|b| **b).count();
        explored as f64 / self.recent.len() as f64
    }

    fn push_round(&mut self, explored: bool) {
        if self.recent.len() == self.cfg.exploration_window.max(1) {
            self.recent.pop_front();
        }
        self.recent.push_back(explored);
    }

    /// Pick an arm from the eligible set.
    ///
    /// `baseline` is the concrete arm behind the baseline recommendation and
    /// is returned directly when exploitation trusts the baseline, or when
    /// `eligible` is unexpectedly empty.
    pub fn select(
        &mut self,
        registry: &ArmRegistry,
        eligible: &[ArmId],
        context_key: &str,
        baseline: &ArmId,
        baseline_confidence: f64,
    ) -> ArmChoice {
        if eligible.is_empty() {
            self.push_round(false);
            return ArmChoice {
                arm: baseline.clone(),
                explored: false,
                confidence: baseline_confidence,
                notes: vec![DecisionNote::NoEligibleArms],
            };
        }

        // Untried arms are always taken first, in stable order, so every arm
        // is pulled at least once before any exploitation happens.
        if let Some(untried) = eligible
            .iter()
            .find(|id| registry.stats(id).map(|s| s.pulls == 0).unwrap_or(false))
        {
            self.push_round(true);
            return ArmChoice {
                arm: untried.clone(),
                explored: true,
                confidence: 0.5,
                notes: vec![DecisionNote::ExploreFirst],
            };
        }

        let mut notes = Vec::new();
        let mut explore = self.rng.gen::<f64>() < self.cfg.effective_rate();
        if explore && self.recent_exploration_fraction() >= self.cfg.exploration_budget {
            explore = false;
            notes.push(DecisionNote::ExplorationBudgetExhausted);
        }

        let choice = if explore {
            self.select_ucb(registry, eligible, context_key, notes)
        } else {
            self.select_exploit(registry, eligible, context_key, baseline, baseline_confidence, notes)
        };
        self.push_round(choice.explored);
        choice
    }

    /// Upper-confidence-bound scoring over eligible arms.
    fn select_ucb(
        &mut self,
        registry: &ArmRegistry,
        eligible: &[ArmId],
        context_key: &str,
        mut notes: Vec<DecisionNote>,
    ) -> ArmChoice {
        let total = registry.total_pulls() as f64;
        let ln_total = (total + 1.0).ln();

        let mut best: Option<(ArmId, f64, bool)> = None;
        for id in eligible {
            let Some(stats) = registry.stats(id) else {
                continue;
            };
            // Zero-pull arms are handled by explore-first, but keep the
            // infinite-score semantics for robustness.
            let (score, ctx_applied) = if stats.pulls == 0 {
                (f64::INFINITY, false)
            } else {
                let ucb = self.cfg.ucb_c * (ln_total / stats.pulls as f64).sqrt();
                let ctx_mean = stats.context_mean(context_key, self.cfg.min_context_obs);
                let bonus = ctx_mean.map(|m| self.cfg.context_weight * m).unwrap_or(0.0);
                (stats.mean_reward + ucb + bonus, ctx_mean.is_some())
            };
            match &best {
                Some((_, b, _)) if score <= *b + TIEBREAK_EPS => {}
                _ => best = Some((id.clone(), score, ctx_applied)),
            }
        }

        // `eligible` is non-empty, so `best` is always present.
        let (arm, score, ctx_applied) = best.unwrap_or_else(|| (eligible[0].clone(), 0.0, false));
        notes.push(DecisionNote::UcbExploration {
            score,
            context_bonus_applied: ctx_applied,
        });
        ArmChoice {
            arm,
            explored: true,
            confidence: 0.5,
            notes,
        }
    }

    /// Exploitation: baseline verbatim, or the best known mean with the
    /// context-specific mean preferred where sufficiently observed.
    fn select_exploit(
        &mut self,
        registry: &ArmRegistry,
        eligible: &[ArmId],
        context_key: &str,
        baseline: &ArmId,
        baseline_confidence: f64,
        mut notes: Vec<DecisionNote>,
    ) -> ArmChoice {
        if self.cfg.trust_baseline {
            notes.push(DecisionNote::BaselineTrusted);
            return ArmChoice {
                arm: baseline.clone(),
                explored: false,
                confidence: baseline_confidence,
                notes,
            };
        }

        let mut best: Option<(ArmId, f64, bool)> = None;
        let mut second = f64::NEG_INFINITY;
        for id in eligible {
            let Some(stats) = registry.stats(id) else {
                continue;
            };
            let ctx_mean = stats.context_mean(context_key, self.cfg.min_context_obs);
            let value = ctx_mean.unwrap_or(stats.mean_reward);
            match &best {
                Some((_, b, _)) if value <= *b + TIEBREAK_EPS => {
                    if value > second {
                        second = value;
                    }
                }
                _ => {
                    if let Some((_, b, _)) = &best {
                        second = *b;
                    }
                    best = Some((id.clone(), value, ctx_mean.is_some()));
                }
            }
        }

        let (arm, value, context_informed) =
            best.unwrap_or_else(|| (baseline.clone(), baseline_confidence, false));
        // Confidence from the winner's margin over the runner-up, mapped
        // into [0.55, 0.95].
        let confidence = if second == f64::NEG_INFINITY {
            0.75
        } else {
            let margin = (value - second) / (value.abs() + second.abs() + 1e-9);
            0.55 + 0.4 * margin.clamp(0.0, 1.0)
        };
        notes.push(DecisionNote::Exploitation { context_informed });
        ArmChoice {
            arm,
            explored: false,
            confidence,
            notes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ArmSpec, Tier};

    fn registry() -> ArmRegistry {
        ArmRegistry::from_catalog(&[
            ArmSpec::new(Tier::FastHeuristic, "recency-probe"),
            ArmSpec::new(Tier::InfoTheoretic, "surprise-rank"),
            ArmSpec::new(Tier::AdaptiveHybrid, "graph-blend"),
        ])
        .unwrap()
    }

    fn all_ids(r: &ArmRegistry) -> Vec<ArmId> {
        r.arm_ids().cloned().collect()
    }

    fn baseline() -> ArmId {
        ArmId::new(Tier::FastHeuristic, "recency-probe")
    }

    #[test]
    fn untried_arms_are_selected_before_any_pulled_arm() {
        let mut reg = registry();
        let ids = all_ids(&reg);
        let mut sel = BanditSelector::new(SelectorConfig::default());

        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..ids.len() {
            let c = sel.select(&reg, &ids, "k", &baseline(), 0.8);
            assert!(c.explored);
            assert!(c.notes.contains(&DecisionNote::ExploreFirst));
            assert!(seen.insert(c.arm.clone()), "each untried arm picked once");
            reg.record(&c.arm, 0.5, "k");
        }
        assert_eq!(seen.len(), ids.len());

        // Every arm pulled: the next pick is no longer explore-first.
        let c = sel.select(&reg, &ids, "k", &baseline(), 0.8);
        assert!(!c.notes.contains(&DecisionNote::ExploreFirst));
    }

    #[test]
    fn selection_is_reproducible_for_a_fixed_seed() {
        let mut reg = registry();
        let ids = all_ids(&reg);
        for id in &ids {
            reg.record(id, 0.5, "k");
        }
        let mut run = |seed: u64| {
            let mut sel = BanditSelector::new(SelectorConfig {
                seed,
                ..SelectorConfig::default()
            });
            (0..50)
                .map(|_| sel.select(&reg, &ids, "k", &baseline(), 0.8).arm)
                .collect::<Vec<_>>()
        };
        assert_eq!(run(42), run(42));
    }

    #[test]
    fn exploitation_prefers_highest_mean() {
        let mut reg = registry();
        let ids = all_ids(&reg);
        let good = ArmId::new(Tier::InfoTheoretic, "surprise-rank");
        for id in &ids {
            reg.record(id, if *id == good { 0.9 } else { 0.1 }, "k");
        }
        let mut sel = BanditSelector::new(SelectorConfig {
            exploration_rate: 0.0,
            ..SelectorConfig::default()
        });
        let c = sel.select(&reg, &ids, "other", &baseline(), 0.8);
        assert_eq!(c.arm, good);
        assert!(!c.explored);
        assert!(c.confidence > 0.55);
    }

    #[test]
    fn context_mean_overrides_global_mean_when_observed() {
        let mut reg = registry();
        let ids = all_ids(&reg);
        let fast = baseline();
        let mid = ArmId::new(Tier::InfoTheoretic, "surprise-rank");
        let heavy = ArmId::new(Tier::AdaptiveHybrid, "graph-blend");
        // Globally the middle arm dominates, but in bucket "special" the
        // fast arm has a strong observed mean.
        for _ in 0..10 {
            reg.record(&mid, 0.8, "elsewhere");
            reg.record(&heavy, 0.1, "elsewhere");
            reg.record(&fast, 0.2, "elsewhere");
        }
        for _ in 0..6 {
            reg.record(&fast, 0.95, "special");
        }
        let mut sel = BanditSelector::new(SelectorConfig {
            exploration_rate: 0.0,
            min_context_obs: 5,
            ..SelectorConfig::default()
        });
        let c = sel.select(&reg, &ids, "special", &baseline(), 0.8);
        assert_eq!(c.arm, fast);
        assert!(c.notes.contains(&DecisionNote::Exploitation {
            context_informed: true
        }));
    }

    #[test]
    fn trust_baseline_returns_it_verbatim() {
        let mut reg = registry();
        let ids = all_ids(&reg);
        let mid = ArmId::new(Tier::InfoTheoretic, "surprise-rank");
        for id in &ids {
            reg.record(id, if *id == mid { 0.9 } else { 0.1 }, "k");
        }
        let mut sel = BanditSelector::new(SelectorConfig {
            exploration_rate: 0.0,
            trust_baseline: true,
            ..SelectorConfig::default()
        });
        let c = sel.select(&reg, &ids, "k", &baseline(), 0.77);
        assert_eq!(c.arm, baseline());
        assert!((c.confidence - 0.77).abs() < 1e-12);
        assert!(c.notes.contains(&DecisionNote::BaselineTrusted));
    }

    #[test]
    fn exploration_budget_converts_exploration_to_exploitation() {
        let mut reg = registry();
        let ids = all_ids(&reg);
        for id in &ids {
            reg.record(id, 0.5, "k");
        }
        // Rate 1.0 capped at 1.0, but budget 0.2 over a window of 10: after
        // two explorations in the window the gate must exploit.
        let mut sel = BanditSelector::new(SelectorConfig {
            exploration_rate: 1.0,
            max_exploration_rate: 1.0,
            exploration_budget: 0.2,
            exploration_window: 10,
            ..SelectorConfig::default()
        });
        let mut explorations = 0usize;
        for _ in 0..100 {
            let c = sel.select(&reg, &ids, "k", &baseline(), 0.8);
            if c.explored {
                explorations += 1;
            }
            reg.record(&c.arm, 0.5, "k");
        }
        assert!(
            explorations <= 30,
            "budget must bound exploration, got {explorations}/100"
        );
        assert!(sel.recent_exploration_fraction() <= 0.3);
    }

    #[test]
    fn effective_rate_is_capped() {
        let cfg = SelectorConfig {
            exploration_rate: 0.9,
            max_exploration_rate: 0.25,
            ..SelectorConfig::default()
        };
        assert!((cfg.effective_rate() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn empty_eligible_set_falls_back_to_baseline() {
        let reg = registry();
        let mut sel = BanditSelector::new(SelectorConfig::default());
        let c = sel.select(&reg, &[], "k", &baseline(), 0.8);
        assert_eq!(c.arm, baseline());
        assert!(c.notes.contains(&DecisionNote::NoEligibleArms));
    }

    #[test]
    fn config_validation_rejects_bad_rates() {
        let mut cfg = SelectorConfig::default();
        cfg.exploration_rate = 1.5;
        assert!(cfg.validate().is_err());
        let mut cfg = SelectorConfig::default();
        cfg.exploration_window = 0;
        assert!(cfg.validate().is_err());
        let mut cfg = SelectorConfig::default();
        cfg.ucb_c = -1.0;
        assert!(cfg.validate().is_err());
    }
}
