//! Decision and reward monitoring.
//!
//! The monitor aggregates decision and reward events into summary statistics
//! and anomaly alerts. It is strictly read-only with respect to decision
//! logic: the controller feeds it events, callers pull a [`MonitorReport`],
//! and nothing here ever changes what the selector or guard will do.
//!
//! Anomalies detected on report:
//! - an arm never chosen after a configured number of decisions;
//! - the observed exploration rate exceeding its configured cap;
//! - all arms converging to statistically indistinguishable mean rewards;
//! - a single arm's recent reward collapsing relative to its historical mean.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::{ArmId, DecisionRecord, Error};

/// Thresholds for the anomaly checks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// An arm with zero decisions after this many total decisions is anomalous.
    pub never_chosen_after: u64,
    /// Tolerance added to the exploration-rate cap before alerting.
    pub rate_cap_tolerance: f64,
    /// Mean-reward spread below which arms count as indistinguishable.
    pub convergence_eps: f64,
    /// Minimum observations per arm before the convergence check applies.
    pub convergence_min_obs: u64,
    /// Number of recent rewards per arm the collapse check looks at.
    pub collapse_window: usize,
    /// Recent mean this far below the historical mean is a collapse.
    pub collapse_drop: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            never_chosen_after: 100,
            rate_cap_tolerance: 0.05,
            convergence_eps: 0.02,
            convergence_min_obs: 30,
            collapse_window: 10,
            collapse_drop: 1.0,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), Error> {
        for (name, x) in [
            ("rate_cap_tolerance", self.rate_cap_tolerance),
            ("convergence_eps", self.convergence_eps),
            ("collapse_drop", self.collapse_drop),
        ] {
            if !x.is_finite() || x < 0.0 {
                return Err(Error::InvalidConfig(format!("{name}={x} must be >= 0")));
            }
        }
        if self.collapse_window == 0 {
            return Err(Error::InvalidConfig(
                "collapse_window must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Running reward distribution for one arm (Welford's online variance).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RewardDist {
    pub count: u64,
    pub mean: f64,
    m2: f64,
    pub min: f64,
    pub max: f64,
}

impl RewardDist {
    fn push(&mut self, x: f64) {
        self.count += 1;
        if self.count == 1 {
            self.mean = x;
            self.m2 = 0.0;
            self.min = x;
            self.max = x;
            return;
        }
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
        self.min = self.min.min(x);
        self.max = self.max.max(x);
    }

    /// Sample variance; `None` below two observations.
    pub fn variance(&self) -> Option<f64> {
        (self.count >= 2).then(|| self.m2 / (self.count - 1) as f64)
    }
}

#[derive(Debug, Clone, Default)]
struct ArmTrack {
    decisions: u64,
    rewards: RewardDist,
    recent: VecDeque<f64>,
}

/// Anomaly events surfaced by [`Monitor::report`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Anomaly {
    /// An arm was never chosen despite plenty of decisions.
    ArmNeverChosen { arm: ArmId, decisions: u64 },
    /// The observed exploration rate exceeds the configured cap.
    ExplorationRateOverCap { observed: f64, cap: f64 },
    /// All arms' mean rewards sit within the convergence epsilon of each
    /// other; learning has nothing left to distinguish.
    ArmsIndistinguishable { spread: f64 },
    /// One arm's recent rewards collapsed relative to its history.
    ArmRewardCollapse {
        arm: ArmId,
        recent_mean: f64,
        historical_mean: f64,
    },
}

/// Per-arm summary inside a [`MonitorReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmReport {
    pub arm: ArmId,
    pub decisions: u64,
    pub rewards: RewardDist,
}

/// Point-in-time summary of everything the monitor has seen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorReport {
    pub decisions: u64,
    pub explorations: u64,
    pub exploitations: u64,
    pub rollback_activations: u64,
    pub regression_warnings: u64,
    pub arms: Vec<ArmReport>,
    pub anomalies: Vec<Anomaly>,
}

/// Event sink and report generator.
///
/// Owned by the controller; all methods are plain `&mut self` because the
/// controller already serializes event delivery behind its own lock.
#[derive(Debug, Clone)]
pub struct Monitor {
    cfg: MonitorConfig,
    decisions: u64,
    explorations: u64,
    rollback_activations: u64,
    regression_warnings: u64,
    arms: BTreeMap<ArmId, ArmTrack>,
}

impl Monitor {
    /// Create a monitor tracking the given catalog.
    ///
    /// All catalog arms are registered up front so "never chosen" is
    /// detectable (an arm absent from the event stream still appears here).
    pub fn new(cfg: MonitorConfig, catalog: impl IntoIterator<Item = ArmId>) -> Self {
        Self {
            cfg,
            decisions: 0,
            explorations: 0,
            rollback_activations: 0,
            regression_warnings: 0,
            arms: catalog
                .into_iter()
                .map(|id| (id, ArmTrack::default()))
                .collect(),
        }
    }

    /// Archive one decision.
    pub fn record_decision(&mut self, decision: &DecisionRecord) {
        self.decisions += 1;
        if decision.explored {
            self.explorations += 1;
        }
        if let Some(track) = self.arms.get_mut(&decision.arm) {
            track.decisions += 1;
        }
    }

    /// Record one computed reward for an arm.
    pub fn record_reward(&mut self, arm: &ArmId, reward: f64) {
        if !reward.is_finite() {
            return;
        }
        let Some(track) = self.arms.get_mut(arm) else {
            return;
        };
        track.rewards.push(reward);
        if track.recent.len() == self.cfg.collapse_window {
            track.recent.pop_front();
        }
        track.recent.push_back(reward);
    }

    /// Count one rollback activation.
    pub fn record_rollback(&mut self) {
        self.rollback_activations += 1;
    }

    /// Count one regression warning.
    pub fn record_regression_warning(&mut self) {
        self.regression_warnings += 1;
    }

    pub fn decisions(&self) -> u64 {
        self.decisions
    }

    pub fn explorations(&self) -> u64 {
        self.explorations
    }

    /// Observed exploration fraction over all decisions so far.
    pub fn exploration_fraction(&self) -> f64 {
        if self.decisions == 0 {
            return 0.0;
        }
        self.explorations as f64 / self.decisions as f64
    }

    /// Produce the current summary and run the anomaly checks.
    ///
    /// `rate_cap` is the effective exploration-rate cap from the selector
    /// configuration; the observed rate is compared against it plus the
    /// configured tolerance.
    pub fn report(&self, rate_cap: f64) -> MonitorReport {
        let mut anomalies = Vec::new();

        if self.decisions >= self.cfg.never_chosen_after {
            for (id, track) in &self.arms {
                if track.decisions == 0 {
                    anomalies.push(Anomaly::ArmNeverChosen {
                        arm: id.clone(),
                        decisions: self.decisions,
                    });
                }
            }
        }

        let observed = self.exploration_fraction();
        if self.decisions > 0 && observed > rate_cap + self.cfg.rate_cap_tolerance {
            anomalies.push(Anomaly::ExplorationRateOverCap {
                observed,
                cap: rate_cap,
            });
        }

        // Convergence: every arm well observed and means within epsilon.
        if self.arms.len() >= 2
            && self
                .arms
                .values()
                .all(|t| t.rewards.count >= self.cfg.convergence_min_obs)
        {
            let means: Vec<f64> = self.arms.values().map(|t| t.rewards.mean).collect();
            let spread = means.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
                - means.iter().cloned().fold(f64::INFINITY, f64::min);
            if spread < self.cfg.convergence_eps {
                anomalies.push(Anomaly::ArmsIndistinguishable { spread });
            }
        }

        for (id, track) in &self.arms {
            if track.recent.len() < self.cfg.collapse_window {
                continue;
            }
            let recent_mean = track.recent.iter().sum::<f64>() / track.recent.len() as f64;
            if recent_mean < track.rewards.mean - self.cfg.collapse_drop {
                anomalies.push(Anomaly::ArmRewardCollapse {
                    arm: id.clone(),
                    recent_mean,
                    historical_mean: track.rewards.mean,
                });
            }
        }

        MonitorReport {
            decisions: self.decisions,
            explorations: self.explorations,
            exploitations: self.decisions - self.explorations,
            rollback_activations: self.rollback_activations,
            regression_warnings: self.regression_warnings,
            arms: self
                .arms
                .iter()
                .map(|(id, t)| ArmReport {
                    arm: id.clone(),
                    decisions: t.decisions,
                    rewards: t.rewards,
                })
                .collect(),
            anomalies,
        }
    }
}
