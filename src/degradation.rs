//! Degradation detection and rollback management.
//!
//! A fixed-size rolling window of recent rewards is compared against a
//! baseline mean established from the first full window. Sustained regression
//! (the delta below a negative threshold for a configured number of
//! *consecutive* checks) triggers rollback: the selector is bypassed and
//! every decision returns the baseline recommendation until recovery is
//! confirmed. Exiting rollback requires **both** a minimum number of
//! observations since rollback began **and** a recovered rolling mean;
//! satisfying only one keeps rollback active.
//!
//! A breach that has not yet reached the consecutive trigger raises a single
//! warning-severity regression alert instead, distinguishing "degrading" from
//! "already degraded".

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Thresholds for the degradation detector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DegradationConfig {
    /// Rolling window size (also the sample count that freezes the baseline).
    pub window: usize,
    /// Negative delta (rolling mean − baseline mean) below which a check
    /// counts as a breach.
    pub degradation_threshold: f64,
    /// Number of consecutive breaches that trigger rollback.
    pub consecutive_trigger: u32,
    /// Rolling mean required to exit rollback.
    pub recovery_threshold: f64,
    /// Minimum observations after rollback start before exit is considered.
    pub min_rollback_observations: u64,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            window: 20,
            degradation_threshold: -0.5,
            consecutive_trigger: 3,
            recovery_threshold: 0.0,
            min_rollback_observations: 20,
        }
    }
}

impl DegradationConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.window == 0 {
            return Err(Error::InvalidConfig("degradation window must be >= 1".to_string()));
        }
        if self.consecutive_trigger == 0 {
            return Err(Error::InvalidConfig(
                "consecutive_trigger must be >= 1".to_string(),
            ));
        }
        if !self.degradation_threshold.is_finite() || self.degradation_threshold >= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "degradation_threshold={} must be negative",
                self.degradation_threshold
            )));
        }
        if !self.recovery_threshold.is_finite() {
            return Err(Error::InvalidConfig(
                "recovery_threshold must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

/// State transitions and alerts emitted by [`DegradationDetector::observe`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DegradationEvent {
    /// Degrading but not yet degraded: raised once per breach episode,
    /// warning severity, no behavior change.
    RegressionWarning { delta: f64 },
    /// Rollback engaged: the learner is bypassed from the next decision on.
    RollbackEntered { at_seq: u64, delta: f64 },
    /// Recovery confirmed: both exit conditions held.
    RollbackExited {
        at_seq: u64,
        observations: u64,
        rolling_mean: f64,
    },
}

/// Rolling-window reward monitor with rollback state.
#[derive(Debug, Clone)]
pub struct DegradationDetector {
    cfg: DegradationConfig,
    window: VecDeque<f64>,
    sum: f64,
    baseline_mean: Option<f64>,
    consecutive_breaches: u32,
    warned: bool,
    rollback_active: bool,
    rollback_started_seq: u64,
    observations_since_rollback: u64,
}

impl DegradationDetector {
    pub fn new(cfg: DegradationConfig) -> Self {
        Self {
            cfg,
            window: VecDeque::new(),
            sum: 0.0,
            baseline_mean: None,
            consecutive_breaches: 0,
            warned: false,
            rollback_active: false,
            rollback_started_seq: 0,
            observations_since_rollback: 0,
        }
    }

    /// Whether the controller must bypass the learner right now.
    pub fn rollback_active(&self) -> bool {
        self.rollback_active
    }

    /// Sequence number recorded when rollback last engaged.
    pub fn rollback_started_seq(&self) -> u64 {
        self.rollback_started_seq
    }

    /// Baseline mean frozen from the first full window, if established.
    pub fn baseline_mean(&self) -> Option<f64> {
        self.baseline_mean
    }

    /// Mean of the current rolling window, `None` while empty.
    pub fn rolling_mean(&self) -> Option<f64> {
        if self.window.is_empty() {
            None
        } else {
            Some(self.sum / self.window.len() as f64)
        }
    }

    /// Rewards currently in the window, oldest first (for persistence).
    pub fn window_rewards(&self) -> impl Iterator<Item = f64> + '_ {
        self.window.iter().copied()
    }

    /// Restore detector state from a persisted snapshot.
    pub fn restore(
        cfg: DegradationConfig,
        rewards: &[f64],
        baseline_mean: Option<f64>,
        rollback_active: bool,
        rollback_started_seq: u64,
        observations_since_rollback: u64,
    ) -> Self {
        let mut d = Self::new(cfg);
        for &r in rewards.iter().rev().take(cfg.window.max(1)).rev() {
            if r.is_finite() {
                d.window.push_back(r);
                d.sum += r;
            }
        }
        d.baseline_mean = baseline_mean.filter(|m| m.is_finite());
        d.rollback_active = rollback_active;
        d.rollback_started_seq = rollback_started_seq;
        d.observations_since_rollback = observations_since_rollback;
        d
    }

    /// Feed one reward; `seq` is the decision sequence the reward belongs to.
    ///
    /// Returns a state transition or alert when one fires.
    pub fn observe(&mut self, reward: f64, seq: u64) -> Option<DegradationEvent> {
        if !reward.is_finite() {
            return None;
        }
        if self.window.len() == self.cfg.window.max(1) {
            if let Some(old) = self.window.pop_front() {
                self.sum -= old;
            }
        }
        self.window.push_back(reward);
        self.sum += reward;

        let full = self.window.len() >= self.cfg.window.max(1);
        let rolling = self.sum / self.window.len() as f64;

        // The first full window becomes the fixed reference.
        if self.baseline_mean.is_none() {
            if full {
                self.baseline_mean = Some(rolling);
            }
            return None;
        }

        if self.rollback_active {
            self.observations_since_rollback = self.observations_since_rollback.saturating_add(1);
            let recovered = self.observations_since_rollback >= self.cfg.min_rollback_observations
                && rolling >= self.cfg.recovery_threshold;
            if recovered {
                self.rollback_active = false;
                self.consecutive_breaches = 0;
                self.warned = false;
                return Some(DegradationEvent::RollbackExited {
                    at_seq: seq,
                    observations: self.observations_since_rollback,
                    rolling_mean: rolling,
                });
            }
            return None;
        }

        let baseline = self.baseline_mean.unwrap_or(rolling);
        let delta = rolling - baseline;
        if delta < self.cfg.degradation_threshold {
            self.consecutive_breaches = self.consecutive_breaches.saturating_add(1);
            if self.consecutive_breaches >= self.cfg.consecutive_trigger {
                self.rollback_active = true;
                self.rollback_started_seq = seq;
                self.observations_since_rollback = 0;
                self.consecutive_breaches = 0;
                return Some(DegradationEvent::RollbackEntered { at_seq: seq, delta });
            }
            if !self.warned {
                self.warned = true;
                return Some(DegradationEvent::RegressionWarning { delta });
            }
            return None;
        }

        // Recovered before the trigger: the episode is over.
        self.consecutive_breaches = 0;
        self.warned = false;
        None
    }

    /// Observations counted since the current rollback engaged.
    pub fn observations_since_rollback(&self) -> u64 {
        self.observations_since_rollback
    }
}
