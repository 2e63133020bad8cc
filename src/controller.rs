//! The controller facade: decide, record outcomes, persist, report.
//!
//! [`Controller`] wires the baseline scorer, bandit selector, safety guard,
//! reward calculator, degradation detector, monitor, and snapshot store into
//! the two-call surface the host uses:
//!
//! ```rust
//! use strata::{Controller, ControllerConfig, FeatureSnapshot, OutcomeRecord, TaskKind};
//!
//! let controller = Controller::new(ControllerConfig::default()).unwrap();
//!
//! let mut snap = FeatureSnapshot::default();
//! snap.task = TaskKind::Retrieve;
//! snap.memory_scale = 0.4;
//! let decision = controller.decide(snap).unwrap();
//!
//! // ... the host executes the operation with `decision.arm` ...
//!
//! let outcome = OutcomeRecord {
//!     reciprocal_rank: 0.8,
//!     hit_rate: 0.7,
//!     precision: 0.9,
//!     optimal_retrieval_ratio: 0.75,
//!     latency_ms: 12.0,
//!     cost_units: 0.4,
//!     results_expected: true,
//!     ..OutcomeRecord::default()
//! };
//! controller.record_outcome(decision.seq, outcome);
//! ```
//!
//! All methods take `&self`; internal state sits behind a single mutex so
//! concurrent callers can decide and report outcomes simultaneously. Per-arm
//! counters never race: every read-modify-write runs under the lock, so each
//! arm sees a serializable update sequence. The snapshot flush clones state
//! under the lock and performs file I/O after releasing it, keeping decision
//! latency decoupled from storage latency.

use std::collections::{BTreeMap, VecDeque};

use parking_lot::Mutex;

use crate::{
    compute_reward, context_key, level_churn, safety, score_tiers, ArmChoice, ArmId, ArmRegistry,
    ArmStats, BanditSelector, ControllerConfig, DecisionNote, DecisionRecord, DegradationDetector,
    DegradationEvent, Error, FeatureSnapshot, Monitor, MonitorReport, OutcomeRecord, SnapshotStore,
    SnapshotV1, Tier,
};

/// What the controller remembers about a decision until its outcome arrives.
#[derive(Debug, Clone)]
struct Pending {
    arm: ArmId,
    context_key: String,
    cost_budget: Option<f64>,
    latency_budget_ms: Option<f64>,
}

#[derive(Debug)]
struct Inner {
    registry: ArmRegistry,
    selector: BanditSelector,
    detector: DegradationDetector,
    monitor: Monitor,
    total_decisions: u64,
    total_explorations: u64,
    pending: BTreeMap<u64, Pending>,
    recent_tiers: VecDeque<Tier>,
    updates_since_flush: u64,
}

/// The adaptive strategy controller.
///
/// One instance per tenant (or per test); instances share nothing. See the
/// module docs for the call pattern.
#[derive(Debug)]
pub struct Controller {
    cfg: ControllerConfig,
    inner: Mutex<Inner>,
    store: Option<SnapshotStore>,
}

impl Controller {
    /// Build a controller from configuration, starting from fresh statistics.
    pub fn new(cfg: ControllerConfig) -> Result<Self, Error> {
        cfg.validate()?;
        let registry = ArmRegistry::from_catalog(&cfg.catalog)?;
        let inner = Inner {
            selector: BanditSelector::new(cfg.selector),
            detector: DegradationDetector::new(cfg.degradation),
            monitor: Monitor::new(cfg.monitor, registry.arm_ids().cloned().collect::<Vec<_>>()),
            registry,
            total_decisions: 0,
            total_explorations: 0,
            pending: BTreeMap::new(),
            recent_tiers: VecDeque::new(),
            updates_since_flush: 0,
        };
        Ok(Self {
            cfg,
            inner: Mutex::new(inner),
            store: None,
        })
    }

    /// Build a controller from configuration plus an in-memory snapshot.
    pub fn from_snapshot(cfg: ControllerConfig, snap: &SnapshotV1) -> Result<Self, Error> {
        let controller = Self::new(cfg)?;
        {
            let mut inner = controller.inner.lock();
            inner.detector = snap.apply(&mut inner.registry, controller.cfg.degradation);
            inner.total_decisions = snap.total_decisions;
            inner.total_explorations = snap.total_explorations;
        }
        Ok(controller)
    }

    /// Build a controller backed by a snapshot store.
    ///
    /// Existing persisted state is restored; an unreadable or corrupt
    /// snapshot is logged and ignored (fresh statistics, the file will be
    /// overwritten on the next flush). State is flushed to the store every
    /// [`ControllerConfig::persist_every`] outcome updates and on
    /// [`Controller::flush`].
    pub fn with_store(cfg: ControllerConfig, store: SnapshotStore) -> Result<Self, Error> {
        let loaded = match store.load() {
            Ok(snap) => snap,
            Err(e) => {
                log::warn!(
                    "failed to load snapshot from {}: {e}; starting fresh",
                    store.path().display()
                );
                None
            }
        };
        let mut controller = match loaded {
            Some(snap) => Self::from_snapshot(cfg, &snap)?,
            None => Self::new(cfg)?,
        };
        controller.store = Some(store);
        Ok(controller)
    }

    /// The configuration this controller was built with.
    pub fn config(&self) -> &ControllerConfig {
        &self.cfg
    }

    /// Decide which arm to use for one operation.
    ///
    /// Synchronous, pure computation plus a registry read; fails only on a
    /// malformed snapshot.
    pub fn decide(&self, snapshot: FeatureSnapshot) -> Result<DecisionRecord, Error> {
        snapshot.validate()?;

        let mut inner = self.inner.lock();
        let Inner {
            registry,
            selector,
            detector,
            monitor,
            total_decisions,
            total_explorations,
            pending,
            recent_tiers,
            ..
        } = &mut *inner;

        let scores = score_tiers(&self.cfg.policy, &snapshot);
        let baseline_arm = baseline_arm(registry, &self.cfg, scores.baseline.tier);
        let baseline_confidence = scores.baseline.confidence;
        let eligible = registry.eligible(&snapshot, &self.cfg.policy, &self.cfg.profile);
        let ctx_key = context_key(&snapshot);

        let candidate = if scores.baseline.budget_forced {
            // Tight budget: the fast tier is forced and the bandit never runs.
            ArmChoice {
                arm: baseline_arm.clone(),
                explored: false,
                confidence: baseline_confidence,
                notes: vec![DecisionNote::BudgetForcedFastTier],
            }
        } else if eligible.is_empty() {
            log::info!(
                "no eligible arms for task={}; falling back to baseline {}",
                snapshot.task,
                baseline_arm
            );
            ArmChoice {
                arm: baseline_arm.clone(),
                explored: false,
                confidence: baseline_confidence,
                notes: vec![DecisionNote::NoEligibleArms],
            }
        } else {
            selector.select(registry, &eligible, &ctx_key, &baseline_arm, baseline_confidence)
        };

        let guard_ctx = safety::GuardContext {
            registry,
            eligible: &eligible,
            baseline: &baseline_arm,
            baseline_confidence,
            error_rate: snapshot.error_rate,
            rollback_active: detector.rollback_active(),
            profile: &self.cfg.profile,
        };
        let choice = safety::run_pipeline(candidate, &guard_ctx);

        *total_decisions += 1;
        let seq = *total_decisions;
        if choice.explored {
            *total_explorations += 1;
        }

        if recent_tiers.len() == self.cfg.reward.churn_window {
            recent_tiers.pop_front();
        }
        recent_tiers.push_back(choice.arm.tier);

        // Bound the pending map: a caller that never reports outcomes must
        // not grow memory without limit.
        if pending.len() >= self.cfg.max_pending {
            if let Some((stale, _)) = pending.pop_first() {
                log::warn!("dropping pending decision {stale}: outcome never arrived");
            }
        }
        pending.insert(
            seq,
            Pending {
                arm: choice.arm.clone(),
                context_key: ctx_key,
                cost_budget: snapshot.cost_budget,
                latency_budget_ms: snapshot.latency_budget_ms,
            },
        );

        let record = DecisionRecord {
            seq,
            arm: choice.arm,
            explored: choice.explored,
            confidence: choice.confidence,
            snapshot,
            notes: choice.notes,
        };
        monitor.record_decision(&record);
        Ok(record)
    }

    /// Report the outcome of a previously issued decision.
    ///
    /// An unknown sequence number is logged and dropped: outcomes may race a
    /// process restart or a pending-map eviction, and neither is fatal.
    pub fn record_outcome(&self, seq: u64, outcome: OutcomeRecord) {
        let flush = {
            let mut inner = self.inner.lock();

            let Some(p) = inner.pending.remove(&seq) else {
                log::warn!("outcome for unknown decision {seq}; dropping");
                return;
            };

            let tiers: Vec<Tier> = inner.recent_tiers.iter().copied().collect();
            let churn = level_churn(&tiers);
            let breakdown = compute_reward(
                &self.cfg.reward,
                p.arm.tier,
                &outcome,
                p.cost_budget,
                p.latency_budget_ms,
                churn,
            );

            inner.registry.record(&p.arm, breakdown.reward, &p.context_key);
            inner.monitor.record_reward(&p.arm, breakdown.reward);

            match inner.detector.observe(breakdown.reward, seq) {
                Some(DegradationEvent::RollbackEntered { at_seq, delta }) => {
                    log::warn!(
                        "rollback engaged at decision {at_seq} (rolling delta {delta:.3}); \
                         baseline-only mode until recovery"
                    );
                    inner.monitor.record_rollback();
                }
                Some(DegradationEvent::RollbackExited {
                    at_seq,
                    observations,
                    rolling_mean,
                }) => {
                    log::info!(
                        "rollback exited at decision {at_seq} after {observations} observations \
                         (rolling mean {rolling_mean:.3})"
                    );
                }
                Some(DegradationEvent::RegressionWarning { delta }) => {
                    log::warn!("reward regression (rolling delta {delta:.3}); not yet degraded");
                    inner.monitor.record_regression_warning();
                }
                None => {}
            }

            inner.updates_since_flush += 1;
            if self.store.is_some() && inner.updates_since_flush >= self.cfg.persist_every {
                inner.updates_since_flush = 0;
                Some(SnapshotV1::capture(
                    &inner.registry,
                    &inner.detector,
                    inner.total_decisions,
                    inner.total_explorations,
                ))
            } else {
                None
            }
        };

        // File I/O happens outside the lock; a failure leaves in-memory state
        // authoritative and the write retries after the next interval.
        if let (Some(store), Some(snap)) = (&self.store, flush) {
            if let Err(e) = store.save(&snap) {
                log::warn!("snapshot flush to {} failed: {e}", store.path().display());
            }
        }
    }

    /// Capture the current persistable state.
    pub fn snapshot(&self) -> SnapshotV1 {
        let inner = self.inner.lock();
        SnapshotV1::capture(
            &inner.registry,
            &inner.detector,
            inner.total_decisions,
            inner.total_explorations,
        )
    }

    /// Write the current state to the snapshot store now (graceful shutdown).
    ///
    /// A controller without a store returns `Ok(())`.
    pub fn flush(&self) -> Result<(), Error> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let snap = self.snapshot();
        store.save(&snap)
    }

    /// Whether the degradation detector currently forces baseline-only mode.
    pub fn rollback_active(&self) -> bool {
        self.inner.lock().detector.rollback_active()
    }

    /// Total decisions issued (also the latest sequence number).
    pub fn total_decisions(&self) -> u64 {
        self.inner.lock().total_decisions
    }

    /// Total decisions that were exploration picks.
    pub fn total_explorations(&self) -> u64 {
        self.inner.lock().total_explorations
    }

    /// Current statistics for one arm.
    pub fn arm_stats(&self, id: &ArmId) -> Option<ArmStats> {
        self.inner.lock().registry.stats(id).cloned()
    }

    /// Toggle an arm's enabled flag at runtime. Unknown ids are ignored.
    pub fn set_arm_enabled(&self, id: &ArmId, enabled: bool) {
        self.inner.lock().registry.set_enabled(id, enabled);
    }

    /// Summary statistics and anomaly alerts.
    pub fn monitor_report(&self) -> MonitorReport {
        self.inner
            .lock()
            .monitor
            .report(self.cfg.selector.effective_rate())
    }
}

/// Resolve the concrete arm behind a tier-level baseline recommendation.
///
/// Walks from the recommended tier down through lighter tiers until an
/// enabled, non-banned arm exists. Configuration validation guarantees a
/// fast-heuristic floor at startup; if runtime toggles removed even that,
/// the first catalog arm is returned as a last resort.
fn baseline_arm(registry: &ArmRegistry, cfg: &ControllerConfig, tier: Tier) -> ArmId {
    let mut t = Some(tier);
    while let Some(current) = t {
        if let Some(arm) = registry.representative(current, &cfg.profile) {
            return arm;
        }
        t = current.lighter();
    }
    log::warn!("no enabled arm for any tier at or below {tier}; using first catalog arm");
    registry
        .arm_ids()
        .next()
        .cloned()
        .unwrap_or_else(|| ArmId::new(Tier::FastHeuristic, "recency-probe"))
}
