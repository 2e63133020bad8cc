//! `strata`: adaptive strategy selection for memory operations.
//!
//! A memory system has several ways to execute the same operation: a cheap
//! heuristic pass, an information-theoretic scoring pass, or a full adaptive
//! hybrid pipeline. Which one is worth running depends on how large and how
//! disorganized the memory currently is, what kind of operation is being
//! executed, and how well recent operations actually went. `strata` is the
//! decision core for that choice: it scores the three processing tiers with a
//! deterministic baseline policy, layers a contextual multi-armed bandit on
//! top to learn from observed outcomes, and wraps both in hard safety
//! constraints so that learning can never push production quality below the
//! baseline.
//!
//! The controller is a pure decision/learning core. It performs no storage
//! I/O, no network calls, and no text generation; the host assembles a
//! [`FeatureSnapshot`] per operation, calls
//! [`Controller::decide`](crate::Controller::decide), executes the operation
//! with the returned arm, and reports an [`OutcomeRecord`] back via
//! [`Controller::record_outcome`](crate::Controller::record_outcome).
//!
//! **Goals:**
//! - **Deterministic by default**: selection is seedable; same stats + config
//!   + seed → same choice.
//! - **Safe under learning**: an ordered override pipeline ([`safety`]) and a
//!   degradation detector with automatic rollback ([`DegradationDetector`])
//!   bound the damage a misled learner can do.
//! - **Restart friendly**: arm statistics survive process restarts through an
//!   atomic, versioned, forward-compatible snapshot ([`SnapshotStore`]).
//! - **Small K**: designed for a fixed catalog of 3–12 arms (tier × strategy
//!   pairs), not hundreds.
//!
//! **Selection path per decision:**
//! 1. [`score_tiers`] produces a per-tier score and the baseline
//!    recommendation (hand-weighted rules, affinity tables, hard budget
//!    constraints).
//! 2. [`BanditSelector`] picks an arm: UCB exploration with a contextual
//!    bonus, or exploitation of the best known mean.
//! 3. [`safety::run_pipeline`] applies the ordered overrides (rollback,
//!    deployment profile, error-rate guard, banned arms) to whatever the
//!    selector chose.
//!
//! **Learning path per outcome:**
//! [`compute_reward`] collapses quality/cost/stability plus catastrophic
//! penalties into a scalar; the [`ArmRegistry`] folds it into global and
//! per-context running means; the [`DegradationDetector`] watches the rolling
//! reward mean and flips the controller into baseline-only rollback on
//! sustained regression.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::error::Error;

pub mod error;
pub use error::*;

mod decision;
pub use decision::*;

mod context;
pub use context::*;

mod scorer;
pub use scorer::*;

mod arm;
pub use arm::*;

mod selector;
pub use selector::*;

pub mod safety;
pub use safety::{GuardContext, SafetyProfile};

mod reward;
pub use reward::*;

mod degradation;
pub use degradation::*;

pub mod monitor;
pub use monitor::{Anomaly, Monitor, MonitorConfig, MonitorReport};

mod persist;
pub use persist::*;

mod config;
pub use config::*;

mod controller;
pub use controller::*;

/// Epsilon used for floating-point tie-breaking in selection scoring.
///
/// This avoids exact equality comparisons on f64 scores and provides a stable
/// threshold across all selection paths (baseline scoring, UCB, guard
/// substitution).
pub(crate) const TIEBREAK_EPS: f64 = 1e-12;

/// One of the three processing tiers, ordered by increasing cost and
/// sophistication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Cheap recency/frequency heuristics; always eligible.
    FastHeuristic,
    /// Entropy- and surprise-driven scoring; mid cost.
    InfoTheoretic,
    /// Full adaptive pipeline (graph-augmented, reflective); heaviest.
    AdaptiveHybrid,
}

impl Tier {
    /// All tiers, lightest first. Index order matches the per-tier tables in
    /// [`TierPolicy`].
    pub const ALL: [Tier; 3] = [Tier::FastHeuristic, Tier::InfoTheoretic, Tier::AdaptiveHybrid];

    /// Table index for per-tier configuration arrays.
    pub fn index(self) -> usize {
        match self {
            Tier::FastHeuristic => 0,
            Tier::InfoTheoretic => 1,
            Tier::AdaptiveHybrid => 2,
        }
    }

    /// Relative weight of this tier in scale/entropy scoring terms
    /// (`0.0` for the lightest, `1.0` for the heaviest).
    pub fn heaviness(self) -> f64 {
        match self {
            Tier::FastHeuristic => 0.0,
            Tier::InfoTheoretic => 0.5,
            Tier::AdaptiveHybrid => 1.0,
        }
    }

    /// The next lighter tier, if any.
    pub fn lighter(self) -> Option<Tier> {
        match self {
            Tier::FastHeuristic => None,
            Tier::InfoTheoretic => Some(Tier::FastHeuristic),
            Tier::AdaptiveHybrid => Some(Tier::InfoTheoretic),
        }
    }

    /// Stable name used in context keys, logs, and the persisted snapshot.
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::FastHeuristic => "fast-heuristic",
            Tier::InfoTheoretic => "info-theoretic",
            Tier::AdaptiveHybrid => "adaptive-hybrid",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of memory operation a decision is being made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    Store,
    Retrieve,
    Consolidate,
    LightReflect,
    DeepReflect,
    GraphUpdate,
    ContextSelect,
}

impl TaskKind {
    /// All task kinds, in affinity-table order.
    pub const ALL: [TaskKind; 7] = [
        TaskKind::Store,
        TaskKind::Retrieve,
        TaskKind::Consolidate,
        TaskKind::LightReflect,
        TaskKind::DeepReflect,
        TaskKind::GraphUpdate,
        TaskKind::ContextSelect,
    ];

    /// Table index for per-task configuration arrays.
    pub fn index(self) -> usize {
        match self {
            TaskKind::Store => 0,
            TaskKind::Retrieve => 1,
            TaskKind::Consolidate => 2,
            TaskKind::LightReflect => 3,
            TaskKind::DeepReflect => 4,
            TaskKind::GraphUpdate => 5,
            TaskKind::ContextSelect => 6,
        }
    }

    /// Stable name used in context keys and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Store => "store",
            TaskKind::Retrieve => "retrieve",
            TaskKind::Consolidate => "consolidate",
            TaskKind::LightReflect => "light-reflect",
            TaskKind::DeepReflect => "deep-reflect",
            TaskKind::GraphUpdate => "graph-update",
            TaskKind::ContextSelect => "context-select",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recent retrieval-quality trend: windowed mean reciprocal rank plus its
/// slope (positive = improving).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityTrend {
    /// Mean reciprocal rank over the caller's sliding window, in `[0, 1]`.
    pub mean_rr: f64,
    /// Slope of the window (per-observation change). Unbounded but finite.
    pub slope: f64,
}

/// Immutable description of the memory/session state at decision time.
///
/// Assembled fresh by the caller for every decision. All normalized fields
/// must lie in `[0, 1]`; budgets, when present, must be non-negative.
/// [`FeatureSnapshot::validate`] enforces this before any scoring happens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    /// The operation this decision is for.
    pub task: TaskKind,
    /// Normalized memory corpus size (0 = empty, 1 = at configured capacity).
    pub memory_scale: f64,
    /// Normalized session length.
    pub session_scale: f64,
    /// Normalized disorganization measure (higher = more disorganized).
    pub entropy: f64,
    /// Recent retrieval-quality trend.
    pub quality_trend: QualityTrend,
    /// Recent error rate over the caller's sliding window, in `[0, 1]`.
    pub error_rate: f64,
    /// Remaining cost budget in caller-defined units. `None` = unconstrained.
    pub cost_budget: Option<f64>,
    /// Latency budget for this operation in milliseconds. `None` = unconstrained.
    pub latency_budget_ms: Option<f64>,
    /// Tier used by the previous decision, if any.
    pub prior_tier: Option<Tier>,
    /// Whether the previous decision's operation succeeded.
    pub prior_tier_succeeded: bool,
    /// Count of consecutive prior decisions that used `prior_tier`.
    pub same_tier_streak: u32,
}

impl FeatureSnapshot {
    /// Validate field ranges.
    ///
    /// Rejects NaN/infinite values, normalized fields outside `[0, 1]`, and
    /// negative budgets. The slope field only needs to be finite.
    pub fn validate(&self) -> Result<(), Error> {
        fn unit(name: &str, x: f64) -> Result<(), Error> {
            if !x.is_finite() || !(0.0..=1.0).contains(&x) {
                return Err(Error::InvalidSnapshot(format!("{name}={x} outside [0,1]")));
            }
            Ok(())
        }
        unit("memory_scale", self.memory_scale)?;
        unit("session_scale", self.session_scale)?;
        unit("entropy", self.entropy)?;
        unit("quality_trend.mean_rr", self.quality_trend.mean_rr)?;
        unit("error_rate", self.error_rate)?;
        if !self.quality_trend.slope.is_finite() {
            return Err(Error::InvalidSnapshot(
                "quality_trend.slope is not finite".to_string(),
            ));
        }
        for (name, budget) in [
            ("cost_budget", self.cost_budget),
            ("latency_budget_ms", self.latency_budget_ms),
        ] {
            if let Some(b) = budget {
                if !b.is_finite() || b < 0.0 {
                    return Err(Error::InvalidSnapshot(format!("{name}={b} must be >= 0")));
                }
            }
        }
        Ok(())
    }
}

impl Default for FeatureSnapshot {
    fn default() -> Self {
        Self {
            task: TaskKind::Retrieve,
            memory_scale: 0.0,
            session_scale: 0.0,
            entropy: 0.0,
            quality_trend: QualityTrend::default(),
            error_rate: 0.0,
            cost_budget: None,
            latency_budget_ms: None,
            prior_tier: None,
            prior_tier_succeeded: false,
            same_tier_streak: 0,
        }
    }
}

/// What actually happened when the caller executed the operation.
///
/// Supplied once per decision, consumed exactly once by the reward
/// calculator. Quality metrics are the caller's retrieval measurements;
/// `baseline_quality` is the caller's reference quality level used for the
/// quality-collapse penalty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    /// The operation produced a usable result.
    pub success: bool,
    /// Reciprocal rank of the best relevant result, in `[0, 1]`.
    pub reciprocal_rank: f64,
    /// Fraction of expected items found, in `[0, 1]`.
    pub hit_rate: f64,
    /// Precision of returned items, in `[0, 1]`.
    pub precision: f64,
    /// Achieved quality relative to the best achievable retrieval, in `[0, 1]`.
    pub optimal_retrieval_ratio: f64,
    /// Observed wall-clock latency in milliseconds.
    pub latency_ms: f64,
    /// Observed cost in caller-defined units.
    pub cost_units: f64,
    /// Measured drift of memory contents caused by the operation.
    pub memory_drift: f64,
    /// Measured drift of memory structure (graph/index shape).
    pub structural_drift: f64,
    /// The execution raised an error.
    pub error: bool,
    /// The caller expected non-empty results (enables the zero-relevance penalty).
    pub results_expected: bool,
    /// Caller-supplied reference quality for the collapse penalty.
    pub baseline_quality: f64,
}

impl Default for OutcomeRecord {
    fn default() -> Self {
        Self {
            success: true,
            reciprocal_rank: 0.0,
            hit_rate: 0.0,
            precision: 0.0,
            optimal_retrieval_ratio: 0.0,
            latency_ms: 0.0,
            cost_units: 0.0,
            memory_drift: 0.0,
            structural_drift: 0.0,
            error: false,
            results_expected: false,
            baseline_quality: 0.0,
        }
    }
}
