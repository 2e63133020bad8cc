//! Context-key discretization.
//!
//! Arm statistics are conditioned on a coarse bucket of the feature snapshot
//! so the learner can discover that, say, the heavy tier pays off at high
//! entropy but not at low. The key is a pure function of the snapshot: task
//! kind plus memory-scale, entropy, and quality-trend each cut into three
//! bands. Two snapshots with identical bucket values always produce the
//! identical key; fields not used for bucketing (budgets, error rate, prior
//! tier) never influence it.
//!
//! The three-band granularity is also the memory bound for per-context
//! statistics: at most `7 tasks × 3 × 3 × 3 = 189` distinct keys can ever
//! exist per arm, so context maps need no eviction policy.

use crate::FeatureSnapshot;

/// Maximum number of distinct context keys.
pub const CONTEXT_KEY_SPACE: usize = 7 * 3 * 3 * 3;

/// Cut a `[0, 1]` value into three bands at 1/3 and 2/3.
fn band3(x: f64) -> &'static str {
    if x < 1.0 / 3.0 {
        "lo"
    } else if x < 2.0 / 3.0 {
        "mid"
    } else {
        "hi"
    }
}

/// Derive the discretized context key for a snapshot.
///
/// Deterministic and total: no randomness, no failure path. The quality-trend
/// band uses the windowed mean reciprocal rank (the slope is deliberately
/// ignored; it is too noisy at this granularity).
///
/// # Example
///
/// ```rust
/// use strata::{context_key, FeatureSnapshot, TaskKind};
///
/// let mut snap = FeatureSnapshot::default();
/// snap.task = TaskKind::Retrieve;
/// snap.memory_scale = 0.8;
/// snap.entropy = 0.1;
/// assert_eq!(context_key(&snap), "retrieve|m=hi|e=lo|q=lo");
/// ```
pub fn context_key(snap: &FeatureSnapshot) -> String {
    format!(
        "{}|m={}|e={}|q={}",
        snap.task.as_str(),
        band3(snap.memory_scale),
        band3(snap.entropy),
        band3(snap.quality_trend.mean_rr),
    )
}
