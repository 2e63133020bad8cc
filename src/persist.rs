//! Durable state snapshots.
//!
//! Learned state survives process restarts through a versioned JSON record
//! written atomically (write to a temp file in the same directory, then
//! rename over the target). A crash mid-write never corrupts the previously
//! durable snapshot. Durability is best-effort: a failed write is logged by
//! the controller and retried on the next flush interval while the in-memory
//! state stays authoritative.
//!
//! The format is forward-compatible both ways: unknown extra fields are
//! ignored on load, missing fields fall back to zero/default, and persisted
//! arms that are no longer in the catalog are dropped silently.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    ArmId, ArmRegistry, ContextStats, DegradationConfig, DegradationDetector, Error, Tier,
};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Persisted counters for one arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedArm {
    pub tier: Tier,
    pub strategy: String,
    #[serde(default)]
    pub pulls: u64,
    #[serde(default)]
    pub cumulative_reward: f64,
    #[serde(default)]
    pub mean_reward: f64,
    #[serde(default)]
    pub context: BTreeMap<String, ContextStats>,
}

/// The versioned persisted-state record.
///
/// Serialized as JSON. Every field except `version` carries a serde default
/// so snapshots written by older builds load cleanly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotV1 {
    pub version: u32,
    #[serde(default)]
    pub total_decisions: u64,
    #[serde(default)]
    pub total_explorations: u64,
    #[serde(default)]
    pub arms: Vec<PersistedArm>,
    #[serde(default)]
    pub rollback_active: bool,
    #[serde(default)]
    pub rollback_started_seq: u64,
    #[serde(default)]
    pub observations_since_rollback: u64,
    #[serde(default)]
    pub baseline_mean: Option<f64>,
    #[serde(default)]
    pub reward_window: Vec<f64>,
}

impl SnapshotV1 {
    /// Capture the current learner state.
    pub fn capture(
        registry: &ArmRegistry,
        detector: &DegradationDetector,
        total_decisions: u64,
        total_explorations: u64,
    ) -> Self {
        let arms = registry
            .arm_ids()
            .filter_map(|id| {
                let s = registry.stats(id)?;
                Some(PersistedArm {
                    tier: id.tier,
                    strategy: id.strategy.clone(),
                    pulls: s.pulls,
                    cumulative_reward: s.cumulative_reward,
                    mean_reward: s.mean_reward,
                    context: s.context.clone(),
                })
            })
            .collect();
        Self {
            version: SNAPSHOT_VERSION,
            total_decisions,
            total_explorations,
            arms,
            rollback_active: detector.rollback_active(),
            rollback_started_seq: detector.rollback_started_seq(),
            observations_since_rollback: detector.observations_since_rollback(),
            baseline_mean: detector.baseline_mean(),
            reward_window: detector.window_rewards().collect(),
        }
    }

    /// Apply this snapshot to a freshly built registry and return the
    /// restored degradation detector.
    pub fn apply(
        &self,
        registry: &mut ArmRegistry,
        degradation: DegradationConfig,
    ) -> DegradationDetector {
        for arm in &self.arms {
            let id = ArmId::new(arm.tier, arm.strategy.clone());
            registry.restore_counters(
                &id,
                arm.pulls,
                arm.cumulative_reward,
                arm.mean_reward,
                arm.context.clone(),
            );
        }
        DegradationDetector::restore(
            degradation,
            &self.reward_window,
            self.baseline_mean,
            self.rollback_active,
            self.rollback_started_seq,
            self.observations_since_rollback,
        )
    }
}

/// File-backed snapshot storage with atomic writes.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted snapshot, or `None` when no file exists yet.
    pub fn load(&self) -> Result<Option<SnapshotV1>, Error> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Persistence(e)),
        };
        let snap: SnapshotV1 = serde_json::from_slice(&bytes)?;
        Ok(Some(snap))
    }

    /// Write the snapshot atomically: temp file in the same directory, then
    /// rename over the target. Overwrites any previous snapshot; repeated
    /// writes of the same state are idempotent.
    pub fn save(&self, snap: &SnapshotV1) -> Result<(), Error> {
        let bytes = serde_json::to_vec(snap)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ArmSpec, DegradationConfig};

    fn registry() -> ArmRegistry {
        ArmRegistry::from_catalog(&[
            ArmSpec::new(Tier::FastHeuristic, "recency-probe"),
            ArmSpec::new(Tier::InfoTheoretic, "surprise-rank"),
            ArmSpec::new(Tier::AdaptiveHybrid, "graph-blend"),
        ])
        .unwrap()
    }

    #[test]
    fn capture_then_apply_round_trips_counters() {
        let mut reg = registry();
        let fast = ArmId::new(Tier::FastHeuristic, "recency-probe");
        let mid = ArmId::new(Tier::InfoTheoretic, "surprise-rank");
        reg.record(&fast, 0.7, "ctx-a");
        reg.record(&fast, 0.3, "ctx-b");
        reg.record(&mid, -0.123_456_789, "ctx-a");

        let mut detector = DegradationDetector::new(DegradationConfig::default());
        for i in 0..25 {
            detector.observe(0.5, i);
        }

        let snap = SnapshotV1::capture(&reg, &detector, 3, 1);

        let mut fresh = registry();
        let restored_detector = snap.apply(&mut fresh, DegradationConfig::default());

        for id in [&fast, &mid] {
            let a = reg.stats(id).unwrap();
            let b = fresh.stats(id).unwrap();
            assert_eq!(a.pulls, b.pulls);
            assert_eq!(a.mean_reward.to_bits(), b.mean_reward.to_bits());
            assert_eq!(a.cumulative_reward.to_bits(), b.cumulative_reward.to_bits());
            assert_eq!(a.context, b.context);
        }
        assert_eq!(restored_detector.baseline_mean(), detector.baseline_mean());
        assert_eq!(restored_detector.rolling_mean(), detector.rolling_mean());
    }

    #[test]
    fn file_round_trip_is_bit_equivalent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("state.json"));

        let mut reg = registry();
        let fast = ArmId::new(Tier::FastHeuristic, "recency-probe");
        reg.record(&fast, 0.123_456_789_012_345, "k");
        let detector = DegradationDetector::new(DegradationConfig::default());
        let snap = SnapshotV1::capture(&reg, &detector, 1, 0);

        store.save(&snap).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, snap);
        assert_eq!(
            loaded.arms[0].mean_reward.to_bits(),
            snap.arms[0].mean_reward.to_bits()
        );
    }

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("absent.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn unknown_extra_fields_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(
            &path,
            r#"{"version":1,"total_decisions":7,"future_field":{"nested":true},"arms":[]}"#,
        )
        .unwrap();
        let snap = SnapshotStore::new(&path).load().unwrap().unwrap();
        assert_eq!(snap.total_decisions, 7);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{"version":1}"#).unwrap();
        let snap = SnapshotStore::new(&path).load().unwrap().unwrap();
        assert_eq!(snap.total_decisions, 0);
        assert!(!snap.rollback_active);
        assert!(snap.arms.is_empty());
        assert_eq!(snap.baseline_mean, None);
    }

    #[test]
    fn persisted_arm_missing_from_catalog_is_dropped() {
        let snap = SnapshotV1 {
            version: SNAPSHOT_VERSION,
            total_decisions: 1,
            total_explorations: 0,
            arms: vec![PersistedArm {
                tier: Tier::FastHeuristic,
                strategy: "retired-strategy".to_string(),
                pulls: 99,
                cumulative_reward: 9.9,
                mean_reward: 0.1,
                context: BTreeMap::new(),
            }],
            rollback_active: false,
            rollback_started_seq: 0,
            observations_since_rollback: 0,
            baseline_mean: None,
            reward_window: Vec::new(),
        };
        let mut reg = registry();
        snap.apply(&mut reg, DegradationConfig::default());
        assert_eq!(reg.total_pulls(), 0);
    }

    #[test]
    fn save_replaces_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("state.json"));
        let reg = registry();
        let detector = DegradationDetector::new(DegradationConfig::default());

        let mut a = SnapshotV1::capture(&reg, &detector, 1, 0);
        store.save(&a).unwrap();
        a.total_decisions = 2;
        store.save(&a).unwrap();
        assert_eq!(store.load().unwrap().unwrap().total_decisions, 2);
        // No stray temp file remains after a successful rename.
        assert!(!dir.path().join("state.tmp").exists());
    }
}
