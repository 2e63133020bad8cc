//! Property tests for the controller surface.

use proptest::prelude::*;
use strata::{
    compute_reward, context_key, Controller, ControllerConfig, FeatureSnapshot, OutcomeRecord,
    QualityTrend, RewardConfig, TaskKind, Tier,
};

fn task_strategy() -> impl Strategy<Value = TaskKind> {
    prop::sample::select(TaskKind::ALL.to_vec())
}

fn snapshot_strategy() -> impl Strategy<Value = FeatureSnapshot> {
    (
        task_strategy(),
        0.0..=1.0f64,
        0.0..=1.0f64,
        0.0..=1.0f64,
        0.0..=1.0f64,
        -1.0..1.0f64,
        0.0..=1.0f64,
        prop::option::of(0.0..100.0f64),
        prop::option::of(0.0..5_000.0f64),
        prop::option::of(prop::sample::select(Tier::ALL.to_vec())),
        any::<bool>(),
        0u32..50,
    )
        .prop_map(
            |(
                task,
                memory_scale,
                session_scale,
                entropy,
                mean_rr,
                slope,
                error_rate,
                cost_budget,
                latency_budget_ms,
                prior_tier,
                prior_tier_succeeded,
                same_tier_streak,
            )| FeatureSnapshot {
                task,
                memory_scale,
                session_scale,
                entropy,
                quality_trend: QualityTrend { mean_rr, slope },
                error_rate,
                cost_budget,
                latency_budget_ms,
                prior_tier,
                prior_tier_succeeded,
                same_tier_streak,
            },
        )
}

fn outcome_strategy() -> impl Strategy<Value = OutcomeRecord> {
    (
        any::<bool>(),
        0.0..=1.0f64,
        0.0..=1.0f64,
        0.0..=1.0f64,
        0.0..=1.0f64,
        0.0..500.0f64,
        0.0..20.0f64,
        0.0..=1.0f64,
        0.0..=1.0f64,
        any::<bool>(),
        any::<bool>(),
        0.0..=1.0f64,
    )
        .prop_map(
            |(
                success,
                reciprocal_rank,
                hit_rate,
                precision,
                optimal_retrieval_ratio,
                latency_ms,
                cost_units,
                memory_drift,
                structural_drift,
                error,
                results_expected,
                baseline_quality,
            )| OutcomeRecord {
                success,
                reciprocal_rank,
                hit_rate,
                precision,
                optimal_retrieval_ratio,
                latency_ms,
                cost_units,
                memory_drift,
                structural_drift,
                error,
                results_expected,
                baseline_quality,
            },
        )
}

proptest! {
    /// Every valid snapshot produces a decision whose arm comes from the
    /// catalog, with a confidence inside [0, 1].
    #[test]
    fn decide_returns_a_catalog_arm(snap in snapshot_strategy(), seed in any::<u64>()) {
        let cfg = ControllerConfig::default().with_seed(seed);
        let catalog: Vec<_> = cfg.catalog.iter().map(|s| s.id.clone()).collect();
        let controller = Controller::new(cfg).unwrap();
        let d = controller.decide(snap).unwrap();
        prop_assert!(catalog.contains(&d.arm), "arm {} not in catalog", d.arm);
        prop_assert!((0.0..=1.0).contains(&d.confidence));
        prop_assert_eq!(d.seq, 1);
    }

    /// A present budget below the configured floor forces the fast tier with
    /// confidence of at least 0.9, regardless of registry state.
    #[test]
    fn tight_budget_forces_the_fast_tier(
        mut snap in snapshot_strategy(),
        tight_cost in any::<bool>(),
        warmup in 0usize..20,
        seed in any::<u64>(),
    ) {
        if tight_cost {
            snap.cost_budget = Some(0.5);
        } else {
            snap.latency_budget_ms = Some(10.0);
        }
        let controller = Controller::new(ControllerConfig::default().with_seed(seed)).unwrap();

        // Arbitrary registry state first: warm up with unconstrained calls.
        let mut warm = FeatureSnapshot::default();
        warm.memory_scale = 0.9;
        warm.session_scale = 0.9;
        for _ in 0..warmup {
            let d = controller.decide(warm.clone()).unwrap();
            controller.record_outcome(d.seq, OutcomeRecord {
                reciprocal_rank: 0.9,
                hit_rate: 0.9,
                precision: 0.9,
                optimal_retrieval_ratio: 0.9,
                results_expected: true,
                ..OutcomeRecord::default()
            });
        }

        let d = controller.decide(snap).unwrap();
        prop_assert_eq!(d.arm.tier, Tier::FastHeuristic);
        prop_assert!(d.confidence >= 0.9, "confidence {} below floor", d.confidence);
    }

    /// Context keys are a pure function of the bucketed fields.
    #[test]
    fn context_key_is_pure(snap in snapshot_strategy(), other in snapshot_strategy()) {
        prop_assert_eq!(context_key(&snap), context_key(&snap.clone()));

        // Overwriting only non-bucketed fields never changes the key.
        let mut tweaked = snap.clone();
        tweaked.session_scale = other.session_scale;
        tweaked.error_rate = other.error_rate;
        tweaked.cost_budget = other.cost_budget;
        tweaked.latency_budget_ms = other.latency_budget_ms;
        tweaked.prior_tier = other.prior_tier;
        tweaked.prior_tier_succeeded = other.prior_tier_succeeded;
        tweaked.same_tier_streak = other.same_tier_streak;
        tweaked.quality_trend.slope = other.quality_trend.slope;
        prop_assert_eq!(context_key(&snap), context_key(&tweaked));
    }

    /// Holding quality fixed, reward never increases with cost.
    #[test]
    fn reward_is_monotone_in_cost(
        outcome in outcome_strategy(),
        extra_cost in 0.0..50.0f64,
        tier in prop::sample::select(Tier::ALL.to_vec()),
    ) {
        let cfg = RewardConfig::default();
        let base = compute_reward(&cfg, tier, &outcome, None, None, 0.0);
        let mut pricier = outcome;
        pricier.cost_units += extra_cost;
        let more = compute_reward(&cfg, tier, &pricier, None, None, 0.0);
        prop_assert!(more.reward <= base.reward + 1e-12);
    }

    /// Introducing an error flag strictly lowers reward versus the same
    /// outcome without it.
    #[test]
    fn error_flag_strictly_lowers_reward(
        mut outcome in outcome_strategy(),
        tier in prop::sample::select(Tier::ALL.to_vec()),
    ) {
        let cfg = RewardConfig::default();
        outcome.error = false;
        let clean = compute_reward(&cfg, tier, &outcome, None, None, 0.0);
        outcome.error = true;
        let flagged = compute_reward(&cfg, tier, &outcome, None, None, 0.0);
        prop_assert!(flagged.reward < clean.reward);
        prop_assert!((clean.reward - flagged.reward - cfg.penalty_error).abs() < 1e-9);
    }

    /// Outcomes never panic the controller, whatever their contents.
    #[test]
    fn record_outcome_never_panics(
        snap in snapshot_strategy(),
        outcome in outcome_strategy(),
        bogus_seq in any::<u64>(),
    ) {
        let controller = Controller::new(ControllerConfig::default()).unwrap();
        let d = controller.decide(snap).unwrap();
        controller.record_outcome(d.seq, outcome);
        controller.record_outcome(bogus_seq, outcome);
    }
}
