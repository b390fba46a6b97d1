//! Property-based tests for schedules and horizon resolution using proptest.

use proptest::prelude::*;
use std::sync::Arc;

use gale_core::optim::{
    CompositeSchedule, ConstantSchedule, CosineSchedule, ExponentialSchedule, IntervalScaling, LinearSchedule,
    ParamSchedule, SharedSchedule, Stage, WarmupMethod, WarmupSchedule,
};
use gale_core::optimization::{BatchLimit, EpochDerivation, TrainerSettings, resolve_horizons};
use gale_core::registry::Registry;

fn base_schedule() -> impl Strategy<Value = SharedSchedule> {
    prop_oneof![
        (0.01f64..10.0).prop_map(|v| Arc::new(ConstantSchedule::new(v)) as SharedSchedule),
        (0.01f64..10.0, 0.0f64..10.0).prop_map(|(s, e)| Arc::new(LinearSchedule::new(s, e)) as SharedSchedule),
        (0.01f64..10.0, 0.0f64..10.0).prop_map(|(s, e)| Arc::new(CosineSchedule::new(s, e)) as SharedSchedule),
        (0.01f64..10.0, 0.01f64..1.0)
            .prop_map(|(s, d)| Arc::new(ExponentialSchedule::new(s, d)) as SharedSchedule),
    ]
}

// --- Registry properties ---

proptest! {
    #[test]
    fn registry_get_returns_registered(name in "[A-Za-z][A-Za-z0-9_]{0,15}", value in any::<u32>()) {
        let mut registry = Registry::new("prop");
        registry.register(name.clone(), value).unwrap();
        prop_assert_eq!(*registry.get(&name).unwrap(), value);
        prop_assert!(registry.register(name.clone(), value).is_err());
        let missing = format!("{name}-missing");
        prop_assert!(registry.get(&missing).is_err());
    }
}

// --- Warmup properties ---

proptest! {
    #[test]
    fn warmup_is_continuous_at_boundary(
        base in base_schedule(),
        factor in 0.0f64..1.0,
        length in 0.01f64..0.95,
    ) {
        let warm = WarmupSchedule::new(base.clone(), factor, length, WarmupMethod::Linear).unwrap();
        let at_boundary = warm.at(length);
        prop_assert!((at_boundary - base.at(length)).abs() < 1e-9,
            "warmup {} vs base {}", at_boundary, base.at(length));
        prop_assert!((warm.at(0.0) - factor * base.at(0.0)).abs() < 1e-9);
    }

    #[test]
    fn constant_warmup_is_flat(base in base_schedule(), factor in 0.0f64..1.0, length in 0.05f64..0.95) {
        let warm = WarmupSchedule::new(base.clone(), factor, length, WarmupMethod::Constant).unwrap();
        let start = warm.at(0.0);
        prop_assert!((warm.at(length * 0.5) - start).abs() < 1e-12);
    }

    #[test]
    fn progress_is_clamped(base in base_schedule(), p in -10.0f64..10.0) {
        let clamped = p.clamp(0.0, 1.0);
        prop_assert_eq!(base.at(p), base.at(clamped));
    }
}

// --- Composite properties ---

proptest! {
    #[test]
    fn composite_partition_law(
        first in base_schedule(),
        second in base_schedule(),
        l1 in 0.05f64..0.95,
        p in 0.0f64..1.0,
    ) {
        let composite = CompositeSchedule::new(vec![
            Stage::new(first.clone(), l1, IntervalScaling::Rescaled),
            Stage::new(second.clone(), 1.0 - l1, IntervalScaling::Fixed),
        ])
        .unwrap();
        // keep clear of the boundary epsilon
        prop_assume!((p - l1).abs() > 1e-5);
        let expected = if p < l1 { first.at(p / l1) } else { second.at(p) };
        prop_assert!((composite.at(p) - expected).abs() < 1e-9);
    }

    #[test]
    fn composite_rejects_bad_lengths(l1 in 0.05f64..0.9, gap in 0.01f64..0.5) {
        let result = CompositeSchedule::new(vec![
            Stage::new(Arc::new(ConstantSchedule::new(1.0)), l1, IntervalScaling::Rescaled),
            Stage::new(Arc::new(ConstantSchedule::new(1.0)), 1.0 - l1 - gap, IntervalScaling::Rescaled),
        ]);
        prop_assert!(result.is_err());
    }
}

// --- Horizon properties ---

proptest! {
    #[test]
    fn horizons_are_deterministic(
        len in 1usize..100_000,
        epochs in 1u64..200,
        accumulation in 1u64..16,
        gpus in 0u64..8,
    ) {
        let limits = TrainerSettings {
            max_epochs: Some(epochs),
            accumulate_grad_batches: accumulation,
            gpus,
            ..TrainerSettings::default()
        };
        let a = resolve_horizons(len, &limits, EpochDerivation::default());
        let b = resolve_horizons(len, &limits, EpochDerivation::default());
        match (a, b) {
            (Ok(a), Ok(b)) => {
                prop_assert_eq!(a, b);
                prop_assert_eq!(a.max_steps, (a.steps_per_epoch / a.effective_batch_size) * epochs);
            }
            (Err(_), Err(_)) => {}
            _ => prop_assert!(false, "resolution was not deterministic"),
        }
    }

    #[test]
    fn step_limit_covers_max_steps(len in 1usize..10_000, steps in 1u64..1_000_000) {
        let limits = TrainerSettings {
            max_steps: Some(steps as i64),
            limit_train_batches: BatchLimit::Count(0),
            ..TrainerSettings::default()
        };
        let h = resolve_horizons(len, &limits, EpochDerivation::PerEpochSteps).unwrap();
        prop_assert!(h.max_epochs * h.optimizer_steps_per_epoch() >= h.max_steps);
        prop_assert!((h.max_epochs - 1) * h.optimizer_steps_per_epoch() < h.max_steps);
    }
}
