use criterion::{Criterion, black_box, criterion_group, criterion_main};
use gale_core::optim::{CosineSchedule, ParamSchedule, SharedSchedule, WarmupMethod, WarmupSchedule};
use gale_core::optimization::{EpochDerivation, TrainerSettings, fill_placeholders, resolve_horizons};
use gale_core::{ComponentBuilder, ConfigNode, ParamGroup};
use serde_json::json;
use std::sync::Arc;

fn bench_param_schedules(c: &mut Criterion) {
    let base: SharedSchedule = Arc::new(CosineSchedule::new(1.0, 0.0));
    let warm = WarmupSchedule::new(base.clone(), 1e-3, 0.05, WarmupMethod::Linear)
        .expect("valid warmup");

    c.bench_function("cosine_schedule_at", |b| {
        b.iter(|| base.at(black_box(0.37)))
    });

    c.bench_function("warmup_schedule_sweep_1000", |b| {
        b.iter(|| {
            (0..1000)
                .map(|i| warm.at(black_box(i as f64 / 1000.0)))
                .sum::<f64>()
        })
    });
}

fn bench_horizons(c: &mut Criterion) {
    let limits = TrainerSettings {
        max_epochs: Some(90),
        accumulate_grad_batches: 4,
        gpus: 8,
        ..TrainerSettings::default()
    };
    c.bench_function("resolve_horizons", |b| {
        b.iter(|| resolve_horizons(black_box(1_281_167), &limits, EpochDerivation::default()))
    });

    let horizons = resolve_horizons(1_281_167, &limits, EpochDerivation::default()).expect("horizons");
    let args = ConfigNode::new(json!({ "max_lr": 0.1, "epochs": -1, "steps_per_epoch": null }));
    c.bench_function("fill_placeholders", |b| {
        b.iter(|| fill_placeholders(black_box(&args), &horizons))
    });
}

fn bench_scheduler_steps(c: &mut Criterion) {
    let builder = ComponentBuilder::with_defaults().expect("default registries");
    let groups = || vec![ParamGroup::new(vec!["w".into()]), ParamGroup::new(vec!["b".into()])];

    c.bench_function("warmup_cosine_lr_1000_steps", |b| {
        b.iter(|| {
            let mut optimizer = builder
                .build_optimizer(Some("SGD"), &ConfigNode::new(json!({ "lr": 0.1 })), groups())
                .expect("optimizer");
            let mut scheduler = builder
                .build_scheduler(
                    Some("WarmupCosineLR"),
                    &ConfigNode::new(json!({ "max_iters": 1000, "warmup_steps": 50 })),
                    &mut optimizer,
                )
                .expect("scheduler");
            for _ in 0..1000 {
                scheduler.step(optimizer.as_mut(), None).expect("step");
            }
            optimizer.learning_rates()
        })
    });

    c.bench_function("build_one_cycle_lr", |b| {
        b.iter(|| {
            let mut optimizer = builder
                .build_optimizer(Some("AdamW"), &ConfigNode::new(json!({ "lr": 3e-3 })), groups())
                .expect("optimizer");
            builder.build_scheduler(
                Some("OneCycleLR"),
                black_box(&ConfigNode::new(
                    json!({ "max_lr": 3e-3, "epochs": 10, "steps_per_epoch": 100 }),
                )),
                &mut optimizer,
            )
        })
    });
}

criterion_group!(
    benches,
    bench_param_schedules,
    bench_horizons,
    bench_scheduler_steps,
);
criterion_main!(benches);
