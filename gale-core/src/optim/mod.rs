//! Optimizers, learning-rate schedulers and the parameter schedules they
//! are built from.

pub mod lr_schedulers;
pub mod optimizers;
pub mod param_schedule;

pub use lr_schedulers::{LrScheduler, ReduceLrOnPlateau, SCHEDULERS, Scheduled, SchedulerState};
pub use optimizers::{Adam, AdamW, Optim, Optimizer, OptimizerGroup, RAdam, RmsProp, Sgd, build_optimizer};
pub use param_schedule::{
    CompositeSchedule, ConstantSchedule, CosineSchedule, ExponentialSchedule, IntervalScaling, LinearSchedule,
    MultiStepSchedule, ParamSchedule, PolynomialDecaySchedule, SharedSchedule, Stage, StepSchedule,
    StepWithFixedGammaSchedule, WarmupMethod, WarmupSchedule, warmup_length,
};

use crate::builder::Registries;
use crate::error::RegistryError;
use crate::factory::Constructor;
use optimizers::{AdamArgs, AdamWArgs, OptimizerArgs, RAdamArgs, RmsPropArgs, SgdArgs};

/// `_target_` path of a built-in optimizer or scheduler constructor.
pub fn constructor_path(name: &str) -> String {
    format!("{}::{}", module_path!(), name)
}

fn register_optimizer<A: OptimizerArgs>(registries: &mut Registries) -> Result<(), RegistryError> {
    registries.optimizers.register(
        A::NAME,
        constructor_path(A::NAME),
        Constructor::Keyword(build_optimizer::<A>),
    )
}

/// Populate the optimizer and scheduler domains of `registries`.
pub fn register_defaults(registries: &mut Registries) -> Result<(), RegistryError> {
    register_optimizer::<SgdArgs>(registries)?;
    register_optimizer::<AdamArgs>(registries)?;
    register_optimizer::<AdamWArgs>(registries)?;
    register_optimizer::<RmsPropArgs>(registries)?;
    register_optimizer::<RAdamArgs>(registries)?;

    for (name, constructor) in SCHEDULERS {
        registries
            .schedulers
            .register(name, constructor_path(name), Constructor::Keyword(*constructor))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigNode;
    use crate::params::ParamGroup;
    use serde_json::json;

    fn registries() -> Registries {
        let mut registries = Registries::new();
        register_defaults(&mut registries).unwrap();
        registries
    }

    #[test]
    fn test_optimizer_names() {
        assert_eq!(
            registries().optimizers.names(),
            vec!["Adam", "AdamW", "RAdam", "RMSprop", "SGD"]
        );
    }

    #[test]
    fn test_optimizer_from_target_path() {
        let registries = registries();
        let args = ConfigNode::new(json!({ "_target_": constructor_path("AdamW"), "lr": 0.01 }));
        let mut groups = vec![ParamGroup::new(vec!["w".into()])];
        let opt = registries
            .optimizers
            .build(None, &args, &mut groups, "optimization.optimizer")
            .unwrap();
        assert_eq!(opt.name(), "AdamW");
        assert_eq!(opt.learning_rates(), vec![0.01]);
    }

    #[test]
    fn test_scheduler_paths_are_module_qualified() {
        let paths = registries().schedulers.paths();
        assert!(paths.contains(&"gale_core::optim::WarmupStepLR".to_string()));
    }
}
