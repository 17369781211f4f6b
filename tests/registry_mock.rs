//! Plugin factories seen through a mocked `StepFactory`

use mockall::{mock, predicate::*};
use rowflow::config::{EngineConfig, StepConfig, Topology};
use rowflow::pipeline::{
    Pipeline, PipelineError, ProcessResult, Row, RunStatus, StepError, StepFactory, StepIo,
    StepLogic, StepRegistry,
};
use std::sync::Arc;

mock! {
    pub Factory {}

    impl StepFactory for Factory {
        fn create(&self, config: &StepConfig, copy: usize) -> anyhow::Result<Box<dyn StepLogic>>;
    }
}

struct Forward;

impl StepLogic for Forward {
    fn process_row(&mut self, row: Option<&Row>, _io: &mut StepIo<'_>) -> Result<ProcessResult, StepError> {
        Ok(match row {
            Some(row) => ProcessResult::Emit(row.values().to_vec()),
            None => ProcessResult::Done,
        })
    }
}

fn topology() -> Topology {
    Topology::new("plugins")
        .step(
            StepConfig::new("source", "generator")
                .with_option("limit", 30)
                .with_option("sequence_field", "id"),
        )
        .step(StepConfig::new("custom", "forward").with_copies(3))
        .hop("source", "custom")
}

#[test]
fn test_factory_called_once_per_copy() {
    let mut factory = MockFactory::new();
    for copy in 0..3 {
        factory
            .expect_create()
            .withf(move |config, c| config.name == "custom" && *c == copy)
            .times(1)
            .returning(|_, _| Ok(Box::new(Forward)));
    }
    let mut registry = StepRegistry::with_builtins();
    registry.register("forward", factory);
    assert!(registry.contains("forward"));

    let result = Pipeline::run(&topology(), Arc::new(registry), EngineConfig::default()).unwrap();

    assert_eq!(result.status, RunStatus::Finished);
    assert_eq!(result.step("custom").count(), 3);
    assert_eq!(result.lines_read("custom"), 30);
}

#[test]
fn test_factory_error_fails_start() {
    let mut factory = MockFactory::new();
    factory
        .expect_create()
        .with(always(), eq(0))
        .times(1)
        .returning(|_, _| Err(anyhow::anyhow!("license check failed")));
    let mut registry = StepRegistry::with_builtins();
    registry.register("forward", factory);

    let err = Pipeline::run(&topology(), Arc::new(registry), EngineConfig::default()).unwrap_err();

    match err {
        PipelineError::StepInit(failure) => {
            assert_eq!(failure.step, "custom");
            assert_eq!(failure.copy, 0);
            assert!(failure.reason.contains("license check failed"));
        }
        other => panic!("expected StepInit, got {:?}", other),
    }
}

#[test]
fn test_plugin_overrides_builtin_tag() {
    let mut factory = MockFactory::new();
    factory
        .expect_create()
        .times(1)
        .returning(|_, _| Ok(Box::new(Forward)));
    let mut registry = StepRegistry::with_builtins();
    registry.register("dummy", factory);

    let topology = Topology::new("override")
        .step(StepConfig::new("source", "generator").with_option("limit", 2))
        .step(StepConfig::new("sink", "dummy"))
        .hop("source", "sink");

    let result = Pipeline::run(&topology, Arc::new(registry), EngineConfig::default()).unwrap();
    assert!(result.is_successful());
}
