//! Engine config and topology file loading

mod common;

use common::builders::GeneratorBuilder;
use rowflow::config::{EngineConfig, ErrorHandling, StepConfig, Topology, ENV_QUEUE_CAPACITY};
use rowflow::pipeline::{Pipeline, StepRegistry};
use rowflow::DataMovement;
use serial_test::serial;
use std::sync::Arc;
use tempfile::TempDir;

struct EnvGuard;

impl EnvGuard {
    fn set(value: &str) -> Self {
        std::env::set_var(ENV_QUEUE_CAPACITY, value);
        EnvGuard
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        std::env::remove_var(ENV_QUEUE_CAPACITY);
    }
}

#[test]
#[serial]
fn test_engine_config_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("engine.toml");
    let config = EngineConfig::default()
        .with_queue_capacity(64)
        .with_safe_mode(true);

    config.save(&path).unwrap();
    let loaded = EngineConfig::load(&path).unwrap();

    assert_eq!(loaded, config);
}

#[test]
#[serial]
fn test_engine_config_rejects_zero_capacity() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("engine.toml");
    std::fs::write(&path, "queue_capacity = 0\n").unwrap();

    let err = EngineConfig::load(&path).unwrap_err();

    assert!(err.to_string().contains("queue_capacity"));
}

#[test]
#[serial]
fn test_env_overrides_queue_capacity() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("engine.toml");
    std::fs::write(&path, "queue_capacity = 32\n").unwrap();
    let _env = EnvGuard::set("7");

    let loaded = EngineConfig::load(&path).unwrap();

    assert_eq!(loaded.queue_capacity, 7);
}

#[test]
#[serial]
fn test_invalid_env_override_is_an_error() {
    let _env = EnvGuard::set("lots");

    let err = EngineConfig::default().with_env_overrides().unwrap_err();

    assert!(err.to_string().contains(ENV_QUEUE_CAPACITY));
}

#[test]
#[serial]
fn test_topology_from_toml_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("orders.toml");
    std::fs::write(
        &path,
        r#"
name = "orders"

[[steps]]
name = "source"
type = "generator"
movement = "copy"
[steps.options]
limit = 5
sequence_field = "id"

[[steps]]
name = "check"
type = "filter"
copies = 2
partitioning = { fields = ["id"] }
error_handling = { target = "rejects", max_errors = 3 }
[steps.options]
field = "id"
op = ">"
value = 2

[[steps]]
name = "rejects"
type = "dummy"

[[hops]]
from = "source"
to = "check"

[[hops]]
from = "check"
to = "rejects"
enabled = false
"#,
    )
    .unwrap();

    let topology = Topology::load(&path).unwrap();

    assert_eq!(topology.name, "orders");
    assert_eq!(topology.steps.len(), 3);
    let source = topology.find_step("source").unwrap();
    assert_eq!(source.movement, DataMovement::Copy);
    assert_eq!(source.option_i64("limit"), Some(5));
    let check = topology.find_step("check").unwrap();
    assert_eq!(check.copies, 2);
    assert_eq!(check.partitioning.as_ref().unwrap().fields, vec!["id".to_string()]);
    let handling = check.error_handling.as_ref().unwrap();
    assert_eq!(handling.target, "rejects");
    assert_eq!(handling.max_errors, Some(3));
    assert!(!topology.hops[1].enabled);

    // The only hop to the error target is disabled
    let registry = Arc::new(StepRegistry::with_builtins());
    assert!(Pipeline::build(&topology, registry, EngineConfig::default()).is_err());
}

#[test]
#[serial]
fn test_topology_json_and_toml_files_agree() {
    let dir = TempDir::new().unwrap();
    let topology = Topology::new("roundtrip")
        .step(GeneratorBuilder::new("source").limit(3).field("region", "string", "EU").build())
        .step(
            StepConfig::new("sink", "dummy")
                .with_copies(2)
                .with_error_handling(ErrorHandling::to("rejects").with_max_percent_errors(10, 100)),
        )
        .step(StepConfig::new("rejects", "dummy"))
        .hop("source", "sink")
        .hop("sink", "rejects");

    let toml_path = dir.path().join("pipeline.toml");
    let json_path = dir.path().join("pipeline.json");
    topology.save(&toml_path).unwrap();
    topology.save(&json_path).unwrap();

    assert!(std::fs::read_to_string(&json_path).unwrap().trim_start().starts_with('{'));
    assert_eq!(Topology::load(&toml_path).unwrap(), topology);
    assert_eq!(Topology::load(&json_path).unwrap(), topology);
}

#[test]
#[serial]
fn test_topology_load_reports_the_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "[[steps]]\nname = 3\n").unwrap();

    let err = Topology::load(&path).unwrap_err();

    assert!(err.to_string().contains("broken.toml"));
}
