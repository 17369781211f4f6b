//! End-to-end runs of small topologies through the real coordinator

mod common;

use common::builders::{filter, ints, GeneratorBuilder};
use common::mock_helpers::{test_registry, Captures};
use common::{assert_outcome, test_timeout};
use rowflow::config::{EngineConfig, ErrorHandling, StepConfig, Topology};
use rowflow::pipeline::{
    ErrorFieldNames, ErrorRecord, Pipeline, RunStatus, StepState, WaitStatus,
};
use std::collections::BTreeSet;
use std::sync::Arc;

fn run(topology: &Topology, captures: &Captures, config: EngineConfig) -> rowflow::pipeline::RunResult {
    let registry = Arc::new(test_registry(captures));
    let mut pipeline = Pipeline::build(topology, registry, config).expect("topology should build");
    pipeline.start().expect("pipeline should start");
    assert_eq!(pipeline.wait_until_finished(Some(test_timeout())), WaitStatus::Finished);
    pipeline.result()
}

#[test]
fn test_filter_copies_deliver_every_row_once() {
    let topology = Topology::new("filtered")
        .step(GeneratorBuilder::new("source").limit(5).sequence("id").build())
        .step(filter("filter", "id", ">", 0).with_copies(2))
        .step(StepConfig::new("sink", "capture"))
        .hop("source", "filter")
        .hop("filter", "sink");
    let captures = Captures::new();

    let result = run(&topology, &captures, EngineConfig::default());

    assert_eq!(result.status, RunStatus::Finished);
    assert_eq!(result.error_count, 0);
    let mut ids = ints(&captures.rows_of("sink"), "id");
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    assert_eq!(result.lines_written("source"), 5);
    assert_eq!(result.lines_read("filter"), 5);
    assert_eq!(result.step("filter").count(), 2);
    assert_outcome(&result, "filter", StepState::Done);
    assert_outcome(&result, "sink", StepState::Done);
}

#[test]
fn test_filter_drops_rows() {
    let topology = Topology::new("filtered")
        .step(GeneratorBuilder::new("source").limit(10).sequence("id").build())
        .step(filter("filter", "id", "<=", 3))
        .step(StepConfig::new("sink", "capture"))
        .hop("source", "filter")
        .hop("filter", "sink");
    let captures = Captures::new();

    let result = run(&topology, &captures, EngineConfig::default());

    assert!(result.is_successful());
    assert_eq!(ints(&captures.rows_of("sink"), "id"), vec![1, 2, 3]);
    assert_eq!(result.lines_read("filter"), 10);
    assert_eq!(result.lines_written("filter"), 3);
}

#[test]
fn test_failed_rows_go_to_error_hop() {
    let script = StepConfig::new("ratio", "script")
        .with_option("expression", "100 / (id - 3)")
        .with_option("target_field", "ratio")
        .with_option("target_type", "integer")
        .with_error_handling(ErrorHandling::to("rejects"));
    let topology = Topology::new("ratios")
        .step(GeneratorBuilder::new("source").limit(5).sequence("id").build())
        .step(script)
        .step(StepConfig::new("sink", "capture"))
        .step(StepConfig::new("rejects", "capture"))
        .hop("source", "ratio")
        .hop("ratio", "sink")
        .hop("ratio", "rejects");
    let captures = Captures::new();

    let result = run(&topology, &captures, EngineConfig::default());

    assert_eq!(result.status, RunStatus::Finished);
    assert_eq!(result.lines_rejected("ratio"), 1);

    let rejected = captures.rows_of("rejects");
    assert_eq!(rejected.len(), 1);
    let record = ErrorRecord::from_row(&rejected[0], &ErrorFieldNames::default())
        .expect("error row should carry error fields");
    assert_eq!(record.step, "ratio");
    assert_eq!(record.nr_errors, 1);
    assert_eq!(record.code, "SCRIPT001");
    assert_eq!(record.original[0].as_i64(), Some(3));

    let passed = captures.rows_of("sink");
    assert_eq!(passed.len(), 4);
    let ids: BTreeSet<i64> = ints(&passed, "id").into_iter().collect();
    assert_eq!(ids, BTreeSet::from([1, 2, 4, 5]));
    let ratio_of_5 = passed
        .iter()
        .find(|row| row.get("id").and_then(|v| v.as_i64()) == Some(5))
        .and_then(|row| row.get("ratio"))
        .and_then(|v| v.as_i64());
    assert_eq!(ratio_of_5, Some(50));
}

#[test]
fn test_copy_movement_duplicates_rows() {
    let topology = Topology::new("copy")
        .step(
            GeneratorBuilder::new("source")
                .limit(10)
                .sequence("id")
                .build()
                .with_movement(rowflow::DataMovement::Copy),
        )
        .step(StepConfig::new("left", "capture"))
        .step(StepConfig::new("right", "capture"))
        .hop("source", "left")
        .hop("source", "right");
    let captures = Captures::new();

    let result = run(&topology, &captures, EngineConfig::default());

    assert!(result.is_successful());
    assert_eq!(captures.rows_of("left").len(), 10);
    assert_eq!(captures.rows_of("right").len(), 10);
    assert_eq!(result.lines_written("source"), 10);
}

#[test]
fn test_distribute_movement_alternates_targets() {
    let topology = Topology::new("distribute")
        .step(GeneratorBuilder::new("source").limit(10).sequence("id").build())
        .step(StepConfig::new("left", "capture"))
        .step(StepConfig::new("right", "capture"))
        .hop("source", "left")
        .hop("source", "right");
    let captures = Captures::new();

    let result = run(&topology, &captures, EngineConfig::default());

    assert!(result.is_successful());
    let left = captures.rows_of("left").len();
    let right = captures.rows_of("right").len();
    assert_eq!(left + right, 10);
    // Queues never fill here, so the round-robin cursor is never skipped
    assert_eq!(left, 5);
    assert_eq!(right, 5);
}

#[test]
fn test_constants_and_select_values_reshape_rows() {
    let mut constant = toml::Table::new();
    constant.insert("name".into(), "region".into());
    constant.insert("type".into(), "string".into());
    constant.insert("value".into(), "EU".into());

    let mut rename = toml::Table::new();
    rename.insert("region".into(), "area".into());

    let topology = Topology::new("reshape")
        .step(
            GeneratorBuilder::new("source")
                .limit(3)
                .field("note", "string", "drop me")
                .sequence("id")
                .build(),
        )
        .step(
            StepConfig::new("constants", "constants")
                .with_option("fields", toml::Value::Array(vec![toml::Value::Table(constant)])),
        )
        .step(
            StepConfig::new("select", "select_values")
                .with_option("remove", toml::Value::Array(vec!["note".into()]))
                .with_option("rename", toml::Value::Table(rename)),
        )
        .step(StepConfig::new("sink", "capture"))
        .hop("source", "constants")
        .hop("constants", "select")
        .hop("select", "sink");
    let captures = Captures::new();

    let result = run(&topology, &captures, EngineConfig::default());

    assert!(result.is_successful(), "run failed: {:?}", result.errors);
    let rows = captures.rows_of("sink");
    assert_eq!(rows.len(), 3);
    let names: Vec<&str> = rows[0].schema().names().collect();
    assert_eq!(names, vec!["id", "area"]);
    assert!(rows.iter().all(|row| row.get("area").and_then(|v| v.as_str()) == Some("EU")));
}
