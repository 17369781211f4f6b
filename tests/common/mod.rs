//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use rowflow::pipeline::{RunResult, StepState};
use std::time::Duration;

/// Upper bound for runs that are expected to finish on their own
pub fn test_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Assert every copy of `step` ended in `state`
pub fn assert_outcome(result: &RunResult, step: &str, state: StepState) {
    let copies: Vec<_> = result.step(step).collect();
    assert!(!copies.is_empty(), "no copies of step '{}' in result", step);
    for copy in copies {
        assert_eq!(
            copy.outcome,
            Some(state),
            "step '{}' copy {} ended {:?}, expected {:?}",
            step,
            copy.copy,
            copy.outcome,
            state
        );
    }
}
