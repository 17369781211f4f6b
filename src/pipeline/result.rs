//! Run results and live status snapshots.

use crate::pipeline::context::{ErrorDescriptor, StepState};
use serde::Serialize;
use std::time::Duration;

/// Overall state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Built but not started.
    Pending,
    Running,
    /// Every copy ended and none failed.
    Finished,
    /// `Pipeline::stop` was called.
    Stopped,
    /// A copy failed, or the run never started.
    Failed,
    /// The last `wait_until_finished` gave up before the run ended.
    TimedOut,
}

/// Counters and state of one step copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepStatus {
    pub step: String,
    pub copy: usize,
    pub state: StepState,
    /// Terminal state, once reached.
    pub outcome: Option<StepState>,
    pub lines_read: u64,
    pub lines_written: u64,
    pub lines_rejected: u64,
    pub errors: u64,
}

/// Outcome of a pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub pipeline: String,
    pub status: RunStatus,
    pub steps: Vec<StepStatus>,
    pub error_count: u64,
    /// The first fatal errors, in the order they happened.
    pub errors: Vec<ErrorDescriptor>,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    pub rows_read: u64,
    pub rows_written: u64,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl RunResult {
    /// No copy failed and nobody stopped the run.
    pub fn is_successful(&self) -> bool {
        self.status == RunStatus::Finished
    }

    /// Status of every copy of `step`.
    pub fn step<'a>(&'a self, step: &'a str) -> impl Iterator<Item = &'a StepStatus> + 'a {
        self.steps.iter().filter(move |s| s.step == step)
    }

    /// Rows written by all copies of `step`.
    pub fn lines_written(&self, step: &str) -> u64 {
        self.step(step).map(|s| s.lines_written).sum()
    }

    /// Rows read by all copies of `step`.
    pub fn lines_read(&self, step: &str) -> u64 {
        self.step(step).map(|s| s.lines_read).sum()
    }

    /// Rows sent to the error hop by all copies of `step`.
    pub fn lines_rejected(&self, step: &str) -> u64 {
        self.step(step).map(|s| s.lines_rejected).sum()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
