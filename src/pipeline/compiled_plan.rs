use crate::config::StepConfig;
use crate::pipeline::id::{CopyId, StepId};
use crate::pipeline::queue::QueuePair;
use std::sync::Arc;

/// Validated topology with every queue-pair allocated.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub name: String,

    /// Steps in declaration order; `StepId` indexes this vector.
    pub steps: Vec<PlannedStep>,

    /// Topological order of the steps (producers before consumers).
    pub order: Vec<StepId>,

    /// Every allocated queue-pair.
    pub pairs: Vec<Arc<QueuePair>>,

    /// Compilation statistics
    pub stats: PlanStats,
}

/// A step and the wiring of each of its copies.
#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub id: StepId,
    pub config: StepConfig,
    pub copies: Vec<PlannedCopy>,
}

/// Queue-pairs owned by one step copy.
#[derive(Debug, Clone)]
pub struct PlannedCopy {
    pub id: CopyId,
    pub inputs: Vec<Arc<QueuePair>>,
    pub targets: Vec<PlannedTarget>,
    pub error_target: Option<PlannedTarget>,
}

/// The pairs from one producer copy to the copies of one target step,
/// ordered by target copy.
#[derive(Debug, Clone)]
pub struct PlannedTarget {
    pub step: String,
    pub pairs: Vec<Arc<QueuePair>>,
    /// Partition key of the target; empty when it is not partitioned.
    pub key_fields: Vec<String>,
}

/// Statistics about the compiled plan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanStats {
    pub steps: usize,

    /// Total step copies, i.e. threads the run will start.
    pub copies: usize,

    /// Enabled hops.
    pub hops: usize,

    pub disabled_hops: usize,

    pub queue_pairs: usize,

    /// Steps without incoming hops.
    pub source_steps: usize,

    /// Steps without outgoing hops.
    pub sink_steps: usize,

    /// Compilation time in microseconds
    pub compile_time_us: u64,
}

impl ExecutionPlan {
    pub fn step(&self, id: StepId) -> &PlannedStep {
        &self.steps[id.index()]
    }

    pub fn find(&self, name: &str) -> Option<&PlannedStep> {
        self.steps.iter().find(|s| s.config.name == name)
    }

    /// Number of queue-pairs between two steps (zero when not connected).
    pub fn pairs_between(&self, from: &str, to: &str) -> usize {
        self.find(from)
            .map(|step| {
                step.copies
                    .iter()
                    .flat_map(|copy| copy.targets.iter().chain(copy.error_target.iter()))
                    .filter(|target| target.step == to)
                    .map(|target| target.pairs.len())
                    .sum()
            })
            .unwrap_or(0)
    }
}
