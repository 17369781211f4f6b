//! Row routing between step copies.
//!
//! `InputRouter` merges the input pairs of one copy (fan-in), `OutputRouter`
//! spreads emitted rows over the target steps and their copies (fan-out).
//! Only per-pair FIFO order is preserved; merged inputs interleave freely.

use crate::pipeline::context::RunContext;
use crate::pipeline::queue::{Fetch, PutError, QueuePair, TryPut};
use crate::pipeline::row::Row;
use crossbeam_channel::Select;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// How rows are spread over several target steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataMovement {
    /// Each row goes to one target step, chosen round-robin.
    #[default]
    Distribute,
    /// Each row goes to every target step.
    Copy,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("run is stopping")]
    Cancelled,

    #[error("partition field '{field}' not found in rows sent to '{target}'")]
    MissingKeyField { target: String, field: String },

    #[error("queue-pair {0} is already closed")]
    Closed(String),
}

/// Whether a row reached a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Every consumer of the target has detached.
    Discarded,
}

/// Merges the input pairs of one step copy.
#[derive(Debug)]
pub struct InputRouter {
    inputs: Vec<Arc<QueuePair>>,
    all: Vec<Arc<QueuePair>>,
    cursor: usize,
    poll_interval: Duration,
}

impl InputRouter {
    pub fn new(inputs: Vec<Arc<QueuePair>>, poll_interval: Duration) -> Self {
        Self {
            all: inputs.clone(),
            inputs,
            cursor: 0,
            poll_interval,
        }
    }

    /// No input pairs at all: the step is a source.
    pub fn is_source(&self) -> bool {
        self.all.is_empty()
    }

    /// Longest a blocked read waits before rechecking the run state.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Inputs that have not yet delivered their end marker.
    pub fn live_inputs(&self) -> usize {
        self.inputs.len()
    }

    /// Next row from any live input.
    ///
    /// Returns `Fetch::EndOfStream` only once every input has ended, and
    /// `Fetch::Cancelled` when the run stops while waiting.
    pub fn next_row(&mut self, run: &RunContext) -> Fetch {
        loop {
            if run.is_stopped() {
                return Fetch::Cancelled;
            }
            let mut misses = 0;
            while misses < self.inputs.len() {
                let index = self.cursor % self.inputs.len();
                match self.inputs[index].try_get() {
                    Fetch::Row(row) => {
                        self.cursor = index + 1;
                        return Fetch::Row(row);
                    }
                    Fetch::EndOfStream => {
                        let pair = self.inputs.remove(index);
                        tracing::trace!(pair = %pair.name(), remaining = self.inputs.len(), "input finished");
                        self.cursor = index;
                    }
                    Fetch::Cancelled => return Fetch::Cancelled,
                    Fetch::Empty | Fetch::TimedOut => {
                        self.cursor = index + 1;
                        misses += 1;
                    }
                }
            }
            if self.inputs.is_empty() {
                return Fetch::EndOfStream;
            }

            // Nothing ready: park until an input or the stop signal wakes us.
            let mut sel = Select::new();
            for pair in &self.inputs {
                pair.watch(&mut sel);
            }
            sel.recv(run.stop_signal());
            let _ = sel.ready_timeout(self.poll_interval);
        }
    }

    /// Tell every producer this copy will not read again.
    pub fn detach_all(&self) {
        for pair in &self.all {
            pair.detach();
        }
    }
}

/// Fan-out state for one target step.
#[derive(Debug)]
pub struct TargetRoute {
    step: String,
    pairs: Vec<Arc<QueuePair>>,
    key_fields: Vec<String>,
    key_indexes: Option<Vec<usize>>,
    cursor: usize,
}

impl TargetRoute {
    /// `pairs` are ordered by target copy. A non-empty `key_fields` makes the
    /// route partitioned.
    pub fn new(step: impl Into<String>, pairs: Vec<Arc<QueuePair>>, key_fields: Vec<String>) -> Self {
        Self {
            step: step.into(),
            pairs,
            key_fields,
            key_indexes: None,
            cursor: 0,
        }
    }

    pub fn step(&self) -> &str {
        &self.step
    }

    pub fn pairs(&self) -> &[Arc<QueuePair>] {
        &self.pairs
    }

    pub fn is_partitioned(&self) -> bool {
        !self.key_fields.is_empty()
    }

    /// At least one consumer copy is still reading.
    pub fn is_live(&self) -> bool {
        self.pairs.iter().any(|p| !p.is_detached())
    }

    pub fn send(&mut self, row: Row) -> Result<Delivery, RouteError> {
        if self.pairs.is_empty() {
            return Ok(Delivery::Discarded);
        }
        if self.is_partitioned() {
            self.send_partitioned(row)
        } else {
            self.send_round_robin(row)
        }
    }

    /// Index of the pair that receives rows with this row's key.
    pub fn partition_of(&mut self, row: &Row) -> Result<usize, RouteError> {
        if self.key_indexes.is_none() {
            let indexes = self
                .key_fields
                .iter()
                .map(|field| {
                    row.schema()
                        .index_of(field)
                        .ok_or_else(|| RouteError::MissingKeyField {
                            target: self.step.clone(),
                            field: field.clone(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            self.key_indexes = Some(indexes);
        }
        let mut hasher = DefaultHasher::new();
        for &index in self.key_indexes.iter().flatten() {
            if let Some(value) = row.value(index) {
                value.hash_into(&mut hasher);
            }
        }
        Ok((hasher.finish() % self.pairs.len() as u64) as usize)
    }

    fn send_partitioned(&mut self, row: Row) -> Result<Delivery, RouteError> {
        let index = self.partition_of(&row)?;
        match self.pairs[index].put(row) {
            Ok(()) => Ok(Delivery::Delivered),
            Err(PutError::Detached(_)) => Ok(Delivery::Discarded),
            Err(err) => Err(self.put_failure(index, err)),
        }
    }

    /// Round-robin that skips full pairs; blocks on the cursor pair only when
    /// every live pair is full.
    fn send_round_robin(&mut self, row: Row) -> Result<Delivery, RouteError> {
        let count = self.pairs.len();
        let mut row = row;
        for offset in 0..count {
            let index = (self.cursor + offset) % count;
            match self.pairs[index].try_put(row) {
                Ok(TryPut::Sent) => {
                    self.cursor = (index + 1) % count;
                    return Ok(Delivery::Delivered);
                }
                Ok(TryPut::Full(back)) => row = back,
                Err(PutError::Detached(back)) => row = back,
                Err(err) => return Err(self.put_failure(index, err)),
            }
        }
        loop {
            let Some(index) = (0..count)
                .map(|offset| (self.cursor + offset) % count)
                .find(|&index| !self.pairs[index].is_detached())
            else {
                return Ok(Delivery::Discarded);
            };
            match self.pairs[index].put(row) {
                Ok(()) => {
                    self.cursor = (index + 1) % count;
                    return Ok(Delivery::Delivered);
                }
                // The consumer left while we waited; try the next one.
                Err(PutError::Detached(back)) => row = back,
                Err(err) => return Err(self.put_failure(index, err)),
            }
        }
    }

    fn put_failure(&self, index: usize, err: PutError) -> RouteError {
        match err {
            PutError::Closed(_) => RouteError::Closed(self.pairs[index].name().to_string()),
            PutError::Cancelled(_) | PutError::Detached(_) => RouteError::Cancelled,
        }
    }

    pub fn signal_end(&self) {
        for pair in &self.pairs {
            pair.signal_end();
        }
    }
}

/// Fan-out over every target step of one copy.
#[derive(Debug)]
pub struct OutputRouter {
    targets: Vec<TargetRoute>,
    movement: DataMovement,
    cursor: usize,
}

impl OutputRouter {
    pub fn new(targets: Vec<TargetRoute>, movement: DataMovement) -> Self {
        Self {
            targets,
            movement,
            cursor: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn targets(&self) -> &[TargetRoute] {
        &self.targets
    }

    /// Every downstream consumer has detached; the copy has nothing left to feed.
    pub fn all_detached(&self) -> bool {
        !self.targets.is_empty() && self.targets.iter().all(|t| !t.is_live())
    }

    /// Route one row. Returns how many target steps received it.
    pub fn route(&mut self, row: Row) -> Result<usize, RouteError> {
        match self.movement {
            DataMovement::Copy => self.route_copy(row),
            DataMovement::Distribute => self.route_distribute(row),
        }
    }

    fn route_copy(&mut self, row: Row) -> Result<usize, RouteError> {
        let mut delivered = 0;
        let last = self.targets.len().saturating_sub(1);
        let mut row = Some(row);
        for (index, target) in self.targets.iter_mut().enumerate() {
            let copy = if index == last {
                row.take()
            } else {
                row.clone()
            };
            if let Some(copy) = copy {
                if target.send(copy)? == Delivery::Delivered {
                    delivered += 1;
                }
            }
        }
        Ok(delivered)
    }

    fn route_distribute(&mut self, row: Row) -> Result<usize, RouteError> {
        let count = self.targets.len();
        for offset in 0..count {
            let index = (self.cursor + offset) % count;
            if !self.targets[index].is_live() {
                continue;
            }
            self.cursor = (index + 1) % count;
            return match self.targets[index].send(row)? {
                Delivery::Delivered => Ok(1),
                Delivery::Discarded => Ok(0),
            };
        }
        Ok(0)
    }

    pub fn signal_end(&self) {
        for target in &self.targets {
            target.signal_end();
        }
    }
}
