//! Pipeline coordinator.
//!
//! A run goes through three phases:
//! 1. `build` validates the topology and allocates every queue-pair.
//! 2. `start` creates the step logic for each copy, initializes all copies in
//!    parallel, then spawns one named thread per copy.
//! 3. `wait_until_finished` collects the copies' outcomes; `result` reports.
//!
//! Listeners, producers and callbacks are attached between `build` and
//! `start`. After `start` the coordinator only observes: copies share nothing
//! but the `RunContext` and the queue-pairs between them.

use crate::config::{EngineConfig, Topology};
use crate::pipeline::compiled_plan::ExecutionPlan;
use crate::pipeline::compiler::PipelineCompiler;
use crate::pipeline::context::{RunContext, StepMetrics, StepState, StopCause};
use crate::pipeline::error::{PipelineError, PipelineResult, StepInitError};
use crate::pipeline::error_router::ErrorRouter;
use crate::pipeline::listener::{RowListener, RowListeners};
use crate::pipeline::producer::RowProducer;
use crate::pipeline::queue::QueuePair;
use crate::pipeline::registry::StepRegistry;
use crate::pipeline::result::{RunResult, RunStatus, StepStatus};
use crate::pipeline::router::{InputRouter, OutputRouter, TargetRoute};
use crate::pipeline::runtime::{StepOutcome, StepRuntime};
use crate::pipeline::step::StepContext;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Result of waiting for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Finished,
    /// The run is still going; nothing was stopped.
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Built,
    Running,
    Finished,
    InitFailed,
}

struct CopyMetrics {
    step: String,
    copy: usize,
    metrics: Arc<StepMetrics>,
}

/// Extra input pair fed by a `RowProducer`.
struct ProducerInput {
    step: String,
    copy: usize,
    pair: Arc<QueuePair>,
}

type StepFinishedCallback = Box<dyn Fn(&StepOutcome) + Send>;
type FinishedCallback = Box<dyn Fn(&RunResult) + Send>;

/// A built pipeline and, once started, its running copies.
pub struct Pipeline {
    plan: ExecutionPlan,
    config: EngineConfig,
    registry: Arc<StepRegistry>,
    run: Arc<RunContext>,
    metrics: Vec<CopyMetrics>,
    listeners: Vec<(String, Arc<dyn RowListener>)>,
    producers: Vec<ProducerInput>,
    step_finished: Vec<StepFinishedCallback>,
    finished: Vec<FinishedCallback>,
    phase: Phase,
    handles: Vec<JoinHandle<()>>,
    outcome_tx: Option<Sender<StepOutcome>>,
    outcome_rx: Receiver<StepOutcome>,
    outcomes: Vec<StepOutcome>,
    expected: usize,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
    timed_out: bool,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Validate `topology` and allocate its queue-pairs.
    pub fn build(
        topology: &Topology,
        registry: Arc<StepRegistry>,
        config: EngineConfig,
    ) -> PipelineResult<Self> {
        let plan = PipelineCompiler::compile(topology, &registry, config.queue_capacity)?;
        let run = Arc::new(RunContext::new(plan.pairs.clone(), config.max_error_messages));
        let metrics = plan
            .order
            .iter()
            .map(|&id| plan.step(id))
            .flat_map(|step| {
                (0..step.copies.len()).map(move |copy| CopyMetrics {
                    step: step.config.name.clone(),
                    copy,
                    metrics: Arc::new(StepMetrics::new()),
                })
            })
            .collect();
        let (outcome_tx, outcome_rx) = unbounded();
        Ok(Self {
            plan,
            config,
            registry,
            run,
            metrics,
            listeners: Vec::new(),
            producers: Vec::new(),
            step_finished: Vec::new(),
            finished: Vec::new(),
            phase: Phase::Built,
            handles: Vec::new(),
            outcome_tx: Some(outcome_tx),
            outcome_rx,
            outcomes: Vec::new(),
            expected: 0,
            started_at: None,
            finished_at: None,
            timed_out: false,
        })
    }

    /// Build, start and wait for a pipeline, returning its result.
    pub fn run(
        topology: &Topology,
        registry: Arc<StepRegistry>,
        config: EngineConfig,
    ) -> PipelineResult<RunResult> {
        let mut pipeline = Pipeline::build(topology, registry, config)?;
        pipeline.start()?;
        pipeline.wait_until_finished(None);
        Ok(pipeline.result())
    }

    pub fn name(&self) -> &str {
        &self.plan.name
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn queue_pairs(&self) -> &[Arc<QueuePair>] {
        &self.plan.pairs
    }

    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    fn ensure_not_started(&self) -> PipelineResult<()> {
        if self.phase == Phase::Built {
            Ok(())
        } else {
            Err(PipelineError::AlreadyStarted)
        }
    }

    fn ensure_copy(&self, step: &str, copy: usize) -> PipelineResult<()> {
        match self.plan.find(step) {
            Some(planned) if copy < planned.copies.len() => Ok(()),
            _ => Err(PipelineError::UnknownCopy {
                step: step.to_string(),
                copy,
            }),
        }
    }

    /// Observe every row read and written by each copy of `step`.
    pub fn add_row_listener(&mut self, step: &str, listener: Arc<dyn RowListener>) -> PipelineResult<()> {
        self.ensure_not_started()?;
        self.ensure_copy(step, 0)?;
        self.listeners.push((step.to_string(), listener));
        Ok(())
    }

    /// Attach an extra input to one copy of `step` and return its write end.
    ///
    /// The copy does not finish until the producer is finished or dropped.
    pub fn row_producer(&mut self, step: &str, copy: usize) -> PipelineResult<RowProducer> {
        self.ensure_not_started()?;
        self.ensure_copy(step, copy)?;
        let pair = Arc::new(QueuePair::new(
            format!("producer - {}.{}", step, copy),
            self.config.queue_capacity,
        ));
        self.run.register_pair(pair.clone());
        self.producers.push(ProducerInput {
            step: step.to_string(),
            copy,
            pair: pair.clone(),
        });
        tracing::debug!(pipeline = %self.plan.name, step, copy, "row producer attached");
        Ok(RowProducer::new(pair))
    }

    /// Call `callback` with each copy's outcome as the copy ends.
    ///
    /// Callbacks run on the thread waiting in `wait_until_finished`.
    pub fn on_step_finished(&mut self, callback: impl Fn(&StepOutcome) + Send + 'static) {
        self.step_finished.push(Box::new(callback));
    }

    /// Call `callback` once with the final result after a started run ends.
    pub fn on_finished(&mut self, callback: impl Fn(&RunResult) + Send + 'static) {
        self.finished.push(Box::new(callback));
    }

    /// Hold every copy before its next row; a copy busy with a row finishes
    /// it first. Returns `false` if already paused.
    pub fn pause(&self) -> bool {
        let paused = self.run.pause();
        if paused {
            tracing::info!(pipeline = %self.plan.name, "pipeline paused");
        }
        paused
    }

    /// Let paused copies continue. Returns `false` if the run was not paused.
    pub fn resume(&self) -> bool {
        let resumed = self.run.resume();
        if resumed {
            tracing::info!(pipeline = %self.plan.name, "pipeline resumed");
        }
        resumed
    }

    pub fn is_paused(&self) -> bool {
        self.run.is_paused()
    }

    fn metrics_for(&self, step: &str, copy: usize) -> Arc<StepMetrics> {
        self.metrics
            .iter()
            .find(|m| m.step == step && m.copy == copy)
            .map(|m| m.metrics.clone())
            .unwrap_or_default()
    }

    fn create_runtimes(&self) -> Result<Vec<StepRuntime>, StepInitError> {
        let poll_interval = self.config.poll_interval();
        let mut runtimes = Vec::with_capacity(self.metrics.len());
        for &id in &self.plan.order {
            let step = self.plan.step(id);
            let config = &step.config;
            for (copy, planned) in step.copies.iter().enumerate() {
                let logic = self.registry.create(config, copy).map_err(|e| StepInitError {
                    step: config.name.clone(),
                    copy,
                    reason: format!("{:#}", e),
                })?;
                let targets = planned
                    .targets
                    .iter()
                    .map(|t| TargetRoute::new(t.step.clone(), t.pairs.clone(), t.key_fields.clone()))
                    .collect();
                let errors = planned
                    .error_target
                    .as_ref()
                    .zip(config.error_handling.as_ref())
                    .map(|(t, handling)| {
                        ErrorRouter::new(
                            config.name.clone(),
                            TargetRoute::new(t.step.clone(), t.pairs.clone(), t.key_fields.clone()),
                            handling.field_names.clone(),
                            handling.limits(),
                        )
                    });
                let mut inputs = planned.inputs.clone();
                inputs.extend(
                    self.producers
                        .iter()
                        .filter(|p| p.step == config.name && p.copy == copy)
                        .map(|p| p.pair.clone()),
                );
                let mut listeners = RowListeners::new();
                for (_, listener) in self.listeners.iter().filter(|(step, _)| *step == config.name) {
                    listeners.push(listener.clone());
                }
                let runtime = StepRuntime::new(
                    StepContext::new(&config.name, &config.step_type, copy, config.copies),
                    logic,
                    InputRouter::new(inputs, poll_interval),
                    OutputRouter::new(targets, config.movement),
                    errors,
                    self.metrics_for(&config.name, copy),
                    self.run.clone(),
                    self.config.safe_mode,
                );
                runtimes.push(runtime.with_listeners(listeners));
            }
        }
        Ok(runtimes)
    }

    fn abort_start(&mut self, failures: &[StepInitError], runtimes: Vec<StepRuntime>) {
        for failure in failures {
            tracing::error!(step = %failure.step, copy = failure.copy, reason = %failure.reason, "step initialization failed");
            self.run
                .record_error(&failure.step, failure.copy, failure.to_string());
        }
        for runtime in runtimes {
            runtime.dispose_unstarted();
        }
        self.phase = Phase::InitFailed;
    }

    /// Initialize every copy and start one thread per copy. Returns without
    /// waiting for the run.
    pub fn start(&mut self) -> PipelineResult<()> {
        self.ensure_not_started()?;
        let started = Instant::now();
        self.started_at = Some(started);

        let mut runtimes = match self.create_runtimes() {
            Ok(runtimes) => runtimes,
            Err(failure) => {
                self.abort_start(std::slice::from_ref(&failure), Vec::new());
                return Err(failure.into());
            }
        };

        let failures: Vec<StepInitError> = std::thread::scope(|scope| {
            let handles: Vec<_> = runtimes
                .iter_mut()
                .map(|runtime| scope.spawn(move || runtime.initialize()))
                .collect();
            handles
                .into_iter()
                .filter_map(|handle| match handle.join() {
                    Ok(Err(failure)) => Some(failure),
                    _ => None,
                })
                .collect()
        });
        if let Some(first) = failures.first().cloned() {
            self.abort_start(&failures, runtimes);
            return Err(first.into());
        }

        let Some(outcome_tx) = self.outcome_tx.take() else {
            return Err(PipelineError::AlreadyStarted);
        };
        self.phase = Phase::Running;
        let mut pending = runtimes.into_iter();
        while let Some(runtime) = pending.next() {
            let name = format!(
                "{}{}.{}",
                self.config.thread_name_prefix,
                runtime.context().name(),
                runtime.context().copy()
            );
            let tx = outcome_tx.clone();
            let spawned = std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    let outcome = runtime.run();
                    let _ = tx.send(outcome);
                });
            match spawned {
                Ok(handle) => {
                    self.handles.push(handle);
                    self.expected += 1;
                }
                Err(source) => {
                    tracing::error!(thread = %name, error = %source, "failed to spawn step thread");
                    self.run.record_error(&name, 0, source.to_string());
                    self.run.stop(StopCause::Failure);
                    for runtime in pending {
                        runtime.dispose_unstarted();
                    }
                    return Err(PipelineError::Spawn { name, source });
                }
            }
        }

        tracing::info!(
            pipeline = %self.plan.name,
            steps = self.plan.stats.steps,
            copies = self.expected,
            pairs = self.plan.stats.queue_pairs,
            init_ms = started.elapsed().as_millis() as u64,
            "pipeline started"
        );
        Ok(())
    }

    /// Wait for every copy to end, or until `timeout` passes.
    ///
    /// A timeout leaves the run untouched; call again or `stop()`.
    pub fn wait_until_finished(&mut self, timeout: Option<Duration>) -> WaitStatus {
        if self.phase != Phase::Running {
            return WaitStatus::Finished;
        }
        let deadline = timeout.map(|t| Instant::now() + t);
        while self.outcomes.len() < self.expected {
            let received = match deadline {
                Some(deadline) => self.outcome_rx.recv_deadline(deadline),
                None => self
                    .outcome_rx
                    .recv()
                    .map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(outcome) => {
                    for callback in &self.step_finished {
                        callback(&outcome);
                    }
                    self.outcomes.push(outcome);
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.timed_out = true;
                    tracing::warn!(
                        pipeline = %self.plan.name,
                        finished = self.outcomes.len(),
                        total = self.expected,
                        "timed out waiting for pipeline"
                    );
                    return WaitStatus::TimedOut;
                }
                // A copy thread died without reporting; nothing more will arrive.
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                tracing::error!(pipeline = %self.plan.name, "step thread panicked outside its runtime");
            }
        }
        self.timed_out = false;
        self.phase = Phase::Finished;
        self.finished_at = Some(Instant::now());

        let result = self.result();
        tracing::info!(
            pipeline = %self.plan.name,
            status = ?result.status,
            errors = result.error_count,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "pipeline finished"
        );
        for callback in &self.finished {
            callback(&result);
        }
        WaitStatus::Finished
    }

    /// Ask every copy to stop and wake all blocked copies. Idempotent.
    pub fn stop(&self) {
        self.run.stop(StopCause::External);
    }

    /// Live counters and state of every copy.
    pub fn step_status(&self) -> Vec<StepStatus> {
        self.metrics
            .iter()
            .map(|m| StepStatus {
                step: m.step.clone(),
                copy: m.copy,
                state: m.metrics.state(),
                outcome: m.metrics.outcome(),
                lines_read: m.metrics.lines_read(),
                lines_written: m.metrics.lines_written(),
                lines_rejected: m.metrics.lines_rejected(),
                errors: m.metrics.errors(),
            })
            .collect()
    }

    pub fn result(&self) -> RunResult {
        let steps = self.step_status();
        let status = match self.phase {
            Phase::Built => RunStatus::Pending,
            Phase::InitFailed => RunStatus::Failed,
            Phase::Running if self.timed_out => RunStatus::TimedOut,
            Phase::Running => RunStatus::Running,
            Phase::Finished => {
                let errored = steps
                    .iter()
                    .any(|s| s.outcome == Some(StepState::Errored));
                if errored || self.run.error_count() > 0 || self.outcomes.len() < self.expected {
                    RunStatus::Failed
                } else if self.run.is_stopped_externally() {
                    RunStatus::Stopped
                } else {
                    RunStatus::Finished
                }
            }
        };
        let elapsed = match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => end.duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        };
        RunResult {
            pipeline: self.plan.name.clone(),
            status,
            steps,
            error_count: self.run.error_count(),
            errors: self.run.errors(),
            elapsed,
            rows_read: self.run.rows_read(),
            rows_written: self.run.rows_written(),
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.phase == Phase::Running {
            self.stop();
            if self.wait_until_finished(Some(Duration::from_secs(10))) == WaitStatus::TimedOut {
                tracing::warn!(pipeline = %self.plan.name, "dropping pipeline with copies still running");
            }
        }
    }
}
