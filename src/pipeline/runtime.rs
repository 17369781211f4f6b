//! Per-copy step runtime.
//!
//! Each step copy runs on its own thread:
//! 1. Wait out a pause, then pull a row from the merged inputs (sources pull
//!    nothing).
//! 2. On the first row, derive and cache the output layout.
//! 3. Hand the row to the step logic and route whatever it emits.
//! 4. On exit, close every output, detach every input, then dispose.
//!
//! State machine: `Created → Initialized → Running → {Done | Stopped | Errored} → Disposed`.

use crate::pipeline::context::{RunContext, StepMetrics, StepState, StopCause};
use crate::pipeline::error::{FatalStepError, StepError, StepInitError};
use crate::pipeline::error_router::ErrorRouter;
use crate::pipeline::listener::RowListeners;
use crate::pipeline::queue::Fetch;
use crate::pipeline::router::{InputRouter, OutputRouter};
use crate::pipeline::row::Row;
use crate::pipeline::schema::Schema;
use crate::pipeline::step::{accept_row, AnyStep, ProcessResult, StepContext, StepIo, StepLogic};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How a copy ended.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub step: String,
    pub copy: usize,
    pub state: StepState,
    pub elapsed: Duration,
    pub error: Option<String>,
    pub output_schema: Option<Arc<Schema>>,
}

/// Remembers the layout of the first input row. In safe mode every later
/// row must carry the same layout.
#[derive(Debug, Default)]
pub(crate) struct LayoutGuard {
    safe_mode: bool,
    first: Option<Arc<Schema>>,
}

impl LayoutGuard {
    pub(crate) fn new(safe_mode: bool) -> Self {
        Self {
            safe_mode,
            first: None,
        }
    }

    pub(crate) fn first(&self) -> Option<&Arc<Schema>> {
        self.first.as_ref()
    }

    pub(crate) fn check(&mut self, row: &Row) -> Result<(), StepError> {
        match &self.first {
            None => {
                self.first = Some(row.schema().clone());
                Ok(())
            }
            Some(first) if self.safe_mode => {
                if Arc::ptr_eq(first, row.schema()) || first == row.schema() {
                    Ok(())
                } else {
                    let expected: Vec<_> = first.names().collect();
                    let actual: Vec<_> = row.schema().names().collect();
                    Err(FatalStepError::LayoutMismatch(format!(
                        "expected [{}], got [{}]",
                        expected.join(", "),
                        actual.join(", ")
                    ))
                    .into())
                }
            }
            Some(_) => Ok(()),
        }
    }
}

/// One step copy and everything it owns.
pub struct StepRuntime {
    ctx: StepContext,
    logic: AnyStep,
    inputs: InputRouter,
    outputs: OutputRouter,
    errors: Option<ErrorRouter>,
    metrics: Arc<StepMetrics>,
    run: Arc<RunContext>,
    layout: LayoutGuard,
    listeners: RowListeners,
    output_schema: Option<Arc<Schema>>,
    state: StepState,
}

impl StepRuntime {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        ctx: StepContext,
        logic: AnyStep,
        inputs: InputRouter,
        outputs: OutputRouter,
        errors: Option<ErrorRouter>,
        metrics: Arc<StepMetrics>,
        run: Arc<RunContext>,
        safe_mode: bool,
    ) -> Self {
        metrics.set_state(StepState::Created);
        Self {
            ctx,
            logic,
            inputs,
            outputs,
            errors,
            metrics,
            run,
            layout: LayoutGuard::new(safe_mode),
            listeners: RowListeners::new(),
            output_schema: None,
            state: StepState::Created,
        }
    }

    /// Attach listeners for the rows this copy reads and writes.
    pub(crate) fn with_listeners(mut self, listeners: RowListeners) -> Self {
        self.listeners = listeners;
        self
    }

    pub fn context(&self) -> &StepContext {
        &self.ctx
    }

    pub fn state(&self) -> StepState {
        self.state
    }

    fn transition(&mut self, state: StepState) {
        tracing::trace!(step = %self.ctx.name(), copy = self.ctx.copy(), from = %self.state, to = %state, "state change");
        self.state = state;
        self.metrics.set_state(state);
    }

    /// `Created → Initialized`. A panic in `init` counts as a failure.
    pub fn initialize(&mut self) -> Result<(), StepInitError> {
        let result = catch_unwind(AssertUnwindSafe(|| self.logic.init(&self.ctx)));
        let reason = match result {
            Ok(Ok(())) => {
                self.transition(StepState::Initialized);
                return Ok(());
            }
            Ok(Err(err)) => err.to_string(),
            Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
        };
        Err(StepInitError {
            step: self.ctx.name().to_string(),
            copy: self.ctx.copy(),
            reason,
        })
    }

    /// Dispose a copy that never ran (another copy failed to initialize).
    pub fn dispose_unstarted(mut self) {
        self.close_connections();
        self.dispose_logic();
    }

    /// Run the row loop to completion. Never panics.
    pub fn run(mut self) -> StepOutcome {
        let started = Instant::now();
        self.transition(StepState::Running);
        tracing::debug!(step = %self.ctx.name(), copy = self.ctx.copy(), "step started");

        let result = catch_unwind(AssertUnwindSafe(|| self.row_loop()));
        let (state, error) = match result {
            Ok(Ok(())) => (StepState::Done, None),
            Ok(Err(StepError::Stopped)) => (StepState::Stopped, None),
            Ok(Err(err)) => (StepState::Errored, Some(err.to_string())),
            Err(payload) => {
                let err = FatalStepError::Panicked(panic_message(payload.as_ref()));
                (StepState::Errored, Some(err.to_string()))
            }
        };
        if let Some(message) = &error {
            self.fail(message);
        }
        self.transition(state);
        self.close_connections();
        self.dispose_logic();

        tracing::info!(
            step = %self.ctx.name(),
            copy = self.ctx.copy(),
            state = %state,
            read = self.metrics.lines_read(),
            written = self.metrics.lines_written(),
            rejected = self.metrics.lines_rejected(),
            "step finished"
        );
        StepOutcome {
            step: self.ctx.name().to_string(),
            copy: self.ctx.copy(),
            state,
            elapsed: started.elapsed(),
            error,
            output_schema: self.output_schema.clone(),
        }
    }

    fn fail(&self, message: &str) {
        tracing::error!(step = %self.ctx.name(), copy = self.ctx.copy(), error = %message, "step failed");
        self.metrics.record_error();
        self.run.record_error(self.ctx.name(), self.ctx.copy(), message);
        self.run.stop(StopCause::Failure);
    }

    fn close_connections(&mut self) {
        self.outputs.signal_end();
        if let Some(errors) = &self.errors {
            errors.signal_end();
        }
        self.inputs.detach_all();
    }

    fn dispose_logic(&mut self) {
        let ctx = &self.ctx;
        let logic = &mut self.logic;
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| logic.dispose(ctx))) {
            tracing::error!(step = %ctx.name(), copy = ctx.copy(), panic = %panic_message(payload.as_ref()), "dispose panicked");
        }
        self.transition(StepState::Disposed);
    }

    fn row_loop(&mut self) -> Result<(), StepError> {
        let is_source = self.inputs.is_source();
        loop {
            if self.run.is_stopped() {
                return Err(StepError::Stopped);
            }
            if self.run.is_paused() {
                self.run.wait_while_paused(self.inputs.poll_interval());
                continue;
            }
            if self.outputs.all_detached() {
                tracing::debug!(step = %self.ctx.name(), copy = self.ctx.copy(), "all consumers detached, finishing early");
                return Ok(());
            }

            let row = if is_source {
                None
            } else {
                match self.inputs.next_row(&self.run) {
                    Fetch::Row(row) => Some(row),
                    Fetch::EndOfStream => return Ok(()),
                    Fetch::Cancelled => return Err(StepError::Stopped),
                    Fetch::TimedOut | Fetch::Empty => continue,
                }
            };
            if let Some(row) = &row {
                accept_row(&self.ctx, &self.run, &self.metrics, &mut self.layout, &self.listeners, row)?;
            }
            let output_schema = self.output_schema(row.as_ref())?;

            let mut aborted = None;
            let mut io = StepIo {
                ctx: &self.ctx,
                run: &self.run,
                metrics: &self.metrics,
                inputs: &mut self.inputs,
                outputs: &mut self.outputs,
                errors: &mut self.errors,
                layout: &mut self.layout,
                listeners: &self.listeners,
                output_schema: &output_schema,
                aborted: &mut aborted,
            };
            let result = self.logic.process_row(row.as_ref(), &mut io);
            if let Some(reason) = io.aborted.take() {
                return Err(FatalStepError::Aborted(reason).into());
            }

            match result {
                Ok(ProcessResult::Emit(values)) => io.emit(values)?,
                Ok(ProcessResult::Skip) => {}
                Ok(ProcessResult::Done) => return Ok(()),
                Err(StepError::Row(error)) => match &row {
                    Some(row) => io.put_error(row, error)?,
                    None => return Err(FatalStepError::UnhandledRow(error).into()),
                },
                Err(err) => return Err(err),
            }
        }
    }

    /// The cached output layout, derived on the first call.
    fn output_schema(&mut self, row: Option<&Row>) -> Result<Arc<Schema>, StepError> {
        if let Some(schema) = &self.output_schema {
            return Ok(schema.clone());
        }
        let base = match row {
            Some(row) => row.schema().as_ref().clone(),
            None => Schema::empty(),
        };
        let edits = self.logic.output_edits();
        let derived = Arc::new(base.derive_for_step(&edits, self.ctx.name())?);
        tracing::debug!(
            step = %self.ctx.name(),
            copy = self.ctx.copy(),
            fields = derived.len(),
            "output layout derived"
        );
        self.output_schema = Some(derived.clone());
        Ok(derived)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
