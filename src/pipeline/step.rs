//! Step abstraction for the pipeline.
//!
//! Two-layer design:
//! - **`StepLogic` trait**: the contract every step implements; user steps
//!   plug in as trait objects through the registry.
//! - **`BuiltinStep` enum**: all built-in steps, dispatched by `match` on the
//!   hot path.
//!
//! `AnyStep` wraps either variant so the runtime handles both uniformly.

use crate::config::StepConfig;
use crate::pipeline::context::{RunContext, StepMetrics};
use crate::pipeline::error::{FatalStepError, RowError, StepError};
use crate::pipeline::error_router::ErrorRouter;
use crate::pipeline::listener::RowListeners;
use crate::pipeline::queue::Fetch;
use crate::pipeline::router::{InputRouter, OutputRouter, RouteError};
use crate::pipeline::row::{Row, Value};
use crate::pipeline::runtime::LayoutGuard;
use crate::pipeline::schema::{FieldEdit, Schema};
use crate::pipeline::step_type::StepKind;
use crate::pipeline::steps::{
    AbortStep, ConstantsStep, DummyStep, FilterStep, GeneratorStep, ScriptStep, SelectValuesStep,
};
use std::sync::Arc;

/// Identity of the copy a step logic instance runs as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepContext {
    name: String,
    step_type: String,
    copy: usize,
    copies: usize,
}

impl StepContext {
    pub fn new(name: impl Into<String>, step_type: impl Into<String>, copy: usize, copies: usize) -> Self {
        Self {
            name: name.into(),
            step_type: step_type.into(),
            copy,
            copies,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn step_type(&self) -> &str {
        &self.step_type
    }

    /// Zero-based copy number.
    pub fn copy(&self) -> usize {
        self.copy
    }

    pub fn copies(&self) -> usize {
        self.copies
    }
}

/// What `process_row` did with the current row.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessResult {
    /// Emit one row with these values in the output layout.
    Emit(Vec<Value>),
    /// Nothing to emit for this row.
    Skip,
    /// The step has finished; no further calls are made.
    Done,
}

/// Contract implemented by every step.
pub trait StepLogic: Send {
    /// Called once before the run starts. Failing aborts the whole start.
    fn init(&mut self, _ctx: &StepContext) -> Result<(), StepError> {
        Ok(())
    }

    /// Edits applied to the input layout to obtain the output layout.
    fn output_edits(&self) -> Vec<FieldEdit> {
        Vec::new()
    }

    /// Handle one input row (`None` for source steps).
    fn process_row(&mut self, row: Option<&Row>, io: &mut StepIo<'_>) -> Result<ProcessResult, StepError>;

    /// Release resources. Always called once the copy ends.
    fn dispose(&mut self, _ctx: &StepContext) {}
}

/// I/O handle given to `process_row`.
pub struct StepIo<'a> {
    pub(crate) ctx: &'a StepContext,
    pub(crate) run: &'a RunContext,
    pub(crate) metrics: &'a StepMetrics,
    pub(crate) inputs: &'a mut InputRouter,
    pub(crate) outputs: &'a mut OutputRouter,
    pub(crate) errors: &'a mut Option<ErrorRouter>,
    pub(crate) layout: &'a mut LayoutGuard,
    pub(crate) listeners: &'a RowListeners,
    pub(crate) output_schema: &'a Arc<Schema>,
    pub(crate) aborted: &'a mut Option<String>,
}

impl StepIo<'_> {
    pub fn step(&self) -> &StepContext {
        self.ctx
    }

    /// Layout of the rows this copy receives; `None` for sources.
    pub fn input_schema(&self) -> Option<&Arc<Schema>> {
        self.layout.first()
    }

    pub fn output_schema(&self) -> &Arc<Schema> {
        self.output_schema
    }

    pub fn is_stopped(&self) -> bool {
        self.run.is_stopped()
    }

    /// Pull another input row; `None` once every input has ended.
    ///
    /// The row is counted and layout-checked exactly like the rows handed to
    /// `process_row`.
    pub fn next_row(&mut self) -> Result<Option<Row>, StepError> {
        if self.inputs.is_source() {
            return Ok(None);
        }
        loop {
            match self.inputs.next_row(self.run) {
                Fetch::Row(row) => {
                    accept_row(self.ctx, self.run, self.metrics, &mut *self.layout, self.listeners, &row)?;
                    return Ok(Some(row));
                }
                Fetch::EndOfStream => return Ok(None),
                Fetch::Cancelled => return Err(StepError::Stopped),
                Fetch::TimedOut | Fetch::Empty => continue,
            }
        }
    }

    /// Emit a row in the output layout, in addition to whatever
    /// `process_row` returns.
    ///
    /// Only rows that reach a consumer count as written. A copy without
    /// targets counts every row it emits.
    pub fn emit(&mut self, values: Vec<Value>) -> Result<(), StepError> {
        let schema = self.output_schema;
        if values.len() != schema.len() {
            return Err(FatalStepError::LayoutMismatch(format!(
                "emitted {} values for a layout of {} fields",
                values.len(),
                schema.len()
            ))
            .into());
        }
        let row = Row::new(schema.clone(), values);
        let observed = (!self.listeners.is_empty()).then(|| row.clone());
        match self.outputs.route(row) {
            Ok(delivered) if delivered > 0 || self.outputs.is_empty() => {
                self.metrics.record_written();
                self.run.add_rows_written(1);
                if let Some(row) = observed {
                    self.listeners.written(self.ctx, &row);
                }
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(RouteError::Cancelled) => Err(StepError::Stopped),
            Err(err) => Err(FatalStepError::Route(err.to_string()).into()),
        }
    }

    /// Send `row` to the error hop and enforce the rejection limits, or
    /// fail if the step has no error hop.
    pub fn put_error(&mut self, row: &Row, error: RowError) -> Result<(), StepError> {
        let Some(router) = self.errors.as_mut() else {
            return Err(FatalStepError::UnhandledRow(error).into());
        };
        tracing::debug!(target_step = router.target(), error = %error, "row diverted to error hop");
        router.divert(row, &error)?;
        let rejected = self.metrics.record_rejected();
        router.limits().check(rejected, self.metrics.lines_read())?;
        Ok(())
    }

    /// Abort the run. The copy ends `Errored` after the current call returns.
    pub fn abort(&mut self, reason: impl Into<String>) {
        *self.aborted = Some(reason.into());
    }
}

/// Count a row just taken from an input and hold it to the copy's layout.
pub(crate) fn accept_row(
    ctx: &StepContext,
    run: &RunContext,
    metrics: &StepMetrics,
    layout: &mut LayoutGuard,
    listeners: &RowListeners,
    row: &Row,
) -> Result<(), StepError> {
    metrics.record_read();
    run.add_rows_read(1);
    layout.check(row)?;
    listeners.read(ctx, row);
    Ok(())
}

/// Enum dispatch for built-in steps.
pub enum BuiltinStep {
    Generator(GeneratorStep),
    Dummy(DummyStep),
    Filter(FilterStep),
    Constants(ConstantsStep),
    SelectValues(SelectValuesStep),
    Script(ScriptStep),
    Abort(AbortStep),
}

impl BuiltinStep {
    /// Build the built-in step of `kind` from its configuration.
    pub fn from_config(kind: StepKind, config: &StepConfig) -> anyhow::Result<Self> {
        Ok(match kind {
            StepKind::Generator => BuiltinStep::Generator(GeneratorStep::from_config(config)?),
            StepKind::Dummy => BuiltinStep::Dummy(DummyStep),
            StepKind::Filter => BuiltinStep::Filter(FilterStep::from_config(config)?),
            StepKind::Constants => BuiltinStep::Constants(ConstantsStep::from_config(config)?),
            StepKind::SelectValues => {
                BuiltinStep::SelectValues(SelectValuesStep::from_config(config)?)
            }
            StepKind::Script => BuiltinStep::Script(ScriptStep::from_config(config)?),
            StepKind::Abort => BuiltinStep::Abort(AbortStep::from_config(config)?),
        })
    }

    pub fn kind(&self) -> StepKind {
        match self {
            BuiltinStep::Generator(_) => StepKind::Generator,
            BuiltinStep::Dummy(_) => StepKind::Dummy,
            BuiltinStep::Filter(_) => StepKind::Filter,
            BuiltinStep::Constants(_) => StepKind::Constants,
            BuiltinStep::SelectValues(_) => StepKind::SelectValues,
            BuiltinStep::Script(_) => StepKind::Script,
            BuiltinStep::Abort(_) => StepKind::Abort,
        }
    }
}

impl StepLogic for BuiltinStep {
    fn init(&mut self, ctx: &StepContext) -> Result<(), StepError> {
        match self {
            BuiltinStep::Generator(s) => s.init(ctx),
            BuiltinStep::Dummy(s) => s.init(ctx),
            BuiltinStep::Filter(s) => s.init(ctx),
            BuiltinStep::Constants(s) => s.init(ctx),
            BuiltinStep::SelectValues(s) => s.init(ctx),
            BuiltinStep::Script(s) => s.init(ctx),
            BuiltinStep::Abort(s) => s.init(ctx),
        }
    }

    fn output_edits(&self) -> Vec<FieldEdit> {
        match self {
            BuiltinStep::Generator(s) => s.output_edits(),
            BuiltinStep::Dummy(s) => s.output_edits(),
            BuiltinStep::Filter(s) => s.output_edits(),
            BuiltinStep::Constants(s) => s.output_edits(),
            BuiltinStep::SelectValues(s) => s.output_edits(),
            BuiltinStep::Script(s) => s.output_edits(),
            BuiltinStep::Abort(s) => s.output_edits(),
        }
    }

    fn process_row(&mut self, row: Option<&Row>, io: &mut StepIo<'_>) -> Result<ProcessResult, StepError> {
        match self {
            BuiltinStep::Generator(s) => s.process_row(row, io),
            BuiltinStep::Dummy(s) => s.process_row(row, io),
            BuiltinStep::Filter(s) => s.process_row(row, io),
            BuiltinStep::Constants(s) => s.process_row(row, io),
            BuiltinStep::SelectValues(s) => s.process_row(row, io),
            BuiltinStep::Script(s) => s.process_row(row, io),
            BuiltinStep::Abort(s) => s.process_row(row, io),
        }
    }

    fn dispose(&mut self, ctx: &StepContext) {
        match self {
            BuiltinStep::Generator(s) => s.dispose(ctx),
            BuiltinStep::Dummy(s) => s.dispose(ctx),
            BuiltinStep::Filter(s) => s.dispose(ctx),
            BuiltinStep::Constants(s) => s.dispose(ctx),
            BuiltinStep::SelectValues(s) => s.dispose(ctx),
            BuiltinStep::Script(s) => s.dispose(ctx),
            BuiltinStep::Abort(s) => s.dispose(ctx),
        }
    }
}

/// Either a built-in step or a registered plugin.
pub enum AnyStep {
    Builtin(BuiltinStep),
    Plugin(Box<dyn StepLogic>),
}

impl AnyStep {
    pub fn is_builtin(&self) -> bool {
        matches!(self, AnyStep::Builtin(_))
    }
}

impl StepLogic for AnyStep {
    fn init(&mut self, ctx: &StepContext) -> Result<(), StepError> {
        match self {
            AnyStep::Builtin(s) => s.init(ctx),
            AnyStep::Plugin(s) => s.init(ctx),
        }
    }

    fn output_edits(&self) -> Vec<FieldEdit> {
        match self {
            AnyStep::Builtin(s) => s.output_edits(),
            AnyStep::Plugin(s) => s.output_edits(),
        }
    }

    fn process_row(&mut self, row: Option<&Row>, io: &mut StepIo<'_>) -> Result<ProcessResult, StepError> {
        match self {
            AnyStep::Builtin(s) => s.process_row(row, io),
            AnyStep::Plugin(s) => s.process_row(row, io),
        }
    }

    fn dispose(&mut self, ctx: &StepContext) {
        match self {
            AnyStep::Builtin(s) => s.dispose(ctx),
            AnyStep::Plugin(s) => s.dispose(ctx),
        }
    }
}
