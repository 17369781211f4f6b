//! Pipeline-specific error types.
//!
//! Errors are split by the phase that raises them: topology validation,
//! schema derivation, step initialization, per-row processing and fatal
//! step failures. `PipelineError` wraps all of them for the coordinator API.

use crate::pipeline::row::ValueType;
use thiserror::Error;

/// The topology handed to `Pipeline::build` is not runnable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("Topology '{0}' has no steps")]
    Empty(String),

    #[error("Duplicate step name: {0}")]
    DuplicateStep(String),

    #[error("Step '{step}' must run at least one copy (got {copies})")]
    InvalidCopies { step: String, copies: usize },

    #[error("Hop {from} -> {to} references an unknown step")]
    DanglingHop { from: String, to: String },

    #[error("Duplicate hop {from} -> {to}")]
    DuplicateHop { from: String, to: String },

    #[error("Cycle detected between steps: {}", .0.join(", "))]
    CycleDetected(Vec<String>),

    #[error("Step '{step}' has unknown type '{step_type}'")]
    UnknownStepType { step: String, step_type: String },

    #[error("Step '{step}' has invalid partitioning: {reason}")]
    InvalidPartitioning { step: String, reason: String },

    #[error("Step '{step}' sends errors to '{target}', but there is no enabled hop {step} -> {target}")]
    MissingErrorHop { step: String, target: String },

    #[error("Queue capacity must be at least 1")]
    InvalidCapacity,
}

/// Schema derivation failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Unknown field '{0}'")]
    UnknownField(String),

    #[error("Duplicate field '{0}'")]
    DuplicateField(String),
}

/// A value could not be converted to the requested type.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Cannot convert '{value}' to {target}")]
pub struct ValueError {
    pub value: String,
    pub target: ValueType,
}

/// `init` failed for one step copy; the pipeline never starts running.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Step '{step}' copy {copy} failed to initialize: {reason}")]
pub struct StepInitError {
    pub step: String,
    pub copy: usize,
    pub reason: String,
}

/// A recoverable problem with a single row.
///
/// Routed to the step's error hop when one is configured, otherwise promoted
/// to a fatal error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RowError {
    pub message: String,
    pub code: String,
    pub field: Option<String>,
}

impl RowError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: String::new(),
            field: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

/// An error that terminates the step copy and stops the whole run.
#[derive(Error, Debug)]
pub enum FatalStepError {
    #[error("{0}")]
    Message(String),

    #[error("Schema derivation failed: {0}")]
    Schema(#[from] SchemaError),

    #[error("Row error without an error hop: {0}")]
    UnhandledRow(RowError),

    #[error("Row layout mismatch: {0}")]
    LayoutMismatch(String),

    #[error("Aborted: {0}")]
    Aborted(String),

    #[error("Step panicked: {0}")]
    Panicked(String),

    #[error("Too many rejected rows: {rejected} (max {limit})")]
    TooManyErrors { rejected: u64, limit: u64 },

    #[error("Rejected {percent}% of rows (max {limit}%)")]
    RejectionRate { percent: u64, limit: u32 },

    #[error("Cannot route row: {0}")]
    Route(String),

    #[error(transparent)]
    Plugin(#[from] anyhow::Error),
}

/// Error returned by step logic and the step I/O handle.
#[derive(Error, Debug)]
pub enum StepError {
    #[error(transparent)]
    Row(#[from] RowError),

    #[error(transparent)]
    Fatal(#[from] FatalStepError),

    /// The run is shutting down; the copy ends in the `Stopped` state.
    #[error("Pipeline is stopping")]
    Stopped,
}

impl StepError {
    pub fn fatal(message: impl Into<String>) -> Self {
        StepError::Fatal(FatalStepError::Message(message.into()))
    }
}

impl From<SchemaError> for StepError {
    fn from(err: SchemaError) -> Self {
        StepError::Fatal(FatalStepError::Schema(err))
    }
}

/// Errors that can occur within the pipeline system.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    StepInit(#[from] StepInitError),

    #[error("Pipeline has already been started")]
    AlreadyStarted,

    #[error("Step '{step}' has no copy {copy}")]
    UnknownCopy { step: String, copy: usize },

    #[error("Failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
