//! Threaded row-flow pipeline engine.
//!
//! A topology of named steps connected by hops is compiled into an
//! [`ExecutionPlan`]: every step runs as one or more copies, each on its own
//! thread, and every connected pair of copies gets a bounded
//! [`QueuePair`]. Rows flow through those queues with back-pressure.
//!
//! # Architecture
//!
//! ```text
//!                  ┌─► [filter.0] ─┐
//! [generator.0] ───┤               ├──► [sink.0]
//!                  └─► [filter.1] ─┘
//!                          │
//!                          └─(error hop)─► [rejects.0]
//! ```
//!
//! # Design
//!
//! - **Enum dispatch on hot path**: `BuiltinStep` covers built-in steps,
//!   registered plugins are boxed `StepLogic` objects.
//! - **One thread per copy**: copies share only the `RunContext` and the
//!   queue-pairs between them.
//! - **Out-of-band end-of-stream**: producers raise a latch on each pair, so
//!   closing never blocks on a full queue.
//! - **Layouts derived once**: a copy derives its output `Schema` from the
//!   first row and reuses it for every row after.

pub mod compiled_plan;
pub mod compiler;
pub mod context;
pub mod error;
pub mod error_router;
pub mod executor;
pub mod id;
pub mod listener;
pub mod producer;
pub mod queue;
pub mod registry;
pub mod result;
pub mod router;
pub mod row;
pub mod runtime;
pub mod schema;
pub mod step;
pub mod step_type;
pub mod steps;

pub use compiled_plan::{ExecutionPlan, PlanStats, PlannedCopy, PlannedStep, PlannedTarget};
pub use compiler::PipelineCompiler;
pub use context::{ErrorDescriptor, RunContext, StepMetrics, StepState, StopCause};
pub use error::{
    FatalStepError, PipelineError, PipelineResult, RowError, SchemaError, StepError,
    StepInitError, TopologyError, ValueError,
};
pub use error_router::{ErrorFieldNames, ErrorRecord, ErrorRouter, RejectionLimits};
pub use executor::{Pipeline, WaitStatus};
pub use id::{CopyId, StepId};
pub use listener::{RowListener, RowListeners};
pub use producer::RowProducer;
pub use queue::{CancelToken, Fetch, PutError, QueuePair, TryPut, DEFAULT_QUEUE_CAPACITY};
pub use registry::{StepFactory, StepRegistry};
pub use result::{RunResult, RunStatus, StepStatus};
pub use router::{DataMovement, Delivery, InputRouter, OutputRouter, RouteError, TargetRoute};
pub use row::{Row, Value, ValueType};
pub use runtime::{StepOutcome, StepRuntime};
pub use schema::{same_name, FieldEdit, FieldMeta, Schema};
pub use step::{AnyStep, BuiltinStep, ProcessResult, StepContext, StepIo, StepLogic};
pub use step_type::StepKind;
