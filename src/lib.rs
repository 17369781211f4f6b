//! # rowflow: threaded row-stream dataflow engine
//!
//! A pipeline is a directed acyclic graph of named steps connected by hops.
//! Every step runs as one or more copies, each on its own thread, and rows
//! move between copies through bounded queues that block producers when
//! consumers fall behind.
//!
//! ## Architecture
//!
//! - **Config**: engine settings and topology files (TOML or JSON)
//! - **Pipeline**: compiler, queues, routers, step runtime and coordinator
//! - **Scripting**: Rhai expressions for the `script` step
//! - **Logging**: `tracing` subscriber setup
//!
//! ## Configuration
//!
//! Engine settings live in the platform config directory under `rowflow`:
//!
//! - **Linux**: `~/.config/rowflow/engine.toml`
//! - **macOS**: `~/Library/Application Support/rowflow/engine.toml`
//! - **Windows**: `%APPDATA%\rowflow\engine.toml`
//!
//! ## Example
//!
//! ```ignore
//! use rowflow::{EngineConfig, Pipeline, StepRegistry, Topology};
//! use std::sync::Arc;
//!
//! let topology = Topology::load("pipelines/orders.toml")?;
//! let registry = Arc::new(StepRegistry::with_builtins());
//! let result = Pipeline::run(&topology, registry, EngineConfig::load_or_default())?;
//! println!("{}", result.to_json()?);
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod scripting;

// Re-export commonly used types
pub use config::{EngineConfig, ErrorHandling, Hop, StepConfig, Topology};
pub use error::{Result, RowflowError};
pub use pipeline::{
    DataMovement, FieldEdit, FieldMeta, Pipeline, PipelineError, ProcessResult, Row, RowListener,
    RowProducer, RunResult, RunStatus, Schema, StepContext, StepIo, StepLogic, StepRegistry, Value,
    ValueType, WaitStatus,
};
pub use scripting::ScriptEngine;
