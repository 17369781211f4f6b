//! Pass-through step.

use crate::pipeline::error::StepError;
use crate::pipeline::row::Row;
use crate::pipeline::step::{ProcessResult, StepIo, StepLogic};

/// Forwards every row unchanged. Useful as a sink or a fan-out point.
#[derive(Debug, Default, Clone, Copy)]
pub struct DummyStep;

impl StepLogic for DummyStep {
    fn process_row(&mut self, row: Option<&Row>, _io: &mut StepIo<'_>) -> Result<ProcessResult, StepError> {
        Ok(match row {
            Some(row) => ProcessResult::Emit(row.values().to_vec()),
            None => ProcessResult::Done,
        })
    }
}
