//! Rhai expression step.
//!
//! With `target_field` set, the expression's result is appended as a new
//! field of `target_type` (default `string`). Without it, the expression is
//! a predicate and only rows for which it returns `true` pass.

use crate::config::StepConfig;
use crate::pipeline::error::{RowError, StepError};
use crate::pipeline::row::{Row, ValueType};
use crate::pipeline::schema::{FieldEdit, FieldMeta};
use crate::pipeline::step::{ProcessResult, StepContext, StepIo, StepLogic};
use crate::scripting::{dynamic_to_value, CompiledExpression, ScriptEngine};

/// Row error code for expressions that fail to evaluate.
pub const EVAL_ERROR_CODE: &str = "SCRIPT001";
/// Row error code for results that do not fit the target type.
pub const RESULT_ERROR_CODE: &str = "SCRIPT002";

pub struct ScriptStep {
    source: String,
    target: Option<(String, ValueType)>,
    compiled: Option<(ScriptEngine, CompiledExpression)>,
}

impl ScriptStep {
    pub fn from_config(config: &StepConfig) -> anyhow::Result<Self> {
        let source = config
            .option_str("expression")
            .ok_or_else(|| anyhow::anyhow!("step '{}': option 'expression' is required", config.name))?;
        let target = match config.option_str("target_field") {
            None => None,
            Some(field) => {
                let type_name = config.option_str("target_type").unwrap_or("string");
                let ty = ValueType::from_name(type_name).ok_or_else(|| {
                    anyhow::anyhow!("step '{}': unknown target_type '{}'", config.name, type_name)
                })?;
                Some((field.to_string(), ty))
            }
        };
        Ok(Self {
            source: source.to_string(),
            target,
            compiled: None,
        })
    }

    pub fn is_predicate(&self) -> bool {
        self.target.is_none()
    }
}

impl StepLogic for ScriptStep {
    fn init(&mut self, ctx: &StepContext) -> Result<(), StepError> {
        let engine = ScriptEngine::new();
        let compiled = engine
            .compile(ctx.name(), &self.source)
            .map_err(|e| StepError::fatal(e.to_string()))?;
        self.compiled = Some((engine, compiled));
        Ok(())
    }

    fn output_edits(&self) -> Vec<FieldEdit> {
        match &self.target {
            Some((name, ty)) => vec![FieldEdit::add(FieldMeta::new(name, *ty))],
            None => Vec::new(),
        }
    }

    fn process_row(&mut self, row: Option<&Row>, _io: &mut StepIo<'_>) -> Result<ProcessResult, StepError> {
        let Some(row) = row else {
            return Ok(ProcessResult::Done);
        };
        let Some((engine, expression)) = &self.compiled else {
            return Err(StepError::fatal("script used before init"));
        };
        let eval_error = |e: crate::error::RowflowError| RowError::new(e.to_string()).with_code(EVAL_ERROR_CODE);

        match &self.target {
            None => {
                let keep = engine.eval_predicate(expression, row).map_err(eval_error)?;
                Ok(if keep {
                    ProcessResult::Emit(row.values().to_vec())
                } else {
                    ProcessResult::Skip
                })
            }
            Some((field, ty)) => {
                let result = engine.eval_row(expression, row).map_err(eval_error)?;
                let value = dynamic_to_value(result, Some(*ty)).map_err(|e| {
                    RowError::new(e.to_string())
                        .with_field(field)
                        .with_code(RESULT_ERROR_CODE)
                })?;
                let mut values = Vec::with_capacity(row.len() + 1);
                values.extend_from_slice(row.values());
                values.push(value);
                Ok(ProcessResult::Emit(values))
            }
        }
    }
}
