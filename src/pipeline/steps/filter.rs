//! Filter rows on a single field comparison.

use crate::config::StepConfig;
use crate::pipeline::error::StepError;
use crate::pipeline::row::{Row, Value};
use crate::pipeline::step::{ProcessResult, StepIo, StepLogic};
use std::cmp::Ordering;

/// Comparison applied by a [`FilterStep`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    IsNull,
    NotNull,
}

impl CompareOp {
    pub fn from_symbol(symbol: &str) -> Option<CompareOp> {
        Some(match symbol.trim() {
            "=" | "==" => CompareOp::Eq,
            "<>" | "!=" => CompareOp::Ne,
            "<" => CompareOp::Lt,
            "<=" => CompareOp::Le,
            ">" => CompareOp::Gt,
            ">=" => CompareOp::Ge,
            "is_null" => CompareOp::IsNull,
            "not_null" => CompareOp::NotNull,
            _ => return None,
        })
    }

    pub fn needs_value(&self) -> bool {
        !matches!(self, CompareOp::IsNull | CompareOp::NotNull)
    }

    /// Null never compares; only `is_null`/`not_null` look at it.
    pub fn matches(&self, value: &Value, other: &Value) -> bool {
        match self {
            CompareOp::IsNull => return value.is_null(),
            CompareOp::NotNull => return !value.is_null(),
            _ if value.is_null() || other.is_null() => return false,
            _ => {}
        }
        let Some(ordering) = value.compare(other) else {
            return false;
        };
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
            CompareOp::IsNull | CompareOp::NotNull => false,
        }
    }
}

/// Keeps rows where `field <op> value` holds.
#[derive(Debug, Clone)]
pub struct FilterStep {
    field: String,
    op: CompareOp,
    value: Option<toml::Value>,
    /// Field index and comparison value, resolved against the first row.
    resolved: Option<(usize, Value)>,
}

impl FilterStep {
    pub fn from_config(config: &StepConfig) -> anyhow::Result<Self> {
        let field = config
            .option_str("field")
            .ok_or_else(|| anyhow::anyhow!("step '{}': option 'field' is required", config.name))?;
        let symbol = config.option_str("op").unwrap_or("=");
        let op = CompareOp::from_symbol(symbol)
            .ok_or_else(|| anyhow::anyhow!("step '{}': unknown operator '{}'", config.name, symbol))?;
        let value = config.option("value").cloned();
        anyhow::ensure!(
            value.is_some() || !op.needs_value(),
            "step '{}': operator '{}' needs a 'value'",
            config.name,
            symbol
        );
        Ok(Self {
            field: field.to_string(),
            op,
            value,
            resolved: None,
        })
    }

    fn resolve(&mut self, row: &Row) -> Result<(usize, Value), StepError> {
        if let Some(resolved) = &self.resolved {
            return Ok(resolved.clone());
        }
        let schema = row.schema();
        let index = schema
            .index_of(&self.field)
            .ok_or_else(|| StepError::fatal(format!("unknown field '{}'", self.field)))?;
        let value = match &self.value {
            None => Value::Null,
            Some(raw) => {
                let ty = schema.fields()[index].value_type;
                let value = match raw {
                    toml::Value::String(text) => Value::parse(text, ty),
                    other => Value::from_toml(other).convert(ty),
                };
                value.map_err(|e| StepError::fatal(format!("filter value for '{}': {}", self.field, e)))?
            }
        };
        self.resolved = Some((index, value.clone()));
        Ok((index, value))
    }
}

impl StepLogic for FilterStep {
    fn process_row(&mut self, row: Option<&Row>, _io: &mut StepIo<'_>) -> Result<ProcessResult, StepError> {
        let Some(row) = row else {
            return Ok(ProcessResult::Done);
        };
        let (index, other) = self.resolve(row)?;
        let keep = row
            .value(index)
            .is_some_and(|value| self.op.matches(value, &other));
        Ok(if keep {
            ProcessResult::Emit(row.values().to_vec())
        } else {
            ProcessResult::Skip
        })
    }
}
