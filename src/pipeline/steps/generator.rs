//! Row generator source.
//!
//! ```toml
//! [[steps]]
//! name = "source"
//! type = "generator"
//! [steps.options]
//! limit = 100
//! sequence_field = "id"
//! fields = [
//!     { name = "customer", type = "string", value = "acme" },
//!     { name = "amount", type = "number", value = "12.5" },
//! ]
//! ```

use crate::config::StepConfig;
use crate::pipeline::error::StepError;
use crate::pipeline::row::{Row, Value, ValueType};
use crate::pipeline::schema::{FieldEdit, FieldMeta};
use crate::pipeline::step::{ProcessResult, StepContext, StepIo, StepLogic};
use serde::Deserialize;

fn default_field_type() -> ValueType {
    ValueType::String
}

/// A constant field declared in step options.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type", default = "default_field_type")]
    pub value_type: ValueType,
    #[serde(default)]
    pub length: Option<u32>,
    #[serde(default)]
    pub precision: Option<u32>,
    /// Text is parsed into `value_type`; other literals are converted.
    #[serde(default)]
    pub value: Option<toml::Value>,
}

impl FieldSpec {
    pub fn meta(&self) -> FieldMeta {
        let mut meta = FieldMeta::new(&self.name, self.value_type);
        meta.length = self.length;
        meta.precision = self.precision;
        meta
    }

    /// The configured value, converted to the field's type.
    pub fn resolve(&self) -> Result<Value, StepError> {
        let value = match &self.value {
            None => Ok(Value::Null),
            Some(toml::Value::String(text)) => Value::parse(text, self.value_type),
            Some(other) => Value::from_toml(other).convert(self.value_type),
        };
        value.map_err(|e| StepError::fatal(format!("field '{}': {}", self.name, e)))
    }
}

/// Emits `limit` rows of constant fields, optionally numbered.
#[derive(Debug, Clone)]
pub struct GeneratorStep {
    limit: u64,
    fields: Vec<FieldSpec>,
    sequence_field: Option<String>,
    sequence_start: i64,
    values: Vec<Value>,
    emitted: u64,
}

impl GeneratorStep {
    pub fn from_config(config: &StepConfig) -> anyhow::Result<Self> {
        let limit = config.option_as::<i64>("limit")?.unwrap_or(1);
        anyhow::ensure!(limit >= 0, "step '{}': limit must not be negative", config.name);
        Ok(Self {
            limit: limit as u64,
            fields: config.option_as("fields")?.unwrap_or_default(),
            sequence_field: config.option_as("sequence_field")?,
            sequence_start: config.option_as("sequence_start")?.unwrap_or(1),
            values: Vec::new(),
            emitted: 0,
        })
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }
}

impl StepLogic for GeneratorStep {
    fn init(&mut self, _ctx: &StepContext) -> Result<(), StepError> {
        self.values = self
            .fields
            .iter()
            .map(FieldSpec::resolve)
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    fn output_edits(&self) -> Vec<FieldEdit> {
        let mut edits: Vec<_> = self.fields.iter().map(|f| FieldEdit::add(f.meta())).collect();
        if let Some(name) = &self.sequence_field {
            edits.push(FieldEdit::add(FieldMeta::new(name, ValueType::Integer)));
        }
        edits
    }

    fn process_row(&mut self, _row: Option<&Row>, _io: &mut StepIo<'_>) -> Result<ProcessResult, StepError> {
        if self.emitted >= self.limit {
            return Ok(ProcessResult::Done);
        }
        let mut values = self.values.clone();
        if let Some(name) = &self.sequence_field {
            let next = i64::try_from(self.emitted)
                .ok()
                .and_then(|offset| self.sequence_start.checked_add(offset))
                .ok_or_else(|| {
                    StepError::fatal(format!(
                        "sequence field '{}' overflows after {} rows",
                        name, self.emitted
                    ))
                })?;
            values.push(Value::Integer(next));
        }
        self.emitted += 1;
        Ok(ProcessResult::Emit(values))
    }
}
