//! Remove, rename and retype fields.
//!
//! ```toml
//! [steps.options]
//! remove = ["internal_id"]
//! rename = { amt = "amount" }
//! retype = { amount = "number" }
//! ```
//!
//! Edits apply in that order, so `retype` uses the new names. A value that
//! cannot be converted rejects the row with code `SELECT001`; a row too
//! short for the layout seen first is rejected with `SELECT002`.

use crate::config::StepConfig;
use crate::pipeline::error::{RowError, StepError};
use crate::pipeline::row::{Row, ValueType};
use crate::pipeline::schema::{same_name, FieldEdit};
use crate::pipeline::step::{ProcessResult, StepIo, StepLogic};
use std::collections::BTreeMap;

/// Row error code for failed conversions.
pub const CONVERSION_ERROR_CODE: &str = "SELECT001";
/// Row error code for rows missing a field the first row had.
pub const MISSING_FIELD_CODE: &str = "SELECT002";

/// Where an output field comes from.
#[derive(Debug, Clone)]
struct Mapping {
    source: usize,
    retype: Option<ValueType>,
}

#[derive(Debug, Clone)]
pub struct SelectValuesStep {
    remove: Vec<String>,
    rename: Vec<(String, String)>,
    retype: Vec<(String, ValueType)>,
    mappings: Option<Vec<Mapping>>,
}

impl SelectValuesStep {
    pub fn from_config(config: &StepConfig) -> anyhow::Result<Self> {
        let remove: Vec<String> = config.option_as("remove")?.unwrap_or_default();
        let rename: BTreeMap<String, String> = config.option_as("rename")?.unwrap_or_default();
        let retype_names: BTreeMap<String, String> = config.option_as("retype")?.unwrap_or_default();
        let retype = retype_names
            .into_iter()
            .map(|(field, type_name)| {
                ValueType::from_name(&type_name)
                    .map(|ty| (field.clone(), ty))
                    .ok_or_else(|| {
                        anyhow::anyhow!(
                            "step '{}': unknown type '{}' for field '{}'",
                            config.name,
                            type_name,
                            field
                        )
                    })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self {
            remove,
            rename: rename.into_iter().collect(),
            retype,
            mappings: None,
        })
    }

    /// Input field name that ends up as `output`.
    fn source_name<'a>(&'a self, output: &'a str) -> &'a str {
        self.rename
            .iter()
            .find(|(_, to)| same_name(to, output))
            .map(|(from, _)| from.as_str())
            .unwrap_or(output)
    }

    fn mappings(&mut self, row: &Row, io: &StepIo<'_>) -> Result<&[Mapping], StepError> {
        if self.mappings.is_none() {
            let input = row.schema();
            let mut mappings = Vec::with_capacity(io.output_schema().len());
            for field in io.output_schema().fields() {
                let name = self.source_name(&field.name);
                let source = input.index_of(name).ok_or_else(|| {
                    StepError::fatal(format!("output field '{}' has no input field", field.name))
                })?;
                let retype = (input.fields()[source].value_type != field.value_type)
                    .then_some(field.value_type);
                mappings.push(Mapping { source, retype });
            }
            self.mappings = Some(mappings);
        }
        Ok(self.mappings.as_deref().unwrap_or_default())
    }
}

impl StepLogic for SelectValuesStep {
    fn output_edits(&self) -> Vec<FieldEdit> {
        let removes = self.remove.iter().map(FieldEdit::remove);
        let renames = self.rename.iter().map(|(from, to)| FieldEdit::rename(from, to));
        let retypes = self.retype.iter().map(|(name, ty)| FieldEdit::retype(name, *ty));
        removes.chain(renames).chain(retypes).collect()
    }

    fn process_row(&mut self, row: Option<&Row>, io: &mut StepIo<'_>) -> Result<ProcessResult, StepError> {
        let Some(row) = row else {
            return Ok(ProcessResult::Done);
        };
        let output = io.output_schema().clone();
        let mappings = self.mappings(row, io)?;
        let mut values = Vec::with_capacity(mappings.len());
        for (mapping, field) in mappings.iter().zip(output.fields()) {
            let value = row.value(mapping.source).cloned().ok_or_else(|| {
                RowError::new(format!("row has no field at position {}", mapping.source))
                    .with_field(&field.name)
                    .with_code(MISSING_FIELD_CODE)
            })?;
            let value = match mapping.retype {
                Some(ty) => value.convert(ty).map_err(|e| {
                    RowError::new(e.to_string())
                        .with_field(&field.name)
                        .with_code(CONVERSION_ERROR_CODE)
                })?,
                None => value,
            };
            values.push(value);
        }
        Ok(ProcessResult::Emit(values))
    }
}
