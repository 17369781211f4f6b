//! Diverts rejected rows to a step's error hop.
//!
//! An error row carries the original values followed by the error fields
//! (count, description, offending field, code, step). Rejection limits turn a
//! steady stream of rejected rows into a fatal error.

use crate::pipeline::error::{FatalStepError, RowError, SchemaError};
use crate::pipeline::router::{RouteError, TargetRoute};
use crate::pipeline::row::{Row, Value, ValueType};
use crate::pipeline::schema::{FieldMeta, Schema};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Names of the fields appended to error rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorFieldNames {
    pub nr_errors: String,
    pub descriptions: String,
    pub fields: String,
    pub codes: String,
    pub step: String,
}

impl Default for ErrorFieldNames {
    fn default() -> Self {
        Self {
            nr_errors: "nr_errors".to_string(),
            descriptions: "error_descriptions".to_string(),
            fields: "error_fields".to_string(),
            codes: "error_codes".to_string(),
            step: "error_step".to_string(),
        }
    }
}

impl ErrorFieldNames {
    fn schema(&self, origin: &str) -> Result<Schema, SchemaError> {
        Schema::new(vec![
            FieldMeta::new(&self.nr_errors, ValueType::Integer).with_origin(origin),
            FieldMeta::new(&self.descriptions, ValueType::String).with_origin(origin),
            FieldMeta::new(&self.fields, ValueType::String).with_origin(origin),
            FieldMeta::new(&self.codes, ValueType::String).with_origin(origin),
            FieldMeta::new(&self.step, ValueType::String).with_origin(origin),
        ])
    }
}

/// Limits on rejected rows before the step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RejectionLimits {
    pub max_errors: Option<u64>,
    pub max_percent_errors: Option<u32>,
    /// Rows read before the percentage limit applies.
    pub min_rows_for_percent: u64,
}

impl RejectionLimits {
    /// Fail once `rejected` out of `read` rows crosses a limit.
    pub fn check(&self, rejected: u64, read: u64) -> Result<(), FatalStepError> {
        if let Some(limit) = self.max_errors {
            if rejected > limit {
                return Err(FatalStepError::TooManyErrors { rejected, limit });
            }
        }
        if let Some(limit) = self.max_percent_errors {
            if read > 0 && read >= self.min_rows_for_percent {
                let percent = rejected * 100 / read;
                if percent > u64::from(limit) {
                    return Err(FatalStepError::RejectionRate { percent, limit });
                }
            }
        }
        Ok(())
    }
}

/// An error row decoded back into its parts.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRecord {
    pub step: String,
    pub nr_errors: i64,
    pub message: String,
    pub field: Option<String>,
    pub code: String,
    /// The values of the rejected row.
    pub original: Vec<Value>,
}

impl ErrorRecord {
    /// Decode a row produced by an [`ErrorRouter`] using the same field names.
    pub fn from_row(row: &Row, names: &ErrorFieldNames) -> Option<ErrorRecord> {
        let start = row.schema().index_of(&names.nr_errors)?;
        let text = |name: &str| {
            row.get(name)
                .filter(|v| !v.is_null())
                .map(|v| v.to_string())
        };
        Some(ErrorRecord {
            step: text(&names.step).unwrap_or_default(),
            nr_errors: row.get(&names.nr_errors)?.as_i64()?,
            message: text(&names.descriptions).unwrap_or_default(),
            field: text(&names.fields),
            code: text(&names.codes).unwrap_or_default(),
            original: row.values()[..start].to_vec(),
        })
    }
}

/// Error-hop side of one step copy.
#[derive(Debug)]
pub struct ErrorRouter {
    step: String,
    route: TargetRoute,
    names: ErrorFieldNames,
    limits: RejectionLimits,
    /// Input layout seen last and the error layout derived from it.
    layout: Option<(Arc<Schema>, Arc<Schema>)>,
}

impl ErrorRouter {
    pub fn new(
        step: impl Into<String>,
        route: TargetRoute,
        names: ErrorFieldNames,
        limits: RejectionLimits,
    ) -> Self {
        Self {
            step: step.into(),
            route,
            names,
            limits,
            layout: None,
        }
    }

    pub fn limits(&self) -> &RejectionLimits {
        &self.limits
    }

    pub fn target(&self) -> &str {
        self.route.step()
    }

    fn error_schema(&mut self, input: &Arc<Schema>) -> Result<Arc<Schema>, SchemaError> {
        if let Some((seen, derived)) = &self.layout {
            if Arc::ptr_eq(seen, input) || seen == input {
                return Ok(derived.clone());
            }
        }
        let derived = Arc::new(input.merge(&self.names.schema(&self.step)?)?);
        self.layout = Some((input.clone(), derived.clone()));
        Ok(derived)
    }

    /// Build the error row for `row` and push it to the error hop.
    pub fn divert(&mut self, row: &Row, error: &RowError) -> Result<(), FatalStepError> {
        let schema = self.error_schema(row.schema())?;
        let mut values = Vec::with_capacity(schema.len());
        values.extend_from_slice(row.values());
        values.push(Value::Integer(1));
        values.push(Value::String(error.message.clone()));
        values.push(error.field.clone().map(Value::String).unwrap_or(Value::Null));
        values.push(if error.code.is_empty() {
            Value::Null
        } else {
            Value::String(error.code.clone())
        });
        values.push(Value::String(self.step.clone()));

        match self.route.send(Row::new(schema, values)) {
            Ok(_) => Ok(()),
            Err(RouteError::Cancelled) => Ok(()),
            Err(err) => Err(FatalStepError::Route(err.to_string())),
        }
    }

    pub fn signal_end(&self) {
        self.route.signal_end();
    }
}
