//! Test data builders for topologies and rows

use rowflow::config::StepConfig;
use rowflow::pipeline::{FieldMeta, Row, Schema, Value, ValueType};
use std::sync::Arc;

/// Builder for `generator` step configurations
pub struct GeneratorBuilder {
    name: String,
    limit: i64,
    fields: toml::value::Array,
    sequence_field: Option<String>,
    copies: usize,
}

impl GeneratorBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            limit: 1,
            fields: Vec::new(),
            sequence_field: None,
            copies: 1,
        }
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    /// Add a constant field; `value` is parsed into `value_type`
    pub fn field(mut self, name: &str, value_type: &str, value: &str) -> Self {
        let mut field = toml::Table::new();
        field.insert("name".into(), name.into());
        field.insert("type".into(), value_type.into());
        field.insert("value".into(), value.into());
        self.fields.push(toml::Value::Table(field));
        self
    }

    /// Number rows from 1 in `name`
    pub fn sequence(mut self, name: &str) -> Self {
        self.sequence_field = Some(name.to_string());
        self
    }

    pub fn copies(mut self, copies: usize) -> Self {
        self.copies = copies;
        self
    }

    pub fn build(self) -> StepConfig {
        let mut config = StepConfig::new(self.name, "generator")
            .with_copies(self.copies)
            .with_option("limit", self.limit);
        if !self.fields.is_empty() {
            config = config.with_option("fields", toml::Value::Array(self.fields));
        }
        if let Some(sequence) = self.sequence_field {
            config = config.with_option("sequence_field", sequence);
        }
        config
    }
}

/// `filter` step keeping rows where `field <op> value`
pub fn filter(name: &str, field: &str, op: &str, value: impl Into<toml::Value>) -> StepConfig {
    StepConfig::new(name, "filter")
        .with_option("field", field)
        .with_option("op", op)
        .with_option("value", value)
}

/// Rows of a single integer field `id`
pub fn id_rows(ids: impl IntoIterator<Item = i64>) -> Vec<Row> {
    let schema = Arc::new(Schema::new(vec![FieldMeta::new("id", ValueType::Integer)]).unwrap());
    ids.into_iter()
        .map(|id| Row::new(schema.clone(), vec![Value::Integer(id)]))
        .collect()
}

/// Integer values of `field` in row order
pub fn ints(rows: &[Row], field: &str) -> Vec<i64> {
    rows.iter()
        .map(|row| {
            row.get(field)
                .and_then(Value::as_i64)
                .unwrap_or_else(|| panic!("row without integer field '{}'", field))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generator_builder() {
        let config = GeneratorBuilder::new("source")
            .limit(5)
            .field("amount", "number", "1.5")
            .sequence("id")
            .build();

        assert_eq!(config.step_type, "generator");
        assert_eq!(config.option_i64("limit"), Some(5));
        assert_eq!(config.option_str("sequence_field"), Some("id"));
        assert_eq!(config.option("fields").and_then(|f| f.as_array()).map(Vec::len), Some(1));
    }
}
