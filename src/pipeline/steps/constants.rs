//! Append constant fields to every row.

use crate::config::StepConfig;
use crate::pipeline::error::StepError;
use crate::pipeline::row::{Row, Value};
use crate::pipeline::schema::FieldEdit;
use crate::pipeline::step::{ProcessResult, StepContext, StepIo, StepLogic};
use crate::pipeline::steps::FieldSpec;

#[derive(Debug, Clone)]
pub struct ConstantsStep {
    fields: Vec<FieldSpec>,
    values: Vec<Value>,
}

impl ConstantsStep {
    pub fn from_config(config: &StepConfig) -> anyhow::Result<Self> {
        let fields: Vec<FieldSpec> = config.option_as("fields")?.unwrap_or_default();
        anyhow::ensure!(!fields.is_empty(), "step '{}': no constant fields configured", config.name);
        Ok(Self {
            fields,
            values: Vec::new(),
        })
    }
}

impl StepLogic for ConstantsStep {
    fn init(&mut self, _ctx: &StepContext) -> Result<(), StepError> {
        self.values = self
            .fields
            .iter()
            .map(FieldSpec::resolve)
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    fn output_edits(&self) -> Vec<FieldEdit> {
        self.fields.iter().map(|f| FieldEdit::add(f.meta())).collect()
    }

    fn process_row(&mut self, row: Option<&Row>, _io: &mut StepIo<'_>) -> Result<ProcessResult, StepError> {
        let Some(row) = row else {
            return Ok(ProcessResult::Done);
        };
        let mut values = Vec::with_capacity(row.len() + self.values.len());
        values.extend_from_slice(row.values());
        values.extend(self.values.iter().cloned());
        Ok(ProcessResult::Emit(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::StepState;
    use crate::pipeline::row::ValueType;
    use crate::pipeline::step::BuiltinStep;
    use crate::pipeline::steps::harness;

    fn config(fields: &str) -> StepConfig {
        let mut table: toml::Table = toml::from_str(fields).unwrap();
        let fields = table.remove("fields").unwrap();
        StepConfig::new("consts", "constants").with_option("fields", fields)
    }

    #[test]
    fn test_appends_fields() {
        let step = ConstantsStep::from_config(&config(
            r#"fields = [{ name = "country", value = "BE" }, { name = "rate", type = "number", value = 0.21 }]"#,
        ))
        .unwrap();
        let input = harness::rows(
            &[("id", ValueType::Integer)],
            vec![vec![Value::Integer(1)], vec![Value::Integer(2)]],
        );
        let out = harness::run(BuiltinStep::Constants(step), Some(input));
        assert_eq!(out.outcome.state, StepState::Done);
        assert_eq!(out.rows.len(), 2);
        assert_eq!(
            out.rows[1].values(),
            [Value::Integer(2), Value::from("BE"), Value::Number(0.21)]
        );
        assert_eq!(out.rows[0].schema().field(1).unwrap().origin, "step");
    }

    #[test]
    fn test_clashing_name_fails_the_step() {
        let step = ConstantsStep::from_config(&config(r#"fields = [{ name = "ID", value = "x" }]"#)).unwrap();
        let input = harness::rows(&[("id", ValueType::Integer)], vec![vec![Value::Integer(1)]]);
        let out = harness::run(BuiltinStep::Constants(step), Some(input));
        assert_eq!(out.outcome.state, StepState::Errored);
        assert!(out.rows.is_empty());
    }

    #[test]
    fn test_requires_fields() {
        assert!(ConstantsStep::from_config(&StepConfig::new("c", "constants")).is_err());
    }
}
