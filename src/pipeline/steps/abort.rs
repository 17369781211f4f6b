//! Abort the run once too many rows arrive.

use crate::config::StepConfig;
use crate::pipeline::error::StepError;
use crate::pipeline::row::Row;
use crate::pipeline::step::{ProcessResult, StepIo, StepLogic};

/// Passes up to `threshold` rows, then aborts the whole run on the next one.
#[derive(Debug, Clone)]
pub struct AbortStep {
    threshold: u64,
    message: Option<String>,
    seen: u64,
}

impl AbortStep {
    pub fn from_config(config: &StepConfig) -> anyhow::Result<Self> {
        let threshold = config.option_as::<i64>("threshold")?.unwrap_or(0);
        anyhow::ensure!(threshold >= 0, "step '{}': threshold must not be negative", config.name);
        Ok(Self {
            threshold: threshold as u64,
            message: config.option_as("message")?,
            seen: 0,
        })
    }
}

impl StepLogic for AbortStep {
    fn process_row(&mut self, row: Option<&Row>, io: &mut StepIo<'_>) -> Result<ProcessResult, StepError> {
        let Some(row) = row else {
            return Ok(ProcessResult::Done);
        };
        self.seen += 1;
        if self.seen > self.threshold {
            let reason = self
                .message
                .clone()
                .unwrap_or_else(|| format!("row limit of {} exceeded", self.threshold));
            tracing::warn!(step = %io.step().name(), rows = self.seen, "aborting run");
            io.abort(reason);
            return Ok(ProcessResult::Skip);
        }
        Ok(ProcessResult::Emit(row.values().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::StepState;
    use crate::pipeline::row::{Value, ValueType};
    use crate::pipeline::step::BuiltinStep;
    use crate::pipeline::steps::harness;

    fn input(n: i64) -> Vec<Row> {
        harness::rows(
            &[("id", ValueType::Integer)],
            (0..n).map(|i| vec![Value::Integer(i)]).collect(),
        )
    }

    #[test]
    fn test_below_threshold_passes() {
        let config = StepConfig::new("guard", "abort").with_option("threshold", 5);
        let step = AbortStep::from_config(&config).unwrap();
        let out = harness::run(BuiltinStep::Abort(step), Some(input(5)));
        assert_eq!(out.outcome.state, StepState::Done);
        assert_eq!(out.rows.len(), 5);
    }

    #[test]
    fn test_aborts_past_threshold() {
        let config = StepConfig::new("guard", "abort")
            .with_option("threshold", 2)
            .with_option("message", "too many orders");
        let step = AbortStep::from_config(&config).unwrap();
        let out = harness::run(BuiltinStep::Abort(step), Some(input(5)));
        assert_eq!(out.outcome.state, StepState::Errored);
        let error = out.outcome.error.unwrap();
        assert!(error.contains("too many orders"), "{}", error);
        assert_eq!(out.metrics.lines_written(), 2);
    }
}
