//! Plugin steps used to observe and disturb pipeline runs

use rowflow::config::StepConfig;
use rowflow::pipeline::{
    ProcessResult, Row, RowError, StepContext, StepError, StepIo, StepLogic, StepRegistry, Value,
    ValueType,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A row received by a capture sink
#[derive(Debug, Clone)]
pub struct CapturedRow {
    pub step: String,
    pub copy: usize,
    pub row: Row,
}

/// Rows received by capture sinks, in arrival order
pub type Captured = Arc<Mutex<Vec<CapturedRow>>>;

/// Sink that records every row it receives and forwards it
pub struct CaptureSink {
    step: String,
    copy: usize,
    rows: Captured,
}

impl StepLogic for CaptureSink {
    fn init(&mut self, ctx: &StepContext) -> Result<(), StepError> {
        self.step = ctx.name().to_string();
        self.copy = ctx.copy();
        Ok(())
    }

    fn process_row(&mut self, row: Option<&Row>, _io: &mut StepIo<'_>) -> Result<ProcessResult, StepError> {
        let Some(row) = row else {
            return Ok(ProcessResult::Done);
        };
        self.rows.lock().unwrap().push(CapturedRow {
            step: self.step.clone(),
            copy: self.copy,
            row: row.clone(),
        });
        Ok(ProcessResult::Emit(row.values().to_vec()))
    }
}

/// Fails `init`; counts how often it is disposed
pub struct FailingInit {
    disposed: Arc<AtomicUsize>,
}

impl StepLogic for FailingInit {
    fn init(&mut self, _ctx: &StepContext) -> Result<(), StepError> {
        Err(StepError::fatal("cannot open resource"))
    }

    fn process_row(&mut self, _row: Option<&Row>, _io: &mut StepIo<'_>) -> Result<ProcessResult, StepError> {
        Ok(ProcessResult::Done)
    }

    fn dispose(&mut self, _ctx: &StepContext) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Forwards rows; counts how often it is disposed
pub struct CountingPassThrough {
    disposed: Arc<AtomicUsize>,
}

impl StepLogic for CountingPassThrough {
    fn process_row(&mut self, row: Option<&Row>, _io: &mut StepIo<'_>) -> Result<ProcessResult, StepError> {
        Ok(match row {
            Some(row) => ProcessResult::Emit(row.values().to_vec()),
            None => ProcessResult::Done,
        })
    }

    fn dispose(&mut self, _ctx: &StepContext) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Source emitting an increasing `id` until the run stops
pub struct EndlessSource {
    next: i64,
}

impl StepLogic for EndlessSource {
    fn output_edits(&self) -> Vec<rowflow::pipeline::FieldEdit> {
        vec![rowflow::pipeline::FieldEdit::add(rowflow::pipeline::FieldMeta::new(
            "id",
            ValueType::Integer,
        ))]
    }

    fn process_row(&mut self, _row: Option<&Row>, _io: &mut StepIo<'_>) -> Result<ProcessResult, StepError> {
        self.next += 1;
        Ok(ProcessResult::Emit(vec![Value::Integer(self.next)]))
    }
}

/// Sleeps before forwarding each row
pub struct SlowPassThrough {
    delay: Duration,
}

impl StepLogic for SlowPassThrough {
    fn process_row(&mut self, row: Option<&Row>, _io: &mut StepIo<'_>) -> Result<ProcessResult, StepError> {
        let Some(row) = row else {
            return Ok(ProcessResult::Done);
        };
        std::thread::sleep(self.delay);
        Ok(ProcessResult::Emit(row.values().to_vec()))
    }
}

/// Forwards `count` rows, then finishes without draining its input
pub struct Take {
    remaining: i64,
}

impl StepLogic for Take {
    fn process_row(&mut self, row: Option<&Row>, _io: &mut StepIo<'_>) -> Result<ProcessResult, StepError> {
        match row {
            Some(row) if self.remaining > 0 => {
                self.remaining -= 1;
                Ok(ProcessResult::Emit(row.values().to_vec()))
            }
            _ => Ok(ProcessResult::Done),
        }
    }
}

/// Rejects rows whose `id` is odd
pub struct RejectOdd;

impl StepLogic for RejectOdd {
    fn process_row(&mut self, row: Option<&Row>, _io: &mut StepIo<'_>) -> Result<ProcessResult, StepError> {
        let Some(row) = row else {
            return Ok(ProcessResult::Done);
        };
        match row.get("id").and_then(Value::as_i64) {
            Some(id) if id % 2 != 0 => Err(RowError::new(format!("odd id {}", id))
                .with_field("id")
                .with_code("ODD001")
                .into()),
            _ => Ok(ProcessResult::Emit(row.values().to_vec())),
        }
    }
}

/// Panics on the first row
pub struct PanicOnRow;

impl StepLogic for PanicOnRow {
    fn process_row(&mut self, row: Option<&Row>, _io: &mut StepIo<'_>) -> Result<ProcessResult, StepError> {
        if row.is_some() {
            panic!("step logic exploded");
        }
        Ok(ProcessResult::Done)
    }
}

/// Shared handles the test registry's plugins report into
#[derive(Clone, Default)]
pub struct Captures {
    pub captured: Captured,
    pub disposed: Arc<AtomicUsize>,
}

impl Captures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows captured by every copy of `step`
    pub fn rows_of(&self, step: &str) -> Vec<Row> {
        self.captured_by(step).into_iter().map(|c| c.row).collect()
    }

    pub fn captured_by(&self, step: &str) -> Vec<CapturedRow> {
        self.captured
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.step == step)
            .cloned()
            .collect()
    }

    pub fn disposed(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }
}

/// Built-in steps plus the plugins above, registered under:
/// `capture`, `failing_init`, `counting`, `endless`, `slow` (`delay_ms`),
/// `take` (`count`), `reject_odd`, `panic`.
pub fn test_registry(captures: &Captures) -> StepRegistry {
    let mut registry = StepRegistry::with_builtins();

    let captured = captures.captured.clone();
    registry.register(
        "capture",
        move |_: &StepConfig, copy: usize| -> anyhow::Result<Box<dyn StepLogic>> {
            Ok(Box::new(CaptureSink {
                step: String::new(),
                copy,
                rows: captured.clone(),
            }))
        },
    );

    let disposed = captures.disposed.clone();
    registry.register(
        "failing_init",
        move |_: &StepConfig, _: usize| -> anyhow::Result<Box<dyn StepLogic>> {
            Ok(Box::new(FailingInit {
                disposed: disposed.clone(),
            }))
        },
    );

    let disposed = captures.disposed.clone();
    registry.register(
        "counting",
        move |_: &StepConfig, _: usize| -> anyhow::Result<Box<dyn StepLogic>> {
            Ok(Box::new(CountingPassThrough {
                disposed: disposed.clone(),
            }))
        },
    );

    registry.register(
        "endless",
        |_: &StepConfig, _: usize| -> anyhow::Result<Box<dyn StepLogic>> {
            Ok(Box::new(EndlessSource { next: 0 }))
        },
    );

    registry.register(
        "slow",
        |config: &StepConfig, _: usize| -> anyhow::Result<Box<dyn StepLogic>> {
            let delay = config.option_i64("delay_ms").unwrap_or(1).max(0) as u64;
            Ok(Box::new(SlowPassThrough {
                delay: Duration::from_millis(delay),
            }))
        },
    );

    registry.register(
        "take",
        |config: &StepConfig, _: usize| -> anyhow::Result<Box<dyn StepLogic>> {
            Ok(Box::new(Take {
                remaining: config.option_i64("count").unwrap_or(1),
            }))
        },
    );

    registry.register(
        "reject_odd",
        |_: &StepConfig, _: usize| -> anyhow::Result<Box<dyn StepLogic>> { Ok(Box::new(RejectOdd)) },
    );

    registry.register(
        "panic",
        |_: &StepConfig, _: usize| -> anyhow::Result<Box<dyn StepLogic>> { Ok(Box::new(PanicOnRow)) },
    );

    registry
}
