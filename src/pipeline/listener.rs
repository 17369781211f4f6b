//! Row listeners: observe the rows a step copy reads and writes.
//!
//! Listeners run on the copy's own thread, inline with the row loop, so a
//! slow listener slows that copy down. They see rows, they never change them.

use crate::pipeline::row::Row;
use crate::pipeline::step::StepContext;
use std::sync::Arc;

/// Callbacks for rows passing through one step.
pub trait RowListener: Send + Sync {
    /// A row was taken from one of the copy's inputs.
    fn row_read(&self, _step: &StepContext, _row: &Row) {}

    /// A row was handed to at least one consumer (or the copy has none).
    fn row_written(&self, _step: &StepContext, _row: &Row) {}
}

/// The listeners attached to one step copy.
#[derive(Clone, Default)]
pub struct RowListeners {
    listeners: Vec<Arc<dyn RowListener>>,
}

impl RowListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, listener: Arc<dyn RowListener>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub(crate) fn read(&self, step: &StepContext, row: &Row) {
        for listener in &self.listeners {
            listener.row_read(step, row);
        }
    }

    pub(crate) fn written(&self, step: &StepContext, row: &Row) {
        for listener in &self.listeners {
            listener.row_written(step, row);
        }
    }
}

impl std::fmt::Debug for RowListeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowListeners")
            .field("count", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::row::{Value, ValueType};
    use crate::pipeline::schema::{FieldMeta, Schema};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Log(Mutex<Vec<String>>);

    impl RowListener for Log {
        fn row_read(&self, step: &StepContext, row: &Row) {
            self.0.lock().unwrap().push(format!("read {} {:?}", step.name(), row.value(0)));
        }

        fn row_written(&self, step: &StepContext, _row: &Row) {
            self.0.lock().unwrap().push(format!("written {}", step.name()));
        }
    }

    struct ReadOnly;

    impl RowListener for ReadOnly {}

    #[test]
    fn test_every_listener_is_called() {
        let schema = Arc::new(Schema::new(vec![FieldMeta::new("id", ValueType::Integer)]).unwrap());
        let row = Row::new(schema, vec![Value::Integer(4)]);
        let ctx = StepContext::new("sink", "dummy", 0, 1);
        let log = Arc::new(Log::default());

        let mut listeners = RowListeners::new();
        listeners.push(log.clone());
        listeners.push(Arc::new(ReadOnly));
        listeners.push(log.clone());
        listeners.read(&ctx, &row);
        listeners.written(&ctx, &row);

        assert_eq!(listeners.len(), 3);
        assert_eq!(
            *log.0.lock().unwrap(),
            [
                "read sink Some(Integer(4))",
                "read sink Some(Integer(4))",
                "written sink",
                "written sink"
            ]
        );
    }
}
