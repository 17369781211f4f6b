//! Feeding rows into a running pipeline from outside.

use crate::pipeline::queue::{PutError, QueuePair, TryPut};
use crate::pipeline::row::Row;
use std::sync::Arc;

/// Write end of an extra input attached to one step copy.
///
/// The copy treats it like any other input: it keeps reading until every
/// input, this one included, has ended. Dropping the producer ends it.
#[derive(Debug)]
pub struct RowProducer {
    pair: Arc<QueuePair>,
}

impl RowProducer {
    pub(crate) fn new(pair: Arc<QueuePair>) -> Self {
        Self { pair }
    }

    /// Name of the underlying queue-pair.
    pub fn name(&self) -> &str {
        self.pair.name()
    }

    /// Queue a row, blocking while the copy is behind.
    pub fn put_row(&self, row: Row) -> Result<(), PutError> {
        self.pair.put(row)
    }

    /// Queue a row if there is room for it.
    pub fn try_put_row(&self, row: Row) -> Result<TryPut, PutError> {
        self.pair.try_put(row)
    }

    /// No more rows will follow.
    pub fn finished(&self) {
        self.pair.signal_end();
    }

    pub fn is_finished(&self) -> bool {
        self.pair.is_ended()
    }
}

impl Drop for RowProducer {
    fn drop(&mut self) {
        self.pair.signal_end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::queue::Fetch;
    use crate::pipeline::row::{Value, ValueType};
    use crate::pipeline::schema::{FieldMeta, Schema};

    fn row(id: i64) -> Row {
        let schema = Arc::new(Schema::new(vec![FieldMeta::new("id", ValueType::Integer)]).unwrap());
        Row::new(schema, vec![Value::Integer(id)])
    }

    #[test]
    fn test_drop_ends_the_stream() {
        let pair = Arc::new(QueuePair::new("producer - sink.0", 2));
        let producer = RowProducer::new(pair.clone());
        producer.put_row(row(1)).unwrap();
        assert!(matches!(producer.try_put_row(row(2)).unwrap(), TryPut::Sent));
        assert!(matches!(producer.try_put_row(row(3)).unwrap(), TryPut::Full(_)));
        drop(producer);

        assert!(matches!(pair.try_get(), Fetch::Row(_)));
        assert!(matches!(pair.try_get(), Fetch::Row(_)));
        assert!(matches!(pair.try_get(), Fetch::EndOfStream));
    }

    #[test]
    fn test_rows_after_finish_are_refused() {
        let producer = RowProducer::new(Arc::new(QueuePair::new("producer - sink.0", 2)));
        producer.finished();
        assert!(producer.is_finished());
        assert!(matches!(producer.put_row(row(1)), Err(PutError::Closed(_))));
    }
}
