//! Bounded queue-pair between one producer copy and one consumer copy.
//!
//! A queue-pair is a fixed-capacity FIFO. `put` on a full pair blocks the
//! producer, which is the engine's only backpressure mechanism. The producer
//! closes the pair with `signal_end`; the consumer sees the remaining rows and
//! then `Fetch::EndOfStream`. Cancellation wakes both sides immediately.
//!
//! Blocking waits are `crossbeam_channel::Select`s over the row channel and
//! the signal channels, so no wait ever sleeps past a cancel or an end marker.

use crate::pipeline::row::Row;
use crossbeam_channel::{bounded, Receiver, Select, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default number of rows a queue-pair buffers.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// One-shot signal that can be awaited inside a `Select`.
///
/// Raising drops the only sender, which disconnects `receiver` and makes it
/// permanently ready for every waiter.
#[derive(Debug)]
struct Latch {
    raised: AtomicBool,
    trigger: Mutex<Option<Sender<()>>>,
    receiver: Receiver<()>,
}

impl Latch {
    fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            raised: AtomicBool::new(false),
            trigger: Mutex::new(Some(tx)),
            receiver: rx,
        }
    }

    /// Returns `true` only for the call that raised the latch.
    fn raise(&self) -> bool {
        if self.raised.swap(true, Ordering::SeqCst) {
            return false;
        }
        let mut trigger = self.trigger.lock().unwrap_or_else(|e| e.into_inner());
        trigger.take();
        true
    }

    fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }
}

/// Cooperative cancellation token.
///
/// `signal()` is a receiver that becomes ready (disconnected) once the token
/// is cancelled, so it can be added to any `Select`.
#[derive(Debug)]
pub struct CancelToken {
    latch: Latch,
}

impl CancelToken {
    pub fn new() -> Self {
        Self { latch: Latch::new() }
    }

    /// Idempotent. Returns `true` if this call performed the cancellation.
    pub fn cancel(&self) -> bool {
        self.latch.raise()
    }

    pub fn is_cancelled(&self) -> bool {
        self.latch.is_raised()
    }

    pub fn signal(&self) -> &Receiver<()> {
        &self.latch.receiver
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a consumer-side read.
#[derive(Debug)]
pub enum Fetch {
    Row(Row),
    /// The producer signalled end and every row has been consumed.
    EndOfStream,
    /// `get` waited for its full timeout.
    TimedOut,
    Cancelled,
    /// `try_get` found nothing queued.
    Empty,
}

impl Fetch {
    pub fn into_row(self) -> Option<Row> {
        match self {
            Fetch::Row(row) => Some(row),
            _ => None,
        }
    }
}

/// Outcome of a non-blocking put.
#[derive(Debug)]
pub enum TryPut {
    Sent,
    /// The pair is full; the row is handed back.
    Full(Row),
}

/// A put failed; the row is handed back.
#[derive(Error, Debug)]
pub enum PutError {
    #[error("queue-pair was cancelled")]
    Cancelled(Row),

    #[error("queue-pair already received end of stream")]
    Closed(Row),

    #[error("consumer has detached from the queue-pair")]
    Detached(Row),
}

impl PutError {
    pub fn into_row(self) -> Row {
        match self {
            PutError::Cancelled(row) | PutError::Closed(row) | PutError::Detached(row) => row,
        }
    }
}

/// Bounded single-producer single-consumer row queue.
#[derive(Debug)]
pub struct QueuePair {
    name: String,
    capacity: usize,
    tx: Sender<Row>,
    rx: Receiver<Row>,
    end: Latch,
    cancel: CancelToken,
    detached: AtomicBool,
}

impl QueuePair {
    /// Create a pair holding at most `capacity` rows (at least one).
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self {
            name: name.into(),
            capacity,
            tx,
            rx,
            end: Latch::new(),
            cancel: CancelToken::new(),
            detached: AtomicBool::new(false),
        }
    }

    /// `"producer.copy - consumer.copy"`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Rows currently buffered.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.rx.is_full()
    }

    pub fn is_ended(&self) -> bool {
        self.end.is_raised()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    fn check_open(&self, row: Row) -> Result<Row, PutError> {
        if self.is_detached() {
            return Err(PutError::Detached(row));
        }
        if self.cancel.is_cancelled() {
            return Err(PutError::Cancelled(row));
        }
        if self.end.is_raised() {
            return Err(PutError::Closed(row));
        }
        Ok(row)
    }

    /// Enqueue a row, blocking while the pair is full.
    pub fn put(&self, row: Row) -> Result<(), PutError> {
        let mut row = row;
        loop {
            match self.try_put(row)? {
                TryPut::Sent => return Ok(()),
                TryPut::Full(back) => row = back,
            }
            let mut sel = Select::new();
            sel.send(&self.tx);
            sel.recv(self.cancel.signal());
            let _ = sel.ready();
        }
    }

    /// Enqueue a row without blocking.
    pub fn try_put(&self, row: Row) -> Result<TryPut, PutError> {
        let row = self.check_open(row)?;
        match self.tx.try_send(row) {
            Ok(()) => Ok(TryPut::Sent),
            Err(TrySendError::Full(row)) => Ok(TryPut::Full(row)),
            Err(TrySendError::Disconnected(row)) => Err(PutError::Closed(row)),
        }
    }

    /// Dequeue the next row, waiting up to `timeout` (forever when `None`).
    pub fn get(&self, timeout: Option<Duration>) -> Fetch {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            match self.try_get() {
                Fetch::Empty => {}
                other => return other,
            }
            let mut sel = Select::new();
            self.watch(&mut sel);
            sel.recv(self.cancel.signal());
            match deadline {
                Some(deadline) => {
                    if sel.ready_deadline(deadline).is_err() {
                        return Fetch::TimedOut;
                    }
                }
                None => {
                    let _ = sel.ready();
                }
            }
        }
    }

    /// Dequeue the next row without blocking.
    pub fn try_get(&self) -> Fetch {
        if self.cancel.is_cancelled() {
            return Fetch::Cancelled;
        }
        // Read the end flag before the channel: every row put before
        // `signal_end` is already queued once the flag is visible.
        let ended = self.end.is_raised();
        match self.rx.try_recv() {
            Ok(row) => Fetch::Row(row),
            Err(TryRecvError::Empty) if ended => Fetch::EndOfStream,
            Err(TryRecvError::Empty) => Fetch::Empty,
            Err(TryRecvError::Disconnected) => Fetch::EndOfStream,
        }
    }

    /// Register this pair's readiness sources (rows and end marker) on a select.
    pub(crate) fn watch<'a>(&'a self, sel: &mut Select<'a>) {
        sel.recv(&self.rx);
        sel.recv(&self.end.receiver);
    }

    /// Mark end of stream. Idempotent; returns `true` on the first call.
    pub fn signal_end(&self) -> bool {
        let first = self.end.raise();
        if first {
            tracing::trace!(pair = %self.name, queued = self.len(), "end of stream signalled");
        }
        first
    }

    /// Wake every waiter and fail all further puts and gets. Idempotent.
    pub fn cancel(&self) -> bool {
        self.cancel.cancel()
    }

    /// Consumer side: the consumer has terminated and will never read again.
    ///
    /// Producers fail fast with `PutError::Detached`; buffered rows are dropped.
    pub fn detach(&self) {
        if self.detached.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        let mut dropped = 0usize;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::debug!(pair = %self.name, dropped, "consumer detached with rows still queued");
        }
    }
}
