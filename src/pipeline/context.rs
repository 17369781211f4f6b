//! Shared run state and per-copy counters.
//!
//! `RunContext` is the only state shared by every step copy of a run:
//! atomics for the stop flag and aggregate counters, a pause latch, plus a
//! bounded error list behind a mutex. `StepMetrics` belongs to one copy; the copy writes it
//! and the coordinator reads it for live status.

use crate::pipeline::queue::{CancelToken, QueuePair};
use crossbeam_channel::Receiver;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Lifecycle state of one step copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Created,
    Initialized,
    Running,
    Done,
    Stopped,
    Errored,
    Disposed,
}

impl StepState {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepState::Done | StepState::Stopped | StepState::Errored)
    }

    fn to_u8(self) -> u8 {
        match self {
            StepState::Created => 0,
            StepState::Initialized => 1,
            StepState::Running => 2,
            StepState::Done => 3,
            StepState::Stopped => 4,
            StepState::Errored => 5,
            StepState::Disposed => 6,
        }
    }

    fn from_u8(raw: u8) -> StepState {
        match raw {
            1 => StepState::Initialized,
            2 => StepState::Running,
            3 => StepState::Done,
            4 => StepState::Stopped,
            5 => StepState::Errored,
            6 => StepState::Disposed,
            _ => StepState::Created,
        }
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepState::Created => "created",
            StepState::Initialized => "initialized",
            StepState::Running => "running",
            StepState::Done => "done",
            StepState::Stopped => "stopped",
            StepState::Errored => "errored",
            StepState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// A fatal error reported by a step copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDescriptor {
    pub step: String,
    pub copy: usize,
    pub message: String,
}

/// Live counters of one step copy.
#[derive(Debug, Default)]
pub struct StepMetrics {
    lines_read: AtomicU64,
    lines_written: AtomicU64,
    lines_rejected: AtomicU64,
    errors: AtomicU64,
    state: AtomicU8,
    /// Terminal state, kept after the copy moves on to `Disposed`.
    outcome: AtomicU8,
}

impl StepMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_read(&self) {
        self.lines_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_written(&self) {
        self.lines_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) -> u64 {
        self.lines_rejected.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lines_read(&self) -> u64 {
        self.lines_read.load(Ordering::Relaxed)
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written.load(Ordering::Relaxed)
    }

    pub fn lines_rejected(&self) -> u64 {
        self.lines_rejected.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> StepState {
        StepState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: StepState) {
        self.state.store(state.to_u8(), Ordering::Release);
        if state.is_terminal() {
            self.outcome.store(state.to_u8(), Ordering::Release);
        }
    }

    /// The terminal state the copy reached, if any.
    pub fn outcome(&self) -> Option<StepState> {
        let state = StepState::from_u8(self.outcome.load(Ordering::Acquire));
        state.is_terminal().then_some(state)
    }
}

/// Why the run was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    /// `Pipeline::stop` was called.
    External,
    /// A step copy failed.
    Failure,
}

/// State shared by all step copies of one run.
#[derive(Debug)]
pub struct RunContext {
    stopped: AtomicBool,
    stopped_externally: AtomicBool,
    stop_token: CancelToken,
    pairs: Mutex<Vec<Arc<QueuePair>>>,
    paused: Mutex<bool>,
    resumed: Condvar,
    error_count: AtomicU64,
    rows_read: AtomicU64,
    rows_written: AtomicU64,
    error_log: Mutex<Vec<ErrorDescriptor>>,
    max_error_messages: usize,
}

impl RunContext {
    /// `pairs` are cancelled when the run stops.
    pub fn new(pairs: Vec<Arc<QueuePair>>, max_error_messages: usize) -> Self {
        Self {
            stopped: AtomicBool::new(false),
            stopped_externally: AtomicBool::new(false),
            stop_token: CancelToken::new(),
            pairs: Mutex::new(pairs),
            paused: Mutex::new(false),
            resumed: Condvar::new(),
            error_count: AtomicU64::new(0),
            rows_read: AtomicU64::new(0),
            rows_written: AtomicU64::new(0),
            error_log: Mutex::new(Vec::new()),
            max_error_messages,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn is_stopped_externally(&self) -> bool {
        self.stopped_externally.load(Ordering::SeqCst)
    }

    /// Ready once the run stops; usable inside a `Select`.
    pub fn stop_signal(&self) -> &Receiver<()> {
        self.stop_token.signal()
    }

    /// Set the stop flag and wake every blocked copy. Idempotent.
    pub fn stop(&self, cause: StopCause) {
        if cause == StopCause::External {
            self.stopped_externally.store(true, Ordering::SeqCst);
        }
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let pairs = self.pairs.lock().unwrap_or_else(|e| e.into_inner());
        tracing::info!(?cause, pairs = pairs.len(), "stopping pipeline run");
        self.stop_token.cancel();
        for pair in pairs.iter() {
            pair.cancel();
        }
        drop(pairs);
        self.resumed.notify_all();
    }

    /// Cancel `pair` along with the others when the run stops.
    pub(crate) fn register_pair(&self, pair: Arc<QueuePair>) {
        let mut pairs = self.pairs.lock().unwrap_or_else(|e| e.into_inner());
        if self.is_stopped() {
            pair.cancel();
        }
        pairs.push(pair);
    }

    /// Hold every copy before its next row. Returns `false` if already paused.
    pub fn pause(&self) -> bool {
        let mut paused = self.paused.lock().unwrap_or_else(|e| e.into_inner());
        !std::mem::replace(&mut *paused, true)
    }

    /// Release paused copies. Returns `false` if the run was not paused.
    pub fn resume(&self) -> bool {
        let mut paused = self.paused.lock().unwrap_or_else(|e| e.into_inner());
        let was_paused = std::mem::replace(&mut *paused, false);
        drop(paused);
        self.resumed.notify_all();
        was_paused
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Block while the run is paused. Returns early once the run stops;
    /// `poll` bounds each wait so a missed wake-up costs at most one interval.
    pub fn wait_while_paused(&self, poll: Duration) {
        let mut paused = self.paused.lock().unwrap_or_else(|e| e.into_inner());
        while *paused && !self.is_stopped() {
            paused = match self.resumed.wait_timeout(paused, poll) {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };
        }
    }

    /// Count a fatal error; the first `max_error_messages` are kept verbatim.
    pub fn record_error(&self, step: &str, copy: usize, message: impl Into<String>) {
        self.error_count.fetch_add(1, Ordering::SeqCst);
        let mut log = self.error_log.lock().unwrap_or_else(|e| e.into_inner());
        if log.len() < self.max_error_messages {
            log.push(ErrorDescriptor {
                step: step.to_string(),
                copy,
                message: message.into(),
            });
        }
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::SeqCst)
    }

    pub fn errors(&self) -> Vec<ErrorDescriptor> {
        self.error_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn add_rows_read(&self, rows: u64) {
        self.rows_read.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn add_rows_written(&self, rows: u64) {
        self.rows_written.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read.load(Ordering::Relaxed)
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written.load(Ordering::Relaxed)
    }
}
