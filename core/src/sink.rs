//! Result delivery from the scheduler back to the caller that submitted an
//! operation.
//!
//! Every operation gets one channel. Single-shot operations put exactly one
//! item on it; a scan streams any number of results and the channel closes
//! when the scan ends. The writer half stays with the scheduler and can only
//! reach a terminal state once.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::error::{RadioError, Result};
use crate::models::{OperationId, OperationState};

/// Lifecycle state shared between the scheduler and the caller's sink.
#[derive(Debug)]
pub(crate) struct StateCell {
    state: AtomicU8,
    abandoned: AtomicBool,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        StateCell {
            state: AtomicU8::new(OperationState::Queued.to_u8()),
            abandoned: AtomicBool::new(false),
        }
    }

    pub(crate) fn get(&self) -> OperationState {
        OperationState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: OperationState) {
        self.state.store(state.to_u8(), Ordering::Release);
    }

    /// The caller dropped its sink; nobody will read further results.
    pub(crate) fn abandon(&self) {
        self.abandoned.store(true, Ordering::Release);
    }

    pub(crate) fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::Acquire)
    }
}

/// Caller-side handle to an operation's outcome.
///
/// `wait` blocks for the first item, which for single-shot operations is the
/// whole result. Streaming operations are consumed through the `Iterator`
/// impl, which ends when the operation reaches a terminal state.
#[derive(Debug)]
pub struct ResultSink<T> {
    id: OperationId,
    rx: Receiver<Result<T>>,
    state: Arc<StateCell>,
}

impl<T> ResultSink<T> {
    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn state(&self) -> OperationState {
        self.state.get()
    }

    pub fn wait(&self) -> Result<T> {
        self.rx.recv().unwrap_or(Err(RadioError::SchedulerClosed))
    }

    /// Like [`ResultSink::wait`], but gives up after `timeout` and returns
    /// `None` if nothing was delivered by then.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(RadioError::SchedulerClosed)),
        }
    }

    /// Non-blocking poll. `None` means nothing is pending right now or the
    /// stream has ended.
    pub fn try_next(&self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal() && self.rx.is_empty()
    }
}

impl<T> Drop for ResultSink<T> {
    fn drop(&mut self) {
        self.state.abandon();
    }
}

impl<T> Iterator for ResultSink<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.recv().ok()
    }
}

/// Scheduler-side half of a [`ResultSink`].
#[derive(Debug)]
pub(crate) struct SinkWriter<T> {
    tx: Option<Sender<Result<T>>>,
    state: Arc<StateCell>,
}

impl<T> SinkWriter<T> {
    pub(crate) fn set_state(&self, state: OperationState) {
        if !self.state.get().is_terminal() {
            self.state.set(state);
        }
    }

    pub(crate) fn state(&self) -> OperationState {
        self.state.get()
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.tx.is_none()
    }

    /// Forward one streamed item without ending the operation.
    pub(crate) fn emit(&self, item: T) {
        if let Some(tx) = &self.tx {
            // The caller may have dropped its sink; the operation still runs
            // to completion.
            let _ = tx.send(Ok(item));
        }
    }

    /// Resolve with a final value. Returns false if already terminal.
    pub(crate) fn complete(&mut self, value: T) -> bool {
        match self.tx.take() {
            Some(tx) => {
                self.state.set(OperationState::Completed);
                let _ = tx.send(Ok(value));
                true
            }
            None => false,
        }
    }

    /// End a stream successfully with no further items.
    pub(crate) fn finish(&mut self) -> bool {
        match self.tx.take() {
            Some(_) => {
                self.state.set(OperationState::Completed);
                true
            }
            None => false,
        }
    }

    pub(crate) fn fail(&mut self, error: RadioError) -> bool {
        match self.tx.take() {
            Some(tx) => {
                self.state.set(error.terminal_state());
                let _ = tx.send(Err(error));
                true
            }
            None => false,
        }
    }

    pub(crate) fn state_cell(&self) -> Arc<StateCell> {
        Arc::clone(&self.state)
    }

    pub(crate) fn is_abandoned(&self) -> bool {
        self.state.is_abandoned()
    }
}

pub(crate) fn result_channel<T>(id: OperationId) -> (SinkWriter<T>, ResultSink<T>) {
    let (tx, rx) = channel::unbounded();
    let state = Arc::new(StateCell::new());
    (
        SinkWriter {
            tx: Some(tx),
            state: Arc::clone(&state),
        },
        ResultSink { id, rx, state },
    )
}
