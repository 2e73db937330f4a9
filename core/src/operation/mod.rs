//! Hardware commands admitted one at a time by the radio scheduler.
//!
//! Each command kind is a small struct implementing [`Operation`]. The
//! scheduler never looks at the concrete type: it starts the operation, asks
//! it whether a routed event is its completion, and lets it turn that event,
//! a timeout, a cancellation or a disconnect into a result.
//!
//! # Example
//!
//! ```
//! use gatt_radio::models::{CharacteristicId, DescriptorId};
//! use gatt_radio::operation::DescriptorWrite;
//! use gatt_radio::scheduler::RadioScheduler;
//! use gatt_radio::transport::TransportEvent;
//! use gatt_radio::transport_mock::MockTransport;
//! use gatt_radio::{GattStatus, RadioConfig};
//! use std::time::Instant;
//! use uuid::Uuid;
//!
//! let characteristic = CharacteristicId::new(Uuid::from_u128(0x2a37), 0);
//! let descriptor = DescriptorId::new(characteristic, Uuid::from_u128(0x2902));
//!
//! let mut radio = RadioScheduler::new(MockTransport::new(), RadioConfig::default());
//! let sink = radio
//!     .submit(DescriptorWrite::new(descriptor, [0x01, 0x00]), Instant::now())
//!     .unwrap();
//!
//! radio.route(
//!     TransportEvent::DescriptorWritten {
//!         descriptor,
//!         value: vec![0x01, 0x00],
//!         status: GattStatus::SUCCESS,
//!     },
//!     Instant::now(),
//! );
//! assert_eq!(sink.wait().unwrap(), vec![0x01, 0x00]);
//! ```

pub mod characteristic;
pub mod connection;
pub mod descriptor;
pub mod scan;

pub use characteristic::{CharacteristicRead, CharacteristicWrite};
pub use connection::{Connect, Disconnect, MtuRequest, RssiRead};
pub use descriptor::{DescriptorRead, DescriptorWrite, WriteTypeOverride};
pub use scan::Scan;

use std::sync::Arc;
use std::time::Duration;

use crate::config::RadioConfig;
use crate::error::{RadioError, Result};
use crate::models::{GattStatus, OperationId, OperationKind, OperationState, Priority, ResourceId};
use crate::sink::{result_channel, ResultSink, SinkWriter, StateCell};
use crate::transport::{TransportAdapter, TransportEvent};

/// How long an admitted operation may wait for its completion event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Deadline {
    /// Use the radio's configured GATT timeout.
    #[default]
    Default,
    After(Duration),
    /// Runs until stopped.
    Never,
}

impl Deadline {
    pub fn resolve(self, default: Duration) -> Option<Duration> {
        match self {
            Deadline::Default => Some(default),
            Deadline::After(after) => Some(after),
            Deadline::Never => None,
        }
    }
}

/// What a matched event means for the running operation.
#[derive(Debug, PartialEq)]
pub enum Progress<T> {
    /// Not a completion; keep running.
    Pending,
    /// Stream these items and keep running.
    Emit(Vec<T>),
    Complete(T),
    /// End a stream with no further items.
    Finished,
    Failed(RadioError),
}

/// An operation's answer to a cancel request while it is running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelResponse {
    /// The hardware was told to stop; the operation is over.
    Stopped,
    /// The command is already in flight. The operation keeps the transport
    /// until its own completion, timeout or disconnect, then resolves as
    /// cancelled.
    Deferred,
}

pub trait Operation: Send + 'static {
    type Output: Send + 'static;

    fn id(&self) -> OperationId;
    fn kind(&self) -> OperationKind;
    fn target(&self) -> ResourceId;

    fn deadline(&self) -> Deadline {
        Deadline::Default
    }

    fn priority(&self) -> Priority {
        Priority::Normal
    }

    /// Called at admission, before `start`, with the radio's configuration.
    fn configure(&mut self, _config: &RadioConfig) {}

    /// Issue the hardware call. An error means the transport refused it and
    /// the operation fails without waiting for any event.
    fn start(&mut self, transport: &mut dyn TransportAdapter) -> Result<()>;

    fn matches(&self, event: &TransportEvent) -> bool;

    fn on_match(&mut self, event: TransportEvent) -> Progress<Self::Output>;

    fn on_timeout(&mut self, after: Duration) -> RadioError {
        RadioError::Timeout {
            kind: self.kind(),
            after,
        }
    }

    fn on_cancel(&mut self, _transport: &mut dyn TransportAdapter) -> CancelResponse {
        CancelResponse::Deferred
    }

    fn on_disconnect(&mut self, cause: &str) -> RadioError {
        RadioError::TransportDisconnected(cause.to_string())
    }

    /// Called once when the operation gives up the transport, whatever
    /// ended it. Hardware left running by `start` must be stopped here.
    fn on_release(&mut self, _transport: &mut dyn TransportAdapter) {}
}

/// Turn a completion status into the operation's final progress.
pub(crate) fn status_result<T>(kind: OperationKind, status: GattStatus, value: T) -> Progress<T> {
    if status.is_success() {
        Progress::Complete(value)
    } else {
        Progress::Failed(RadioError::OperationFailed(format!(
            "{kind} failed with GATT status {}",
            status.0
        )))
    }
}

// ============================================================================
// Type-erased submissions
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Step {
    Running,
    Terminal(OperationState),
}

/// An operation bundled with the writer half of its result sink, as held by
/// the scheduler.
pub(crate) trait Job: Send {
    fn id(&self) -> OperationId;
    fn kind(&self) -> OperationKind;
    fn target(&self) -> ResourceId;
    fn deadline(&self) -> Deadline;
    fn priority(&self) -> Priority;
    fn state_cell(&self) -> Arc<StateCell>;
    fn mark(&self, state: OperationState);
    fn is_abandoned(&self) -> bool;
    fn configure(&mut self, config: &RadioConfig);
    fn start(&mut self, transport: &mut dyn TransportAdapter) -> Result<()>;
    fn matches(&self, event: &TransportEvent) -> bool;
    fn on_match(&mut self, event: TransportEvent) -> Step;
    fn on_timeout(&mut self, after: Duration) -> Step;
    fn on_cancel(&mut self, transport: &mut dyn TransportAdapter) -> Step;
    fn on_disconnect(&mut self, cause: &str) -> Step;
    fn on_release(&mut self, transport: &mut dyn TransportAdapter);
    fn fail(&mut self, error: RadioError) -> Step;
}

pub(crate) struct Submission<O: Operation> {
    op: O,
    sink: SinkWriter<O::Output>,
    cancel_requested: bool,
}

impl<O: Operation> Submission<O> {
    pub(crate) fn new(op: O) -> (Self, ResultSink<O::Output>) {
        let (sink, result) = result_channel(op.id());
        (
            Self {
                op,
                sink,
                cancel_requested: false,
            },
            result,
        )
    }

    fn terminal(&self) -> Step {
        Step::Terminal(self.sink.state())
    }

    fn apply(&mut self, progress: Progress<O::Output>) -> Step {
        if self.sink.is_terminal() {
            return self.terminal();
        }
        if self.cancel_requested {
            // First terminal trigger after a deferred cancel resolves as
            // cancelled; a late success is discarded.
            return match progress {
                Progress::Pending | Progress::Emit(_) => Step::Running,
                _ => self.fail(RadioError::Cancelled),
            };
        }
        match progress {
            Progress::Pending => Step::Running,
            Progress::Emit(items) => {
                for item in items {
                    self.sink.emit(item);
                }
                Step::Running
            }
            Progress::Complete(value) => {
                self.sink.complete(value);
                self.terminal()
            }
            Progress::Finished => {
                self.sink.finish();
                self.terminal()
            }
            Progress::Failed(error) => self.fail(error),
        }
    }
}

impl<O: Operation> Job for Submission<O> {
    fn id(&self) -> OperationId {
        self.op.id()
    }

    fn kind(&self) -> OperationKind {
        self.op.kind()
    }

    fn target(&self) -> ResourceId {
        self.op.target()
    }

    fn deadline(&self) -> Deadline {
        self.op.deadline()
    }

    fn priority(&self) -> Priority {
        self.op.priority()
    }

    fn state_cell(&self) -> Arc<StateCell> {
        self.sink.state_cell()
    }

    fn mark(&self, state: OperationState) {
        self.sink.set_state(state);
    }

    fn is_abandoned(&self) -> bool {
        self.sink.is_abandoned()
    }

    fn configure(&mut self, config: &RadioConfig) {
        self.op.configure(config);
    }

    fn start(&mut self, transport: &mut dyn TransportAdapter) -> Result<()> {
        self.op.start(transport)
    }

    fn matches(&self, event: &TransportEvent) -> bool {
        self.op.matches(event)
    }

    fn on_match(&mut self, event: TransportEvent) -> Step {
        let progress = self.op.on_match(event);
        self.apply(progress)
    }

    fn on_timeout(&mut self, after: Duration) -> Step {
        let error = self.op.on_timeout(after);
        self.apply(Progress::Failed(error))
    }

    fn on_cancel(&mut self, transport: &mut dyn TransportAdapter) -> Step {
        match self.op.on_cancel(transport) {
            CancelResponse::Stopped => self.apply(Progress::Finished),
            CancelResponse::Deferred => {
                self.cancel_requested = true;
                Step::Running
            }
        }
    }

    fn on_disconnect(&mut self, cause: &str) -> Step {
        let error = self.op.on_disconnect(cause);
        self.apply(Progress::Failed(error))
    }

    fn on_release(&mut self, transport: &mut dyn TransportAdapter) {
        self.op.on_release(transport);
    }

    fn fail(&mut self, error: RadioError) -> Step {
        self.sink.fail(error);
        self.terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CharacteristicId;
    use crate::transport_mock::MockTransport;
    use uuid::Uuid;

    fn characteristic() -> CharacteristicId {
        CharacteristicId::new(Uuid::from_u128(0x2a19), 0)
    }

    fn read_event(status: GattStatus) -> TransportEvent {
        TransportEvent::CharacteristicRead {
            characteristic: characteristic(),
            value: vec![0x64],
            status,
        }
    }

    #[test]
    fn test_deadline_resolution() {
        let default = Duration::from_secs(30);
        assert_eq!(Deadline::Default.resolve(default), Some(default));
        assert_eq!(
            Deadline::After(Duration::from_secs(2)).resolve(default),
            Some(Duration::from_secs(2))
        );
        assert_eq!(Deadline::Never.resolve(default), None);
    }

    #[test]
    fn test_status_result() {
        assert_eq!(
            status_result(OperationKind::CharacteristicRead, GattStatus::SUCCESS, 1),
            Progress::Complete(1)
        );
        assert_eq!(
            status_result(OperationKind::CharacteristicRead, GattStatus(5), 1),
            Progress::Failed(RadioError::OperationFailed(
                "characteristic read failed with GATT status 5".to_string()
            ))
        );
    }

    #[test]
    fn test_submission_completes_once() {
        let (mut job, sink) = Submission::new(CharacteristicRead::new(characteristic()));
        assert_eq!(
            job.on_match(read_event(GattStatus::SUCCESS)),
            Step::Terminal(OperationState::Completed)
        );
        // A racing timeout after completion changes nothing.
        assert_eq!(
            job.on_timeout(Duration::from_secs(30)),
            Step::Terminal(OperationState::Completed)
        );
        assert_eq!(sink.wait(), Ok(vec![0x64]));
        assert_eq!(sink.try_next(), None);
    }

    #[test]
    fn test_deferred_cancel_discards_late_success() {
        let mut transport = MockTransport::new();
        let (mut job, sink) = Submission::new(CharacteristicRead::new(characteristic()));
        job.start(&mut transport).unwrap();

        assert_eq!(job.on_cancel(&mut transport), Step::Running);
        assert_eq!(
            job.on_match(read_event(GattStatus::SUCCESS)),
            Step::Terminal(OperationState::Cancelled)
        );
        assert_eq!(sink.wait(), Err(RadioError::Cancelled));
    }

    #[test]
    fn test_timeout_maps_to_timed_out() {
        let (mut job, sink) = Submission::new(CharacteristicRead::new(characteristic()));
        assert_eq!(
            job.on_timeout(Duration::from_secs(30)),
            Step::Terminal(OperationState::TimedOut)
        );
        assert_eq!(
            sink.wait(),
            Err(RadioError::Timeout {
                kind: OperationKind::CharacteristicRead,
                after: Duration::from_secs(30),
            })
        );
    }
}
