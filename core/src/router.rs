//! Dispatch of transport callbacks to the running operation.
//!
//! The router keeps no state of its own. Each raw event is offered once, in
//! reporting order, to whatever operation currently holds the radio; an event
//! for any other resource belongs to an earlier or foreign command and is
//! dropped.

use log::trace;

use crate::operation::{Job, Step};
use crate::transport::TransportEvent;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Routed {
    Dropped,
    Delivered(Step),
}

pub(crate) fn route(running: Option<&mut Box<dyn Job>>, event: TransportEvent) -> Routed {
    let Some(job) = running else {
        trace!("[ROUTER] no running operation, dropping {}", event.name());
        return Routed::Dropped;
    };

    // Loss of the link concerns whatever is running, regardless of target.
    if let TransportEvent::ConnectionLost { cause } = &event {
        return Routed::Delivered(job.on_disconnect(cause));
    }

    if event.target() != Some(job.target()) || !job.matches(&event) {
        trace!(
            "[ROUTER] {} does not belong to {} ({}), dropping",
            event.name(),
            job.id(),
            job.kind()
        );
        return Routed::Dropped;
    }

    Routed::Delivered(job.on_match(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RadioError;
    use crate::models::{CharacteristicId, GattStatus, OperationState};
    use crate::operation::{CharacteristicRead, Submission};
    use uuid::Uuid;

    fn characteristic(instance_id: u32) -> CharacteristicId {
        CharacteristicId::new(Uuid::from_u128(0x2a6e), instance_id)
    }

    fn read_event(instance_id: u32) -> TransportEvent {
        TransportEvent::CharacteristicRead {
            characteristic: characteristic(instance_id),
            value: vec![0x10],
            status: GattStatus::SUCCESS,
        }
    }

    #[test]
    fn test_no_running_operation() {
        assert_eq!(route(None, read_event(0)), Routed::Dropped);
    }

    #[test]
    fn test_foreign_target_dropped() {
        let (job, sink) = Submission::new(CharacteristicRead::new(characteristic(0)));
        let mut job: Box<dyn Job> = Box::new(job);

        assert_eq!(route(Some(&mut job), read_event(1)), Routed::Dropped);
        assert_eq!(sink.state(), OperationState::Queued);
        assert_eq!(sink.try_next(), None);

        assert_eq!(
            route(Some(&mut job), read_event(0)),
            Routed::Delivered(Step::Terminal(OperationState::Completed))
        );
        assert_eq!(sink.wait(), Ok(vec![0x10]));
    }

    #[test]
    fn test_connection_lost_reaches_any_operation() {
        let (job, sink) = Submission::new(CharacteristicRead::new(characteristic(0)));
        let mut job: Box<dyn Job> = Box::new(job);

        let routed = route(
            Some(&mut job),
            TransportEvent::ConnectionLost {
                cause: "dead object".to_string(),
            },
        );
        assert_eq!(routed, Routed::Delivered(Step::Terminal(OperationState::Failed)));
        assert_eq!(
            sink.wait(),
            Err(RadioError::TransportDisconnected("dead object".to_string()))
        );
    }
}
