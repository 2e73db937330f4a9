use std::time::Duration;

use crate::error::{RadioError, Result};
use crate::models::{CharacteristicId, OperationId, OperationKind, ResourceId};
use crate::operation::{status_result, Deadline, Operation, Progress};
use crate::transport::{TransportAdapter, TransportEvent};

#[derive(Clone, Debug)]
pub struct CharacteristicWrite {
    id: OperationId,
    characteristic: CharacteristicId,
    value: Vec<u8>,
    deadline: Deadline,
}

impl CharacteristicWrite {
    pub fn new(characteristic: CharacteristicId, value: impl Into<Vec<u8>>) -> Self {
        Self {
            id: OperationId::next(),
            characteristic,
            value: value.into(),
            deadline: Deadline::Default,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Deadline::After(timeout);
        self
    }
}

impl Operation for CharacteristicWrite {
    /// The bytes the peer acknowledged.
    type Output = Vec<u8>;

    fn id(&self) -> OperationId {
        self.id
    }

    fn kind(&self) -> OperationKind {
        OperationKind::CharacteristicWrite
    }

    fn target(&self) -> ResourceId {
        ResourceId::Characteristic(self.characteristic)
    }

    fn deadline(&self) -> Deadline {
        self.deadline
    }

    fn start(&mut self, transport: &mut dyn TransportAdapter) -> Result<()> {
        if transport.start_characteristic_write(&self.characteristic, &self.value) {
            Ok(())
        } else {
            Err(RadioError::StartRejected(format!(
                "characteristic write to {}",
                self.characteristic
            )))
        }
    }

    fn matches(&self, event: &TransportEvent) -> bool {
        matches!(
            event,
            TransportEvent::CharacteristicWritten { characteristic, .. }
                if *characteristic == self.characteristic
        )
    }

    fn on_match(&mut self, event: TransportEvent) -> Progress<Vec<u8>> {
        match event {
            TransportEvent::CharacteristicWritten { value, status, .. } => {
                status_result(self.kind(), status, value)
            }
            _ => Progress::Pending,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CharacteristicRead {
    id: OperationId,
    characteristic: CharacteristicId,
    deadline: Deadline,
}

impl CharacteristicRead {
    pub fn new(characteristic: CharacteristicId) -> Self {
        Self {
            id: OperationId::next(),
            characteristic,
            deadline: Deadline::Default,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Deadline::After(timeout);
        self
    }
}

impl Operation for CharacteristicRead {
    type Output = Vec<u8>;

    fn id(&self) -> OperationId {
        self.id
    }

    fn kind(&self) -> OperationKind {
        OperationKind::CharacteristicRead
    }

    fn target(&self) -> ResourceId {
        ResourceId::Characteristic(self.characteristic)
    }

    fn deadline(&self) -> Deadline {
        self.deadline
    }

    fn start(&mut self, transport: &mut dyn TransportAdapter) -> Result<()> {
        if transport.start_characteristic_read(&self.characteristic) {
            Ok(())
        } else {
            Err(RadioError::StartRejected(format!(
                "characteristic read of {}",
                self.characteristic
            )))
        }
    }

    fn matches(&self, event: &TransportEvent) -> bool {
        matches!(
            event,
            TransportEvent::CharacteristicRead { characteristic, .. }
                if *characteristic == self.characteristic
        )
    }

    fn on_match(&mut self, event: TransportEvent) -> Progress<Vec<u8>> {
        match event {
            TransportEvent::CharacteristicRead { value, status, .. } => {
                status_result(self.kind(), status, value)
            }
            _ => Progress::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GattStatus;
    use crate::transport_mock::{MockTransport, TransportCall};
    use uuid::Uuid;

    fn characteristic(instance_id: u32) -> CharacteristicId {
        CharacteristicId::new(Uuid::from_u128(0x2a39), instance_id)
    }

    #[test]
    fn test_write_start_and_complete() {
        let mut transport = MockTransport::new();
        let mut op = CharacteristicWrite::new(characteristic(0), [0xAA]);
        op.start(&mut transport).unwrap();
        assert_eq!(
            transport.calls,
            vec![TransportCall::CharacteristicWrite {
                characteristic: characteristic(0),
                value: vec![0xAA],
            }]
        );

        let event = TransportEvent::CharacteristicWritten {
            characteristic: characteristic(0),
            value: vec![0xAA],
            status: GattStatus::SUCCESS,
        };
        assert!(op.matches(&event));
        assert_eq!(op.on_match(event), Progress::Complete(vec![0xAA]));
    }

    #[test]
    fn test_read_ignores_other_instance() {
        let op = CharacteristicRead::new(characteristic(0));
        assert!(!op.matches(&TransportEvent::CharacteristicRead {
            characteristic: characteristic(1),
            value: vec![1],
            status: GattStatus::SUCCESS,
        }));
        assert!(!op.matches(&TransportEvent::CharacteristicWritten {
            characteristic: characteristic(0),
            value: vec![1],
            status: GattStatus::SUCCESS,
        }));
    }

    #[test]
    fn test_read_rejected() {
        let mut transport = MockTransport::rejecting();
        let mut op = CharacteristicRead::new(characteristic(0));
        assert!(matches!(
            op.start(&mut transport),
            Err(RadioError::StartRejected(_))
        ));
    }

    #[test]
    fn test_custom_timeout() {
        let op = CharacteristicRead::new(characteristic(0)).with_timeout(Duration::from_secs(5));
        assert_eq!(op.deadline(), Deadline::After(Duration::from_secs(5)));
        let op = CharacteristicRead::new(characteristic(0));
        assert_eq!(op.deadline(), Deadline::Default);
    }
}
