use std::ops::{Deref, DerefMut};

use crate::config::RadioConfig;
use crate::error::{RadioError, Result};
use crate::models::{
    CharacteristicId, DescriptorId, OperationId, OperationKind, ResourceId, WriteType,
};
use crate::operation::{status_result, Deadline, Operation, Progress};
use crate::transport::{TransportAdapter, TransportEvent};

/// Temporarily forces a characteristic's write type, restoring the previous
/// value when dropped.
///
/// Some GATT stacks issue a descriptor write with the parent
/// characteristic's write type, which fails for e.g. the client
/// characteristic configuration descriptor unless the type is `Default`.
/// The guard derefs to the transport so the write is issued through it.
pub struct WriteTypeOverride<'a> {
    transport: &'a mut dyn TransportAdapter,
    characteristic: CharacteristicId,
    original: WriteType,
}

impl<'a> WriteTypeOverride<'a> {
    pub fn apply(
        transport: &'a mut dyn TransportAdapter,
        characteristic: CharacteristicId,
        write_type: WriteType,
    ) -> Self {
        let original = transport.write_type(&characteristic);
        transport.set_write_type(&characteristic, write_type);
        Self {
            transport,
            characteristic,
            original,
        }
    }

    pub fn original(&self) -> WriteType {
        self.original
    }
}

impl<'a> Deref for WriteTypeOverride<'a> {
    type Target = dyn TransportAdapter + 'a;

    fn deref(&self) -> &Self::Target {
        &*self.transport
    }
}

impl<'a> DerefMut for WriteTypeOverride<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.transport
    }
}

impl Drop for WriteTypeOverride<'_> {
    fn drop(&mut self) {
        self.transport
            .set_write_type(&self.characteristic, self.original);
    }
}

#[derive(Clone, Debug)]
pub struct DescriptorWrite {
    id: OperationId,
    descriptor: DescriptorId,
    value: Vec<u8>,
    /// `None` until set explicitly or resolved from the radio's config.
    write_type: Option<WriteType>,
    deadline: Deadline,
}

impl DescriptorWrite {
    pub fn new(descriptor: DescriptorId, value: impl Into<Vec<u8>>) -> Self {
        Self {
            id: OperationId::next(),
            descriptor,
            value: value.into(),
            write_type: None,
            deadline: Deadline::Default,
        }
    }

    /// Write type forced on the parent characteristic during the call.
    /// Without one, [`RadioConfig::descriptor_write_type`] applies.
    pub fn with_write_type_override(mut self, write_type: WriteType) -> Self {
        self.write_type = Some(write_type);
        self
    }

    pub fn write_type(&self) -> Option<WriteType> {
        self.write_type
    }

    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.deadline = Deadline::After(timeout);
        self
    }

    pub fn descriptor(&self) -> &DescriptorId {
        &self.descriptor
    }
}

impl Operation for DescriptorWrite {
    type Output = Vec<u8>;

    fn id(&self) -> OperationId {
        self.id
    }

    fn kind(&self) -> OperationKind {
        OperationKind::DescriptorWrite
    }

    fn target(&self) -> ResourceId {
        ResourceId::Descriptor(self.descriptor)
    }

    fn deadline(&self) -> Deadline {
        self.deadline
    }

    fn configure(&mut self, config: &RadioConfig) {
        self.write_type.get_or_insert(config.descriptor_write_type);
    }

    fn start(&mut self, transport: &mut dyn TransportAdapter) -> Result<()> {
        let write_type = self.write_type.unwrap_or(WriteType::Default);
        let mut transport =
            WriteTypeOverride::apply(transport, self.descriptor.characteristic, write_type);
        if transport.start_descriptor_write(&self.descriptor, &self.value) {
            Ok(())
        } else {
            Err(RadioError::StartRejected(format!(
                "descriptor write to {}",
                self.descriptor
            )))
        }
    }

    fn matches(&self, event: &TransportEvent) -> bool {
        matches!(
            event,
            TransportEvent::DescriptorWritten { descriptor, .. } if *descriptor == self.descriptor
        )
    }

    fn on_match(&mut self, event: TransportEvent) -> Progress<Vec<u8>> {
        match event {
            TransportEvent::DescriptorWritten { value, status, .. } => {
                status_result(self.kind(), status, value)
            }
            _ => Progress::Pending,
        }
    }
}

#[derive(Clone, Debug)]
pub struct DescriptorRead {
    id: OperationId,
    descriptor: DescriptorId,
    deadline: Deadline,
}

impl DescriptorRead {
    pub fn new(descriptor: DescriptorId) -> Self {
        Self {
            id: OperationId::next(),
            descriptor,
            deadline: Deadline::Default,
        }
    }

    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.deadline = Deadline::After(timeout);
        self
    }
}

impl Operation for DescriptorRead {
    type Output = Vec<u8>;

    fn id(&self) -> OperationId {
        self.id
    }

    fn kind(&self) -> OperationKind {
        OperationKind::DescriptorRead
    }

    fn target(&self) -> ResourceId {
        ResourceId::Descriptor(self.descriptor)
    }

    fn deadline(&self) -> Deadline {
        self.deadline
    }

    fn start(&mut self, transport: &mut dyn TransportAdapter) -> Result<()> {
        if transport.start_descriptor_read(&self.descriptor) {
            Ok(())
        } else {
            Err(RadioError::StartRejected(format!(
                "descriptor read of {}",
                self.descriptor
            )))
        }
    }

    fn matches(&self, event: &TransportEvent) -> bool {
        matches!(
            event,
            TransportEvent::DescriptorRead { descriptor, .. } if *descriptor == self.descriptor
        )
    }

    fn on_match(&mut self, event: TransportEvent) -> Progress<Vec<u8>> {
        match event {
            TransportEvent::DescriptorRead { value, status, .. } => {
                status_result(self.kind(), status, value)
            }
            _ => Progress::Pending,
        }
    }
}
