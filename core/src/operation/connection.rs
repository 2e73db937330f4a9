//! Link-level commands: connection setup and teardown, MTU negotiation and
//! RSSI reads.

use std::time::Duration;

use crate::error::{RadioError, Result};
use crate::models::{
    ConnectionState, DeviceAddress, OperationId, OperationKind, Priority, ResourceId,
};
use crate::operation::{status_result, Deadline, Operation, Progress};
use crate::transport::{TransportAdapter, TransportEvent};

#[derive(Clone, Debug)]
pub struct Connect {
    id: OperationId,
    device: DeviceAddress,
    auto_connect: bool,
    deadline: Deadline,
}

impl Connect {
    pub fn new(device: DeviceAddress) -> Self {
        Self {
            id: OperationId::next(),
            device,
            auto_connect: false,
            deadline: Deadline::Default,
        }
    }

    /// Let the platform connect whenever the device becomes available
    /// instead of failing fast.
    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Deadline::After(timeout);
        self
    }
}

impl Operation for Connect {
    type Output = ();

    fn id(&self) -> OperationId {
        self.id
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Connect
    }

    fn target(&self) -> ResourceId {
        ResourceId::Device(self.device.clone())
    }

    fn deadline(&self) -> Deadline {
        self.deadline
    }

    fn start(&mut self, transport: &mut dyn TransportAdapter) -> Result<()> {
        if transport.start_connect(&self.device, self.auto_connect) {
            Ok(())
        } else {
            Err(RadioError::StartRejected(format!(
                "connect to {}",
                self.device
            )))
        }
    }

    fn matches(&self, event: &TransportEvent) -> bool {
        matches!(
            event,
            TransportEvent::ConnectionStateChanged { device, .. } if *device == self.device
        )
    }

    fn on_match(&mut self, event: TransportEvent) -> Progress<()> {
        match event {
            TransportEvent::ConnectionStateChanged {
                state: ConnectionState::Connected,
                status,
                ..
            } => status_result(self.kind(), status, ()),
            TransportEvent::ConnectionStateChanged {
                state: ConnectionState::Disconnected,
                status,
                ..
            } => Progress::Failed(RadioError::OperationFailed(format!(
                "{} disconnected while connecting (GATT status {})",
                self.device, status.0
            ))),
            _ => Progress::Pending,
        }
    }
}

/// Connection teardown. Admitted ahead of every queued normal operation.
#[derive(Clone, Debug)]
pub struct Disconnect {
    id: OperationId,
    device: DeviceAddress,
    deadline: Deadline,
}

impl Disconnect {
    pub fn new(device: DeviceAddress) -> Self {
        Self {
            id: OperationId::next(),
            device,
            deadline: Deadline::Default,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Deadline::After(timeout);
        self
    }
}

impl Operation for Disconnect {
    type Output = ();

    fn id(&self) -> OperationId {
        self.id
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Disconnect
    }

    fn target(&self) -> ResourceId {
        ResourceId::Device(self.device.clone())
    }

    fn deadline(&self) -> Deadline {
        self.deadline
    }

    fn priority(&self) -> Priority {
        Priority::Urgent
    }

    fn start(&mut self, transport: &mut dyn TransportAdapter) -> Result<()> {
        if transport.start_disconnect(&self.device) {
            Ok(())
        } else {
            Err(RadioError::StartRejected(format!(
                "disconnect from {}",
                self.device
            )))
        }
    }

    fn matches(&self, event: &TransportEvent) -> bool {
        matches!(
            event,
            TransportEvent::ConnectionStateChanged {
                device,
                state: ConnectionState::Disconnected,
                ..
            } if *device == self.device
        )
    }

    fn on_match(&mut self, event: TransportEvent) -> Progress<()> {
        match event {
            // Any status is fine once the link is down.
            TransportEvent::ConnectionStateChanged { .. } => Progress::Complete(()),
            _ => Progress::Pending,
        }
    }
}

#[derive(Clone, Debug)]
pub struct MtuRequest {
    id: OperationId,
    mtu: u16,
    deadline: Deadline,
}

impl MtuRequest {
    pub fn new(mtu: u16) -> Self {
        Self {
            id: OperationId::next(),
            mtu,
            deadline: Deadline::Default,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Deadline::After(timeout);
        self
    }
}

impl Operation for MtuRequest {
    /// The MTU the peer agreed to, which may be lower than requested.
    type Output = u16;

    fn id(&self) -> OperationId {
        self.id
    }

    fn kind(&self) -> OperationKind {
        OperationKind::MtuRequest
    }

    fn target(&self) -> ResourceId {
        ResourceId::Link
    }

    fn deadline(&self) -> Deadline {
        self.deadline
    }

    fn start(&mut self, transport: &mut dyn TransportAdapter) -> Result<()> {
        if transport.request_mtu(self.mtu) {
            Ok(())
        } else {
            Err(RadioError::StartRejected(format!("MTU request of {}", self.mtu)))
        }
    }

    fn matches(&self, event: &TransportEvent) -> bool {
        matches!(event, TransportEvent::MtuChanged { .. })
    }

    fn on_match(&mut self, event: TransportEvent) -> Progress<u16> {
        match event {
            TransportEvent::MtuChanged { mtu, status } => status_result(self.kind(), status, mtu),
            _ => Progress::Pending,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RssiRead {
    id: OperationId,
    deadline: Deadline,
}

impl RssiRead {
    pub fn new() -> Self {
        Self {
            id: OperationId::next(),
            deadline: Deadline::Default,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Deadline::After(timeout);
        self
    }
}

impl Default for RssiRead {
    fn default() -> Self {
        Self::new()
    }
}

impl Operation for RssiRead {
    type Output = i16;

    fn id(&self) -> OperationId {
        self.id
    }

    fn kind(&self) -> OperationKind {
        OperationKind::RssiRead
    }

    fn target(&self) -> ResourceId {
        ResourceId::Link
    }

    fn deadline(&self) -> Deadline {
        self.deadline
    }

    fn start(&mut self, transport: &mut dyn TransportAdapter) -> Result<()> {
        if transport.read_remote_rssi() {
            Ok(())
        } else {
            Err(RadioError::StartRejected("remote RSSI read".to_string()))
        }
    }

    fn matches(&self, event: &TransportEvent) -> bool {
        matches!(event, TransportEvent::RssiRead { .. })
    }

    fn on_match(&mut self, event: TransportEvent) -> Progress<i16> {
        match event {
            TransportEvent::RssiRead { rssi, status } => status_result(self.kind(), status, rssi),
            _ => Progress::Pending,
        }
    }
}
