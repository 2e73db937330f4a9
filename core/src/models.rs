use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use uuid::Uuid;

static NEXT_OPERATION_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one submitted hardware command.
///
/// Identities are allocated from a process-wide counter when an operation is
/// built. Cloning an operation keeps its identity, which is how a duplicate
/// submission is detected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(pub u64);

impl OperationId {
    pub fn next() -> Self {
        OperationId(NEXT_OPERATION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeviceAddress(pub String);

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A characteristic on the remote GATT server.
///
/// Two characteristics may share a UUID, so the platform instance id is part
/// of the identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CharacteristicId {
    pub uuid: Uuid,
    pub instance_id: u32,
}

impl CharacteristicId {
    pub fn new(uuid: Uuid, instance_id: u32) -> Self {
        Self { uuid, instance_id }
    }
}

impl fmt::Display for CharacteristicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.uuid, self.instance_id)
    }
}

/// A descriptor, always owned by exactly one characteristic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorId {
    pub characteristic: CharacteristicId,
    pub uuid: Uuid,
}

impl DescriptorId {
    pub fn new(characteristic: CharacteristicId, uuid: Uuid) -> Self {
        Self {
            characteristic,
            uuid,
        }
    }
}

impl fmt::Display for DescriptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.characteristic, self.uuid)
    }
}

/// The resource a command targets and a callback event refers to.
///
/// Events are matched to the running operation by comparing these keys by
/// value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResourceId {
    Characteristic(CharacteristicId),
    Descriptor(DescriptorId),
    Device(DeviceAddress),
    /// Link-wide requests such as MTU negotiation and RSSI reads.
    Link,
    Scanner,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WriteType {
    Default,
    NoResponse,
    Signed,
}

/// Raw GATT status code reported with a completion callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GattStatus(pub u8);

impl GattStatus {
    pub const SUCCESS: GattStatus = GattStatus(0);

    pub fn is_success(&self) -> bool {
        self.0 == 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    CharacteristicRead,
    CharacteristicWrite,
    DescriptorRead,
    DescriptorWrite,
    Connect,
    Disconnect,
    MtuRequest,
    RssiRead,
    Scan,
}

impl OperationKind {
    pub fn label(&self) -> &'static str {
        match self {
            OperationKind::CharacteristicRead => "characteristic read",
            OperationKind::CharacteristicWrite => "characteristic write",
            OperationKind::DescriptorRead => "descriptor read",
            OperationKind::DescriptorWrite => "descriptor write",
            OperationKind::Connect => "connect",
            OperationKind::Disconnect => "disconnect",
            OperationKind::MtuRequest => "MTU request",
            OperationKind::RssiRead => "RSSI read",
            OperationKind::Scan => "scan",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle of an operation. The last four states are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationState {
    Queued,
    Running,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationState::Queued | OperationState::Running)
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            OperationState::Queued => 0,
            OperationState::Running => 1,
            OperationState::Completed => 2,
            OperationState::Failed => 3,
            OperationState::TimedOut => 4,
            OperationState::Cancelled => 5,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => OperationState::Queued,
            1 => OperationState::Running,
            2 => OperationState::Completed,
            3 => OperationState::Failed,
            4 => OperationState::TimedOut,
            _ => OperationState::Cancelled,
        }
    }
}

/// Admission priority. Urgent operations (teardown) are admitted ahead of
/// every normal one but never preempt the running operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    #[default]
    Normal,
    Urgent,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Decoded advertisement payload, produced by the transport collaborator.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScanRecord {
    pub service_uuids: Vec<Uuid>,
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    pub service_data: HashMap<Uuid, Vec<u8>>,
    pub advertise_flags: Option<u8>,
    pub tx_power_level: Option<i8>,
    pub device_name: Option<String>,
    pub bytes: Vec<u8>,
}

impl ScanRecord {
    pub fn advertises(&self, uuid: &Uuid) -> bool {
        self.service_uuids.contains(uuid)
    }
}

/// A discovery as reported by the adapter. Some stacks report results with no
/// scan record at all.
#[derive(Clone, Debug, PartialEq)]
pub struct RawScanResult {
    pub device: DeviceAddress,
    pub rssi: i16,
    pub record: Option<ScanRecord>,
}

/// A discovery forwarded to the caller of a scan.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanResult {
    pub device: DeviceAddress,
    pub rssi: i16,
    pub record: ScanRecord,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScanMode {
    Opportunistic,
    #[default]
    LowPower,
    Balanced,
    LowLatency,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanSettings {
    pub mode: ScanMode,
    /// Zero reports every result immediately; anything else lets the
    /// hardware batch results.
    pub report_delay: Duration,
}

/// Hardware-side scan filter. The hardware can only match one service
/// identity per filter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanFilter {
    pub service_uuid: Option<Uuid>,
}
