use crate::models::{
    CharacteristicId, ConnectionState, DescriptorId, DeviceAddress, GattStatus, RawScanResult,
    ResourceId, ScanFilter, ScanSettings, WriteType,
};

/// Platform error code reported by a scanner that could not be obtained.
pub const SCAN_FAILED_INTERNAL_ERROR: i32 = 3;

/// Imperative side of the hardware transport.
///
/// Every `start_*` call issues one command and returns whether the platform
/// accepted it for asynchronous completion. Completion is reported later as a
/// [`TransportEvent`] pushed through the radio's event sink.
pub trait TransportAdapter: Send {
    fn start_descriptor_write(&mut self, descriptor: &DescriptorId, value: &[u8]) -> bool;
    fn start_descriptor_read(&mut self, descriptor: &DescriptorId) -> bool;
    fn start_characteristic_write(&mut self, characteristic: &CharacteristicId, value: &[u8])
        -> bool;
    fn start_characteristic_read(&mut self, characteristic: &CharacteristicId) -> bool;

    fn write_type(&self, characteristic: &CharacteristicId) -> WriteType;
    fn set_write_type(&mut self, characteristic: &CharacteristicId, write_type: WriteType);

    fn start_connect(&mut self, device: &DeviceAddress, auto_connect: bool) -> bool;
    fn start_disconnect(&mut self, device: &DeviceAddress) -> bool;
    fn request_mtu(&mut self, mtu: u16) -> bool;
    fn read_remote_rssi(&mut self) -> bool;

    /// Whether the adapter can filter scan results by service identity in
    /// hardware.
    fn is_offloaded_filtering_supported(&self) -> bool;
    fn start_scan(&mut self, filters: &[ScanFilter], settings: &ScanSettings) -> bool;
    fn stop_scan(&mut self);
}

/// Asynchronous notification raised by the transport collaborator.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    DescriptorWritten {
        descriptor: DescriptorId,
        value: Vec<u8>,
        status: GattStatus,
    },
    DescriptorRead {
        descriptor: DescriptorId,
        value: Vec<u8>,
        status: GattStatus,
    },
    CharacteristicWritten {
        characteristic: CharacteristicId,
        value: Vec<u8>,
        status: GattStatus,
    },
    CharacteristicRead {
        characteristic: CharacteristicId,
        value: Vec<u8>,
        status: GattStatus,
    },
    ConnectionStateChanged {
        device: DeviceAddress,
        state: ConnectionState,
        status: GattStatus,
    },
    MtuChanged {
        mtu: u16,
        status: GattStatus,
    },
    RssiRead {
        rssi: i16,
        status: GattStatus,
    },
    ScanResult(RawScanResult),
    ScanResultsBatch(Vec<RawScanResult>),
    ScanFailed {
        error_code: i32,
    },
    /// Unsolicited loss of the link or of the platform service behind it.
    ConnectionLost {
        cause: String,
    },
}

impl TransportEvent {
    /// Resource this event refers to. `None` for events that concern the
    /// whole transport rather than one resource.
    pub fn target(&self) -> Option<ResourceId> {
        match self {
            TransportEvent::DescriptorWritten { descriptor, .. }
            | TransportEvent::DescriptorRead { descriptor, .. } => {
                Some(ResourceId::Descriptor(*descriptor))
            }
            TransportEvent::CharacteristicWritten { characteristic, .. }
            | TransportEvent::CharacteristicRead { characteristic, .. } => {
                Some(ResourceId::Characteristic(*characteristic))
            }
            TransportEvent::ConnectionStateChanged { device, .. } => {
                Some(ResourceId::Device(device.clone()))
            }
            TransportEvent::MtuChanged { .. } | TransportEvent::RssiRead { .. } => {
                Some(ResourceId::Link)
            }
            TransportEvent::ScanResult(_)
            | TransportEvent::ScanResultsBatch(_)
            | TransportEvent::ScanFailed { .. } => Some(ResourceId::Scanner),
            TransportEvent::ConnectionLost { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TransportEvent::DescriptorWritten { .. } => "descriptor-written",
            TransportEvent::DescriptorRead { .. } => "descriptor-read",
            TransportEvent::CharacteristicWritten { .. } => "characteristic-written",
            TransportEvent::CharacteristicRead { .. } => "characteristic-read",
            TransportEvent::ConnectionStateChanged { .. } => "connection-state-changed",
            TransportEvent::MtuChanged { .. } => "mtu-changed",
            TransportEvent::RssiRead { .. } => "rssi-read",
            TransportEvent::ScanResult(_) => "scan-result",
            TransportEvent::ScanResultsBatch(_) => "scan-results-batch",
            TransportEvent::ScanFailed { .. } => "scan-failed",
            TransportEvent::ConnectionLost { .. } => "connection-lost",
        }
    }
}
