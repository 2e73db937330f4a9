//! Foreign-language bindings.
//!
//! The host app implements [`HostTransport`] on top of its platform GATT
//! stack, builds a [`RadioHandle`] around it and forwards every platform
//! callback through [`RadioHandle::deliver`]. Identities cross the boundary
//! as strings and are parsed on the way in.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::config::RadioConfig;
use crate::error::RadioError;
use crate::metrics::MetricsSnapshot;
use crate::models::{
    CharacteristicId, ConnectionState, DescriptorId, DeviceAddress, GattStatus, OperationId,
    OperationState, RawScanResult, ScanFilter, ScanMode, ScanRecord, ScanResult, ScanSettings,
    WriteType,
};
use crate::radio::{EventSink, Radio};
use crate::sink::ResultSink;
use crate::transport::{TransportAdapter, TransportEvent, SCAN_FAILED_INTERNAL_ERROR};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum FfiRadioError {
    #[error("transport rejected {reason}")]
    StartRejected { reason: String },
    #[error("{message}")]
    Timeout { message: String },
    #[error("transport disconnected: {cause}")]
    TransportDisconnected { cause: String },
    #[error("scan failed with error code {code}")]
    ScanFailed { code: i32 },
    #[error("operation cancelled")]
    Cancelled,
    #[error("operation failed: {message}")]
    OperationFailed { message: String },
    #[error("operation {id} already submitted")]
    AlreadySubmitted { id: u64 },
    #[error("radio scheduler closed")]
    SchedulerClosed,
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },
}

impl From<RadioError> for FfiRadioError {
    fn from(error: RadioError) -> Self {
        match error {
            RadioError::StartRejected(reason) => FfiRadioError::StartRejected { reason },
            err @ RadioError::Timeout { .. } => FfiRadioError::Timeout {
                message: err.to_string(),
            },
            RadioError::TransportDisconnected(cause) => {
                FfiRadioError::TransportDisconnected { cause }
            }
            RadioError::ScanFailed(code) => FfiRadioError::ScanFailed { code },
            RadioError::Cancelled => FfiRadioError::Cancelled,
            RadioError::OperationFailed(message) => FfiRadioError::OperationFailed { message },
            RadioError::AlreadySubmitted(id) => FfiRadioError::AlreadySubmitted { id: id.0 },
            RadioError::SchedulerClosed => FfiRadioError::SchedulerClosed,
            RadioError::InvalidArgument(message) => FfiRadioError::InvalidArgument { message },
            RadioError::WorkerSpawn(message) => FfiRadioError::OperationFailed { message },
        }
    }
}

type FfiResult<T> = std::result::Result<T, FfiRadioError>;

fn parse_uuid(value: &str) -> FfiResult<Uuid> {
    Uuid::parse_str(value).map_err(|e| FfiRadioError::InvalidArgument {
        message: format!("'{value}' is not a UUID: {e}"),
    })
}

// ============================================================================
// Records
// ============================================================================

#[derive(Clone, Debug, PartialEq, uniffi::Record)]
pub struct FfiCharacteristic {
    pub uuid: String,
    pub instance_id: u32,
}

#[derive(Clone, Debug, PartialEq, uniffi::Record)]
pub struct FfiDescriptor {
    pub characteristic: FfiCharacteristic,
    pub uuid: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, uniffi::Enum)]
pub enum FfiWriteType {
    Default,
    NoResponse,
    Signed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, uniffi::Enum)]
pub enum FfiConnectionState {
    Connected,
    Disconnected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, uniffi::Enum)]
pub enum FfiOperationState {
    Queued,
    Running,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, uniffi::Enum)]
pub enum FfiScanMode {
    Opportunistic,
    LowPower,
    Balanced,
    LowLatency,
}

#[derive(Clone, Debug, PartialEq, uniffi::Record)]
pub struct FfiScanSettings {
    pub mode: FfiScanMode,
    pub report_delay_ms: u64,
}

#[derive(Clone, Debug, Default, PartialEq, uniffi::Record)]
pub struct FfiScanRecord {
    pub service_uuids: Vec<String>,
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    pub service_data: HashMap<String, Vec<u8>>,
    pub advertise_flags: Option<u8>,
    pub tx_power_level: Option<i8>,
    pub device_name: Option<String>,
    pub bytes: Vec<u8>,
}

/// A discovery as reported by the host. `record` is absent on stacks that
/// report results without a payload.
#[derive(Clone, Debug, PartialEq, uniffi::Record)]
pub struct FfiRawScanResult {
    pub device: String,
    pub rssi: i16,
    pub record: Option<FfiScanRecord>,
}

#[derive(Clone, Debug, PartialEq, uniffi::Record)]
pub struct FfiScanResult {
    pub device: String,
    pub rssi: i16,
    pub record: FfiScanRecord,
}

#[derive(Clone, Debug, PartialEq, uniffi::Record)]
pub struct FfiRadioConfig {
    pub gatt_timeout_ms: u64,
    pub descriptor_write_type: FfiWriteType,
    pub worker_name: String,
}

#[derive(Clone, Debug, PartialEq, uniffi::Record)]
pub struct FfiMetrics {
    pub submitted: u64,
    pub admitted: u64,
    pub released: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub events_routed: u64,
    pub events_dropped: u64,
}

/// Platform callback, forwarded as-is.
#[derive(Clone, Debug, PartialEq, uniffi::Enum)]
pub enum FfiTransportEvent {
    DescriptorWritten {
        descriptor: FfiDescriptor,
        value: Vec<u8>,
        status: u8,
    },
    DescriptorRead {
        descriptor: FfiDescriptor,
        value: Vec<u8>,
        status: u8,
    },
    CharacteristicWritten {
        characteristic: FfiCharacteristic,
        value: Vec<u8>,
        status: u8,
    },
    CharacteristicRead {
        characteristic: FfiCharacteristic,
        value: Vec<u8>,
        status: u8,
    },
    ConnectionStateChanged {
        device: String,
        state: FfiConnectionState,
        status: u8,
    },
    MtuChanged {
        mtu: u16,
        status: u8,
    },
    RssiRead {
        rssi: i16,
        status: u8,
    },
    ScanResult {
        result: FfiRawScanResult,
    },
    ScanResultsBatch {
        results: Vec<FfiRawScanResult>,
    },
    ScanFailed {
        error_code: i32,
    },
    ConnectionLost {
        cause: String,
    },
}

/// Final value of a single-shot operation.
#[derive(Clone, Debug, PartialEq, uniffi::Enum)]
pub enum FfiOutcome {
    Bytes { value: Vec<u8> },
    Done,
    Mtu { mtu: u16 },
    Rssi { rssi: i16 },
}

// ============================================================================
// Conversions
// ============================================================================

impl From<CharacteristicId> for FfiCharacteristic {
    fn from(id: CharacteristicId) -> Self {
        Self {
            uuid: id.uuid.to_string(),
            instance_id: id.instance_id,
        }
    }
}

impl TryFrom<FfiCharacteristic> for CharacteristicId {
    type Error = FfiRadioError;

    fn try_from(value: FfiCharacteristic) -> FfiResult<Self> {
        Ok(CharacteristicId::new(parse_uuid(&value.uuid)?, value.instance_id))
    }
}

impl From<DescriptorId> for FfiDescriptor {
    fn from(id: DescriptorId) -> Self {
        Self {
            characteristic: id.characteristic.into(),
            uuid: id.uuid.to_string(),
        }
    }
}

impl TryFrom<FfiDescriptor> for DescriptorId {
    type Error = FfiRadioError;

    fn try_from(value: FfiDescriptor) -> FfiResult<Self> {
        Ok(DescriptorId::new(
            value.characteristic.try_into()?,
            parse_uuid(&value.uuid)?,
        ))
    }
}

impl From<WriteType> for FfiWriteType {
    fn from(value: WriteType) -> Self {
        match value {
            WriteType::Default => FfiWriteType::Default,
            WriteType::NoResponse => FfiWriteType::NoResponse,
            WriteType::Signed => FfiWriteType::Signed,
        }
    }
}

impl From<FfiWriteType> for WriteType {
    fn from(value: FfiWriteType) -> Self {
        match value {
            FfiWriteType::Default => WriteType::Default,
            FfiWriteType::NoResponse => WriteType::NoResponse,
            FfiWriteType::Signed => WriteType::Signed,
        }
    }
}

impl From<OperationState> for FfiOperationState {
    fn from(value: OperationState) -> Self {
        match value {
            OperationState::Queued => FfiOperationState::Queued,
            OperationState::Running => FfiOperationState::Running,
            OperationState::Completed => FfiOperationState::Completed,
            OperationState::Failed => FfiOperationState::Failed,
            OperationState::TimedOut => FfiOperationState::TimedOut,
            OperationState::Cancelled => FfiOperationState::Cancelled,
        }
    }
}

impl From<FfiScanMode> for ScanMode {
    fn from(value: FfiScanMode) -> Self {
        match value {
            FfiScanMode::Opportunistic => ScanMode::Opportunistic,
            FfiScanMode::LowPower => ScanMode::LowPower,
            FfiScanMode::Balanced => ScanMode::Balanced,
            FfiScanMode::LowLatency => ScanMode::LowLatency,
        }
    }
}

impl From<ScanMode> for FfiScanMode {
    fn from(value: ScanMode) -> Self {
        match value {
            ScanMode::Opportunistic => FfiScanMode::Opportunistic,
            ScanMode::LowPower => FfiScanMode::LowPower,
            ScanMode::Balanced => FfiScanMode::Balanced,
            ScanMode::LowLatency => FfiScanMode::LowLatency,
        }
    }
}

impl From<FfiScanSettings> for ScanSettings {
    fn from(value: FfiScanSettings) -> Self {
        Self {
            mode: value.mode.into(),
            report_delay: Duration::from_millis(value.report_delay_ms),
        }
    }
}

impl From<&ScanSettings> for FfiScanSettings {
    fn from(value: &ScanSettings) -> Self {
        Self {
            mode: value.mode.into(),
            report_delay_ms: u64::try_from(value.report_delay.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl From<ScanRecord> for FfiScanRecord {
    fn from(record: ScanRecord) -> Self {
        Self {
            service_uuids: record.service_uuids.iter().map(Uuid::to_string).collect(),
            manufacturer_data: record.manufacturer_data,
            service_data: record
                .service_data
                .into_iter()
                .map(|(uuid, data)| (uuid.to_string(), data))
                .collect(),
            advertise_flags: record.advertise_flags,
            tx_power_level: record.tx_power_level,
            device_name: record.device_name,
            bytes: record.bytes,
        }
    }
}

impl TryFrom<FfiScanRecord> for ScanRecord {
    type Error = FfiRadioError;

    fn try_from(record: FfiScanRecord) -> FfiResult<Self> {
        let service_uuids = record
            .service_uuids
            .iter()
            .map(|uuid| parse_uuid(uuid))
            .collect::<FfiResult<Vec<_>>>()?;
        let service_data = record
            .service_data
            .into_iter()
            .map(|(uuid, data)| Ok((parse_uuid(&uuid)?, data)))
            .collect::<FfiResult<HashMap<_, _>>>()?;
        Ok(Self {
            service_uuids,
            manufacturer_data: record.manufacturer_data,
            service_data,
            advertise_flags: record.advertise_flags,
            tx_power_level: record.tx_power_level,
            device_name: record.device_name,
            bytes: record.bytes,
        })
    }
}

impl TryFrom<FfiRawScanResult> for RawScanResult {
    type Error = FfiRadioError;

    fn try_from(result: FfiRawScanResult) -> FfiResult<Self> {
        Ok(Self {
            device: DeviceAddress(result.device),
            rssi: result.rssi,
            record: result.record.map(ScanRecord::try_from).transpose()?,
        })
    }
}

impl From<ScanResult> for FfiScanResult {
    fn from(result: ScanResult) -> Self {
        Self {
            device: result.device.0,
            rssi: result.rssi,
            record: result.record.into(),
        }
    }
}

impl From<FfiConnectionState> for ConnectionState {
    fn from(value: FfiConnectionState) -> Self {
        match value {
            FfiConnectionState::Connected => ConnectionState::Connected,
            FfiConnectionState::Disconnected => ConnectionState::Disconnected,
        }
    }
}

impl TryFrom<FfiTransportEvent> for TransportEvent {
    type Error = FfiRadioError;

    fn try_from(event: FfiTransportEvent) -> FfiResult<Self> {
        Ok(match event {
            FfiTransportEvent::DescriptorWritten {
                descriptor,
                value,
                status,
            } => TransportEvent::DescriptorWritten {
                descriptor: descriptor.try_into()?,
                value,
                status: GattStatus(status),
            },
            FfiTransportEvent::DescriptorRead {
                descriptor,
                value,
                status,
            } => TransportEvent::DescriptorRead {
                descriptor: descriptor.try_into()?,
                value,
                status: GattStatus(status),
            },
            FfiTransportEvent::CharacteristicWritten {
                characteristic,
                value,
                status,
            } => TransportEvent::CharacteristicWritten {
                characteristic: characteristic.try_into()?,
                value,
                status: GattStatus(status),
            },
            FfiTransportEvent::CharacteristicRead {
                characteristic,
                value,
                status,
            } => TransportEvent::CharacteristicRead {
                characteristic: characteristic.try_into()?,
                value,
                status: GattStatus(status),
            },
            FfiTransportEvent::ConnectionStateChanged {
                device,
                state,
                status,
            } => TransportEvent::ConnectionStateChanged {
                device: DeviceAddress(device),
                state: state.into(),
                status: GattStatus(status),
            },
            FfiTransportEvent::MtuChanged { mtu, status } => TransportEvent::MtuChanged {
                mtu,
                status: GattStatus(status),
            },
            FfiTransportEvent::RssiRead { rssi, status } => TransportEvent::RssiRead {
                rssi,
                status: GattStatus(status),
            },
            FfiTransportEvent::ScanResult { result } => {
                TransportEvent::ScanResult(result.try_into()?)
            }
            FfiTransportEvent::ScanResultsBatch { results } => TransportEvent::ScanResultsBatch(
                results
                    .into_iter()
                    .map(RawScanResult::try_from)
                    .collect::<FfiResult<Vec<_>>>()?,
            ),
            FfiTransportEvent::ScanFailed { error_code } => {
                TransportEvent::ScanFailed { error_code }
            }
            FfiTransportEvent::ConnectionLost { cause } => TransportEvent::ConnectionLost { cause },
        })
    }
}

impl From<MetricsSnapshot> for FfiMetrics {
    fn from(m: MetricsSnapshot) -> Self {
        Self {
            submitted: m.submitted,
            admitted: m.admitted,
            released: m.released,
            completed: m.completed,
            failed: m.failed,
            timed_out: m.timed_out,
            cancelled: m.cancelled,
            events_routed: m.events_routed,
            events_dropped: m.events_dropped,
        }
    }
}

impl From<Vec<u8>> for FfiOutcome {
    fn from(value: Vec<u8>) -> Self {
        FfiOutcome::Bytes { value }
    }
}

impl From<()> for FfiOutcome {
    fn from(_: ()) -> Self {
        FfiOutcome::Done
    }
}

impl From<u16> for FfiOutcome {
    fn from(mtu: u16) -> Self {
        FfiOutcome::Mtu { mtu }
    }
}

impl From<i16> for FfiOutcome {
    fn from(rssi: i16) -> Self {
        FfiOutcome::Rssi { rssi }
    }
}

// ============================================================================
// Host transport
// ============================================================================

/// Platform GATT stack, implemented by the host app.
///
/// `start_*` methods issue the command and return whether the platform
/// accepted it. Completions come back through [`RadioHandle::deliver`]. A
/// host without a scanner should report
/// [`scan_failed_internal_error`] through a `ScanFailed` event.
#[uniffi::export(with_foreign)]
pub trait HostTransport: Send + Sync {
    fn start_descriptor_write(&self, descriptor: FfiDescriptor, value: Vec<u8>) -> bool;
    fn start_descriptor_read(&self, descriptor: FfiDescriptor) -> bool;
    fn start_characteristic_write(&self, characteristic: FfiCharacteristic, value: Vec<u8>)
        -> bool;
    fn start_characteristic_read(&self, characteristic: FfiCharacteristic) -> bool;
    fn write_type(&self, characteristic: FfiCharacteristic) -> FfiWriteType;
    fn set_write_type(&self, characteristic: FfiCharacteristic, write_type: FfiWriteType);
    fn start_connect(&self, device: String, auto_connect: bool) -> bool;
    fn start_disconnect(&self, device: String) -> bool;
    fn request_mtu(&self, mtu: u16) -> bool;
    fn read_remote_rssi(&self) -> bool;
    fn is_offloaded_filtering_supported(&self) -> bool;
    /// `service_uuids` holds at most one entry per hardware filter.
    fn start_scan(&self, service_uuids: Vec<String>, settings: FfiScanSettings) -> bool;
    fn stop_scan(&self);
}

/// Error code a host reports when it has no scanner to start.
#[uniffi::export]
pub fn scan_failed_internal_error() -> i32 {
    SCAN_FAILED_INTERNAL_ERROR
}

#[uniffi::export]
pub fn default_radio_config() -> FfiRadioConfig {
    let config = RadioConfig::default();
    FfiRadioConfig {
        gatt_timeout_ms: u64::try_from(config.gatt_timeout.as_millis()).unwrap_or(u64::MAX),
        descriptor_write_type: config.descriptor_write_type.into(),
        worker_name: config.worker_name,
    }
}

struct HostAdapter {
    host: Arc<dyn HostTransport>,
}

impl TransportAdapter for HostAdapter {
    fn start_descriptor_write(&mut self, descriptor: &DescriptorId, value: &[u8]) -> bool {
        self.host
            .start_descriptor_write((*descriptor).into(), value.to_vec())
    }

    fn start_descriptor_read(&mut self, descriptor: &DescriptorId) -> bool {
        self.host.start_descriptor_read((*descriptor).into())
    }

    fn start_characteristic_write(
        &mut self,
        characteristic: &CharacteristicId,
        value: &[u8],
    ) -> bool {
        self.host
            .start_characteristic_write((*characteristic).into(), value.to_vec())
    }

    fn start_characteristic_read(&mut self, characteristic: &CharacteristicId) -> bool {
        self.host.start_characteristic_read((*characteristic).into())
    }

    fn write_type(&self, characteristic: &CharacteristicId) -> WriteType {
        self.host.write_type((*characteristic).into()).into()
    }

    fn set_write_type(&mut self, characteristic: &CharacteristicId, write_type: WriteType) {
        self.host
            .set_write_type((*characteristic).into(), write_type.into());
    }

    fn start_connect(&mut self, device: &DeviceAddress, auto_connect: bool) -> bool {
        self.host.start_connect(device.0.clone(), auto_connect)
    }

    fn start_disconnect(&mut self, device: &DeviceAddress) -> bool {
        self.host.start_disconnect(device.0.clone())
    }

    fn request_mtu(&mut self, mtu: u16) -> bool {
        self.host.request_mtu(mtu)
    }

    fn read_remote_rssi(&mut self) -> bool {
        self.host.read_remote_rssi()
    }

    fn is_offloaded_filtering_supported(&self) -> bool {
        self.host.is_offloaded_filtering_supported()
    }

    fn start_scan(&mut self, filters: &[ScanFilter], settings: &ScanSettings) -> bool {
        let service_uuids = filters
            .iter()
            .filter_map(|filter| filter.service_uuid)
            .map(|uuid| uuid.to_string())
            .collect();
        self.host.start_scan(service_uuids, settings.into())
    }

    fn stop_scan(&mut self) {
        self.host.stop_scan();
    }
}

// ============================================================================
// Handles
// ============================================================================

trait OutcomeSource: Send + Sync {
    fn id(&self) -> OperationId;
    fn state(&self) -> OperationState;
    fn next(&self, timeout: Option<Duration>) -> Option<crate::error::Result<FfiOutcome>>;
}

impl<T> OutcomeSource for ResultSink<T>
where
    T: Into<FfiOutcome> + Send,
{
    fn id(&self) -> OperationId {
        ResultSink::id(self)
    }

    fn state(&self) -> OperationState {
        ResultSink::state(self)
    }

    fn next(&self, timeout: Option<Duration>) -> Option<crate::error::Result<FfiOutcome>> {
        let item = match timeout {
            Some(timeout) => self.wait_timeout(timeout)?,
            None => self.wait(),
        };
        Some(item.map(Into::into))
    }
}

/// Outcome of a submitted single-shot operation.
#[derive(uniffi::Object)]
pub struct PendingOperation {
    source: Box<dyn OutcomeSource>,
}

impl PendingOperation {
    fn new<T>(sink: ResultSink<T>) -> Arc<Self>
    where
        T: Into<FfiOutcome> + Send + 'static,
    {
        Arc::new(Self {
            source: Box::new(sink),
        })
    }
}

#[uniffi::export]
impl PendingOperation {
    pub fn id(&self) -> u64 {
        self.source.id().0
    }

    pub fn state(&self) -> FfiOperationState {
        self.source.state().into()
    }

    /// Block until the operation reaches a terminal state.
    pub fn wait(&self) -> FfiResult<FfiOutcome> {
        match self.source.next(None) {
            Some(result) => result.map_err(Into::into),
            None => Err(FfiRadioError::SchedulerClosed),
        }
    }

    /// Like `wait`, but returns `None` if nothing arrived within the timeout.
    pub fn wait_timeout(&self, timeout_ms: u64) -> FfiResult<Option<FfiOutcome>> {
        self.source
            .next(Some(Duration::from_millis(timeout_ms)))
            .transpose()
            .map_err(Into::into)
    }
}

/// Stream of results from a running scan.
#[derive(uniffi::Object)]
pub struct ScanSubscription {
    sink: ResultSink<ScanResult>,
}

#[uniffi::export]
impl ScanSubscription {
    pub fn id(&self) -> u64 {
        self.sink.id().0
    }

    pub fn state(&self) -> FfiOperationState {
        self.sink.state().into()
    }

    /// Next forwarded result. `None` when nothing arrived within the timeout
    /// or the scan has ended.
    pub fn next(&self, timeout_ms: u64) -> FfiResult<Option<FfiScanResult>> {
        if self.sink.is_finished() {
            return Ok(None);
        }
        match self.sink.wait_timeout(Duration::from_millis(timeout_ms)) {
            None => Ok(None),
            // The channel closes once the scan is stopped.
            Some(Err(RadioError::SchedulerClosed)) if self.sink.state().is_terminal() => Ok(None),
            Some(result) => result.map(|r| Some(r.into())).map_err(Into::into),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.sink.is_finished()
    }
}

/// Radio scheduler driving a host-implemented transport.
#[derive(uniffi::Object)]
pub struct RadioHandle {
    radio: RwLock<Option<Radio>>,
    /// Outside the lock: hosts deliver from inside transport calls, which
    /// may run while `shutdown` waits for the worker.
    events: EventSink,
}

impl RadioHandle {
    fn with_radio<R>(&self, f: impl FnOnce(&Radio) -> crate::error::Result<R>) -> FfiResult<R> {
        match self.radio.read().as_ref() {
            Some(radio) => f(radio).map_err(Into::into),
            None => Err(FfiRadioError::SchedulerClosed),
        }
    }
}

#[uniffi::export]
impl RadioHandle {
    #[uniffi::constructor]
    pub fn new(transport: Arc<dyn HostTransport>, config: FfiRadioConfig) -> FfiResult<Arc<Self>> {
        let config = RadioConfig::default()
            .with_gatt_timeout(Duration::from_millis(config.gatt_timeout_ms))
            .with_descriptor_write_type(config.descriptor_write_type.into())
            .with_worker_name(config.worker_name);
        let radio = Radio::spawn(HostAdapter { host: transport }, config)?;
        Ok(Arc::new(Self {
            events: radio.events(),
            radio: RwLock::new(Some(radio)),
        }))
    }

    pub fn write_descriptor(
        &self,
        descriptor: FfiDescriptor,
        value: Vec<u8>,
    ) -> FfiResult<Arc<PendingOperation>> {
        let descriptor = DescriptorId::try_from(descriptor)?;
        self.with_radio(|radio| radio.write_descriptor(descriptor, value))
            .map(PendingOperation::new)
    }

    pub fn read_descriptor(&self, descriptor: FfiDescriptor) -> FfiResult<Arc<PendingOperation>> {
        let descriptor = DescriptorId::try_from(descriptor)?;
        self.with_radio(|radio| radio.read_descriptor(descriptor))
            .map(PendingOperation::new)
    }

    pub fn write_characteristic(
        &self,
        characteristic: FfiCharacteristic,
        value: Vec<u8>,
    ) -> FfiResult<Arc<PendingOperation>> {
        let characteristic = CharacteristicId::try_from(characteristic)?;
        self.with_radio(|radio| radio.write_characteristic(characteristic, value))
            .map(PendingOperation::new)
    }

    pub fn read_characteristic(
        &self,
        characteristic: FfiCharacteristic,
    ) -> FfiResult<Arc<PendingOperation>> {
        let characteristic = CharacteristicId::try_from(characteristic)?;
        self.with_radio(|radio| radio.read_characteristic(characteristic))
            .map(PendingOperation::new)
    }

    pub fn connect(&self, device: String, auto_connect: bool) -> FfiResult<Arc<PendingOperation>> {
        self.with_radio(|radio| radio.connect(DeviceAddress(device), auto_connect))
            .map(PendingOperation::new)
    }

    pub fn disconnect(&self, device: String) -> FfiResult<Arc<PendingOperation>> {
        self.with_radio(|radio| radio.disconnect(DeviceAddress(device)))
            .map(PendingOperation::new)
    }

    pub fn request_mtu(&self, mtu: u16) -> FfiResult<Arc<PendingOperation>> {
        self.with_radio(|radio| radio.request_mtu(mtu))
            .map(PendingOperation::new)
    }

    pub fn read_rssi(&self) -> FfiResult<Arc<PendingOperation>> {
        self.with_radio(|radio| radio.read_rssi())
            .map(PendingOperation::new)
    }

    pub fn start_scan(
        &self,
        service_uuids: Vec<String>,
        settings: Option<FfiScanSettings>,
    ) -> FfiResult<Arc<ScanSubscription>> {
        let service_uuids = service_uuids
            .iter()
            .map(|uuid| parse_uuid(uuid))
            .collect::<FfiResult<Vec<_>>>()?;
        let settings = settings.map(ScanSettings::from).unwrap_or_default();
        let sink = self.with_radio(|radio| radio.scan(service_uuids, settings))?;
        Ok(Arc::new(ScanSubscription { sink }))
    }

    /// Returns false if the operation is no longer queued or running.
    pub fn cancel(&self, id: u64) -> FfiResult<bool> {
        self.with_radio(|radio| radio.cancel(OperationId(id)))
    }

    /// Forward a platform callback to the scheduler.
    pub fn deliver(&self, event: FfiTransportEvent) -> FfiResult<()> {
        let event = TransportEvent::try_from(event)?;
        self.events.deliver(event).map_err(Into::into)
    }

    pub fn metrics(&self) -> FfiResult<FfiMetrics> {
        self.with_radio(|radio| Ok(radio.metrics().into()))
    }

    /// Cancel everything and stop the worker. Later calls fail with
    /// `SchedulerClosed`.
    pub fn shutdown(&self) {
        // Join the worker without holding the lock.
        let radio = self.radio.write().take();
        if let Some(radio) = radio {
            radio.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;
    use parking_lot::Mutex;
    use std::sync::Weak;
    use std::thread;

    #[derive(Default)]
    struct RecordingHost {
        calls: Mutex<Vec<String>>,
        write_types: Mutex<HashMap<String, FfiWriteType>>,
        /// When set, `start_scan` waits this long and then reports a missing
        /// scanner through `handle` before returning.
        missing_scanner_after: Mutex<Option<Duration>>,
        handle: Mutex<Weak<RadioHandle>>,
    }

    impl RecordingHost {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        fn record(&self, call: String) -> bool {
            self.calls.lock().push(call);
            true
        }
    }

    impl HostTransport for RecordingHost {
        fn start_descriptor_write(&self, descriptor: FfiDescriptor, value: Vec<u8>) -> bool {
            let write_type = self.write_type(descriptor.characteristic.clone());
            self.record(format!("descriptor-write {} {value:?} {write_type:?}", descriptor.uuid))
        }

        fn start_descriptor_read(&self, descriptor: FfiDescriptor) -> bool {
            self.record(format!("descriptor-read {}", descriptor.uuid))
        }

        fn start_characteristic_write(
            &self,
            characteristic: FfiCharacteristic,
            value: Vec<u8>,
        ) -> bool {
            self.record(format!("characteristic-write {} {value:?}", characteristic.uuid))
        }

        fn start_characteristic_read(&self, characteristic: FfiCharacteristic) -> bool {
            self.record(format!("characteristic-read {}", characteristic.uuid))
        }

        fn write_type(&self, characteristic: FfiCharacteristic) -> FfiWriteType {
            self.write_types
                .lock()
                .get(&characteristic.uuid)
                .copied()
                .unwrap_or(FfiWriteType::NoResponse)
        }

        fn set_write_type(&self, characteristic: FfiCharacteristic, write_type: FfiWriteType) {
            self.write_types.lock().insert(characteristic.uuid, write_type);
        }

        fn start_connect(&self, device: String, auto_connect: bool) -> bool {
            self.record(format!("connect {device} {auto_connect}"))
        }

        fn start_disconnect(&self, device: String) -> bool {
            self.record(format!("disconnect {device}"))
        }

        fn request_mtu(&self, mtu: u16) -> bool {
            self.record(format!("mtu {mtu}"))
        }

        fn read_remote_rssi(&self) -> bool {
            self.record("rssi".to_string())
        }

        fn is_offloaded_filtering_supported(&self) -> bool {
            true
        }

        fn start_scan(&self, service_uuids: Vec<String>, _settings: FfiScanSettings) -> bool {
            let started = self.record(format!("scan {service_uuids:?}"));
            let delay = *self.missing_scanner_after.lock();
            if let Some(delay) = delay {
                thread::sleep(delay);
                let handle = self.handle.lock().upgrade();
                if let Some(handle) = handle {
                    // Ignored once the worker is gone.
                    let _ = handle.deliver(FfiTransportEvent::ScanFailed {
                        error_code: scan_failed_internal_error(),
                    });
                }
            }
            started
        }

        fn stop_scan(&self) {
            self.record("stop-scan".to_string());
        }
    }

    const WAIT_MS: u64 = 5_000;
    const HEART_RATE: &str = "0000180d-0000-1000-8000-00805f9b34fb";
    const BATTERY: &str = "0000180f-0000-1000-8000-00805f9b34fb";
    const CCCD: &str = "00002902-0000-1000-8000-00805f9b34fb";
    const MEASUREMENT: &str = "00002a37-0000-1000-8000-00805f9b34fb";

    fn handle() -> (Arc<RadioHandle>, Arc<RecordingHost>) {
        let host = Arc::new(RecordingHost::default());
        let handle = RadioHandle::new(host.clone(), default_radio_config()).unwrap();
        (handle, host)
    }

    fn measurement() -> FfiCharacteristic {
        FfiCharacteristic {
            uuid: MEASUREMENT.to_string(),
            instance_id: 0,
        }
    }

    #[test]
    fn test_default_config() {
        let config = default_radio_config();
        assert_eq!(config.gatt_timeout_ms, 30_000);
        assert_eq!(config.descriptor_write_type, FfiWriteType::Default);
    }

    #[test]
    fn test_descriptor_write_round_trip() {
        let (handle, host) = handle();
        let descriptor = FfiDescriptor {
            characteristic: measurement(),
            uuid: CCCD.to_string(),
        };
        let pending = handle
            .write_descriptor(descriptor.clone(), vec![0x01, 0x00])
            .unwrap();

        handle
            .deliver(FfiTransportEvent::DescriptorWritten {
                descriptor,
                value: vec![0x01, 0x00],
                status: 0,
            })
            .unwrap();
        assert_eq!(
            pending.wait_timeout(WAIT_MS).unwrap(),
            Some(FfiOutcome::Bytes {
                value: vec![0x01, 0x00]
            })
        );
        assert_eq!(pending.state(), FfiOperationState::Completed);
        assert_eq!(
            host.calls(),
            vec![format!("descriptor-write {CCCD} [1, 0] Default")]
        );
        // Parent characteristic is back to its previous write type.
        assert_eq!(host.write_type(measurement()), FfiWriteType::NoResponse);
    }

    #[test]
    fn test_gatt_status_failure() {
        let (handle, _host) = handle();
        let pending = handle.read_characteristic(measurement()).unwrap();
        handle
            .deliver(FfiTransportEvent::CharacteristicRead {
                characteristic: measurement(),
                value: Vec::new(),
                status: 5,
            })
            .unwrap();
        assert!(matches!(
            pending.wait(),
            Err(FfiRadioError::OperationFailed { .. })
        ));
    }

    #[test]
    fn test_invalid_uuid_rejected() {
        let (handle, host) = handle();
        let result = handle.read_characteristic(FfiCharacteristic {
            uuid: "not-a-uuid".to_string(),
            instance_id: 0,
        });
        assert!(matches!(result, Err(FfiRadioError::InvalidArgument { .. })));
        assert!(host.calls().is_empty());
    }

    #[test]
    fn test_scan_subscription() {
        let (handle, host) = handle();
        let scan = handle
            .start_scan(vec![HEART_RATE.to_string(), BATTERY.to_string()], None)
            .unwrap();

        let record = |uuids: &[&str]| FfiRawScanResult {
            device: "00:11:22:33:44:55".to_string(),
            rssi: -48,
            record: Some(FfiScanRecord {
                service_uuids: uuids.iter().map(|u| u.to_string()).collect(),
                ..FfiScanRecord::default()
            }),
        };
        handle
            .deliver(FfiTransportEvent::ScanResultsBatch {
                results: vec![record(&[HEART_RATE]), record(&[HEART_RATE, BATTERY])],
            })
            .unwrap();

        let first = scan.next(WAIT_MS).unwrap().unwrap();
        assert_eq!(first.record.service_uuids.len(), 2);

        assert!(handle.cancel(scan.id()).unwrap());
        assert_eq!(scan.next(WAIT_MS).unwrap(), None);
        assert_eq!(scan.state(), FfiOperationState::Completed);
        assert_eq!(
            host.calls(),
            vec![format!("scan [\"{HEART_RATE}\"]"), "stop-scan".to_string()]
        );
    }

    #[test]
    fn test_shutdown_closes_handle() {
        let (handle, _host) = handle();
        let pending = handle.read_rssi().unwrap();
        handle.shutdown();

        assert!(matches!(pending.wait(), Err(FfiRadioError::Cancelled)));
        assert!(matches!(
            handle.request_mtu(247),
            Err(FfiRadioError::SchedulerClosed)
        ));
    }

    #[test]
    fn test_shutdown_while_host_delivers_from_scan_start() {
        let (handle, host) = handle();
        *host.handle.lock() = Arc::downgrade(&handle);
        *host.missing_scanner_after.lock() = Some(Duration::from_millis(100));

        let scan = handle.start_scan(Vec::new(), None).unwrap();
        thread::sleep(Duration::from_millis(20));

        let (done_tx, done_rx) = channel::bounded(1);
        let closing = Arc::clone(&handle);
        thread::spawn(move || {
            closing.shutdown();
            let _ = done_tx.send(());
        });
        assert!(done_rx.recv_timeout(Duration::from_millis(WAIT_MS)).is_ok());
        assert!(scan.state() != FfiOperationState::Running);
    }

    #[test]
    fn test_deliver_after_shutdown_is_closed() {
        let (handle, _host) = handle();
        handle.shutdown();
        assert!(matches!(
            handle.deliver(FfiTransportEvent::ScanFailed { error_code: 3 }),
            Err(FfiRadioError::SchedulerClosed)
        ));
    }
}
