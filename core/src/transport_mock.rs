//! Recording transports for tests and demos.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::{
    CharacteristicId, DescriptorId, DeviceAddress, ScanFilter, ScanSettings, WriteType,
};
use crate::transport::TransportAdapter;

/// A transport call as observed by [`MockTransport`].
#[derive(Clone, Debug, PartialEq)]
pub enum TransportCall {
    DescriptorWrite {
        descriptor: DescriptorId,
        value: Vec<u8>,
        /// Parent characteristic's write type at the moment of the call.
        write_type: WriteType,
    },
    DescriptorRead(DescriptorId),
    CharacteristicWrite {
        characteristic: CharacteristicId,
        value: Vec<u8>,
    },
    CharacteristicRead(CharacteristicId),
    Connect {
        device: DeviceAddress,
        auto_connect: bool,
    },
    Disconnect(DeviceAddress),
    RequestMtu(u16),
    ReadRssi,
    StartScan {
        filters: Vec<ScanFilter>,
        settings: ScanSettings,
    },
    StopScan,
}

/// In-memory transport that records every call and accepts it unless told
/// otherwise.
#[derive(Clone, Debug, Default)]
pub struct MockTransport {
    pub calls: Vec<TransportCall>,
    pub write_types: HashMap<CharacteristicId, WriteType>,
    pub reject_starts: bool,
    pub offloaded_filtering: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting() -> Self {
        Self {
            reject_starts: true,
            ..Self::default()
        }
    }

    pub fn with_offloaded_filtering() -> Self {
        Self {
            offloaded_filtering: true,
            ..Self::default()
        }
    }

    fn record(&mut self, call: TransportCall) -> bool {
        self.calls.push(call);
        !self.reject_starts
    }
}

impl TransportAdapter for MockTransport {
    fn start_descriptor_write(&mut self, descriptor: &DescriptorId, value: &[u8]) -> bool {
        let write_type = self.write_type(&descriptor.characteristic);
        self.record(TransportCall::DescriptorWrite {
            descriptor: *descriptor,
            value: value.to_vec(),
            write_type,
        })
    }

    fn start_descriptor_read(&mut self, descriptor: &DescriptorId) -> bool {
        self.record(TransportCall::DescriptorRead(*descriptor))
    }

    fn start_characteristic_write(
        &mut self,
        characteristic: &CharacteristicId,
        value: &[u8],
    ) -> bool {
        self.record(TransportCall::CharacteristicWrite {
            characteristic: *characteristic,
            value: value.to_vec(),
        })
    }

    fn start_characteristic_read(&mut self, characteristic: &CharacteristicId) -> bool {
        self.record(TransportCall::CharacteristicRead(*characteristic))
    }

    fn write_type(&self, characteristic: &CharacteristicId) -> WriteType {
        self.write_types
            .get(characteristic)
            .copied()
            .unwrap_or(WriteType::Default)
    }

    fn set_write_type(&mut self, characteristic: &CharacteristicId, write_type: WriteType) {
        self.write_types.insert(*characteristic, write_type);
    }

    fn start_connect(&mut self, device: &DeviceAddress, auto_connect: bool) -> bool {
        self.record(TransportCall::Connect {
            device: device.clone(),
            auto_connect,
        })
    }

    fn start_disconnect(&mut self, device: &DeviceAddress) -> bool {
        self.record(TransportCall::Disconnect(device.clone()))
    }

    fn request_mtu(&mut self, mtu: u16) -> bool {
        self.record(TransportCall::RequestMtu(mtu))
    }

    fn read_remote_rssi(&mut self) -> bool {
        self.record(TransportCall::ReadRssi)
    }

    fn is_offloaded_filtering_supported(&self) -> bool {
        self.offloaded_filtering
    }

    fn start_scan(&mut self, filters: &[ScanFilter], settings: &ScanSettings) -> bool {
        self.record(TransportCall::StartScan {
            filters: filters.to_vec(),
            settings: settings.clone(),
        })
    }

    fn stop_scan(&mut self) {
        self.calls.push(TransportCall::StopScan);
    }
}

type ScanHook = Box<dyn FnMut() + Send>;

/// [`MockTransport`] behind a shared lock, for when the scheduler runs on
/// another thread and the test still needs to inspect or reconfigure it.
#[derive(Clone, Default)]
pub struct SharedMockTransport {
    inner: Arc<Mutex<MockTransport>>,
    scan_hook: Arc<Mutex<Option<ScanHook>>>,
}

impl SharedMockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_mock(mock: MockTransport) -> Self {
        Self {
            inner: Arc::new(Mutex::new(mock)),
            scan_hook: Arc::default(),
        }
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.inner.lock().calls.clone()
    }

    pub fn set_rejecting(&self, reject: bool) {
        self.inner.lock().reject_starts = reject;
    }

    pub fn write_type_of(&self, characteristic: &CharacteristicId) -> WriteType {
        self.inner.lock().write_type(characteristic)
    }

    /// Run `hook` on the calling thread after every recorded scan start, the
    /// way a platform may invoke callbacks from inside the call.
    pub fn on_start_scan(&self, hook: impl FnMut() + Send + 'static) {
        *self.scan_hook.lock() = Some(Box::new(hook));
    }
}

impl TransportAdapter for SharedMockTransport {
    fn start_descriptor_write(&mut self, descriptor: &DescriptorId, value: &[u8]) -> bool {
        self.inner.lock().start_descriptor_write(descriptor, value)
    }

    fn start_descriptor_read(&mut self, descriptor: &DescriptorId) -> bool {
        self.inner.lock().start_descriptor_read(descriptor)
    }

    fn start_characteristic_write(
        &mut self,
        characteristic: &CharacteristicId,
        value: &[u8],
    ) -> bool {
        self.inner
            .lock()
            .start_characteristic_write(characteristic, value)
    }

    fn start_characteristic_read(&mut self, characteristic: &CharacteristicId) -> bool {
        self.inner.lock().start_characteristic_read(characteristic)
    }

    fn write_type(&self, characteristic: &CharacteristicId) -> WriteType {
        self.inner.lock().write_type(characteristic)
    }

    fn set_write_type(&mut self, characteristic: &CharacteristicId, write_type: WriteType) {
        self.inner.lock().set_write_type(characteristic, write_type);
    }

    fn start_connect(&mut self, device: &DeviceAddress, auto_connect: bool) -> bool {
        self.inner.lock().start_connect(device, auto_connect)
    }

    fn start_disconnect(&mut self, device: &DeviceAddress) -> bool {
        self.inner.lock().start_disconnect(device)
    }

    fn request_mtu(&mut self, mtu: u16) -> bool {
        self.inner.lock().request_mtu(mtu)
    }

    fn read_remote_rssi(&mut self) -> bool {
        self.inner.lock().read_remote_rssi()
    }

    fn is_offloaded_filtering_supported(&self) -> bool {
        self.inner.lock().is_offloaded_filtering_supported()
    }

    fn start_scan(&mut self, filters: &[ScanFilter], settings: &ScanSettings) -> bool {
        let started = self.inner.lock().start_scan(filters, settings);
        if let Some(hook) = self.scan_hook.lock().as_mut() {
            hook();
        }
        started
    }

    fn stop_scan(&mut self) {
        self.inner.lock().stop_scan();
    }
}
