//! Threaded driver around [`RadioScheduler`].
//!
//! The scheduler lives on one named worker thread, so every state change
//! happens there. Submissions and cancel requests arrive on a command channel
//! that may be bounded. Transport events arrive on a separate unbounded
//! channel: a platform callback can fire from inside a transport call made by
//! the worker itself and must never wait for the worker. The worker sleeps
//! until the next message or the running operation's deadline, whichever
//! comes first.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use log::{debug, error, info};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::config::RadioConfig;
use crate::error::{RadioError, Result};
use crate::metrics::{MetricsSnapshot, RadioMetrics};
use crate::models::{
    CharacteristicId, DescriptorId, DeviceAddress, OperationId, OperationState, ScanResult,
    ScanSettings,
};
use crate::operation::{
    CharacteristicRead, CharacteristicWrite, Connect, DescriptorRead, DescriptorWrite, Disconnect,
    Job, MtuRequest, Operation, RssiRead, Scan, Submission,
};
use crate::scheduler::RadioScheduler;
use crate::sink::{ResultSink, StateCell};
use crate::transport::{TransportAdapter, TransportEvent};

enum Command {
    Submit(Box<dyn Job>),
    Cancel(OperationId),
    Shutdown,
}

/// Handle given to the transport collaborator for reporting completions.
///
/// Cheap to clone; safe to call from any thread, including platform
/// callback threads.
#[derive(Clone)]
pub struct EventSink {
    tx: Sender<TransportEvent>,
}

impl EventSink {
    /// Never blocks; fails only once the worker has exited.
    pub fn deliver(&self, event: TransportEvent) -> Result<()> {
        self.tx.send(event).map_err(|_| RadioError::SchedulerClosed)
    }
}

/// Identities that are queued or running, with their shared state.
type Registry = Arc<Mutex<HashMap<OperationId, Arc<StateCell>>>>;

pub struct Radio {
    tx: Sender<Command>,
    events: Sender<TransportEvent>,
    registry: Registry,
    metrics: Arc<RadioMetrics>,
    config: RadioConfig,
    worker: Option<JoinHandle<()>>,
}

impl Radio {
    /// Move `transport` onto a new worker thread and start scheduling.
    pub fn spawn<T>(transport: T, config: RadioConfig) -> Result<Self>
    where
        T: TransportAdapter + 'static,
    {
        let (tx, rx) = match config.event_capacity {
            Some(capacity) => channel::bounded(capacity),
            None => channel::unbounded(),
        };
        let (events, events_rx) = channel::unbounded();
        let metrics = Arc::new(RadioMetrics::new());
        let scheduler =
            RadioScheduler::with_metrics(transport, config.clone(), Arc::clone(&metrics));

        let worker = thread::Builder::new()
            .name(config.worker_name.clone())
            .spawn(move || run(scheduler, rx, events_rx))
            .map_err(|e| RadioError::WorkerSpawn(e.to_string()))?;
        info!("[RADIO] worker '{}' started", config.worker_name);

        Ok(Self {
            tx,
            events,
            registry: Arc::new(Mutex::new(HashMap::new())),
            metrics,
            config,
            worker: Some(worker),
        })
    }

    pub fn events(&self) -> EventSink {
        EventSink {
            tx: self.events.clone(),
        }
    }

    /// Queue an operation. Duplicate identities are rejected here, before
    /// anything reaches the worker.
    pub fn submit<O: Operation>(&self, op: O) -> Result<ResultSink<O::Output>> {
        let id = op.id();
        let (job, sink) = Submission::new(op);
        {
            let mut registry = self.registry.lock();
            if registry
                .get(&id)
                .is_some_and(|state| !state.get().is_terminal())
            {
                return Err(RadioError::AlreadySubmitted(id));
            }
            registry.retain(|_, state| !state.get().is_terminal());
            registry.insert(id, job.state_cell());
        }

        if self.tx.send(Command::Submit(Box::new(job))).is_err() {
            self.registry.lock().remove(&id);
            return Err(RadioError::SchedulerClosed);
        }
        Ok(sink)
    }

    /// Ask the worker to cancel `id`. Returns false if the identity is not
    /// queued or running as far as this handle knows.
    pub fn cancel(&self, id: OperationId) -> Result<bool> {
        let live = self
            .registry
            .lock()
            .get(&id)
            .is_some_and(|state| !state.get().is_terminal());
        if !live {
            return Ok(false);
        }
        self.tx
            .send(Command::Cancel(id))
            .map_err(|_| RadioError::SchedulerClosed)?;
        Ok(true)
    }

    /// Last known state of a submitted operation.
    pub fn state(&self, id: OperationId) -> Option<OperationState> {
        self.registry.lock().get(&id).map(|state| state.get())
    }

    pub fn write_descriptor(
        &self,
        descriptor: DescriptorId,
        value: impl Into<Vec<u8>>,
    ) -> Result<ResultSink<Vec<u8>>> {
        self.submit(DescriptorWrite::new(descriptor, value))
    }

    pub fn read_descriptor(&self, descriptor: DescriptorId) -> Result<ResultSink<Vec<u8>>> {
        self.submit(DescriptorRead::new(descriptor))
    }

    pub fn write_characteristic(
        &self,
        characteristic: CharacteristicId,
        value: impl Into<Vec<u8>>,
    ) -> Result<ResultSink<Vec<u8>>> {
        self.submit(CharacteristicWrite::new(characteristic, value))
    }

    pub fn read_characteristic(
        &self,
        characteristic: CharacteristicId,
    ) -> Result<ResultSink<Vec<u8>>> {
        self.submit(CharacteristicRead::new(characteristic))
    }

    pub fn connect(&self, device: DeviceAddress, auto_connect: bool) -> Result<ResultSink<()>> {
        self.submit(Connect::new(device).with_auto_connect(auto_connect))
    }

    pub fn disconnect(&self, device: DeviceAddress) -> Result<ResultSink<()>> {
        self.submit(Disconnect::new(device))
    }

    pub fn request_mtu(&self, mtu: u16) -> Result<ResultSink<u16>> {
        self.submit(MtuRequest::new(mtu))
    }

    pub fn read_rssi(&self) -> Result<ResultSink<i16>> {
        self.submit(RssiRead::new())
    }

    /// Start a scan. It holds the radio until cancelled or failed.
    pub fn scan(
        &self,
        service_uuids: Vec<Uuid>,
        settings: ScanSettings,
    ) -> Result<ResultSink<ScanResult>> {
        self.submit(Scan::new(service_uuids).with_settings(settings))
    }

    pub fn config(&self) -> &RadioConfig {
        &self.config
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Cancel everything and wait for the worker to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        // The worker may already be gone; joining below still succeeds.
        let _ = self.tx.send(Command::Shutdown);
        if worker.join().is_err() {
            error!("[RADIO] worker '{}' panicked", self.config.worker_name);
        }
        debug!("[RADIO] worker '{}' stopped", self.config.worker_name);
    }
}

impl Drop for Radio {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Handle one command. Returns false when the worker should stop.
fn dispatch<T: TransportAdapter>(scheduler: &mut RadioScheduler<T>, command: Command) -> bool {
    let now = Instant::now();
    match command {
        Command::Submit(job) => {
            // Rejections are reported through the job's own sink.
            let _ = scheduler.enqueue(job, now);
        }
        Command::Cancel(id) => {
            scheduler.cancel(id, now);
        }
        Command::Shutdown => return false,
    }
    true
}

fn run<T: TransportAdapter>(
    mut scheduler: RadioScheduler<T>,
    commands: Receiver<Command>,
    events: Receiver<TransportEvent>,
) {
    loop {
        let timer = match scheduler.next_deadline() {
            Some(deadline) => channel::at(deadline),
            None => channel::never(),
        };
        let keep_running = select! {
            recv(events) -> event => match event {
                Ok(event) => {
                    scheduler.route(event, Instant::now());
                    true
                }
                Err(_) => false,
            },
            recv(commands) -> command => match command {
                Ok(command) => dispatch(&mut scheduler, command),
                Err(_) => false,
            },
            recv(timer) -> _ => true,
        };
        if !keep_running {
            break;
        }
        scheduler.poll_timeout(Instant::now());
    }
    scheduler.shutdown();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConnectionState, GattStatus, RawScanResult, ScanRecord, WriteType};
    use crate::transport::SCAN_FAILED_INTERNAL_ERROR;
    use crate::transport_mock::{MockTransport, SharedMockTransport, TransportCall};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    fn characteristic(instance_id: u32) -> CharacteristicId {
        CharacteristicId::new(Uuid::from_u128(0x2a37), instance_id)
    }

    fn spawn(config: RadioConfig) -> (Radio, SharedMockTransport) {
        let transport = SharedMockTransport::new();
        let radio = Radio::spawn(transport.clone(), config).unwrap();
        (radio, transport)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + WAIT;
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_write_completes_through_event_sink() {
        let (radio, transport) = spawn(RadioConfig::default());
        let events = radio.events();

        let sink = radio.write_characteristic(characteristic(0), [0xAA]).unwrap();
        wait_for(|| transport.calls().len() == 1);

        events
            .deliver(TransportEvent::CharacteristicWritten {
                characteristic: characteristic(0),
                value: vec![0xAA],
                status: GattStatus::SUCCESS,
            })
            .unwrap();
        assert_eq!(sink.wait_timeout(WAIT), Some(Ok(vec![0xAA])));
        assert_eq!(radio.state(sink.id()), Some(OperationState::Completed));

        radio.shutdown();
    }

    #[test]
    fn test_timeout_fires_on_worker() {
        let config = RadioConfig::default().with_gatt_timeout(Duration::from_millis(20));
        let (radio, transport) = spawn(config);

        let read = radio.read_characteristic(characteristic(0)).unwrap();
        let next = radio.read_characteristic(characteristic(1)).unwrap();

        assert!(matches!(
            read.wait_timeout(WAIT),
            Some(Err(RadioError::Timeout { .. }))
        ));
        wait_for(|| transport.calls().len() == 2);
        assert_eq!(next.state(), OperationState::Running);
        assert_eq!(radio.metrics().timed_out, 1);
    }

    #[test]
    fn test_duplicate_rejected_synchronously() {
        let (radio, _transport) = spawn(RadioConfig::default());
        let op = CharacteristicRead::new(characteristic(0));
        let id = op.id();

        let _sink = radio.submit(op.clone()).unwrap();
        assert_eq!(
            radio.submit(op).err(),
            Some(RadioError::AlreadySubmitted(id))
        );
    }

    #[test]
    fn test_cancel_queued_and_unknown() {
        let (radio, transport) = spawn(RadioConfig::default());
        let _running = radio.read_characteristic(characteristic(0)).unwrap();
        let queued = radio.read_characteristic(characteristic(1)).unwrap();

        assert_eq!(radio.cancel(queued.id()), Ok(true));
        assert_eq!(queued.wait_timeout(WAIT), Some(Err(RadioError::Cancelled)));
        assert_eq!(radio.cancel(queued.id()), Ok(false));
        assert_eq!(radio.cancel(OperationId(u64::MAX)), Ok(false));
        assert_eq!(transport.calls().len(), 1);
    }

    #[test]
    fn test_descriptor_write_uses_configured_override() {
        let config = RadioConfig::default().with_descriptor_write_type(WriteType::Signed);
        let (radio, transport) = spawn(config);
        let descriptor = DescriptorId::new(characteristic(0), Uuid::from_u128(0x2902));

        let _sink = radio.write_descriptor(descriptor, [0x01, 0x00]).unwrap();
        wait_for(|| !transport.calls().is_empty());

        assert_eq!(
            transport.calls(),
            vec![TransportCall::DescriptorWrite {
                descriptor,
                value: vec![0x01, 0x00],
                write_type: WriteType::Signed,
            }]
        );
        assert_eq!(transport.write_type_of(&characteristic(0)), WriteType::Default);
    }

    #[test]
    fn test_scan_streams_until_cancelled() {
        let (radio, transport) = spawn(RadioConfig::default());
        let events = radio.events();
        let scan = radio.scan(Vec::new(), ScanSettings::default()).unwrap();
        wait_for(|| !transport.calls().is_empty());

        for rssi in [-40, -50] {
            events
                .deliver(TransportEvent::ScanResult(RawScanResult {
                    device: DeviceAddress("00:11:22:33:44:55".to_string()),
                    rssi,
                    record: Some(ScanRecord::default()),
                }))
                .unwrap();
        }
        assert_eq!(scan.wait_timeout(WAIT).map(|r| r.map(|s| s.rssi)), Some(Ok(-40)));
        assert_eq!(scan.wait_timeout(WAIT).map(|r| r.map(|s| s.rssi)), Some(Ok(-50)));

        assert_eq!(radio.cancel(scan.id()), Ok(true));
        wait_for(|| scan.is_finished());
        assert_eq!(scan.state(), OperationState::Completed);
        assert!(transport.calls().contains(&TransportCall::StopScan));
    }

    #[test]
    fn test_missing_scanner_fails_scan() {
        let (radio, _transport) = spawn(RadioConfig::default());
        let scan = radio.scan(Vec::new(), ScanSettings::default()).unwrap();
        radio
            .events()
            .deliver(TransportEvent::ScanFailed {
                error_code: SCAN_FAILED_INTERNAL_ERROR,
            })
            .unwrap();
        assert_eq!(
            scan.wait_timeout(WAIT),
            Some(Err(RadioError::ScanFailed(SCAN_FAILED_INTERNAL_ERROR)))
        );
    }

    #[test]
    fn test_disconnect_jumps_queue() {
        let (radio, transport) = spawn(RadioConfig::default());
        let events = radio.events();
        let device = DeviceAddress("AA:BB:CC:DD:EE:FF".to_string());

        let _first = radio.read_characteristic(characteristic(0)).unwrap();
        let _second = radio.read_characteristic(characteristic(1)).unwrap();
        let disconnect = radio.disconnect(device.clone()).unwrap();
        wait_for(|| radio.metrics().submitted == 3);

        events
            .deliver(TransportEvent::CharacteristicRead {
                characteristic: characteristic(0),
                value: Vec::new(),
                status: GattStatus::SUCCESS,
            })
            .unwrap();
        wait_for(|| transport.calls().len() == 2);
        assert_eq!(transport.calls()[1], TransportCall::Disconnect(device.clone()));

        events
            .deliver(TransportEvent::ConnectionStateChanged {
                device,
                state: ConnectionState::Disconnected,
                status: GattStatus::SUCCESS,
            })
            .unwrap();
        assert_eq!(disconnect.wait_timeout(WAIT), Some(Ok(())));
    }

    #[test]
    fn test_shutdown_cancels_outstanding() {
        let (radio, _transport) = spawn(RadioConfig::default());
        let running = radio.read_rssi().unwrap();
        let queued = radio.request_mtu(247).unwrap();
        let events = radio.events();

        radio.shutdown();
        assert_eq!(running.wait(), Err(RadioError::Cancelled));
        assert_eq!(queued.wait(), Err(RadioError::Cancelled));
        assert_eq!(
            events.deliver(TransportEvent::RssiRead {
                rssi: -60,
                status: GattStatus::SUCCESS,
            }),
            Err(RadioError::SchedulerClosed)
        );
    }

    #[test]
    fn test_event_delivered_from_inside_transport_call() {
        let config = RadioConfig::default().with_event_capacity(1);
        let (radio, transport) = spawn(config);
        let events = radio.events();
        let (gate_tx, gate_rx) = channel::bounded::<()>(1);
        transport.on_start_scan(move || {
            // Hold the worker inside the transport call until the command
            // channel is full, then report synchronously like a host would.
            let _ = gate_rx.recv_timeout(WAIT);
            events
                .deliver(TransportEvent::ScanFailed {
                    error_code: SCAN_FAILED_INTERNAL_ERROR,
                })
                .unwrap();
        });

        let scan = radio.scan(Vec::new(), ScanSettings::default()).unwrap();
        wait_for(|| !transport.calls().is_empty());
        let read = radio.read_characteristic(characteristic(0)).unwrap();
        gate_tx.send(()).unwrap();

        assert_eq!(
            scan.wait_timeout(WAIT),
            Some(Err(RadioError::ScanFailed(SCAN_FAILED_INTERNAL_ERROR)))
        );
        wait_for(|| read.state() == OperationState::Running);
        radio.shutdown();
    }

    #[test]
    fn test_dropped_scan_does_not_stall_radio() {
        let (radio, transport) = spawn(RadioConfig::default());
        let scan = radio.scan(Vec::new(), ScanSettings::default()).unwrap();
        wait_for(|| !transport.calls().is_empty());
        drop(scan);

        let read = radio.read_characteristic(characteristic(0)).unwrap();
        wait_for(|| read.state() == OperationState::Running);
        assert_eq!(transport.calls()[1], TransportCall::StopScan);
    }

    #[test]
    fn test_rejected_start_reported() {
        let transport = SharedMockTransport::from_mock(MockTransport::rejecting());
        let radio = Radio::spawn(transport.clone(), RadioConfig::default()).unwrap();

        let sink = radio.connect(DeviceAddress("AA:BB:CC:DD:EE:FF".to_string()), false).unwrap();
        assert!(matches!(
            sink.wait_timeout(WAIT),
            Some(Err(RadioError::StartRejected(_)))
        ));

        transport.set_rejecting(false);
        let sink = radio.read_rssi().unwrap();
        wait_for(|| sink.state() == OperationState::Running);
    }
}
