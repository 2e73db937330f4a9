//! BLE scan as a long-running radio operation.
//!
//! A scan holds the radio from start until it is stopped and may receive any
//! number of result callbacks, single or batched. Hardware filtering can
//! match only one service identity, so when the adapter supports offloaded
//! filtering the first identity is handed to the hardware and the whole set
//! is always checked again here.

use std::collections::HashSet;

use log::{debug, warn};
use uuid::Uuid;

use crate::error::{RadioError, Result};
use crate::models::{
    OperationId, OperationKind, RawScanResult, ResourceId, ScanFilter, ScanResult, ScanSettings,
};
use crate::operation::{CancelResponse, Deadline, Operation, Progress};
use crate::transport::{TransportAdapter, TransportEvent};

#[derive(Clone, Debug)]
pub struct Scan {
    id: OperationId,
    service_uuids: Vec<Uuid>,
    required: HashSet<Uuid>,
    settings: ScanSettings,
    /// The hardware scanner is running on our behalf.
    active: bool,
}

impl Scan {
    /// Scan for devices advertising every identity in `service_uuids`. An
    /// empty list forwards everything.
    pub fn new(service_uuids: Vec<Uuid>) -> Self {
        let required = service_uuids.iter().copied().collect();
        Self {
            id: OperationId::next(),
            service_uuids,
            required,
            settings: ScanSettings::default(),
            active: false,
        }
    }

    pub fn with_settings(mut self, settings: ScanSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Filters for the hardware: only the first identity, since a filter
    /// cannot match a set.
    pub fn hardware_filters(&self) -> Vec<ScanFilter> {
        self.service_uuids
            .first()
            .map(|uuid| {
                vec![ScanFilter {
                    service_uuid: Some(*uuid),
                }]
            })
            .unwrap_or_default()
    }

    fn accepts(&self, result: &RawScanResult) -> Option<ScanResult> {
        let record = result.record.as_ref()?;
        if !self.required.iter().all(|uuid| record.advertises(uuid)) {
            return None;
        }
        Some(ScanResult {
            device: result.device.clone(),
            rssi: result.rssi,
            record: record.clone(),
        })
    }

    fn forward(&self, results: &[RawScanResult]) -> Progress<ScanResult> {
        let accepted: Vec<_> = results.iter().filter_map(|r| self.accepts(r)).collect();
        if accepted.is_empty() {
            Progress::Pending
        } else {
            Progress::Emit(accepted)
        }
    }
}

impl Operation for Scan {
    type Output = ScanResult;

    fn id(&self) -> OperationId {
        self.id
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Scan
    }

    fn target(&self) -> ResourceId {
        ResourceId::Scanner
    }

    fn deadline(&self) -> Deadline {
        Deadline::Never
    }

    fn start(&mut self, transport: &mut dyn TransportAdapter) -> Result<()> {
        let filters = if transport.is_offloaded_filtering_supported() {
            self.hardware_filters()
        } else {
            // No hardware filtering: everything is filtered in software.
            Vec::new()
        };
        if transport.start_scan(&filters, &self.settings) {
            debug!(
                "[SCAN] started with {} hardware filter(s), {} required service(s)",
                filters.len(),
                self.required.len()
            );
            self.active = true;
            Ok(())
        } else {
            warn!("[SCAN] scanner refused to start");
            Err(RadioError::StartRejected("scan start".to_string()))
        }
    }

    fn matches(&self, event: &TransportEvent) -> bool {
        matches!(
            event,
            TransportEvent::ScanResult(_)
                | TransportEvent::ScanResultsBatch(_)
                | TransportEvent::ScanFailed { .. }
        )
    }

    fn on_match(&mut self, event: TransportEvent) -> Progress<ScanResult> {
        match event {
            TransportEvent::ScanResult(result) => self.forward(std::slice::from_ref(&result)),
            TransportEvent::ScanResultsBatch(results) => self.forward(&results),
            TransportEvent::ScanFailed { error_code } => {
                warn!("[SCAN] failed with error code {error_code}");
                self.active = false;
                Progress::Failed(RadioError::ScanFailed(error_code))
            }
            _ => Progress::Pending,
        }
    }

    fn on_cancel(&mut self, transport: &mut dyn TransportAdapter) -> CancelResponse {
        transport.stop_scan();
        self.active = false;
        debug!("[SCAN] stopped");
        CancelResponse::Stopped
    }

    fn on_release(&mut self, transport: &mut dyn TransportAdapter) {
        if self.active {
            transport.stop_scan();
            self.active = false;
            debug!("[SCAN] stopped on release");
        }
    }
}
