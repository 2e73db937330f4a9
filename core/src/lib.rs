pub mod config;
pub mod error;
pub mod ffi;
pub mod metrics;
pub mod models;
pub mod operation;
pub mod radio;
mod router;
pub mod scheduler;
pub mod sink;
pub mod timeout;
pub mod transport;
pub mod transport_mock;

uniffi::setup_scaffolding!();

pub use config::RadioConfig;
pub use error::{RadioError, Result};
pub use metrics::{MetricsSnapshot, RadioMetrics};
pub use models::{
    CharacteristicId, ConnectionState, DescriptorId, DeviceAddress, GattStatus, OperationId,
    OperationKind, OperationState, Priority, RawScanResult, ResourceId, ScanFilter, ScanMode,
    ScanRecord, ScanResult, ScanSettings, WriteType,
};
pub use operation::{CancelResponse, Deadline, Operation, Progress};
pub use radio::{EventSink, Radio};
pub use scheduler::RadioScheduler;
pub use sink::ResultSink;
pub use transport::{TransportAdapter, TransportEvent};
