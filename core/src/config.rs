//! Runtime configuration for the radio scheduler.

use std::time::Duration;

use crate::models::WriteType;

/// Deadline for GATT class operations when they don't set their own.
pub const DEFAULT_GATT_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_WORKER_NAME: &str = "gatt-radio";

#[derive(Clone, Debug, PartialEq)]
pub struct RadioConfig {
    /// Deadline applied to operations that use [`crate::operation::Deadline::Default`].
    pub gatt_timeout: Duration,
    /// Write type forced on a descriptor's parent characteristic while the
    /// descriptor write is issued.
    pub descriptor_write_type: WriteType,
    /// Name of the worker thread spawned by [`crate::radio::Radio`].
    pub worker_name: String,
    /// Bound of the submission and cancel channel. `None` is unbounded.
    /// Transport events always travel on their own unbounded channel, so a
    /// callback delivered from inside a transport call never blocks.
    pub event_capacity: Option<usize>,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            gatt_timeout: DEFAULT_GATT_TIMEOUT,
            descriptor_write_type: WriteType::Default,
            worker_name: DEFAULT_WORKER_NAME.to_string(),
            event_capacity: None,
        }
    }
}

impl RadioConfig {
    pub fn with_gatt_timeout(mut self, timeout: Duration) -> Self {
        self.gatt_timeout = timeout;
        self
    }

    pub fn with_descriptor_write_type(mut self, write_type: WriteType) -> Self {
        self.descriptor_write_type = write_type;
        self
    }

    pub fn with_worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = Some(capacity);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RadioConfig::default();
        assert_eq!(config.gatt_timeout, Duration::from_secs(30));
        assert_eq!(config.descriptor_write_type, WriteType::Default);
        assert_eq!(config.worker_name, "gatt-radio");
        assert_eq!(config.event_capacity, None);
    }

    #[test]
    fn test_builder() {
        let config = RadioConfig::default()
            .with_gatt_timeout(Duration::from_millis(250))
            .with_worker_name("test-radio")
            .with_event_capacity(8);
        assert_eq!(config.gatt_timeout, Duration::from_millis(250));
        assert_eq!(config.worker_name, "test-radio");
        assert_eq!(config.event_capacity, Some(8));
    }
}
