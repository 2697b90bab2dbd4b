use std::collections::HashMap;

use crate::protocol::{
    classifier::threshold_for,
    types::{Alert, DeviceModel, Reading, Status},
};

/// Remembers the last classified status per device and reports transitions
/// into `warning` or `alarm`.
///
/// Error readings leave the remembered status untouched, so a device that
/// drops off the bus for a cycle while in alarm does not alert again when it
/// comes back still in alarm.
#[derive(Debug, Default)]
pub struct AlertTracker {
    last: HashMap<u8, Status>,
}

impl AlertTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, reading: &Reading, device: &DeviceModel) -> Option<Alert> {
        if reading.is_error() {
            return None;
        }
        let value = reading.normalized_value?;
        let previous = self.last.insert(reading.device_address, reading.status);
        if !reading.status.is_alert() || previous == Some(reading.status) {
            return None;
        }

        Some(Alert {
            device_address: reading.device_address,
            device_name: device.name.clone(),
            value,
            status: reading.status,
            threshold: threshold_for(reading.status, device)?,
            timestamp: reading.timestamp,
        })
    }

    pub fn last_status(&self, address: u8) -> Option<Status> {
        self.last.get(&address).copied()
    }

    pub fn forget(&mut self, address: u8) {
        self.last.remove(&address);
    }
}
