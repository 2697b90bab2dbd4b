use parking_lot::RwLock;
use std::{sync::Arc, time::Duration};

use crate::{
    protocol::{
        classifier::classify,
        codec::RegisterCodec,
        connection::{ConnectionManager, ConnectionState},
        registry::DeviceRegistry,
        transport::DEFAULT_RESPONSE_TIMEOUT,
        types::{DeviceModel, PollCycle, Reading},
    },
    utils::CancelToken,
};

/// Reads every registered device once per cycle.
///
/// Recovery policy:
/// - a link left `Degraded` by the previous cycle is reconnected before the
///   first read;
/// - every device that finds the link `Disconnected` triggers one reconnect
///   attempt; if it fails, that device reports `error` without I/O;
/// - each device is read at most once per cycle, so a dead device costs one
///   timeout interval.
pub struct Poller {
    connection: Arc<ConnectionManager>,
    registry: Arc<RwLock<DeviceRegistry>>,
    read_timeout: Duration,
    cancel: CancelToken,
}

impl Poller {
    pub fn new(connection: Arc<ConnectionManager>, registry: Arc<RwLock<DeviceRegistry>>) -> Self {
        Self {
            connection,
            registry,
            read_timeout: DEFAULT_RESPONSE_TIMEOUT,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn registry(&self) -> &Arc<RwLock<DeviceRegistry>> {
        &self.registry
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn poll_once(&self) -> PollCycle {
        // Snapshot so registry edits during the cycle cannot reorder it.
        let devices = self.registry.read().all().to_vec();
        let mut cycle = PollCycle::default();

        if self.connection.state() == ConnectionState::Degraded {
            log::info!("Link degraded in the previous cycle, reconnecting before reading");
            cycle.reconnect_attempted = true;
            if let Err(err) = self.connection.reconnect() {
                log::error!("Reconnect failed: {err}");
            }
        }

        for device in &devices {
            if self.cancel.is_cancelled() {
                log::warn!("Poll cycle cancelled");
                cycle.cancelled = true;
                self.connection.mark_degraded();
                break;
            }

            if self.connection.state() == ConnectionState::Disconnected {
                log::warn!("Modbus link is down, trying to reconnect...");
                cycle.reconnect_attempted = true;
                if let Err(err) = self.connection.reconnect() {
                    log::error!("Could not reconnect to the Modbus link: {err}");
                    cycle
                        .readings
                        .push(Reading::failed(device.address, err.to_string()));
                    continue;
                }
            }

            cycle.readings.push(self.read_device(device));
        }

        cycle.all_failed =
            !cycle.readings.is_empty() && cycle.readings.iter().all(Reading::is_error);
        if cycle.all_failed {
            log::warn!(
                "All {} devices failed this cycle, a full reconnect is due",
                cycle.readings.len()
            );
        }
        cycle
    }

    fn read_device(&self, device: &DeviceModel) -> Reading {
        log::debug!(
            "Reading device {} (address: {}, register: {}, type: {})",
            device.name,
            device.address,
            device.register,
            device.register_type
        );

        let raw = match RegisterCodec::new(&self.connection)
            .with_timeout(self.read_timeout)
            .read_value(device.address, device.register, device.register_type)
        {
            Ok(raw) => raw,
            Err(err) => {
                log::warn!(
                    "Failed to read device {} (address: {}, register: {}): {err}",
                    device.name,
                    device.address,
                    device.register
                );
                return Reading::failed(device.address, err.to_string());
            }
        };

        let (value, out_of_range) = device.normalize(raw);
        if out_of_range {
            log::warn!(
                "Value out of range for {}: {} {} (min: {}, max: {})",
                device.name,
                raw * device.scale + device.offset,
                device.unit,
                device.min_value,
                device.max_value
            );
        }
        let status = classify(value, device);
        log::debug!("Processed value for {}: {} {} [{}]", device.name, value, device.unit, status);
        Reading::value(device.address, raw, value, status, out_of_range)
    }
}
