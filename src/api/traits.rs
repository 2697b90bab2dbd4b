/// Downstream collaborator interfaces
///
/// Persistence, UI and notification delivery live outside this crate. They
/// plug in through these traits; a failing sink is logged and never fails a
/// poll cycle.
use anyhow::Result;
use std::sync::Arc;

use crate::protocol::types::{Alert, Reading};

/// Receives every reading, once per device per cycle.
///
/// Storage implementations key readings by `(device_address, timestamp)`.
pub trait ReadingSink: Send + Sync {
    fn handle_reading(&self, reading: &Reading) -> Result<()>;
}

/// Receives status transitions into `warning` or `alarm`.
///
/// The sink decides channel and cadence; the core only classifies.
pub trait AlertSink: Send + Sync {
    fn handle_alert(&self, alert: &Alert) -> Result<()>;
}

/// Logging sink that writes readings and alerts to the log
pub struct LoggingSink;

impl ReadingSink for LoggingSink {
    fn handle_reading(&self, reading: &Reading) -> Result<()> {
        match reading.normalized_value {
            Some(value) => log::info!(
                "Reading: device={}, value={}, status={}",
                reading.device_address,
                value,
                reading.status
            ),
            None => log::info!(
                "Reading: device={}, status={}, error={}",
                reading.device_address,
                reading.status,
                reading.error.as_deref().unwrap_or("unknown")
            ),
        }
        Ok(())
    }
}

impl AlertSink for LoggingSink {
    fn handle_alert(&self, alert: &Alert) -> Result<()> {
        log::warn!(
            "{} on {} (device {}): {} reached threshold {}",
            alert.status,
            alert.device_name,
            alert.device_address,
            alert.value,
            alert.threshold
        );
        Ok(())
    }
}

/// Flume-based sink that forwards readings through a channel
pub struct FlumeReadingSink {
    sender: flume::Sender<Reading>,
}

impl FlumeReadingSink {
    /// Create a new sink with an unbounded channel
    pub fn new() -> (Self, flume::Receiver<Reading>) {
        let (sender, receiver) = flume::unbounded();
        (Self { sender }, receiver)
    }

    /// Create a new sink with a bounded channel
    pub fn with_capacity(cap: usize) -> (Self, flume::Receiver<Reading>) {
        let (sender, receiver) = flume::bounded(cap);
        (Self { sender }, receiver)
    }
}

impl Default for FlumeReadingSink {
    fn default() -> Self {
        Self::new().0
    }
}

impl ReadingSink for FlumeReadingSink {
    fn handle_reading(&self, reading: &Reading) -> Result<()> {
        self.sender
            .send(reading.clone())
            .map_err(|_| anyhow::anyhow!("Failed to send reading: receiver dropped"))
    }
}

/// Flume-based sink that forwards alerts through a channel
pub struct FlumeAlertSink {
    sender: flume::Sender<Alert>,
}

impl FlumeAlertSink {
    pub fn new() -> (Self, flume::Receiver<Alert>) {
        let (sender, receiver) = flume::unbounded();
        (Self { sender }, receiver)
    }
}

impl Default for FlumeAlertSink {
    fn default() -> Self {
        Self::new().0
    }
}

impl AlertSink for FlumeAlertSink {
    fn handle_alert(&self, alert: &Alert) -> Result<()> {
        self.sender
            .send(alert.clone())
            .map_err(|_| anyhow::anyhow!("Failed to send alert: receiver dropped"))
    }
}

pub fn dispatch_reading(sinks: &[Arc<dyn ReadingSink>], reading: &Reading) {
    for sink in sinks {
        if let Err(err) = sink.handle_reading(reading) {
            log::warn!(
                "Reading sink failed for device {}: {err}",
                reading.device_address
            );
        }
    }
}

pub fn dispatch_alert(sinks: &[Arc<dyn AlertSink>], alert: &Alert) {
    for sink in sinks {
        if let Err(err) = sink.handle_alert(alert) {
            log::warn!("Alert sink failed for device {}: {err}", alert.device_address);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::Status;

    #[test]
    fn test_flume_reading_sink() {
        let (sink, receiver) = FlumeReadingSink::new();
        let reading = Reading::value(3, 120.0, 12.0, Status::Normal, false);

        sink.handle_reading(&reading).unwrap();
        assert_eq!(receiver.recv().unwrap(), reading);
    }

    #[test]
    fn test_bounded_reading_sink() {
        let (sink, receiver) = FlumeReadingSink::with_capacity(1);
        assert_eq!(receiver.capacity(), Some(1));

        let first = Reading::value(1, 10.0, 10.0, Status::Normal, false);
        let second = Reading::failed(2, "no response from device 2");
        sink.handle_reading(&first).unwrap();
        assert!(receiver.is_full());
        assert_eq!(receiver.recv().unwrap(), first);

        sink.handle_reading(&second).unwrap();
        assert_eq!(receiver.recv().unwrap(), second);
    }

    #[test]
    fn test_default_sinks_have_no_receiver() {
        let reading = Reading::value(1, 10.0, 10.0, Status::Normal, false);
        assert!(FlumeReadingSink::default().handle_reading(&reading).is_err());
    }

    #[test]
    fn test_dispatch_survives_dropped_receiver() {
        let (flume_sink, receiver) = FlumeReadingSink::new();
        drop(receiver);
        let (alive, alive_rx) = FlumeReadingSink::new();
        let sinks: Vec<Arc<dyn ReadingSink>> =
            vec![Arc::new(flume_sink), Arc::new(LoggingSink), Arc::new(alive)];

        let reading = Reading::failed(9, "no response from device 9");
        dispatch_reading(&sinks, &reading);
        assert_eq!(alive_rx.try_recv().unwrap(), reading);
    }
}
