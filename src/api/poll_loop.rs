use anyhow::{anyhow, Result};
use std::{sync::Arc, time::Duration};

use super::{
    alerts::AlertTracker,
    poller::Poller,
    traits::{dispatch_alert, dispatch_reading, AlertSink, ReadingSink},
};
use crate::{protocol::types::PollCycle, utils::CancelToken};

/// Control commands accepted by a running [`PollLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollControl {
    Stop,
}

/// Periodic scheduler around [`Poller::poll_once`].
///
/// Every reading goes to the reading sinks; status transitions go to the
/// alert sinks. A cycle in which every device failed triggers a full
/// reconnect before the next one.
pub struct PollLoop {
    poller: Poller,
    interval: Duration,
    reading_sinks: Vec<Arc<dyn ReadingSink>>,
    alert_sinks: Vec<Arc<dyn AlertSink>>,
    tracker: AlertTracker,
}

impl PollLoop {
    pub fn new(poller: Poller, interval: Duration) -> Self {
        Self {
            poller,
            interval,
            reading_sinks: Vec::new(),
            alert_sinks: Vec::new(),
            tracker: AlertTracker::new(),
        }
    }

    pub fn add_reading_sink(mut self, sink: Arc<dyn ReadingSink>) -> Self {
        self.reading_sinks.push(sink);
        self
    }

    pub fn add_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alert_sinks.push(sink);
        self
    }

    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    pub fn run_cycle(&mut self) -> PollCycle {
        let cycle = self.poller.poll_once();

        {
            let registry = self.poller.registry().read();
            for reading in &cycle.readings {
                dispatch_reading(&self.reading_sinks, reading);

                let Some(device) = registry.get(reading.device_address) else {
                    continue;
                };
                if let Some(alert) = self.tracker.observe(reading, device) {
                    dispatch_alert(&self.alert_sinks, &alert);
                }
            }
        }

        if cycle.cancelled {
            log::debug!("Cycle cancelled, leaving the link for the next start");
        } else if cycle.all_failed {
            log::warn!("Every device failed, reconnecting the Modbus link");
            if let Err(err) = self.poller.connection().reconnect() {
                log::error!("Reconnect after a fully failed cycle failed: {err}");
            }
        }
        cycle
    }

    /// Poll until a [`PollControl::Stop`] arrives or the control sender is
    /// dropped.
    pub fn run(mut self, control_rx: flume::Receiver<PollControl>) -> Result<()> {
        log::info!(
            "Starting poll loop: {} devices, interval {:?}",
            self.poller.registry().read().len(),
            self.interval
        );

        loop {
            if let Ok(PollControl::Stop) = control_rx.try_recv() {
                log::info!("Poll loop received stop command, exiting");
                break;
            }

            let cycle = self.run_cycle();
            if cycle.cancelled {
                log::info!("Poll cycle cancelled, waiting for control command");
            }

            match control_rx.recv_timeout(self.interval) {
                Ok(PollControl::Stop) => {
                    log::info!("Poll loop received stop command, exiting");
                    break;
                }
                Err(flume::RecvTimeoutError::Timeout) => {}
                Err(flume::RecvTimeoutError::Disconnected) => {
                    log::info!("Poll loop control channel closed, exiting");
                    break;
                }
            }
        }
        Ok(())
    }
}

/// Handle to a [`PollLoop`] running on the blocking thread pool.
pub struct PollLoopHandle {
    cancel: CancelToken,
    control: flume::Sender<PollControl>,
    handle: tokio::task::JoinHandle<Result<()>>,
}

impl PollLoopHandle {
    /// Must be called from within a tokio runtime.
    pub fn spawn(poll_loop: PollLoop) -> Self {
        let (control, control_rx) = flume::unbounded();
        let cancel = poll_loop.poller().cancel_token().clone();
        let handle = tokio::task::spawn_blocking(move || poll_loop.run(control_rx));
        Self {
            cancel,
            control,
            handle,
        }
    }

    /// Interrupt the current cycle and stop the loop.
    pub fn stop(&self) -> Result<()> {
        self.cancel.cancel();
        self.control
            .send(PollControl::Stop)
            .map_err(|err| anyhow!("Failed to send control command: {err}"))
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn join(self) -> Result<()> {
        self.handle
            .await
            .map_err(|err| anyhow!("Poll loop task failed: {err}"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::traits::{FlumeAlertSink, FlumeReadingSink},
        protocol::{
            connection::{ConnectionManager, ConnectionState},
            registry::DeviceRegistry,
            transport::{
                BusEvent, LineSettings, RtuTransport, TransportOpener, VirtualBus, VirtualDevice,
                VirtualOpener,
            },
            types::{DeviceModel, FunctionCode, RegisterType, Status},
        },
    };
    use parking_lot::RwLock;

    fn poller(bus: &VirtualBus, addresses: &[u8]) -> Poller {
        let connection = ConnectionManager::new(
            LineSettings::new("virtual", 9600),
            VirtualOpener::new(bus.clone()),
        )
        .with_probe_addresses(Vec::new());
        let registry: DeviceRegistry = addresses
            .iter()
            .map(|&a| DeviceModel::new(format!("NH3 {a}"), a, 0, RegisterType::InputRegister))
            .collect();
        Poller::new(Arc::new(connection), Arc::new(RwLock::new(registry)))
    }

    #[test]
    fn test_run_cycle_dispatches_readings_and_alerts() {
        let bus = VirtualBus::new()
            .with_device(1, VirtualDevice::registers().with_input(0, 20))
            .with_device(2, VirtualDevice::registers().with_input(0, 95));
        let (readings, readings_rx) = FlumeReadingSink::new();
        let (alerts, alerts_rx) = FlumeAlertSink::new();
        let mut poll_loop = PollLoop::new(poller(&bus, &[1, 2]), Duration::from_millis(10))
            .add_reading_sink(Arc::new(readings))
            .add_alert_sink(Arc::new(alerts));

        poll_loop.run_cycle();
        assert_eq!(readings_rx.drain().count(), 2);
        let alert = alerts_rx.try_recv().unwrap();
        assert_eq!(alert.device_address, 2);
        assert_eq!(alert.status, Status::Alarm);
        assert!(alerts_rx.try_recv().is_err());

        // Same statuses again: readings flow, alerts do not.
        poll_loop.run_cycle();
        assert_eq!(readings_rx.drain().count(), 2);
        assert!(alerts_rx.try_recv().is_err());
    }

    #[test]
    fn test_all_failed_cycle_reconnects() {
        let bus = VirtualBus::new()
            .with_device(1, VirtualDevice::Silent)
            .with_device(2, VirtualDevice::Silent);
        let mut poll_loop = PollLoop::new(poller(&bus, &[1, 2]), Duration::from_millis(10));
        poll_loop.poller().connection().connect().unwrap();
        bus.clear_events();

        let cycle = poll_loop.run_cycle();
        assert!(cycle.all_failed);
        let opens = bus
            .events()
            .iter()
            .filter(|e| matches!(e, BusEvent::Open { .. }))
            .count();
        assert_eq!(opens, 1);
    }

    /// Transport that raises the cancel flag after every read.
    struct CancellingTransport {
        inner: Box<dyn RtuTransport>,
        cancel: CancelToken,
    }

    impl RtuTransport for CancellingTransport {
        fn read(
            &mut self,
            address: u8,
            function: FunctionCode,
            register: u16,
        ) -> crate::error::Result<Vec<u8>> {
            let result = self.inner.read(address, function, register);
            self.cancel.cancel();
            result
        }

        fn write(
            &mut self,
            address: u8,
            function: FunctionCode,
            register: u16,
            word: u16,
        ) -> crate::error::Result<()> {
            self.inner.write(address, function, register, word)
        }

        fn timeout(&self) -> Duration {
            self.inner.timeout()
        }

        fn set_timeout(&mut self, timeout: Duration) -> crate::error::Result<()> {
            self.inner.set_timeout(timeout)
        }
    }

    struct CancellingOpener {
        bus: VirtualBus,
        cancel: CancelToken,
    }

    impl TransportOpener for CancellingOpener {
        fn open(&self, settings: &LineSettings) -> crate::error::Result<Box<dyn RtuTransport>> {
            Ok(Box::new(CancellingTransport {
                inner: VirtualOpener::new(self.bus.clone()).open(settings)?,
                cancel: self.cancel.clone(),
            }))
        }
    }

    #[test]
    fn test_cancelled_cycle_skips_reconnect() {
        let bus = VirtualBus::new()
            .with_device(1, VirtualDevice::Silent)
            .with_device(2, VirtualDevice::registers());
        let cancel = CancelToken::new();
        let connection = ConnectionManager::new(
            LineSettings::new("virtual", 9600),
            CancellingOpener {
                bus: bus.clone(),
                cancel: cancel.clone(),
            },
        )
        .with_probe_addresses(Vec::new());
        let registry: DeviceRegistry = [1, 2]
            .into_iter()
            .map(|a| DeviceModel::new(format!("NH3 {a}"), a, 0, RegisterType::InputRegister))
            .collect();
        let poller = Poller::new(Arc::new(connection), Arc::new(RwLock::new(registry)))
            .with_cancel_token(cancel);
        let mut poll_loop = PollLoop::new(poller, Duration::from_millis(10));
        poll_loop.poller().connection().connect().unwrap();
        bus.clear_events();

        let cycle = poll_loop.run_cycle();
        assert!(cycle.cancelled);
        assert!(cycle.all_failed);
        assert_eq!(cycle.readings.len(), 1);
        assert!(!bus.events().iter().any(|e| matches!(e, BusEvent::Open { .. })));
        assert_eq!(
            poll_loop.poller().connection().state(),
            ConnectionState::Degraded
        );
    }

    #[tokio::test]
    async fn test_spawned_loop_stops_on_command() {
        let bus = VirtualBus::new().with_device(1, VirtualDevice::registers().with_input(0, 5));
        let (readings, readings_rx) = FlumeReadingSink::new();
        let poll_loop = PollLoop::new(poller(&bus, &[1]), Duration::from_millis(10))
            .add_reading_sink(Arc::new(readings));

        let handle = PollLoopHandle::spawn(poll_loop);
        let first = readings_rx.recv_async().await.unwrap();
        assert_eq!(first.device_address, 1);
        assert_eq!(first.normalized_value, Some(5.0));

        handle.stop().unwrap();
        tokio_test::assert_ok!(handle.join().await);
    }
}
