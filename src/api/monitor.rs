use parking_lot::RwLock;
use std::{collections::BTreeSet, sync::Arc};

use super::{poll_loop::PollLoop, poller::Poller, scanner::Scanner};
use crate::{
    core::config::MonitorConfig,
    error::Result,
    protocol::{
        codec::RegisterCodec,
        connection::{ConnectOutcome, ConnectionManager},
        registry::DeviceRegistry,
        transport::TransportOpener,
        types::{PollCycle, RegisterType},
    },
};

/// Wires a [`MonitorConfig`] into a connection, a registry and the
/// operations that run over them.
pub struct Monitor {
    config: MonitorConfig,
    connection: Arc<ConnectionManager>,
    registry: Arc<RwLock<DeviceRegistry>>,
}

impl Monitor {
    /// Monitor over the configured physical serial port.
    pub fn new(config: MonitorConfig) -> Self {
        let connection = config.connection_manager();
        Self::assemble(config, connection)
    }

    pub fn with_opener(config: MonitorConfig, opener: impl TransportOpener + 'static) -> Self {
        let connection = config.connection_manager_with(opener);
        Self::assemble(config, connection)
    }

    fn assemble(config: MonitorConfig, connection: ConnectionManager) -> Self {
        let registry = config.registry();
        Self {
            config,
            connection: Arc::new(connection),
            registry: Arc::new(RwLock::new(registry)),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn registry(&self) -> &Arc<RwLock<DeviceRegistry>> {
        &self.registry
    }

    /// Connect, then auto-discover devices when none are configured.
    pub fn start(&self) -> Result<ConnectOutcome> {
        let outcome = self.connection.connect()?;
        if self.registry.read().is_empty() {
            log::info!("No devices configured, scanning for devices...");
            // Shared registry is locked only for the merge, not the sweep.
            let mut discovered = DeviceRegistry::new();
            let registered = Scanner::new(&self.connection)
                .with_probe_timeout(self.config.scan_timeout())
                .discover(
                    self.config.polling.scan_start,
                    self.config.polling.scan_end,
                    &self.config.profiles,
                    &mut discovered,
                )?;

            let mut registry = self.registry.write();
            for device in discovered.all() {
                registry.add(device.clone())?;
            }
            log::info!("Registered {} discovered devices", registered.len());
        }
        Ok(outcome)
    }

    pub fn stop(&self) {
        self.connection.disconnect();
    }

    pub fn scan(&self, start: u16, end: u16) -> Result<BTreeSet<u8>> {
        Scanner::new(&self.connection)
            .with_probe_timeout(self.config.scan_timeout())
            .scan(start, end)
    }

    pub fn read_value(&self, address: u8, register: u16, register_type: RegisterType) -> Result<f64> {
        RegisterCodec::new(&self.connection).read_value(address, register, register_type)
    }

    pub fn write_value(
        &self,
        address: u8,
        register: u16,
        register_type: RegisterType,
        value: f64,
    ) -> Result<()> {
        RegisterCodec::new(&self.connection).write_value(address, register, register_type, value)
    }

    pub fn poller(&self) -> Poller {
        Poller::new(self.connection.clone(), self.registry.clone())
    }

    pub fn poll_once(&self) -> PollCycle {
        self.poller().poll_once()
    }

    pub fn poll_loop(&self) -> PollLoop {
        PollLoop::new(self.poller(), self.config.poll_interval())
    }
}
