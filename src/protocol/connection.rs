/// Connection lifecycle for the single serial link.
///
/// The transport handle and the [`ConnectionState`] live behind one mutex,
/// so every register call is serialized and every state transition happens
/// here. Other components only observe the state.
use parking_lot::Mutex;
use serde::Serialize;
use strum::Display;

use super::{
    transport::{
        LineSettings, RtuTransport, SerialOpener, TimeoutGuard, TransportOpener,
        DEFAULT_RESPONSE_TIMEOUT,
    },
    types::FunctionCode,
};
use crate::error::{ModbusError, Result};

/// Addresses probed after opening the transport, in this order.
pub const DEFAULT_PROBE_ADDRESSES: [u8; 5] = [1, 2, 3, 4, 5];

#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Transport open, but the last operation failed on the wire.
    Degraded,
}

/// Diagnostics returned by a successful [`ConnectionManager::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A probe address answered.
    Confirmed { address: u8 },
    /// The transport opened but no probe address answered.
    Unconfirmed,
    AlreadyConnected,
}

struct Link {
    transport: Option<Box<dyn RtuTransport>>,
    state: ConnectionState,
}

impl Link {
    fn close(&mut self) -> bool {
        let Some(mut transport) = self.transport.take() else {
            return false;
        };
        if let Err(err) = transport.close() {
            log::error!("Error while closing the Modbus transport: {err}");
        }
        true
    }
}

pub struct ConnectionManager {
    settings: LineSettings,
    probe_addresses: Vec<u8>,
    opener: Box<dyn TransportOpener>,
    link: Mutex<Link>,
}

impl ConnectionManager {
    pub fn new(settings: LineSettings, opener: impl TransportOpener + 'static) -> Self {
        Self {
            settings,
            probe_addresses: DEFAULT_PROBE_ADDRESSES.to_vec(),
            opener: Box::new(opener),
            link: Mutex::new(Link {
                transport: None,
                state: ConnectionState::Disconnected,
            }),
        }
    }

    /// Manager for a physical port at `baud_rate`, 8N1, 1 s response timeout.
    pub fn serial(port_name: &str, baud_rate: u32) -> Self {
        Self::new(LineSettings::new(port_name, baud_rate), SerialOpener)
    }

    pub fn with_probe_addresses(mut self, addresses: Vec<u8>) -> Self {
        self.probe_addresses = addresses;
        self
    }

    pub fn settings(&self) -> &LineSettings {
        &self.settings
    }

    pub fn state(&self) -> ConnectionState {
        self.link.lock().state
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Connected | ConnectionState::Degraded
        )
    }

    /// Open the transport and run the probe sequence.
    ///
    /// Only a transport that cannot be opened is an error; a silent bus
    /// still ends up `Connected` with [`ConnectOutcome::Unconfirmed`].
    pub fn connect(&self) -> Result<ConnectOutcome> {
        let mut link = self.link.lock();
        if link.state == ConnectionState::Connected && link.transport.is_some() {
            return Ok(ConnectOutcome::AlreadyConnected);
        }
        link.close();
        link.state = ConnectionState::Connecting;

        log::info!(
            "Connecting to {} @ {} baud",
            self.settings.port_name,
            self.settings.baud_rate
        );
        let mut transport = match self.opener.open(&self.settings) {
            Ok(transport) => transport,
            Err(err) => {
                link.state = ConnectionState::Disconnected;
                log::error!(
                    "Failed to open Modbus transport on {}: {err}",
                    self.settings.port_name
                );
                return Err(match err {
                    ModbusError::TransportOpen { .. } => err,
                    other => ModbusError::TransportOpen {
                        port: self.settings.port_name.clone(),
                        reason: other.to_string(),
                    },
                });
            }
        };

        let outcome = self.probe(transport.as_mut());
        link.transport = Some(transport);
        link.state = ConnectionState::Connected;
        Ok(outcome)
    }

    fn probe(&self, transport: &mut dyn RtuTransport) -> ConnectOutcome {
        for &address in &self.probe_addresses {
            log::debug!("Probing device {address}...");
            let attempt = TimeoutGuard::new(&mut *transport, DEFAULT_RESPONSE_TIMEOUT)
                .and_then(|mut guard| guard.read(address, FunctionCode::ReadInputRegisters, 0));
            match attempt {
                Ok(_) => {
                    log::info!("Connection confirmed by device {address}");
                    return ConnectOutcome::Confirmed { address };
                }
                Err(err) => log::debug!("Probe of device {address} failed: {err}"),
            }
        }

        log::warn!("No device answered the probe sequence, continuing anyway");
        ConnectOutcome::Unconfirmed
    }

    /// Close the transport if open. Always ends in `Disconnected`.
    pub fn disconnect(&self) {
        let mut link = self.link.lock();
        if link.close() {
            log::info!("Modbus RTU connection closed");
        }
        link.state = ConnectionState::Disconnected;
    }

    pub fn reconnect(&self) -> Result<ConnectOutcome> {
        log::info!("Reconnecting to {}", self.settings.port_name);
        self.disconnect();
        self.connect()
    }

    /// Run `op` against the open transport without touching the state.
    pub(crate) fn with_transport<T>(
        &self,
        op: impl FnOnce(&mut dyn RtuTransport) -> Result<T>,
    ) -> Result<T> {
        let mut link = self.link.lock();
        let transport = link.transport.as_mut().ok_or(ModbusError::NotConnected)?;
        op(transport.as_mut())
    }

    /// Run `op` against the open transport and record its outcome:
    /// a communication failure degrades the link, a success heals it.
    pub(crate) fn transact<T>(
        &self,
        op: impl FnOnce(&mut dyn RtuTransport) -> Result<T>,
    ) -> Result<T> {
        let mut link = self.link.lock();
        let Link { transport, state } = &mut *link;
        let transport = transport.as_mut().ok_or(ModbusError::NotConnected)?;

        let result = op(transport.as_mut());
        match &result {
            Ok(_) if *state == ConnectionState::Degraded => {
                log::info!("Modbus link recovered");
                *state = ConnectionState::Connected;
            }
            Err(err) if err.is_communication() && *state == ConnectionState::Connected => {
                log::warn!("Modbus link degraded: {err}");
                *state = ConnectionState::Degraded;
            }
            _ => {}
        }
        result
    }

    /// Flag the link as degraded after an interrupted operation.
    pub(crate) fn mark_degraded(&self) {
        let mut link = self.link.lock();
        if link.state == ConnectionState::Connected {
            link.state = ConnectionState::Degraded;
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.link.get_mut().close();
    }
}
