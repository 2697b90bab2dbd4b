/// Transport boundary: "read/write register N of device A using function code F".
///
/// Framing, CRC and line timing live behind [`RtuTransport`]. The serial
/// implementation delegates them to `rmodbus`; the virtual bus simulates
/// them in memory.
mod serial;
mod virtual_bus;

use std::{
    ops::{Deref, DerefMut},
    time::Duration,
};

use crate::{error::Result, protocol::types::FunctionCode};

pub use serial::{SerialOpener, SerialTransport};
pub use virtual_bus::{BusEvent, VirtualBus, VirtualDevice, VirtualOpener};

/// Response timeout applied to every register call in steady state.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(1000);
/// Per-address timeout while sweeping the bus.
pub const SCAN_PROBE_TIMEOUT: Duration = Duration::from_millis(200);

/// Wire value of an energised coil in a write-single-coil request.
pub const COIL_ON: u16 = 0xFF00;
pub const COIL_OFF: u16 = 0x0000;

/// Line configuration used when opening a transport. The frame format is
/// always 8 data bits, no parity, 1 stop bit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineSettings {
    pub port_name: String,
    pub baud_rate: u32,
    pub timeout: Duration,
}

impl LineSettings {
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

/// An open Modbus RTU link.
///
/// Implementations must classify failures as `NoResponse` (nothing came
/// back before the timeout), `InvalidResponse` (bad CRC, truncated frame,
/// wrong station, exception reply) or `Io` (the link itself failed).
pub trait RtuTransport: Send {
    /// Issue a read of one register/bit and return the data bytes of the
    /// reply (the payload after the byte count, without CRC).
    fn read(&mut self, address: u8, function: FunctionCode, register: u16) -> Result<Vec<u8>>;

    /// Issue a single write. For coils `word` is [`COIL_ON`] or [`COIL_OFF`].
    fn write(&mut self, address: u8, function: FunctionCode, register: u16, word: u16)
        -> Result<()>;

    fn timeout(&self) -> Duration;

    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Opens transports for the connection manager.
pub trait TransportOpener: Send + Sync {
    fn open(&self, settings: &LineSettings) -> Result<Box<dyn RtuTransport>>;
}

/// Overrides the transport timeout for its lifetime and restores the
/// previous value on drop, whatever path the caller leaves by.
pub struct TimeoutGuard<'a> {
    transport: &'a mut dyn RtuTransport,
    previous: Duration,
}

impl<'a> TimeoutGuard<'a> {
    pub fn new(transport: &'a mut dyn RtuTransport, timeout: Duration) -> Result<Self> {
        let previous = transport.timeout();
        transport.set_timeout(timeout)?;
        Ok(Self {
            transport,
            previous,
        })
    }
}

impl<'a> Deref for TimeoutGuard<'a> {
    type Target = dyn RtuTransport + 'a;

    fn deref(&self) -> &Self::Target {
        &*self.transport
    }
}

impl<'a> DerefMut for TimeoutGuard<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.transport
    }
}

impl Drop for TimeoutGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.transport.set_timeout(self.previous) {
            log::warn!(
                "Failed to restore transport timeout to {:?}: {err}",
                self.previous
            );
        }
    }
}
