use std::{collections::BTreeSet, time::Duration};

use crate::{
    core::profiles::ProfileTable,
    error::{ModbusError, Result},
    protocol::{
        codec::decode_value,
        connection::ConnectionManager,
        registry::DeviceRegistry,
        transport::{TimeoutGuard, SCAN_PROBE_TIMEOUT},
        types::{validate_address, FunctionCode},
    },
    utils::CancelToken,
};

/// Sweeps an address range for live stations.
///
/// Each address gets one read of input register 0 under a short timeout.
/// A malformed reply still counts as a live station. The whole sweep holds
/// the transport, so nothing else can interleave on the line.
pub struct Scanner<'a> {
    connection: &'a ConnectionManager,
    probe_timeout: Duration,
    cancel: CancelToken,
}

impl<'a> Scanner<'a> {
    pub fn new(connection: &'a ConnectionManager) -> Self {
        Self {
            connection,
            probe_timeout: SCAN_PROBE_TIMEOUT,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn scan(&self, start: u16, end: u16) -> Result<BTreeSet<u8>> {
        if !self.connection.is_open() {
            log::error!("Cannot scan for devices: Modbus client is not connected");
            return Err(ModbusError::NotConnected);
        }
        let first = validate_address(start)?;
        let last = validate_address(end)?;
        if first > last {
            return Err(ModbusError::InvalidAddressRange { start, end });
        }

        log::info!("Scanning Modbus addresses {first} to {last}...");
        let result = self.connection.with_transport(|transport| {
            let mut guard = TimeoutGuard::new(transport, self.probe_timeout)?;
            let mut found = BTreeSet::new();

            for address in first..=last {
                if self.cancel.is_cancelled() {
                    return Err(ModbusError::Cancelled);
                }
                log::debug!("Checking address {address}...");
                match guard.read(address, FunctionCode::ReadInputRegisters, 0) {
                    Ok(data) => {
                        match decode_value(FunctionCode::ReadInputRegisters, &data) {
                            Ok(value) => {
                                log::info!("Device found at address {address} (value read: {value})")
                            }
                            Err(_) => log::info!("Device found at address {address}"),
                        }
                        found.insert(address);
                    }
                    Err(ModbusError::NoResponse { .. }) => {}
                    Err(ModbusError::InvalidResponse { reason, .. }) => {
                        log::warn!("Invalid response from address {address}: {reason}");
                        found.insert(address);
                    }
                    Err(err) => log::warn!("Error while checking address {address}: {err}"),
                }
            }
            Ok(found)
        });

        match &result {
            Ok(found) => log::info!("Scan finished, {} devices found", found.len()),
            Err(ModbusError::Cancelled) => {
                log::warn!("Scan cancelled");
                self.connection.mark_degraded();
            }
            Err(err) => log::error!("Error during device scan: {err}"),
        }
        result
    }

    /// Scan and register a profile-derived model for each responsive address.
    ///
    /// Returns the addresses that were registered; live addresses without a
    /// matching profile are skipped.
    pub fn discover(
        &self,
        start: u16,
        end: u16,
        profiles: &ProfileTable,
        registry: &mut DeviceRegistry,
    ) -> Result<Vec<u8>> {
        let found = self.scan(start, end)?;
        let mut registered = Vec::with_capacity(found.len());
        for address in found {
            match profiles.device_for(address) {
                Some(device) => {
                    registry.add(device)?;
                    registered.push(address);
                }
                None => log::warn!("No device profile covers address {address}, skipping"),
            }
        }
        Ok(registered)
    }
}
