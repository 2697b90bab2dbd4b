use std::time::Duration;

use super::{
    connection::ConnectionManager,
    transport::{TimeoutGuard, COIL_OFF, COIL_ON, DEFAULT_RESPONSE_TIMEOUT},
    types::{validate_address, FunctionCode, RegisterType},
};
use crate::error::{ModbusError, Result};

/// Turn the data bytes of a read reply into a value. Bits become 0.0/1.0,
/// words are read big-endian.
pub fn decode_value(function: FunctionCode, data: &[u8]) -> std::result::Result<f64, String> {
    if function.is_bit_access() {
        let byte = data
            .first()
            .ok_or_else(|| "empty bit response".to_string())?;
        // First requested bit sits in the LSB of the first data byte.
        Ok(f64::from(byte & 0x01))
    } else {
        match data {
            [hi, lo, ..] => Ok(f64::from(u16::from_be_bytes([*hi, *lo]))),
            _ => Err(format!("expected 2 data bytes, got {}", data.len())),
        }
    }
}

/// Map a value onto the write function and wire word for `register_type`.
pub fn encode_value(register_type: RegisterType, value: f64) -> Result<(FunctionCode, u16)> {
    let function = register_type
        .write_function()
        .ok_or(ModbusError::UnsupportedOperation { register_type })?;

    let invalid = ModbusError::InvalidValue {
        register_type,
        value,
    };
    if !value.is_finite() {
        return Err(invalid);
    }

    let word = match function {
        FunctionCode::WriteSingleCoil => {
            if value != 0.0 {
                COIL_ON
            } else {
                COIL_OFF
            }
        }
        _ => {
            if value.fract() != 0.0 || !(0.0..=f64::from(u16::MAX)).contains(&value) {
                return Err(invalid);
            }
            value as u16
        }
    };
    Ok((function, word))
}

/// Value-level register access over the connection manager's transport.
///
/// Every call runs under a scoped timeout override (1 s by default) and
/// reports its outcome to the connection manager.
pub struct RegisterCodec<'a> {
    connection: &'a ConnectionManager,
    timeout: Duration,
}

impl<'a> RegisterCodec<'a> {
    pub fn new(connection: &'a ConnectionManager) -> Self {
        Self {
            connection,
            timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn read_value(&self, address: u8, register: u16, register_type: RegisterType) -> Result<f64> {
        let address = validate_address(address.into())?;
        let function = register_type.read_function();

        let result = self.connection.transact(|transport| {
            let mut guard = TimeoutGuard::new(transport, self.timeout)?;
            let data = guard.read(address, function, register)?;
            decode_value(function, &data)
                .map_err(|reason| ModbusError::InvalidResponse { address, reason })
        });

        match &result {
            Ok(value) => log::debug!(
                "Read {value} from device {address} ({register_type} {register})"
            ),
            Err(err) => log_failure(address, register, err),
        }
        result
    }

    pub fn write_value(
        &self,
        address: u8,
        register: u16,
        register_type: RegisterType,
        value: f64,
    ) -> Result<()> {
        let (function, word) = encode_value(register_type, value)?;
        let address = validate_address(address.into())?;

        let result = self.connection.transact(|transport| {
            let mut guard = TimeoutGuard::new(transport, self.timeout)?;
            guard.write(address, function, register, word)
        });

        match &result {
            Ok(()) => log::debug!(
                "Wrote {value} to device {address} ({register_type} {register})"
            ),
            Err(err) => log_failure(address, register, err),
        }
        result
    }
}

fn log_failure(address: u8, register: u16, err: &ModbusError) {
    match err {
        ModbusError::NoResponse { .. } => {
            log::warn!("No response from device {address} (register {register})")
        }
        ModbusError::InvalidResponse { reason, .. } => {
            log::warn!("Invalid response from device {address} (register {register}): {reason}")
        }
        other => log::error!("Register {register} of device {address} failed: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        connection::ConnectionState,
        transport::{BusEvent, LineSettings, VirtualBus, VirtualDevice, VirtualOpener},
    };

    fn connected(bus: &VirtualBus) -> ConnectionManager {
        let conn = ConnectionManager::new(
            LineSettings::new("virtual", 9600),
            VirtualOpener::new(bus.clone()),
        )
        .with_probe_addresses(Vec::new());
        conn.connect().unwrap();
        bus.clear_events();
        conn
    }

    #[test]
    fn test_decode_value() {
        assert_eq!(decode_value(FunctionCode::ReadCoils, &[0x01]).unwrap(), 1.0);
        assert_eq!(decode_value(FunctionCode::ReadDiscreteInputs, &[0x02]).unwrap(), 0.0);
        assert_eq!(
            decode_value(FunctionCode::ReadInputRegisters, &[0x01, 0x2C]).unwrap(),
            300.0
        );
        assert!(decode_value(FunctionCode::ReadHoldingRegisters, &[0x01]).is_err());
        assert!(decode_value(FunctionCode::ReadCoils, &[]).is_err());
    }

    #[test]
    fn test_encode_value() {
        assert_eq!(
            encode_value(RegisterType::Coil, 1.0).unwrap(),
            (FunctionCode::WriteSingleCoil, COIL_ON)
        );
        assert_eq!(
            encode_value(RegisterType::HoldingRegister, 42.0).unwrap(),
            (FunctionCode::WriteSingleRegister, 42)
        );
        assert!(matches!(
            encode_value(RegisterType::HoldingRegister, 1.5),
            Err(ModbusError::InvalidValue { .. })
        ));
        assert!(matches!(
            encode_value(RegisterType::HoldingRegister, 70000.0),
            Err(ModbusError::InvalidValue { .. })
        ));
        assert!(matches!(
            encode_value(RegisterType::DiscreteInput, 1.0),
            Err(ModbusError::UnsupportedOperation { .. })
        ));
    }

    #[test]
    fn test_write_then_read_holding_echo() {
        let bus = VirtualBus::new().with_device(4, VirtualDevice::registers());
        let conn = connected(&bus);
        let codec = RegisterCodec::new(&conn);

        codec
            .write_value(4, 10, RegisterType::HoldingRegister, 42.0)
            .unwrap();
        let value = codec
            .read_value(4, 10, RegisterType::HoldingRegister)
            .unwrap();
        assert_eq!(value, 42.0);
    }

    #[test]
    fn test_write_read_only_register_does_no_io() {
        let bus = VirtualBus::new().with_device(4, VirtualDevice::registers());
        let conn = connected(&bus);
        let codec = RegisterCodec::new(&conn);

        let result = codec.write_value(4, 0, RegisterType::InputRegister, 1.0);
        assert!(matches!(
            result,
            Err(ModbusError::UnsupportedOperation {
                register_type: RegisterType::InputRegister
            })
        ));
        assert!(bus.events().is_empty());
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_read_uses_scoped_timeout() {
        let bus = VirtualBus::new().with_device(1, VirtualDevice::registers().with_coil(3, true));
        let conn = connected(&bus);
        let before = bus.current_timeout();

        let value = RegisterCodec::new(&conn)
            .with_timeout(Duration::from_millis(500))
            .read_value(1, 3, RegisterType::Coil)
            .unwrap();
        assert_eq!(value, 1.0);
        assert_eq!(bus.current_timeout(), before);
        assert_eq!(
            bus.events(),
            vec![
                BusEvent::SetTimeout(Duration::from_millis(500)),
                BusEvent::Read {
                    address: 1,
                    function: FunctionCode::ReadCoils,
                    register: 3
                },
                BusEvent::SetTimeout(before),
            ]
        );
    }

    #[test]
    fn test_failed_read_degrades_and_restores_timeout() {
        let bus = VirtualBus::new().with_device(2, VirtualDevice::Malformed);
        let conn = connected(&bus);
        let before = bus.current_timeout();

        let result = RegisterCodec::new(&conn).read_value(2, 0, RegisterType::InputRegister);
        assert!(matches!(
            result,
            Err(ModbusError::InvalidResponse { address: 2, .. })
        ));
        assert_eq!(conn.state(), ConnectionState::Degraded);
        assert_eq!(bus.current_timeout(), before);
    }

    #[test]
    fn test_read_rejects_broadcast_address() {
        let bus = VirtualBus::new();
        let conn = connected(&bus);
        let result = RegisterCodec::new(&conn).read_value(0, 0, RegisterType::InputRegister);
        assert!(matches!(result, Err(ModbusError::InvalidAddress(0))));
        assert_eq!(bus.io_count(), 0);
    }
}
