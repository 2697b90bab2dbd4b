use thiserror::Error;

use crate::protocol::types::RegisterType;

/// Errors surfaced by the connection, codec, scanner and poller layers.
#[derive(Debug, Error)]
pub enum ModbusError {
    /// The serial transport could not be opened (missing or busy port).
    #[error("failed to open transport on {port}: {reason}")]
    TransportOpen { port: String, reason: String },

    /// The device did not answer within the response timeout.
    #[error("no response from device {address}")]
    NoResponse { address: u8 },

    /// The device answered with a malformed or unexpected frame.
    #[error("invalid response from device {address}: {reason}")]
    InvalidResponse { address: u8, reason: String },

    /// Writing to a read-only register type.
    #[error("operation not supported on {register_type} registers")]
    UnsupportedOperation { register_type: RegisterType },

    #[error("not connected")]
    NotConnected,

    #[error("invalid device address {0}, must be within 1..=247")]
    InvalidAddress(u16),

    #[error("invalid address range {start}..={end}")]
    InvalidAddressRange { start: u16, end: u16 },

    #[error("value {value} cannot be written to {register_type} registers")]
    InvalidValue {
        register_type: RegisterType,
        value: f64,
    },

    #[error("transport I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled,
}

impl ModbusError {
    /// Whether the error came from talking to the bus, as opposed to a
    /// precondition rejected before any I/O.
    pub fn is_communication(&self) -> bool {
        matches!(
            self,
            ModbusError::NoResponse { .. }
                | ModbusError::InvalidResponse { .. }
                | ModbusError::Io(_)
                | ModbusError::Cancelled
        )
    }
}

pub type Result<T> = std::result::Result<T, ModbusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_communication_classification() {
        assert!(ModbusError::NoResponse { address: 3 }.is_communication());
        assert!(ModbusError::InvalidResponse {
            address: 3,
            reason: "crc".to_string()
        }
        .is_communication());
        assert!(!ModbusError::NotConnected.is_communication());
        assert!(!ModbusError::UnsupportedOperation {
            register_type: RegisterType::InputRegister
        }
        .is_communication());
        assert!(!ModbusError::TransportOpen {
            port: "COM3".to_string(),
            reason: "busy".to_string()
        }
        .is_communication());
    }
}
