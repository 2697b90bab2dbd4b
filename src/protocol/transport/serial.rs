use std::{
    io::{ErrorKind, Read, Write},
    time::Duration,
};

use rmodbus::{client::ModbusRequest, ModbusProto};
use serialport::{ClearBuffer, DataBits, Parity, StopBits};

use super::{LineSettings, RtuTransport, TransportOpener};
use crate::{
    error::{ModbusError, Result},
    protocol::types::FunctionCode,
};

/// Modbus RTU over a physical serial port.
pub struct SerialTransport {
    port_name: String,
    port: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    /// Open `settings.port_name` as 8N1, enabling exclusive access on Unix systems.
    pub fn open(settings: &LineSettings) -> Result<Self> {
        let port_name = settings.port_name.clone();
        let builder = serialport::new(&port_name, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(settings.timeout);

        let open_error = |reason: String| ModbusError::TransportOpen {
            port: port_name.clone(),
            reason,
        };

        #[cfg(unix)]
        let port: Box<dyn serialport::SerialPort> = {
            let mut handle = builder
                .open_native()
                .map_err(|err| open_error(err.to_string()))?;
            handle
                .set_exclusive(true)
                .map_err(|err| open_error(format!("failed to acquire exclusive access: {err}")))?;
            Box::new(handle)
        };

        #[cfg(not(unix))]
        let port = builder
            .open()
            .map_err(|err| open_error(err.to_string()))?;

        log::info!(
            "Opened {} @ {} baud (8N1, timeout {:?})",
            port_name,
            settings.baud_rate,
            settings.timeout
        );
        Ok(Self { port_name, port })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    fn send(&mut self, frame: &[u8]) -> Result<()> {
        // Drop anything left over from an earlier, timed-out exchange.
        self.port
            .clear(ClearBuffer::Input)
            .map_err(std::io::Error::from)?;
        self.port.write_all(frame)?;
        self.port.flush()?;
        log::debug!(
            "Sent Modbus request: {}",
            frame
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect::<Vec<_>>()
                .join(" ")
        );
        Ok(())
    }

    /// Read one reply frame. The length is derived from the header: an
    /// exception reply is 5 bytes, a read reply is `3 + byte_count + 2`, a
    /// single write is echoed back as 8 bytes.
    fn receive(&mut self, address: u8, function: FunctionCode) -> Result<Vec<u8>> {
        let mut header = [0u8; 3];
        match self.port.read_exact(&mut header) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::TimedOut => {
                return Err(ModbusError::NoResponse { address });
            }
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                return Err(ModbusError::InvalidResponse {
                    address,
                    reason: "truncated frame header".to_string(),
                });
            }
            Err(err) => return Err(err.into()),
        }

        if header[0] != address {
            return Err(ModbusError::InvalidResponse {
                address,
                reason: format!("station id mismatch, got {}", header[0]),
            });
        }

        let remaining = if header[1] & 0x80 != 0 {
            2
        } else if matches!(
            function,
            FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister
        ) {
            5
        } else {
            header[2] as usize + 2
        };

        let mut frame = header.to_vec();
        frame.resize(3 + remaining, 0);
        match self.port.read_exact(&mut frame[3..]) {
            Ok(()) => {}
            Err(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::UnexpectedEof) => {
                return Err(ModbusError::InvalidResponse {
                    address,
                    reason: format!("truncated frame after {} bytes", header.len()),
                });
            }
            Err(err) => return Err(err.into()),
        }

        log::debug!(
            "Received Modbus response: {}",
            frame
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect::<Vec<_>>()
                .join(" ")
        );
        Ok(frame)
    }
}

impl RtuTransport for SerialTransport {
    fn read(&mut self, address: u8, function: FunctionCode, register: u16) -> Result<Vec<u8>> {
        let mut request = ModbusRequest::new(address, ModbusProto::Rtu);
        let mut raw = Vec::with_capacity(8);
        let generated = match function {
            FunctionCode::ReadCoils => request.generate_get_coils(register, 1, &mut raw),
            FunctionCode::ReadDiscreteInputs => {
                request.generate_get_discretes(register, 1, &mut raw)
            }
            FunctionCode::ReadHoldingRegisters => {
                request.generate_get_holdings(register, 1, &mut raw)
            }
            FunctionCode::ReadInputRegisters => request.generate_get_inputs(register, 1, &mut raw),
            FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister => {
                return Err(ModbusError::Io(std::io::Error::new(
                    ErrorKind::InvalidInput,
                    format!("function {function} is not a read"),
                )));
            }
        };
        generated.map_err(|err| {
            std::io::Error::new(ErrorKind::InvalidInput, format!("failed to build request: {err}"))
        })?;

        self.send(&raw)?;
        let frame = self.receive(address, function)?;
        request
            .parse_ok(&frame)
            .map_err(|err| ModbusError::InvalidResponse {
                address,
                reason: err.to_string(),
            })?;

        Ok(frame[3..frame.len() - 2].to_vec())
    }

    fn write(
        &mut self,
        address: u8,
        function: FunctionCode,
        register: u16,
        word: u16,
    ) -> Result<()> {
        let mut request = ModbusRequest::new(address, ModbusProto::Rtu);
        let mut raw = Vec::with_capacity(8);
        let generated = match function {
            FunctionCode::WriteSingleCoil => {
                request.generate_set_coil(register, word != 0, &mut raw)
            }
            FunctionCode::WriteSingleRegister => {
                request.generate_set_holding(register, word, &mut raw)
            }
            _ => {
                return Err(ModbusError::Io(std::io::Error::new(
                    ErrorKind::InvalidInput,
                    format!("function {function} is not a write"),
                )));
            }
        };
        generated.map_err(|err| {
            std::io::Error::new(ErrorKind::InvalidInput, format!("failed to build request: {err}"))
        })?;

        self.send(&raw)?;
        let frame = self.receive(address, function)?;
        request
            .parse_ok(&frame)
            .map_err(|err| ModbusError::InvalidResponse {
                address,
                reason: err.to_string(),
            })
    }

    fn timeout(&self) -> Duration {
        self.port.timeout()
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.port
            .set_timeout(timeout)
            .map_err(|err| ModbusError::Io(err.into()))
    }

    fn close(&mut self) -> Result<()> {
        self.port.flush()?;
        log::info!("Closed {}", self.port_name);
        Ok(())
    }
}

/// Opens [`SerialTransport`]s; the production opener.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialOpener;

impl TransportOpener for SerialOpener {
    fn open(&self, settings: &LineSettings) -> Result<Box<dyn RtuTransport>> {
        Ok(Box::new(SerialTransport::open(settings)?))
    }
}
