use parking_lot::Mutex;
use std::{collections::BTreeMap, sync::Arc, time::Duration};

use super::{LineSettings, RtuTransport, TransportOpener, COIL_OFF, DEFAULT_RESPONSE_TIMEOUT};
use crate::{
    error::{ModbusError, Result},
    protocol::types::FunctionCode,
};

/// Behaviour of one simulated station.
#[derive(Debug, Clone, PartialEq)]
pub enum VirtualDevice {
    /// Answers from its register tables; unset registers read as zero and
    /// writes are stored, so a write followed by a read echoes the value.
    Registers {
        coils: BTreeMap<u16, bool>,
        discrete_inputs: BTreeMap<u16, bool>,
        holdings: BTreeMap<u16, u16>,
        inputs: BTreeMap<u16, u16>,
    },
    /// Answers every request with a frame that fails validation.
    Malformed,
    /// Never answers.
    Silent,
}

impl VirtualDevice {
    pub fn registers() -> Self {
        VirtualDevice::Registers {
            coils: BTreeMap::new(),
            discrete_inputs: BTreeMap::new(),
            holdings: BTreeMap::new(),
            inputs: BTreeMap::new(),
        }
    }

    pub fn with_input(mut self, register: u16, value: u16) -> Self {
        if let VirtualDevice::Registers { inputs, .. } = &mut self {
            inputs.insert(register, value);
        }
        self
    }

    pub fn with_holding(mut self, register: u16, value: u16) -> Self {
        if let VirtualDevice::Registers { holdings, .. } = &mut self {
            holdings.insert(register, value);
        }
        self
    }

    pub fn with_coil(mut self, register: u16, value: bool) -> Self {
        if let VirtualDevice::Registers { coils, .. } = &mut self {
            coils.insert(register, value);
        }
        self
    }

    pub fn with_discrete_input(mut self, register: u16, value: bool) -> Self {
        if let VirtualDevice::Registers {
            discrete_inputs, ..
        } = &mut self
        {
            discrete_inputs.insert(register, value);
        }
        self
    }
}

/// Everything the virtual bus saw, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    Open { port_name: String, baud_rate: u32 },
    Close,
    SetTimeout(Duration),
    Read {
        address: u8,
        function: FunctionCode,
        register: u16,
    },
    Write {
        address: u8,
        function: FunctionCode,
        register: u16,
        word: u16,
    },
}

#[derive(Debug)]
struct BusState {
    devices: BTreeMap<u8, VirtualDevice>,
    events: Vec<BusEvent>,
    timeout: Duration,
    fail_open: bool,
    all_silent: bool,
}

/// In-memory Modbus RTU bus shared between the test (or dry run) and the
/// transports opened on it.
#[derive(Debug, Clone)]
pub struct VirtualBus {
    state: Arc<Mutex<BusState>>,
}

impl Default for VirtualBus {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualBus {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState {
                devices: BTreeMap::new(),
                events: Vec::new(),
                timeout: DEFAULT_RESPONSE_TIMEOUT,
                fail_open: false,
                all_silent: false,
            })),
        }
    }

    pub fn with_device(self, address: u8, device: VirtualDevice) -> Self {
        self.set_device(address, device);
        self
    }

    pub fn set_device(&self, address: u8, device: VirtualDevice) {
        self.state.lock().devices.insert(address, device);
    }

    pub fn remove_device(&self, address: u8) {
        self.state.lock().devices.remove(&address);
    }

    /// Make the next `open` calls fail as if the port were missing.
    pub fn set_fail_open(&self, fail: bool) {
        self.state.lock().fail_open = fail;
    }

    /// Make every station stop answering.
    pub fn set_all_silent(&self, silent: bool) {
        self.state.lock().all_silent = silent;
    }

    pub fn events(&self) -> Vec<BusEvent> {
        self.state.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }

    /// Number of register reads and writes issued so far.
    pub fn io_count(&self) -> usize {
        self.state
            .lock()
            .events
            .iter()
            .filter(|event| matches!(event, BusEvent::Read { .. } | BusEvent::Write { .. }))
            .count()
    }

    pub fn current_timeout(&self) -> Duration {
        self.state.lock().timeout
    }

    pub fn holding(&self, address: u8, register: u16) -> Option<u16> {
        match self.state.lock().devices.get(&address) {
            Some(VirtualDevice::Registers { holdings, .. }) => holdings.get(&register).copied(),
            _ => None,
        }
    }
}

/// Opens transports attached to a [`VirtualBus`].
#[derive(Debug, Clone)]
pub struct VirtualOpener {
    bus: VirtualBus,
}

impl VirtualOpener {
    pub fn new(bus: VirtualBus) -> Self {
        Self { bus }
    }
}

impl TransportOpener for VirtualOpener {
    fn open(&self, settings: &LineSettings) -> Result<Box<dyn RtuTransport>> {
        let mut state = self.bus.state.lock();
        if state.fail_open {
            return Err(ModbusError::TransportOpen {
                port: settings.port_name.clone(),
                reason: "no such device".to_string(),
            });
        }
        state.timeout = settings.timeout;
        state.events.push(BusEvent::Open {
            port_name: settings.port_name.clone(),
            baud_rate: settings.baud_rate,
        });
        Ok(Box::new(VirtualTransport {
            bus: self.bus.clone(),
        }))
    }
}

struct VirtualTransport {
    bus: VirtualBus,
}

fn malformed(address: u8) -> ModbusError {
    ModbusError::InvalidResponse {
        address,
        reason: "CRC mismatch".to_string(),
    }
}

impl RtuTransport for VirtualTransport {
    fn read(&mut self, address: u8, function: FunctionCode, register: u16) -> Result<Vec<u8>> {
        let mut state = self.bus.state.lock();
        state.events.push(BusEvent::Read {
            address,
            function,
            register,
        });
        if state.all_silent {
            return Err(ModbusError::NoResponse { address });
        }

        match state.devices.get(&address) {
            None | Some(VirtualDevice::Silent) => Err(ModbusError::NoResponse { address }),
            Some(VirtualDevice::Malformed) => Err(malformed(address)),
            Some(VirtualDevice::Registers {
                coils,
                discrete_inputs,
                holdings,
                inputs,
            }) => {
                let data = match function {
                    FunctionCode::ReadCoils => {
                        vec![coils.get(&register).copied().unwrap_or(false) as u8]
                    }
                    FunctionCode::ReadDiscreteInputs => {
                        vec![discrete_inputs.get(&register).copied().unwrap_or(false) as u8]
                    }
                    FunctionCode::ReadHoldingRegisters => holdings
                        .get(&register)
                        .copied()
                        .unwrap_or(0)
                        .to_be_bytes()
                        .to_vec(),
                    FunctionCode::ReadInputRegisters => inputs
                        .get(&register)
                        .copied()
                        .unwrap_or(0)
                        .to_be_bytes()
                        .to_vec(),
                    FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister => {
                        return Err(malformed(address));
                    }
                };
                Ok(data)
            }
        }
    }

    fn write(
        &mut self,
        address: u8,
        function: FunctionCode,
        register: u16,
        word: u16,
    ) -> Result<()> {
        let mut state = self.bus.state.lock();
        state.events.push(BusEvent::Write {
            address,
            function,
            register,
            word,
        });
        if state.all_silent {
            return Err(ModbusError::NoResponse { address });
        }

        match state.devices.get_mut(&address) {
            None | Some(VirtualDevice::Silent) => Err(ModbusError::NoResponse { address }),
            Some(VirtualDevice::Malformed) => Err(malformed(address)),
            Some(VirtualDevice::Registers {
                coils, holdings, ..
            }) => match function {
                FunctionCode::WriteSingleCoil => {
                    coils.insert(register, word != COIL_OFF);
                    Ok(())
                }
                FunctionCode::WriteSingleRegister => {
                    holdings.insert(register, word);
                    Ok(())
                }
                _ => Err(malformed(address)),
            },
        }
    }

    fn timeout(&self) -> Duration {
        self.bus.state.lock().timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        let mut state = self.bus.state.lock();
        state.timeout = timeout;
        state.events.push(BusEvent::SetTimeout(timeout));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.bus.state.lock().events.push(BusEvent::Close);
        Ok(())
    }
}
