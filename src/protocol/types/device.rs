use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::EnumIter;

use crate::error::{ModbusError, Result};

pub const MIN_DEVICE_ADDRESS: u8 = 1;
pub const MAX_DEVICE_ADDRESS: u8 = 247;

/// Check that `address` is a usable slave address (1..=247).
pub fn validate_address(address: u16) -> Result<u8> {
    if (MIN_DEVICE_ADDRESS as u16..=MAX_DEVICE_ADDRESS as u16).contains(&address) {
        Ok(address as u8)
    } else {
        Err(ModbusError::InvalidAddress(address))
    }
}

/// Modbus function codes issued by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum FunctionCode {
    ReadCoils = 0x01,
    ReadDiscreteInputs = 0x02,
    ReadHoldingRegisters = 0x03,
    ReadInputRegisters = 0x04,
    WriteSingleCoil = 0x05,
    WriteSingleRegister = 0x06,
}

impl FunctionCode {
    pub fn is_bit_access(self) -> bool {
        matches!(
            self,
            FunctionCode::ReadCoils
                | FunctionCode::ReadDiscreteInputs
                | FunctionCode::WriteSingleCoil
        )
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", u8::from(*self))
    }
}

/// Register type
#[derive(EnumIter, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterType {
    /// Coil registers (read/write bits)
    Coil,
    /// Discrete input registers (read-only bits)
    DiscreteInput,
    /// Holding registers (read/write words)
    HoldingRegister,
    /// Input registers (read-only words)
    InputRegister,
}

impl RegisterType {
    pub fn read_function(self) -> FunctionCode {
        match self {
            RegisterType::Coil => FunctionCode::ReadCoils,
            RegisterType::DiscreteInput => FunctionCode::ReadDiscreteInputs,
            RegisterType::HoldingRegister => FunctionCode::ReadHoldingRegisters,
            RegisterType::InputRegister => FunctionCode::ReadInputRegisters,
        }
    }

    /// `None` for the read-only types.
    pub fn write_function(self) -> Option<FunctionCode> {
        match self {
            RegisterType::Coil => Some(FunctionCode::WriteSingleCoil),
            RegisterType::HoldingRegister => Some(FunctionCode::WriteSingleRegister),
            RegisterType::DiscreteInput | RegisterType::InputRegister => None,
        }
    }
}

impl fmt::Display for RegisterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterType::Coil => write!(f, "coil"),
            RegisterType::DiscreteInput => write!(f, "discrete_input"),
            RegisterType::HoldingRegister => write!(f, "holding_register"),
            RegisterType::InputRegister => write!(f, "input_register"),
        }
    }
}

/// Description of one monitored point on the bus.
///
/// The threshold ordering `min_value <= warning_threshold <= alarm_threshold <= max_value`
/// is expected but not enforced here; see [`DeviceModel::thresholds_ordered`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceModel {
    pub name: String,
    pub address: u8,
    pub register: u16,
    pub register_type: RegisterType,
    #[serde(default = "default_unit")]
    pub unit: String,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub min_value: f64,
    #[serde(default = "default_max_value")]
    pub max_value: f64,
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: f64,
    #[serde(default = "default_alarm_threshold")]
    pub alarm_threshold: f64,
}

pub(crate) fn default_unit() -> String {
    "ppm".to_string()
}

pub(crate) fn default_scale() -> f64 {
    1.0
}

pub(crate) fn default_max_value() -> f64 {
    100.0
}

pub(crate) fn default_warning_threshold() -> f64 {
    70.0
}

pub(crate) fn default_alarm_threshold() -> f64 {
    90.0
}

impl DeviceModel {
    pub fn new(
        name: impl Into<String>,
        address: u8,
        register: u16,
        register_type: RegisterType,
    ) -> Self {
        Self {
            name: name.into(),
            address,
            register,
            register_type,
            unit: default_unit(),
            scale: default_scale(),
            offset: 0.0,
            description: String::new(),
            min_value: 0.0,
            max_value: default_max_value(),
            warning_threshold: default_warning_threshold(),
            alarm_threshold: default_alarm_threshold(),
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Set the linear transform `reading = raw * scale + offset`.
    pub fn with_scaling(mut self, scale: f64, offset: f64) -> Self {
        self.scale = scale;
        self.offset = offset;
        self
    }

    pub fn with_range(mut self, min_value: f64, max_value: f64) -> Self {
        self.min_value = min_value;
        self.max_value = max_value;
        self
    }

    pub fn with_thresholds(mut self, warning: f64, alarm: f64) -> Self {
        self.warning_threshold = warning;
        self.alarm_threshold = alarm;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn thresholds_ordered(&self) -> bool {
        self.min_value <= self.warning_threshold
            && self.warning_threshold <= self.alarm_threshold
            && self.alarm_threshold <= self.max_value
    }

    /// Apply scale and offset, then clamp into the operating range.
    ///
    /// Returns the clamped value and whether clamping took place.
    pub fn normalize(&self, raw: f64) -> (f64, bool) {
        let scaled = raw * self.scale + self.offset;
        let clamped = scaled.max(self.min_value).min(self.max_value);
        (clamped, clamped != scaled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_function_code_mapping() {
        let expected = [
            (RegisterType::Coil, 1u8, Some(5u8)),
            (RegisterType::DiscreteInput, 2, None),
            (RegisterType::HoldingRegister, 3, Some(6)),
            (RegisterType::InputRegister, 4, None),
        ];
        for (register_type, read, write) in expected {
            assert_eq!(u8::from(register_type.read_function()), read);
            assert_eq!(register_type.write_function().map(u8::from), write);
        }
        assert_eq!(RegisterType::iter().count(), 4);
    }

    #[test]
    fn test_validate_address() {
        assert_eq!(validate_address(1).unwrap(), 1);
        assert_eq!(validate_address(247).unwrap(), 247);
        assert!(matches!(
            validate_address(0),
            Err(ModbusError::InvalidAddress(0))
        ));
        assert!(matches!(
            validate_address(248),
            Err(ModbusError::InvalidAddress(248))
        ));
    }

    #[test]
    fn test_normalize_clamps_into_range() {
        let device = DeviceModel::new("NH3", 1, 0, RegisterType::InputRegister)
            .with_scaling(0.5, 0.0)
            .with_range(0.0, 100.0);

        assert_eq!(device.normalize(91.0), (45.5, false));
        assert_eq!(device.normalize(400.0), (100.0, true));

        let shifted = device.clone().with_scaling(1.0, -10.0);
        assert_eq!(shifted.normalize(5.0), (0.0, true));
    }

    #[test]
    fn test_normalize_stays_in_range_for_positive_scales() {
        let device = DeviceModel::new("T", 11, 2, RegisterType::HoldingRegister).with_range(-5.0, 50.0);
        for scale in [0.01, 0.1, 0.5, 1.0, 3.0] {
            for raw in [0.0, 1.0, 17.0, 250.0, 65535.0] {
                let offset = -20.0;
                let probe = device.clone().with_scaling(scale, offset);
                let (value, _) = probe.normalize(raw);
                let expected = (raw * scale + offset).clamp(-5.0, 50.0);
                assert_eq!(value, expected);
                assert!((-5.0..=50.0).contains(&value));
            }
        }
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let device: DeviceModel = serde_json::from_str(
            r#"{"name":"Sensor 1","address":1,"register":0,"register_type":"input_register"}"#,
        )
        .unwrap();
        assert_eq!(device.unit, "ppm");
        assert_eq!(device.scale, 1.0);
        assert_eq!(device.max_value, 100.0);
        assert_eq!(device.warning_threshold, 70.0);
        assert_eq!(device.alarm_threshold, 90.0);
        assert!(device.thresholds_ordered());
    }
}
