/// Address-range device typing.
///
/// Which kind of sensor sits at which address is installation data, so it
/// is injected as a [`ProfileTable`] rather than compiled in. Discovery uses
/// it to turn a bare responsive address into a [`DeviceModel`].
use serde::{Deserialize, Serialize};

use crate::protocol::types::{device, DeviceModel, RegisterType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub name: String,
    pub first_address: u8,
    pub last_address: u8,
    pub register: u16,
    pub register_type: RegisterType,
    #[serde(default = "device::default_unit")]
    pub unit: String,
    #[serde(default = "device::default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
    #[serde(default)]
    pub min_value: f64,
    #[serde(default = "device::default_max_value")]
    pub max_value: f64,
    #[serde(default = "device::default_warning_threshold")]
    pub warning_threshold: f64,
    #[serde(default = "device::default_alarm_threshold")]
    pub alarm_threshold: f64,
}

impl DeviceProfile {
    /// Ammonia sensors on addresses 1..=10, read from input register 0 in ppm.
    pub fn ammonia() -> Self {
        Self {
            name: "Ammonia".to_string(),
            first_address: 1,
            last_address: 10,
            register: 0,
            register_type: RegisterType::InputRegister,
            unit: device::default_unit(),
            scale: device::default_scale(),
            offset: 0.0,
            min_value: 0.0,
            max_value: device::default_max_value(),
            warning_threshold: device::default_warning_threshold(),
            alarm_threshold: device::default_alarm_threshold(),
        }
    }

    pub fn matches(&self, address: u8) -> bool {
        (self.first_address..=self.last_address).contains(&address)
    }

    pub fn instantiate(&self, address: u8) -> DeviceModel {
        DeviceModel::new(
            format!("{} {}", self.name, address),
            address,
            self.register,
            self.register_type,
        )
        .with_unit(self.unit.clone())
        .with_scaling(self.scale, self.offset)
        .with_range(self.min_value, self.max_value)
        .with_thresholds(self.warning_threshold, self.alarm_threshold)
        .with_description(format!("Discovered {} sensor", self.name.to_lowercase()))
    }
}

/// Ordered profile list; the first profile whose range covers an address wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileTable {
    profiles: Vec<DeviceProfile>,
}

impl ProfileTable {
    pub fn new(profiles: Vec<DeviceProfile>) -> Self {
        Self { profiles }
    }

    pub fn push(&mut self, profile: DeviceProfile) {
        self.profiles.push(profile);
    }

    pub fn profile_for(&self, address: u8) -> Option<&DeviceProfile> {
        self.profiles.iter().find(|profile| profile.matches(address))
    }

    pub fn device_for(&self, address: u8) -> Option<DeviceModel> {
        self.profile_for(address)
            .map(|profile| profile.instantiate(address))
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
