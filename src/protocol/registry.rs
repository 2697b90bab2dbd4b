use super::types::{validate_address, DeviceModel};
use crate::error::Result;

/// Registered devices keyed by address, iterated in insertion order.
///
/// Re-adding an address replaces the stored model in place, so the device
/// keeps its original polling position. Only addresses within 1..=247 are
/// accepted, so every registered device is pollable.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: Vec<DeviceModel>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, device: DeviceModel) -> Result<()> {
        validate_address(device.address.into())?;
        if !device.thresholds_ordered() {
            log::warn!(
                "Device {} ({}) has unordered limits: min {} warning {} alarm {} max {}",
                device.name,
                device.address,
                device.min_value,
                device.warning_threshold,
                device.alarm_threshold,
                device.max_value
            );
        }

        match self
            .devices
            .iter_mut()
            .find(|existing| existing.address == device.address)
        {
            Some(existing) => {
                log::debug!("Device replaced: {} (address: {})", device.name, device.address);
                *existing = device;
            }
            None => {
                log::debug!("Device added: {} (address: {})", device.name, device.address);
                self.devices.push(device);
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, address: u8) -> Option<DeviceModel> {
        let index = self
            .devices
            .iter()
            .position(|device| device.address == address)?;
        Some(self.devices.remove(index))
    }

    pub fn get(&self, address: u8) -> Option<&DeviceModel> {
        self.devices.iter().find(|device| device.address == address)
    }

    pub fn all(&self) -> &[DeviceModel] {
        &self.devices
    }

    pub fn addresses(&self) -> Vec<u8> {
        self.devices.iter().map(|device| device.address).collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl FromIterator<DeviceModel> for DeviceRegistry {
    fn from_iter<I: IntoIterator<Item = DeviceModel>>(iter: I) -> Self {
        let mut registry = Self::new();
        for device in iter {
            let (name, address) = (device.name.clone(), device.address);
            if let Err(err) = registry.add(device) {
                log::error!("Skipping device {name} (address: {address}): {err}");
            }
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::ModbusError, protocol::types::RegisterType};

    fn sensor(address: u8) -> DeviceModel {
        DeviceModel::new(format!("Sensor {address}"), address, 0, RegisterType::InputRegister)
    }

    #[test]
    fn test_insertion_order() {
        let registry: DeviceRegistry = [7, 2, 5].into_iter().map(sensor).collect();
        assert_eq!(registry.addresses(), vec![7, 2, 5]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_duplicate_address_last_write_wins() {
        let mut registry = DeviceRegistry::new();
        registry.add(sensor(1)).unwrap();
        registry.add(sensor(2)).unwrap();
        registry.add(sensor(1).with_unit("°C")).unwrap();

        assert_eq!(registry.addresses(), vec![1, 2]);
        assert_eq!(registry.get(1).unwrap().unit, "°C");
    }

    #[test]
    fn test_remove_and_readd_moves_to_end() {
        let mut registry: DeviceRegistry = [1, 2, 3].into_iter().map(sensor).collect();
        let removed = registry.remove(1).unwrap();
        assert_eq!(removed.address, 1);
        assert!(registry.get(1).is_none());
        assert!(registry.remove(1).is_none());

        registry.add(removed).unwrap();
        assert_eq!(registry.addresses(), vec![2, 3, 1]);
    }

    #[test]
    fn test_rejects_unpollable_addresses() {
        let mut registry = DeviceRegistry::new();
        assert!(matches!(
            registry.add(sensor(0)),
            Err(ModbusError::InvalidAddress(0))
        ));
        assert!(matches!(
            registry.add(sensor(248)),
            Err(ModbusError::InvalidAddress(248))
        ));
        assert!(registry.is_empty());

        let collected: DeviceRegistry = [0, 3, 250, 247].into_iter().map(sensor).collect();
        assert_eq!(collected.addresses(), vec![3, 247]);
    }
}
