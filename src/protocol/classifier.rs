use super::types::{DeviceModel, Status};

/// Classify a normalized value against the device thresholds. Boundaries
/// belong to the higher-severity bucket.
pub fn classify(value: f64, device: &DeviceModel) -> Status {
    if value >= device.alarm_threshold {
        Status::Alarm
    } else if value >= device.warning_threshold {
        Status::Warning
    } else {
        Status::Normal
    }
}

/// The threshold that `status` was triggered by, if any.
pub fn threshold_for(status: Status, device: &DeviceModel) -> Option<f64> {
    match status {
        Status::Alarm => Some(device.alarm_threshold),
        Status::Warning => Some(device.warning_threshold),
        Status::Normal | Status::Error => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::RegisterType;

    fn device() -> DeviceModel {
        DeviceModel::new("NH3", 1, 0, RegisterType::InputRegister).with_thresholds(25.0, 50.0)
    }

    #[test]
    fn test_inclusive_boundaries() {
        let device = device();
        assert_eq!(classify(24.99, &device), Status::Normal);
        assert_eq!(classify(25.0, &device), Status::Warning);
        assert_eq!(classify(49.99, &device), Status::Warning);
        assert_eq!(classify(50.0, &device), Status::Alarm);
        assert_eq!(classify(1000.0, &device), Status::Alarm);
    }

    #[test]
    fn test_monotonic_in_value() {
        let device = device();
        let mut previous = Status::Normal;
        for step in 0..=1000 {
            let status = classify(step as f64 * 0.1, &device);
            assert!(status >= previous, "severity dropped at {}", step as f64 * 0.1);
            previous = status;
        }
        assert_eq!(previous, Status::Alarm);
    }

    #[test]
    fn test_equal_thresholds_resolve_to_alarm() {
        let device = device().with_thresholds(40.0, 40.0);
        assert_eq!(classify(40.0, &device), Status::Alarm);
        assert_eq!(threshold_for(Status::Alarm, &device), Some(40.0));
        assert_eq!(threshold_for(Status::Normal, &device), None);
    }
}
