use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

/// Classification of one reading.
///
/// Variants are declared in increasing severity, so `Ord` follows severity
/// for the three value-carrying states.
#[derive(
    Display, EnumIter, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Status {
    Normal,
    Warning,
    Alarm,
    Error,
}

impl Status {
    pub fn is_alert(self) -> bool {
        matches!(self, Status::Warning | Status::Alarm)
    }
}

/// One device's result for one poll cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub device_address: u8,
    pub raw_value: Option<f64>,
    pub normalized_value: Option<f64>,
    pub status: Status,
    /// Set when the scaled value fell outside the device range and was clamped.
    #[serde(default)]
    pub out_of_range: bool,
    #[serde(default)]
    pub error: Option<String>,
    pub timestamp: DateTime<Local>,
}

impl Reading {
    pub fn value(
        device_address: u8,
        raw_value: f64,
        normalized_value: f64,
        status: Status,
        out_of_range: bool,
    ) -> Self {
        Self {
            device_address,
            raw_value: Some(raw_value),
            normalized_value: Some(normalized_value),
            status,
            out_of_range,
            error: None,
            timestamp: Local::now(),
        }
    }

    pub fn failed(device_address: u8, error: impl Into<String>) -> Self {
        Self {
            device_address,
            raw_value: None,
            normalized_value: None,
            status: Status::Error,
            out_of_range: false,
            error: Some(error.into()),
            timestamp: Local::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == Status::Error
    }
}

/// Result of a single `poll_once` cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollCycle {
    pub readings: Vec<Reading>,
    /// At least one device was polled and every reading is an error; the
    /// scheduler should reconnect before the next cycle.
    pub all_failed: bool,
    pub reconnect_attempted: bool,
    pub cancelled: bool,
}

/// Raised towards the notification collaborator on a transition into
/// `warning` or `alarm`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub device_address: u8,
    pub device_name: String,
    pub value: f64,
    pub status: Status,
    pub threshold: f64,
    pub timestamp: DateTime<Local>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display_and_serde() {
        assert_eq!(Status::Warning.to_string(), "warning");
        assert_eq!(serde_json::to_string(&Status::Alarm).unwrap(), "\"alarm\"");
        assert!(Status::Normal < Status::Warning && Status::Warning < Status::Alarm);
    }

    #[test]
    fn test_failed_reading_has_no_value() {
        let reading = Reading::failed(4, "no response from device 4");
        assert!(reading.is_error());
        assert_eq!(reading.raw_value, None);
        assert_eq!(reading.normalized_value, None);
    }
}
