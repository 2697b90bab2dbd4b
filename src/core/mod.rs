/// Configuration and installation data shared by the frontends.
///
/// - `config`: serde configuration for the serial line, polling and devices
/// - `profiles`: address-range device typing used by auto-discovery
pub mod config;
pub mod profiles;

pub use config::{MonitorConfig, PollingConfig, SerialConfig};
pub use profiles::{DeviceProfile, ProfileTable};
