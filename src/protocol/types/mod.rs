pub mod device;
pub mod reading;

pub use device::{
    validate_address, DeviceModel, FunctionCode, RegisterType, MAX_DEVICE_ADDRESS,
    MIN_DEVICE_ADDRESS,
};
pub use reading::{Alert, PollCycle, Reading, Status};
