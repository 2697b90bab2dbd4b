//! Rtu Monitor: Modbus RTU sensor polling core
//!
//! This crate owns the serial link to a bus of Modbus RTU stations: it
//! manages the connection lifecycle, encodes and decodes register access for
//! function codes 1 to 6, sweeps address ranges for live stations and polls
//! a registry of devices, normalizing every value and classifying it against
//! the device's warning and alarm thresholds.
//!
//! Persistence, presentation and notification delivery are left to the
//! caller; they receive readings and alerts through the sink traits in
//! [`api::traits`]. The [`protocol::transport::VirtualBus`] simulator stands
//! in for a serial port wherever hardware is not available.

pub mod api;
pub mod core;
pub mod error;
pub mod protocol;
pub mod utils;

pub use api::*;
pub use error::{ModbusError, Result};
