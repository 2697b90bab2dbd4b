pub mod classifier;
pub mod codec;
pub mod connection;
pub mod registry;
pub mod transport;
pub mod types;
