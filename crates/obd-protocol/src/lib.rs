//! OBD-II Protocol Implementation
//!
//! This crate provides async serial communication with ELM327-compatible
//! OBD-II adapters, the Mode 01 command catalog with its decoding formulas,
//! and the transport traits the connection manager drives. Scripted and
//! simulated adapters are included for tests and hardware-free runs.

pub mod catalog;
mod client;
mod command;
mod error;
pub mod mock;
pub mod pid;
mod protocol;
mod sample;
mod simulator;
mod transport;

pub use client::{
    detect_port, parse_response, Elm327Config, Elm327Connector, ObdClient, DEFAULT_BAUD_RATE,
};
pub use command::{CommandDescriptor, DiscoveryRecord};
pub use error::ObdError;
pub use protocol::ObdProtocol;
pub use sample::{Reading, Sample};
pub use simulator::{SimulatedConnector, SimulatedVehicle};
pub use transport::{ObdConnector, ObdTransport, QueryResult};

/// OBD-II mode constants
pub mod mode {
    /// Current data
    pub const CURRENT_DATA: u8 = 0x01;
}
