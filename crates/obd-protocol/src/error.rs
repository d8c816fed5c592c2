//! OBD-II Error Types

use thiserror::Error;

/// Errors that can occur during OBD-II communication
#[derive(Debug, Error)]
pub enum ObdError {
    /// Serial port connection error
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// No serial port was given and none could be detected
    #[error("No OBD adapter found on any serial port")]
    NoAdapterFound,

    /// Timeout waiting for response
    #[error("Timeout waiting for OBD response after {0}ms")]
    Timeout(u64),

    /// Invalid response from adapter
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Adapter rejected the command or reported a bus error
    #[error("Adapter error for {command}: {message}")]
    AdapterError { command: String, message: String },

    /// Adapter not responding
    #[error("OBD adapter not responding")]
    AdapterNotResponding,

    /// Vehicle not connected
    #[error("Vehicle ignition is off or not connected")]
    VehicleNotConnected,

    /// Transport was closed or lost
    #[error("Connection closed")]
    ConnectionClosed,
}

impl ObdError {
    /// Whether the error means the link itself is gone, as opposed to one
    /// command failing on a healthy link.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ObdError::SerialError(_)
                | ObdError::ConnectionClosed
                | ObdError::AdapterNotResponding
        )
    }
}

impl From<std::io::Error> for ObdError {
    fn from(err: std::io::Error) -> Self {
        ObdError::SerialError(err.to_string())
    }
}

impl From<tokio_serial::Error> for ObdError {
    fn from(err: tokio_serial::Error) -> Self {
        ObdError::SerialError(err.to_string())
    }
}
