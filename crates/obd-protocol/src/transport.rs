//! Transport adapter traits
//!
//! The connection manager only ever talks to an adapter through these two
//! traits, so the ELM327 serial client, the scripted mock and the simulated
//! vehicle are interchangeable.

use async_trait::async_trait;

use crate::command::CommandDescriptor;
use crate::error::ObdError;
use crate::sample::Reading;

/// Result of querying one command.
///
/// `Ok(None)` means the vehicle answered "no data"; `Err` means the query
/// itself failed.
pub type QueryResult = Result<Option<Reading>, ObdError>;

/// Opens connections to a diagnostic adapter
#[async_trait]
pub trait ObdConnector: Send + Sync {
    /// Open the adapter. `port_hint` selects a device; `None` auto-detects.
    async fn connect(&self, port_hint: Option<&str>) -> Result<Box<dyn ObdTransport>, ObdError>;
}

/// An open adapter connection
#[async_trait]
pub trait ObdTransport: Send {
    /// Whether the adapter (and vehicle behind it) is still reachable
    fn is_connected(&self) -> bool;

    /// Query one command
    async fn query(&mut self, command: &CommandDescriptor) -> QueryResult;

    /// Close the connection. Idempotent; never fails.
    async fn close(&mut self);

    /// Device the connection was opened on
    fn port_name(&self) -> &str;

    /// Negotiated bus protocol, if known
    fn protocol_name(&self) -> Option<&str> {
        None
    }
}
