//! OBD-II Connection Lifecycle
//!
//! Owns the adapter connection: connects, runs capability discovery, hands
//! the link to the poller and reconnects with exponential backoff when the
//! link fails. Operators can pause and resume the whole cycle; a status
//! projection is available at any time without touching the adapter.

mod backoff;
mod manager;
mod state;
mod status;

pub use backoff::BackoffPolicy;
pub use manager::{ConnectionManager, ManagerConfig};
pub use state::{ConnectionState, RetryLedger};
pub use status::{ControlOutcome, LinkStatus};
