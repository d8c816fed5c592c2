//! OBD-II Discovery and Polling
//!
//! Probes which diagnostic commands a vehicle answers, then polls that set
//! at a fixed interval, handing each sample to the buffer and the store and
//! reporting sustained failure back to the connection manager.

mod control;
mod discovery;
mod poller;

pub use control::{Interrupt, RunControl};
pub use discovery::{CapabilityDiscoverer, DiscoveryOutcome};
pub use poller::{PollExit, Poller, PollerConfig, PollerStats, PollerStatsSnapshot, SampleOutput, TickOutcome};
