//! Capability discovery
//!
//! Probes every catalog command once and keeps the ones the vehicle
//! answers with a value.

use obd_protocol::{CommandDescriptor, DiscoveryRecord, ObdTransport};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of one discovery pass
#[derive(Debug, Clone)]
pub struct DiscoveryOutcome {
    /// Commands that returned a value, in catalog order
    pub supported: Vec<CommandDescriptor>,
    /// Record to publish for external consumers
    pub record: DiscoveryRecord,
}

/// Probes a catalog against an open transport
#[derive(Debug, Clone)]
pub struct CapabilityDiscoverer {
    probe_delay: Duration,
}

impl Default for CapabilityDiscoverer {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl CapabilityDiscoverer {
    /// `probe_delay` is the pause between two probes
    pub fn new(probe_delay: Duration) -> Self {
        Self { probe_delay }
    }

    /// Query each candidate once.
    ///
    /// "No data" and probe errors both count as unsupported. Stops early if
    /// the transport drops; the poller notices the dead link on its first
    /// tick.
    pub async fn discover(
        &self,
        transport: &mut dyn ObdTransport,
        catalog: &[CommandDescriptor],
    ) -> DiscoveryOutcome {
        info!(candidates = catalog.len(), "Discovering available OBD commands");
        let mut supported = Vec::new();
        let mut tested = 0;

        for (index, command) in catalog.iter().enumerate() {
            if !transport.is_connected() {
                warn!(tested, "Adapter dropped during discovery");
                break;
            }
            tested += 1;

            match transport.query(command).await {
                Ok(Some(reading)) => {
                    info!(
                        command = command.name(),
                        description = command.description(),
                        value = reading.value,
                        unit = %reading.unit,
                        "Supported"
                    );
                    supported.push(command.clone());
                }
                Ok(None) => debug!(command = command.name(), "No data"),
                Err(e) => debug!(command = command.name(), error = %e, "Probe failed"),
            }

            if index + 1 < catalog.len() && !self.probe_delay.is_zero() {
                tokio::time::sleep(self.probe_delay).await;
            }
        }

        info!(
            "Discovery complete: {}/{} commands available",
            supported.len(),
            tested
        );
        metrics::gauge!("obd_supported_commands").set(supported.len() as f64);

        let record = DiscoveryRecord::new(tested, supported.clone());
        DiscoveryOutcome { supported, record }
    }
}
