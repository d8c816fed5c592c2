//! Status projection and operator control results

use crate::backoff::BackoffPolicy;
use crate::state::{ConnectionState, LinkRecord};
use obd_protocol::Sample;
use obd_scheduler::PollerStatsSnapshot;
use serde::Serialize;
use tokio::time::Instant;

/// Read-only view of the connection lifecycle
#[derive(Debug, Clone, Serialize)]
pub struct LinkStatus {
    pub state: ConnectionState,
    pub paused: bool,
    /// Adapter open and vehicle answering (set before discovery finishes)
    pub adapter_connected: bool,
    pub port: Option<String>,
    pub protocol: Option<String>,
    pub attempts: u32,
    pub seconds_since_last_attempt: Option<f64>,
    pub seconds_since_last_success: Option<f64>,
    /// Only while waiting to retry and not paused
    pub next_retry_in_secs: Option<f64>,
    pub supported_commands: usize,
    pub poller: PollerStatsSnapshot,
    pub buffered_samples: usize,
    pub latest_sample: Option<Sample>,
}

impl LinkStatus {
    pub(crate) fn project(
        record: &LinkRecord,
        paused: bool,
        backoff: &BackoffPolicy,
        now: Instant,
    ) -> Self {
        let ledger = &record.ledger;
        let since = |at: Option<Instant>| at.map(|t| now.saturating_duration_since(t).as_secs_f64());

        let next_retry_in_secs = if record.state.is_waiting() && !paused {
            let elapsed = ledger
                .last_failure
                .map(|t| now.saturating_duration_since(t))
                .unwrap_or_default();
            Some(backoff.remaining(ledger.attempts, elapsed).as_secs_f64())
        } else {
            None
        };

        Self {
            state: record.state,
            paused,
            adapter_connected: record.adapter_connected,
            port: record.port.clone(),
            protocol: record.protocol.clone(),
            attempts: ledger.attempts,
            seconds_since_last_attempt: since(ledger.last_attempt),
            seconds_since_last_success: since(ledger.last_success),
            next_retry_in_secs,
            supported_commands: record.commands.len(),
            poller: PollerStatsSnapshot::default(),
            buffered_samples: 0,
            latest_sample: None,
        }
    }
}

/// Result of `pause` / `resume_immediate`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ControlOutcome {
    /// False when the call was redundant
    pub applied: bool,
    pub state: ConnectionState,
    pub paused: bool,
}
