//! Fixed-cadence poller
//!
//! Each tick queries every supported command once and folds the answers
//! into one [`Sample`]. A tick with no values counts as a failure; enough
//! consecutive failures end the polling session so the connection manager
//! can reconnect.

use crate::control::{Interrupt, RunControl};
use chrono::Local;
use obd_protocol::{CommandDescriptor, ObdError, ObdTransport, Sample};
use ring_buffer::RingBuffer;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use storage::SampleSink;
use tracing::{debug, info, warn};

/// Configuration for the poller
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Delay between ticks (default: 500ms)
    pub interval: Duration,
    /// Consecutive failed ticks before giving up on the connection
    pub max_consecutive_errors: u32,
    /// Delay after a tick that raised errors
    pub error_backoff: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            max_consecutive_errors: 10,
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// What a single tick produced
#[derive(Debug)]
pub enum TickOutcome {
    /// At least one command answered
    Sample(Sample),
    /// Every command answered "no data"
    Empty,
    /// No values, and at least one query failed
    Errored(ObdError),
}

impl TickOutcome {
    pub fn is_failure(&self) -> bool {
        !matches!(self, TickOutcome::Sample(_))
    }
}

/// Why a polling session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollExit {
    Paused,
    Shutdown,
    /// The transport reported the link down
    ConnectionLost,
    /// Too many consecutive failed ticks
    SustainedFailure,
}

impl From<Interrupt> for PollExit {
    fn from(interrupt: Interrupt) -> Self {
        match interrupt {
            Interrupt::Paused => PollExit::Paused,
            Interrupt::Shutdown => PollExit::Shutdown,
        }
    }
}

/// Counters shared with the status surface
#[derive(Debug, Default)]
pub struct PollerStats {
    consecutive_failures: AtomicU32,
    ticks: AtomicU64,
    failed_ticks: AtomicU64,
    samples: AtomicU64,
    persist_failures: AtomicU64,
}

/// Point-in-time copy of [`PollerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollerStatsSnapshot {
    pub consecutive_failures: u32,
    pub ticks: u64,
    pub failed_ticks: u64,
    pub samples: u64,
    pub persist_failures: u64,
}

impl PollerStats {
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> PollerStatsSnapshot {
        PollerStatsSnapshot {
            consecutive_failures: self.consecutive_failures(),
            ticks: self.ticks.load(Ordering::Relaxed),
            failed_ticks: self.failed_ticks.load(Ordering::Relaxed),
            samples: self.samples.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
        }
    }

    /// Count a tick; returns the consecutive failure count afterwards
    fn record_tick(&self, failed: bool) -> u32 {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("obd_poll_ticks_total").increment(1);
        if failed {
            self.failed_ticks.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("obd_poll_failures_total").increment(1);
            self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
        } else {
            self.samples.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("obd_samples_total").increment(1);
            self.consecutive_failures.store(0, Ordering::Relaxed);
            0
        }
    }

    fn record_persist_failure(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("obd_persist_failures_total").increment(1);
    }

    /// Start of a new polling session
    fn reset_streak(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }
}

/// Where samples go: the in-memory buffer first, then the store
#[derive(Clone)]
pub struct SampleOutput {
    buffer: Arc<RingBuffer<Sample>>,
    sink: Arc<dyn SampleSink>,
}

impl SampleOutput {
    pub fn new(buffer: Arc<RingBuffer<Sample>>, sink: Arc<dyn SampleSink>) -> Self {
        Self { buffer, sink }
    }

    pub fn buffer(&self) -> &Arc<RingBuffer<Sample>> {
        &self.buffer
    }

    /// A failed append is logged and counted; the buffered copy stays.
    async fn deliver(&self, sample: Sample, stats: &PollerStats) {
        self.buffer.push(sample.clone());
        if let Err(e) = self.sink.append(&sample).await {
            warn!(error = %e, "Failed to persist sample");
            stats.record_persist_failure();
        }
    }
}

/// Polls a fixed command set over one open transport
pub struct Poller {
    config: PollerConfig,
    stats: Arc<PollerStats>,
}

impl Poller {
    pub fn new(config: PollerConfig, stats: Arc<PollerStats>) -> Self {
        Self { config, stats }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    pub fn stats(&self) -> &Arc<PollerStats> {
        &self.stats
    }

    /// Query every command once.
    ///
    /// A fatal error ends the tick early; values gathered before it are
    /// still returned.
    pub async fn poll_once(
        &self,
        transport: &mut dyn ObdTransport,
        commands: &[CommandDescriptor],
    ) -> TickOutcome {
        let timestamp = Local::now();
        let mut values = BTreeMap::new();
        let mut first_error = None;

        for command in commands {
            match transport.query(command).await {
                Ok(Some(reading)) => {
                    values.insert(command.name().to_string(), reading);
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(command = command.name(), error = %e, "Query failed");
                    let fatal = e.is_fatal();
                    first_error.get_or_insert(e);
                    if fatal {
                        break;
                    }
                }
            }
        }

        if !values.is_empty() {
            TickOutcome::Sample(Sample::new(timestamp, values))
        } else if let Some(e) = first_error {
            TickOutcome::Errored(e)
        } else {
            TickOutcome::Empty
        }
    }

    /// Poll until paused, shut down, or the connection is judged dead
    pub async fn run(
        &self,
        transport: &mut dyn ObdTransport,
        commands: &[CommandDescriptor],
        output: &SampleOutput,
        control: &mut RunControl,
    ) -> PollExit {
        info!(
            commands = commands.len(),
            interval_ms = self.config.interval.as_millis() as u64,
            "OBD polling started"
        );
        self.stats.reset_streak();

        let exit: PollExit = loop {
            if let Some(interrupt) = control.interrupted() {
                break interrupt.into();
            }
            if !transport.is_connected() {
                warn!("OBD connection lost");
                break PollExit::ConnectionLost;
            }

            let outcome = self.poll_once(transport, commands).await;
            let failures = self.stats.record_tick(outcome.is_failure());
            let wait = match outcome {
                TickOutcome::Sample(sample) => {
                    debug!(values = sample.len(), "Sample collected");
                    output.deliver(sample, &self.stats).await;
                    self.config.interval
                }
                TickOutcome::Empty => {
                    debug!(failures, "No data this tick");
                    self.config.interval
                }
                TickOutcome::Errored(e) => {
                    warn!(failures, error = %e, "Polling error");
                    self.config.error_backoff
                }
            };

            if failures >= self.config.max_consecutive_errors {
                warn!(failures, "Too many consecutive errors");
                break PollExit::SustainedFailure;
            }
            if let Err(interrupt) = control.sleep(wait).await {
                break interrupt.into();
            }
        };

        info!(?exit, "OBD polling stopped");
        exit
    }
}
