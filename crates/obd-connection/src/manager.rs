//! Connection Manager
//!
//! One task drives the whole lifecycle:
//!
//! ```text
//! Initializing -> Connecting -> Discovering -> Connected
//!                     |                            |
//!                     v                            v
//!               Disconnected <--- backoff ---> Reconnecting
//! ```
//!
//! The poller runs inline while Connected and is always finished before the
//! next connection attempt starts, so at most one poller ever owns the
//! transport.

use crate::backoff::BackoffPolicy;
use crate::state::{ConnectionState, SharedLink};
use crate::status::{ControlOutcome, LinkStatus};
use obd_protocol::{CommandDescriptor, ObdConnector, ObdTransport, Sample};
use obd_scheduler::{
    CapabilityDiscoverer, Interrupt, PollExit, Poller, PollerConfig, PollerStats, RunControl,
    SampleOutput,
};
use ring_buffer::RingBuffer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use storage::DiscoverySink;
use tokio::sync::{broadcast, watch, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Configuration for the connection manager
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Serial device to open; `None` auto-detects
    pub port_hint: Option<String>,
    pub backoff: BackoffPolicy,
    pub poller: PollerConfig,
    /// Pause between discovery probes
    pub probe_delay: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            port_hint: None,
            backoff: BackoffPolicy::default(),
            poller: PollerConfig::default(),
            probe_delay: Duration::from_millis(100),
        }
    }
}

/// How one connection cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleEnd {
    /// Never reached Discovering
    ConnectFailed,
    /// Was Connected, poller gave up
    LinkLost,
    Paused,
    Shutdown,
}

impl From<Interrupt> for CycleEnd {
    fn from(interrupt: Interrupt) -> Self {
        match interrupt {
            Interrupt::Paused => CycleEnd::Paused,
            Interrupt::Shutdown => CycleEnd::Shutdown,
        }
    }
}

/// Owns the adapter connection and its retry loop
pub struct ConnectionManager {
    config: ManagerConfig,
    connector: Arc<dyn ObdConnector>,
    catalog: Vec<CommandDescriptor>,
    discovery_sink: Arc<dyn DiscoverySink>,
    output: SampleOutput,
    link: SharedLink,
    stats: Arc<PollerStats>,
    paused: watch::Sender<bool>,
    shutdown: watch::Sender<bool>,
    retry_now: Notify,
    running: AtomicBool,
}

impl ConnectionManager {
    /// Create a manager. Nothing happens until [`run`](Self::run) is awaited.
    pub fn new(
        config: ManagerConfig,
        connector: Arc<dyn ObdConnector>,
        catalog: Vec<CommandDescriptor>,
        output: SampleOutput,
        discovery_sink: Arc<dyn DiscoverySink>,
    ) -> Self {
        let (paused, _) = watch::channel(false);
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            connector,
            catalog,
            discovery_sink,
            output,
            link: SharedLink::new(),
            stats: Arc::new(PollerStats::default()),
            paused,
            shutdown,
            retry_now: Notify::new(),
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.link.state()
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Commands found by the last discovery; empty unless Connected
    pub fn commands(&self) -> Arc<[CommandDescriptor]> {
        Arc::clone(&self.link.read().commands)
    }

    pub fn buffer(&self) -> &Arc<RingBuffer<Sample>> {
        self.output.buffer()
    }

    pub fn stats(&self) -> &Arc<PollerStats> {
        &self.stats
    }

    /// Feed of state transitions
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionState> {
        self.link.subscribe()
    }

    /// Snapshot for the status surface
    pub fn status(&self) -> LinkStatus {
        let mut status = {
            let record = self.link.read();
            LinkStatus::project(&record, self.is_paused(), &self.config.backoff, Instant::now())
        };
        let buffer = self.output.buffer();
        status.poller = self.stats.snapshot();
        status.buffered_samples = buffer.len();
        status.latest_sample = buffer.latest();
        status
    }

    /// Stop polling and suspend reconnection until resumed
    pub fn pause(&self) -> ControlOutcome {
        let applied = !self.paused.send_replace(true);
        if applied {
            info!("Data logging paused");
        }
        ControlOutcome {
            applied,
            state: self.state(),
            paused: true,
        }
    }

    /// Resume after a pause, or cut a pending backoff wait short.
    ///
    /// Either way the attempt counter is reset so the next attempt starts
    /// without delay. A no-op while a connection is up or being made.
    pub fn resume_immediate(&self) -> ControlOutcome {
        let was_paused = self.paused.send_replace(false);
        let state = self.state();

        let applied = if was_paused {
            self.link.reset_attempts();
            info!("Data logging resumed");
            true
        } else if state.is_waiting() {
            let cleared = self.link.reset_attempts();
            info!(cleared, "Immediate reconnection requested");
            true
        } else {
            false
        };
        if applied {
            self.retry_now.notify_one();
        }

        ControlOutcome {
            applied,
            state,
            paused: false,
        }
    }

    /// Ask [`run`](Self::run) to close the transport and return
    pub fn shutdown(&self) {
        info!("Connection manager shutdown requested");
        self.shutdown.send_replace(true);
        self.retry_now.notify_one();
    }

    /// Drive the connection lifecycle until [`shutdown`](Self::shutdown).
    ///
    /// Failures never end the loop; they only schedule the next attempt.
    pub async fn run(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Connection manager already running");
            return;
        }
        info!(
            catalog = self.catalog.len(),
            port = self.config.port_hint.as_deref().unwrap_or("auto"),
            "Connection manager started"
        );
        let mut control = RunControl::new(self.paused.subscribe(), self.shutdown.subscribe());

        loop {
            if control.wait_resumed().await.is_err() {
                break;
            }

            let next = match self.connect_cycle(&mut control).await {
                CycleEnd::ConnectFailed => ConnectionState::Disconnected,
                CycleEnd::LinkLost => ConnectionState::Reconnecting,
                CycleEnd::Paused => {
                    self.link.transition(ConnectionState::Disconnected, |_| {});
                    continue;
                }
                CycleEnd::Shutdown => break,
            };

            let mut attempts = 0;
            self.link.transition(next, |record| {
                attempts = record.ledger.record_failure(Instant::now());
            });
            let delay = self.config.backoff.delay(attempts);
            info!(
                attempts,
                delay_secs = delay.as_secs_f64(),
                "Retrying connection in {:.0}s",
                delay.as_secs_f64()
            );

            if let Err(Interrupt::Shutdown) = self.wait_for_retry(&mut control).await {
                break;
            }
        }

        self.link.transition(ConnectionState::Disconnected, |record| {
            record.adapter_connected = false;
        });
        self.running.store(false, Ordering::SeqCst);
        info!("Connection manager stopped");
    }

    /// Wait out the backoff measured from the last failure.
    ///
    /// The remaining time is recomputed after every wake-up, so an operator
    /// reset of the attempt counter ends the wait at once.
    async fn wait_for_retry(&self, control: &mut RunControl) -> Result<(), Interrupt> {
        loop {
            let remaining = {
                let record = self.link.read();
                let elapsed = record
                    .ledger
                    .last_failure
                    .map(|t| t.elapsed())
                    .unwrap_or_default();
                self.config.backoff.remaining(record.ledger.attempts, elapsed)
            };
            if remaining.is_zero() {
                return Ok(());
            }

            tokio::select! {
                result = control.sleep(remaining) => return result,
                _ = self.retry_now.notified() => debug!("Backoff wait woken"),
            }
        }
    }

    /// Connect, discover and poll until the link is lost or paused
    async fn connect_cycle(&self, control: &mut RunControl) -> CycleEnd {
        self.link.transition(ConnectionState::Connecting, |record| {
            record.ledger.record_attempt(Instant::now());
        });
        metrics::counter!("obd_connect_attempts_total").increment(1);

        let mut transport = match self.connector.connect(self.config.port_hint.as_deref()).await {
            Ok(transport) => transport,
            Err(e) => {
                warn!(error = %e, "Failed to connect to OBD adapter");
                return CycleEnd::ConnectFailed;
            }
        };
        if !transport.is_connected() {
            warn!(port = transport.port_name(), "Adapter opened but vehicle not connected");
            transport.close().await;
            return CycleEnd::ConnectFailed;
        }
        if let Some(interrupt) = control.interrupted() {
            transport.close().await;
            return interrupt.into();
        }

        info!(
            port = transport.port_name(),
            protocol = transport.protocol_name().unwrap_or("unknown"),
            "Connected to OBD adapter"
        );
        metrics::counter!("obd_connections_total").increment(1);
        self.link.transition(ConnectionState::Discovering, |record| {
            record.ledger.record_success(Instant::now());
            record.adapter_connected = true;
            record.port = Some(transport.port_name().to_string());
            record.protocol = transport.protocol_name().map(str::to_string);
        });

        let end = self.discover_and_poll(transport.as_mut(), control).await;

        transport.close().await;
        self.link.update(|record| {
            record.adapter_connected = false;
            record.commands = Arc::from(Vec::new());
        });
        end
    }

    async fn discover_and_poll(
        &self,
        transport: &mut dyn ObdTransport,
        control: &mut RunControl,
    ) -> CycleEnd {
        let discoverer = CapabilityDiscoverer::new(self.config.probe_delay);
        let outcome = discoverer.discover(transport, &self.catalog).await;
        if let Err(e) = self.discovery_sink.publish(&outcome.record).await {
            warn!(error = %e, "Failed to save command list");
        }

        let commands: Arc<[CommandDescriptor]> = Arc::from(outcome.supported);
        self.link.transition(ConnectionState::Connected, |record| {
            record.commands = Arc::clone(&commands);
        });

        let poller = Poller::new(self.config.poller.clone(), Arc::clone(&self.stats));
        match poller.run(transport, &commands, &self.output, control).await {
            PollExit::Paused => CycleEnd::Paused,
            PollExit::Shutdown => CycleEnd::Shutdown,
            PollExit::ConnectionLost | PollExit::SustainedFailure => CycleEnd::LinkLost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obd_protocol::mock::{ConnectOutcome, MockConnector, MockReply};
    use storage::MemoryStore;

    const A: &str = "A";
    const B: &str = "B";
    const C: &str = "C";

    fn catalog() -> Vec<CommandDescriptor> {
        [A, B, C]
            .iter()
            .enumerate()
            .map(|(i, name)| CommandDescriptor::new(*name, "test").with_pid(0x01, i as u8 + 1))
            .collect()
    }

    fn vehicle() -> MockConnector {
        MockConnector::new()
            .with_reply(A, MockReply::value(5.0, "x"))
            .with_reply(B, MockReply::NoData)
            .with_reply(C, MockReply::value(12.0, "y"))
    }

    fn manager(connector: &MockConnector) -> (Arc<ConnectionManager>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let output = SampleOutput::new(Arc::new(RingBuffer::new(100)), store.clone());
        let config = ManagerConfig {
            probe_delay: Duration::ZERO,
            ..ManagerConfig::default()
        };
        let manager = ConnectionManager::new(
            config,
            Arc::new(connector.clone()),
            catalog(),
            output,
            store.clone(),
        );
        (Arc::new(manager), store)
    }

    fn spawn_run(manager: &Arc<ConnectionManager>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(manager);
        tokio::spawn(async move { manager.run().await })
    }

    /// Receive transitions until `target`, with the instant each arrived
    async fn states_until(
        rx: &mut broadcast::Receiver<ConnectionState>,
        target: ConnectionState,
    ) -> Vec<(ConnectionState, Instant)> {
        let mut seen = Vec::new();
        loop {
            let state = rx.recv().await.unwrap();
            seen.push((state, Instant::now()));
            if state == target {
                return seen;
            }
        }
    }

    fn connect_gaps(seen: &[(ConnectionState, Instant)]) -> Vec<u64> {
        let starts: Vec<Instant> = seen
            .iter()
            .filter(|(s, _)| *s == ConnectionState::Connecting)
            .map(|(_, at)| *at)
            .collect();
        starts
            .windows(2)
            .map(|w| (w[1] - w[0]).as_secs_f64().round() as u64)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fail_succeed_trace() {
        let connector = vehicle();
        connector.push_connect_outcomes([ConnectOutcome::Unreachable, ConnectOutcome::NoVehicle]);
        let (manager, store) = manager(&connector);
        let mut rx = manager.subscribe();
        let task = spawn_run(&manager);

        let seen = states_until(&mut rx, ConnectionState::Connected).await;
        let states: Vec<_> = seen.iter().map(|(s, _)| *s).collect();
        use ConnectionState::*;
        assert_eq!(
            states,
            vec![Connecting, Disconnected, Connecting, Disconnected, Connecting, Discovering, Connected]
        );
        let gaps = connect_gaps(&seen);
        assert_eq!(gaps, vec![5, 10]);

        // The NoVehicle transport was closed before retrying
        assert_eq!(connector.close_count(), 1);
        assert_eq!(manager.status().attempts, 2);
        assert_eq!(store.discoveries().len(), 1);

        manager.shutdown();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_discovery_and_first_sample() {
        let connector = vehicle();
        let (manager, store) = manager(&connector);
        let mut rx = manager.subscribe();
        let task = spawn_run(&manager);

        states_until(&mut rx, ConnectionState::Connected).await;
        let names: Vec<String> = manager.commands().iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec![A, C]);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let first = manager.buffer().latest().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first.get(A).unwrap().value, 5.0);
        assert_eq!(first.get(C).unwrap().value, 12.0);
        assert!(first.get(B).is_none());
        assert_eq!(store.sample_count(), 1);

        let record = &store.discoveries()[0];
        assert_eq!(record.tested, 3);
        assert_eq!(record.count, 2);

        manager.shutdown();
        task.await.unwrap();
        assert_eq!(connector.close_count(), 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_backoff_schedule() {
        let connector = vehicle();
        connector.set_connect_default(ConnectOutcome::Unreachable);
        let (manager, _store) = manager(&connector);
        let mut rx = manager.subscribe();
        let task = spawn_run(&manager);

        let mut seen = Vec::new();
        while seen.iter().filter(|(s, _)| *s == ConnectionState::Connecting).count() < 6 {
            seen.extend(states_until(&mut rx, ConnectionState::Connecting).await);
        }
        assert_eq!(connect_gaps(&seen), vec![5, 10, 20, 30, 30]);
        assert!(seen.iter().all(|(s, _)| *s != ConnectionState::Discovering));

        manager.shutdown();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_while_connected() {
        let connector = vehicle();
        let (manager, _store) = manager(&connector);
        let mut rx = manager.subscribe();
        let task = spawn_run(&manager);

        states_until(&mut rx, ConnectionState::Connected).await;
        tokio::time::sleep(Duration::from_millis(1200)).await;

        let paused_at = Instant::now();
        let outcome = manager.pause();
        assert!(outcome.applied);
        assert!(outcome.paused);
        let seen = states_until(&mut rx, ConnectionState::Disconnected).await;
        assert!(seen[0].1 - paused_at <= manager.config().poller.interval);

        assert!(!manager.pause().applied);
        assert_eq!(connector.close_count(), 1);
        assert!(manager.commands().is_empty());
        let status = manager.status();
        assert!(status.paused);
        assert!(!status.adapter_connected);
        assert_eq!(status.next_retry_in_secs, None);

        // Nothing happens while paused
        let ticks = manager.stats().snapshot().ticks;
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(manager.stats().snapshot().ticks, ticks);

        let resumed_at = Instant::now();
        let outcome = manager.resume_immediate();
        assert!(outcome.applied);
        assert!(!outcome.paused);
        let seen = states_until(&mut rx, ConnectionState::Connecting).await;
        assert!(seen[0].1 - resumed_at < Duration::from_millis(1));
        states_until(&mut rx, ConnectionState::Connected).await;
        assert_eq!(manager.status().attempts, 0);

        manager.shutdown();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_cuts_backoff_short() {
        let connector = vehicle();
        connector.set_connect_default(ConnectOutcome::Unreachable);
        let (manager, _store) = manager(&connector);
        let mut rx = manager.subscribe();
        let task = spawn_run(&manager);

        // Three failures: the pending wait is 20s
        for _ in 0..3 {
            states_until(&mut rx, ConnectionState::Disconnected).await;
        }
        assert_eq!(manager.status().attempts, 3);
        let next_retry = |m: &ConnectionManager| m.status().next_retry_in_secs.unwrap();
        assert!((next_retry(&manager) - 20.0).abs() < 0.01);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!((next_retry(&manager) - 18.0).abs() < 0.01);

        let requested = Instant::now();
        let outcome = manager.resume_immediate();
        assert!(outcome.applied);
        assert_eq!(outcome.state, ConnectionState::Disconnected);
        let seen = states_until(&mut rx, ConnectionState::Connecting).await;
        assert!(seen[0].1 - requested < Duration::from_millis(1));

        states_until(&mut rx, ConnectionState::Disconnected).await;
        assert_eq!(manager.status().attempts, 1);

        manager.shutdown();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_is_noop_while_connected() {
        let connector = vehicle();
        let (manager, _store) = manager(&connector);
        let mut rx = manager.subscribe();
        let task = spawn_run(&manager);

        states_until(&mut rx, ConnectionState::Connected).await;
        let outcome = manager.resume_immediate();
        assert!(!outcome.applied);
        assert_eq!(outcome.state, ConnectionState::Connected);
        assert_eq!(connector.connect_count(), 1);

        manager.shutdown();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_during_backoff_wait() {
        let connector = vehicle();
        connector.push_connect_outcomes([ConnectOutcome::Unreachable]);
        let (manager, _store) = manager(&connector);
        let mut rx = manager.subscribe();
        let task = spawn_run(&manager);

        states_until(&mut rx, ConnectionState::Disconnected).await;
        manager.pause();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        manager.resume_immediate();
        states_until(&mut rx, ConnectionState::Connected).await;
        assert_eq!(connector.connect_count(), 2);

        manager.shutdown();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_failure_reconnects() {
        let connector = vehicle();
        let (manager, _store) = manager(&connector);
        let mut rx = manager.subscribe();
        let task = spawn_run(&manager);

        states_until(&mut rx, ConnectionState::Connected).await;
        connector.set_reply(A, MockReply::NoData);
        connector.set_reply(C, MockReply::NoData);

        states_until(&mut rx, ConnectionState::Reconnecting).await;
        let stats = manager.stats().snapshot();
        let max = manager.config().poller.max_consecutive_errors;
        // First tick still had values
        assert_eq!(stats.samples, 1);
        assert_eq!(stats.failed_ticks, u64::from(max));
        // One discovery probe plus one query per tick
        assert_eq!(connector.query_count(A), 1 + 1 + max as usize);
        assert_eq!(connector.close_count(), 1);
        assert_eq!(manager.status().attempts, 1);

        let seen = states_until(&mut rx, ConnectionState::Connecting).await;
        assert_eq!(seen.len(), 1);
        assert_eq!(connector.connect_count(), 2);

        manager.shutdown();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_lost_reconnects() {
        let connector = vehicle();
        let (manager, _store) = manager(&connector);
        let mut rx = manager.subscribe();
        let task = spawn_run(&manager);

        states_until(&mut rx, ConnectionState::Connected).await;
        connector.set_link_up(false);
        let started = Instant::now();
        states_until(&mut rx, ConnectionState::Reconnecting).await;
        assert!(started.elapsed() <= manager.config().poller.interval);
        assert!(manager.commands().is_empty());

        // Link back up: the retry after 5s succeeds
        states_until(&mut rx, ConnectionState::Connected).await;
        assert_eq!(connector.connect_count(), 2);
        assert_eq!(manager.status().attempts, 1);

        manager.shutdown();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_supported_commands_still_connected() {
        let connector = MockConnector::new();
        let (manager, store) = manager(&connector);
        let mut rx = manager.subscribe();
        let task = spawn_run(&manager);

        states_until(&mut rx, ConnectionState::Connected).await;
        assert!(manager.commands().is_empty());
        assert!(manager.status().adapter_connected);
        assert_eq!(store.discoveries()[0].count, 0);

        manager.shutdown();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_is_rejected() {
        let connector = vehicle();
        let (manager, _store) = manager(&connector);
        let mut rx = manager.subscribe();
        let task = spawn_run(&manager);
        states_until(&mut rx, ConnectionState::Connected).await;

        // Returns at once without touching the adapter
        manager.run().await;
        assert_eq!(connector.connect_count(), 1);

        manager.shutdown();
        task.await.unwrap();
    }
}
