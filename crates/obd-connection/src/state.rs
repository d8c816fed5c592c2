//! Connection state and the shared link record

use obd_protocol::CommandDescriptor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::info;

/// Lifecycle state of the adapter connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Initializing,
    Connecting,
    Discovering,
    Connected,
    Disconnected,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Initializing => "initializing",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Discovering => "discovering",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }

    /// States in which a backoff wait may be pending
    pub fn is_waiting(self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Reconnecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bookkeeping for connection attempts
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryLedger {
    /// Failures recorded since the last manual reset
    pub attempts: u32,
    pub last_attempt: Option<Instant>,
    pub last_success: Option<Instant>,
    pub last_failure: Option<Instant>,
}

impl RetryLedger {
    pub fn record_attempt(&mut self, now: Instant) {
        self.last_attempt = Some(now);
    }

    /// Successful connections leave `attempts` untouched
    pub fn record_success(&mut self, now: Instant) {
        self.last_success = Some(now);
    }

    /// Schedule another retry; returns the new attempt count
    pub fn record_failure(&mut self, now: Instant) -> u32 {
        self.attempts = self.attempts.saturating_add(1);
        self.last_failure = Some(now);
        self.attempts
    }

    /// Operator reset
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

/// Everything the status surface reads, updated only by the manager
#[derive(Debug, Clone)]
pub(crate) struct LinkRecord {
    pub state: ConnectionState,
    pub ledger: RetryLedger,
    pub adapter_connected: bool,
    pub port: Option<String>,
    pub protocol: Option<String>,
    pub commands: Arc<[CommandDescriptor]>,
}

impl Default for LinkRecord {
    fn default() -> Self {
        Self {
            state: ConnectionState::Initializing,
            ledger: RetryLedger::default(),
            adapter_connected: false,
            port: None,
            protocol: None,
            commands: Arc::from(Vec::new()),
        }
    }
}

/// The link record behind a lock plus a feed of state transitions
pub(crate) struct SharedLink {
    record: RwLock<LinkRecord>,
    transitions: broadcast::Sender<ConnectionState>,
}

impl SharedLink {
    pub fn new() -> Self {
        let (transitions, _) = broadcast::channel(64);
        Self {
            record: RwLock::new(LinkRecord::default()),
            transitions,
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, LinkRecord> {
        self.record.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, LinkRecord> {
        self.record.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ConnectionState {
        self.read().state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionState> {
        self.transitions.subscribe()
    }

    /// Apply `update` and move to `to`, logging and broadcasting the change
    pub fn transition(&self, to: ConnectionState, update: impl FnOnce(&mut LinkRecord)) {
        let from = {
            let mut record = self.write();
            update(&mut record);
            std::mem::replace(&mut record.state, to)
        };
        if from != to {
            info!(%from, %to, "Connection state changed");
            // No subscribers is fine
            let _ = self.transitions.send(to);
        }
    }

    pub fn update(&self, update: impl FnOnce(&mut LinkRecord)) {
        update(&mut self.write());
    }

    /// Operator reset; returns the attempt count it cleared
    pub fn reset_attempts(&self) -> u32 {
        let mut record = self.write();
        let before = record.ledger.attempts;
        record.ledger.reset();
        before
    }
}
