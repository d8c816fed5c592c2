//! Scripted adapter for tests
//!
//! [`MockConnector`] hands out [`MockTransport`]s that share one script, so a
//! test can change replies, drop the link or queue connect failures while the
//! connection manager is running.

use crate::command::CommandDescriptor;
use crate::error::ObdError;
use crate::sample::Reading;
use crate::transport::{ObdConnector, ObdTransport, QueryResult};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Outcome of one scripted `connect` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Adapter opened and vehicle answered
    Connected,
    /// Opening the adapter failed
    Unreachable,
    /// Adapter opened but reports not connected
    NoVehicle,
}

/// Scripted reply to a query
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    Value(Reading),
    NoData,
    /// Non-fatal query error
    Error,
    /// Fatal error that also takes the link down
    Disconnect,
}

impl MockReply {
    pub fn value(value: f64, unit: &str) -> Self {
        MockReply::Value(Reading::new(value, unit))
    }
}

struct MockScript {
    connect_plan: VecDeque<ConnectOutcome>,
    connect_default: ConnectOutcome,
    replies: HashMap<String, MockReply>,
    link_up: bool,
    connects: usize,
    closes: usize,
    queries: HashMap<String, usize>,
}

/// Shared script behind every transport this connector opens
#[derive(Clone)]
pub struct MockConnector {
    script: Arc<Mutex<MockScript>>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    /// Connector that always connects and answers "no data" by default
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(MockScript {
                connect_plan: VecDeque::new(),
                connect_default: ConnectOutcome::Connected,
                replies: HashMap::new(),
                link_up: true,
                connects: 0,
                closes: 0,
                queries: HashMap::new(),
            })),
        }
    }

    fn script(&self) -> MutexGuard<'_, MockScript> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Builder form of [`set_reply`](Self::set_reply)
    pub fn with_reply(self, command: &str, reply: MockReply) -> Self {
        self.set_reply(command, reply);
        self
    }

    pub fn set_reply(&self, command: &str, reply: MockReply) {
        self.script().replies.insert(command.to_string(), reply);
    }

    /// Queue outcomes for the next `connect` calls
    pub fn push_connect_outcomes(&self, outcomes: impl IntoIterator<Item = ConnectOutcome>) {
        self.script().connect_plan.extend(outcomes);
    }

    /// Outcome once the queued plan is exhausted
    pub fn set_connect_default(&self, outcome: ConnectOutcome) {
        self.script().connect_default = outcome;
    }

    /// Simulate the cable being pulled (or plugged back in)
    pub fn set_link_up(&self, up: bool) {
        self.script().link_up = up;
    }

    pub fn connect_count(&self) -> usize {
        self.script().connects
    }

    pub fn close_count(&self) -> usize {
        self.script().closes
    }

    pub fn query_count(&self, command: &str) -> usize {
        self.script().queries.get(command).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ObdConnector for MockConnector {
    async fn connect(&self, port_hint: Option<&str>) -> Result<Box<dyn ObdTransport>, ObdError> {
        let outcome = {
            let mut script = self.script();
            script.connects += 1;
            let default = script.connect_default;
            let outcome = script.connect_plan.pop_front().unwrap_or(default);
            if outcome == ConnectOutcome::Connected {
                script.link_up = true;
            }
            outcome
        };

        match outcome {
            ConnectOutcome::Unreachable => Err(ObdError::SerialError(
                "mock adapter unreachable".to_string(),
            )),
            ConnectOutcome::Connected | ConnectOutcome::NoVehicle => Ok(Box::new(MockTransport {
                script: Arc::clone(&self.script),
                port: port_hint.unwrap_or("mock").to_string(),
                open: true,
                vehicle: outcome == ConnectOutcome::Connected,
            })),
        }
    }
}

/// Transport opened by [`MockConnector`]
pub struct MockTransport {
    script: Arc<Mutex<MockScript>>,
    port: String,
    open: bool,
    vehicle: bool,
}

impl MockTransport {
    fn script(&self) -> MutexGuard<'_, MockScript> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ObdTransport for MockTransport {
    fn is_connected(&self) -> bool {
        self.open && self.vehicle && self.script().link_up
    }

    async fn query(&mut self, command: &CommandDescriptor) -> QueryResult {
        if !self.open {
            return Err(ObdError::ConnectionClosed);
        }
        let mut script = self.script();
        *script.queries.entry(command.name().to_string()).or_insert(0) += 1;
        if !script.link_up {
            return Err(ObdError::ConnectionClosed);
        }

        match script.replies.get(command.name()).cloned() {
            Some(MockReply::Value(reading)) => Ok(Some(reading)),
            Some(MockReply::NoData) | None => Ok(None),
            Some(MockReply::Error) => Err(ObdError::AdapterError {
                command: command.name().to_string(),
                message: "mock error".to_string(),
            }),
            Some(MockReply::Disconnect) => {
                script.link_up = false;
                Err(ObdError::ConnectionClosed)
            }
        }
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            self.script().closes += 1;
        }
    }

    fn port_name(&self) -> &str {
        &self.port
    }

    fn protocol_name(&self) -> Option<&str> {
        Some("MOCK")
    }
}
