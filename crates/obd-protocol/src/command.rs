//! Diagnostic Command Descriptors

use crate::mode;
use crate::pid;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// One diagnostic command the adapter can be asked for.
///
/// Descriptors are immutable once built; a new discovery pass produces a
/// fresh list instead of editing an old one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandDescriptor {
    name: String,
    description: String,
    pid: Option<u8>,
    #[serde(default = "default_mode")]
    mode: u8,
}

fn default_mode() -> u8 {
    mode::CURRENT_DATA
}

impl CommandDescriptor {
    /// Descriptor without a numeric code
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            pid: None,
            mode: mode::CURRENT_DATA,
        }
    }

    /// Attach a service mode and PID
    pub fn with_pid(mut self, mode: u8, pid: u8) -> Self {
        self.mode = mode;
        self.pid = Some(pid);
        self
    }

    /// Descriptor for a known Mode 01 table entry
    pub fn from_spec(spec: &pid::PidSpec) -> Self {
        Self::new(spec.name, spec.description).with_pid(mode::CURRENT_DATA, spec.pid)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn pid(&self) -> Option<u8> {
        self.pid
    }

    pub fn mode(&self) -> u8 {
        self.mode
    }

    /// ASCII request sent to an ELM327, e.g. `"010C"`
    pub fn request(&self) -> Option<String> {
        self.pid.map(|pid| format!("{:02X}{:02X}", self.mode, pid))
    }
}

/// Summary of one discovery pass, written out for reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryRecord {
    pub discovered_at: DateTime<Local>,
    pub tested: usize,
    pub count: usize,
    pub commands: Vec<CommandDescriptor>,
}

impl DiscoveryRecord {
    pub fn new(tested: usize, commands: Vec<CommandDescriptor>) -> Self {
        Self {
            discovered_at: Local::now(),
            tested,
            count: commands.len(),
            commands,
        }
    }
}
