//! Sample and Reading Types
//!
//! A [`Sample`] is one timestamped snapshot of every value that answered
//! during a poll tick. On disk it is one JSON object per line:
//!
//! ```json
//! {"timestamp":"2024-05-01T08:12:44.120+02:00","RPM":{"value":812.5,"unit":"rpm"}}
//! ```

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single decoded value with its unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub value: f64,
    pub unit: String,
}

impl Reading {
    pub fn new(value: f64, unit: impl Into<String>) -> Self {
        Self {
            value,
            unit: unit.into(),
        }
    }
}

/// Timestamped readings keyed by command identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Local>,
    #[serde(flatten)]
    values: BTreeMap<String, Reading>,
}

impl Sample {
    /// Build a sample from collected readings
    pub fn new(timestamp: DateTime<Local>, values: BTreeMap<String, Reading>) -> Self {
        Self { timestamp, values }
    }

    /// Reading for one command, if it answered this tick
    pub fn get(&self, command: &str) -> Option<&Reading> {
        self.values.get(command)
    }

    pub fn values(&self) -> &BTreeMap<String, Reading> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Seconds elapsed since the sample was taken
    pub fn age_seconds(&self) -> f64 {
        let age = Local::now().signed_duration_since(self.timestamp);
        age.num_milliseconds() as f64 / 1000.0
    }
}
