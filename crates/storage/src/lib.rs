//! Storage Layer
//!
//! Persists poll samples as one JSON Lines file per calendar day and keeps
//! the latest discovery record next to them. An in-memory store with the
//! same interface backs tests.

mod jsonl;
mod memory;

pub use jsonl::JsonlStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::NaiveDate;
use obd_protocol::{DiscoveryRecord, Sample};
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("No data for {0}")]
    NotFound(NaiveDate),
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::SerializationError(err.to_string())
    }
}

/// Destination for poll samples, keyed by calendar day
#[async_trait]
pub trait SampleSink: Send + Sync {
    /// Append one sample to the store for the sample's local date
    async fn append(&self, sample: &Sample) -> Result<(), StorageError>;

    /// Every sample stored for `date`, oldest first
    async fn read_all(&self, date: NaiveDate) -> Result<Vec<Sample>, StorageError>;
}

/// Destination for discovery records; written, never read back by the core
#[async_trait]
pub trait DiscoverySink: Send + Sync {
    async fn publish(&self, record: &DiscoveryRecord) -> Result<(), StorageError>;
}
