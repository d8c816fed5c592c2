//! In-memory store

use crate::{DiscoverySink, SampleSink, StorageError};
use async_trait::async_trait;
use chrono::NaiveDate;
use obd_protocol::{DiscoveryRecord, Sample};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Sample and discovery store kept entirely in memory
pub struct MemoryStore {
    /// Samples per day, oldest first
    days: Mutex<BTreeMap<NaiveDate, Vec<Sample>>>,
    /// Published discovery records
    discoveries: Mutex<Vec<DiscoveryRecord>>,
    /// When set, every append fails (to exercise persistence-failure paths)
    fail_appends: AtomicBool,
}

impl MemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        info!("Creating in-memory sample store");
        Self {
            days: Mutex::new(BTreeMap::new()),
            discoveries: Mutex::new(Vec::new()),
            fail_appends: AtomicBool::new(false),
        }
    }

    fn days(&self) -> Result<MutexGuard<'_, BTreeMap<NaiveDate, Vec<Sample>>>, StorageError> {
        self.days
            .lock()
            .map_err(|e| StorageError::Io(format!("Lock error: {}", e)))
    }

    /// Make subsequent appends fail (or succeed again)
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Total samples across all days
    pub fn sample_count(&self) -> usize {
        self.days
            .lock()
            .map(|days| days.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Discovery records published so far
    pub fn discoveries(&self) -> Vec<DiscoveryRecord> {
        self.discoveries
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SampleSink for MemoryStore {
    async fn append(&self, sample: &Sample) -> Result<(), StorageError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StorageError::Io("append disabled".to_string()));
        }
        let mut days = self.days()?;
        days.entry(sample.timestamp.date_naive())
            .or_default()
            .push(sample.clone());
        Ok(())
    }

    async fn read_all(&self, date: NaiveDate) -> Result<Vec<Sample>, StorageError> {
        let days = self.days()?;
        let day = days.get(&date).ok_or(StorageError::NotFound(date))?;
        Ok(day.clone())
    }
}

#[async_trait]
impl DiscoverySink for MemoryStore {
    async fn publish(&self, record: &DiscoveryRecord) -> Result<(), StorageError> {
        let mut discoveries = self
            .discoveries
            .lock()
            .map_err(|e| StorageError::Io(format!("Lock error: {}", e)))?;
        discoveries.push(record.clone());
        debug!(count = record.count, "Stored discovery record");
        Ok(())
    }
}
