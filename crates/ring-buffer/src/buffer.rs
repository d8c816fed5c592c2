//! Ring Buffer Implementation

use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Default buffer capacity (100 samples = ~50 s at 2Hz)
pub const DEFAULT_CAPACITY: usize = 100;

/// Bounded ring of the last `capacity` items, oldest overwritten first.
///
/// One writer pushes while any number of readers take snapshots. Readers
/// always see whole items: every access goes through the lock and returns
/// clones.
pub struct RingBuffer<T> {
    /// Items, oldest at the front
    storage: RwLock<VecDeque<T>>,
    /// Capacity of the buffer
    capacity: usize,
}

impl<T: Clone> RingBuffer<T> {
    /// Create a new ring buffer with given capacity (at least 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        debug!(capacity, "Allocating ring buffer");
        Self {
            storage: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, VecDeque<T>> {
        self.storage.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, VecDeque<T>> {
        self.storage.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push an item into the buffer (overwrites oldest if full)
    pub fn push(&self, item: T) {
        let mut storage = self.write();
        if storage.len() == self.capacity {
            storage.pop_front();
        }
        storage.push_back(item);
    }

    /// Get the number of items currently in the buffer
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Get the buffer capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Most recently pushed item
    pub fn latest(&self) -> Option<T> {
        self.read().back().cloned()
    }

    /// Read the last N items (most recent first)
    pub fn read_last(&self, count: usize) -> Vec<T> {
        self.read().iter().rev().take(count).cloned().collect()
    }
}
