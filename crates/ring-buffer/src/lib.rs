//! Bounded Ring Buffer
//!
//! Keeps the most recent N items (poll samples) in memory so "latest" and
//! "recent" queries never touch persistent storage.

mod buffer;

pub use buffer::{RingBuffer, DEFAULT_CAPACITY};
