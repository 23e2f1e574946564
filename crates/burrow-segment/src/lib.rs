//! Segment-leased identifier allocation.
//!
//! A [`SegmentAllocator`] reserves blocks of identifiers from a shared
//! [`CounterStore`] and hands them out locally, so writers only pay a counter
//! round trip once per block. The counter store keeps the high-water mark, so
//! identifiers are never reused across restarts.

mod allocator;
mod counter;
pub mod error;
mod redis;

pub use allocator::{AllocatorSettings, SegmentAllocator};
pub use counter::{CounterStore, InMemoryCounterStore};
pub use error::{CounterError, Error};
pub use redis::RedisCounterStore;
