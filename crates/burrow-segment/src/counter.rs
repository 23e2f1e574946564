use crate::error::CounterError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// A shared counter holding the authoritative high-water mark per key.
///
/// The only operation the allocator needs is an atomic "increment by N and
/// return the new value", which maps directly onto Redis `INCRBY`.
#[async_trait]
pub trait CounterStore: Send + Sync + 'static {
    /// Atomically adds `by` to the counter at `key` and returns the new value.
    ///
    /// A missing key starts at zero.
    async fn incr_by(&self, key: &str, by: i64) -> Result<i64, CounterError>;
}

#[async_trait]
impl<T: CounterStore + ?Sized> CounterStore for Arc<T> {
    async fn incr_by(&self, key: &str, by: i64) -> Result<i64, CounterError> {
        (**self).incr_by(key, by).await
    }
}

/// Process-local counter store.
///
/// Suitable for single-node deployments and tests. Failures can be injected
/// to exercise the allocator's retry path.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    counters: DashMap<String, i64>,
    calls: AtomicU64,
    failures_pending: AtomicU32,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `incr_by` calls received, including failed ones.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Current value of the counter at `key`.
    pub fn value(&self, key: &str) -> Option<i64> {
        self.counters.get(key).map(|v| *v)
    }

    /// Overwrites the counter at `key`.
    pub fn set(&self, key: impl Into<String>, value: i64) {
        self.counters.insert(key.into(), value);
    }

    /// Makes the next `count` calls fail without touching any counter.
    pub fn fail_next(&self, count: u32) {
        self.failures_pending.store(count, Ordering::SeqCst);
    }

    fn take_failure(&self) -> bool {
        self.failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn incr_by(&self, key: &str, by: i64) -> Result<i64, CounterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.take_failure() {
            return Err(CounterError::Unavailable(format!(
                "injected failure for key '{key}'"
            )));
        }

        let mut entry = self.counters.entry(key.to_string()).or_insert(0);
        *entry += by;
        Ok(*entry)
    }
}
