use crate::counter::CounterStore;
use crate::error::Error;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, trace, warn};
use typed_builder::TypedBuilder;

/// Configures a [`SegmentAllocator`].
#[derive(Debug, Clone, TypedBuilder)]
pub struct AllocatorSettings {
    /// Number of identifiers leased per counter round trip.
    #[builder(default = 1000)]
    pub step: i64,
    /// Prepended to the namespace to form the counter key.
    #[builder(default = "seq:".to_string(), setter(into))]
    pub key_prefix: String,
    /// Total counter attempts per lease refill, including the first one.
    #[builder(default = 5)]
    pub max_retries: u32,
    /// Fixed pause between failed attempts.
    #[builder(default = Duration::from_millis(100))]
    pub retry_interval: Duration,
}

impl Default for AllocatorSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// The unexpired part of a lease: `[next, next + remaining)`.
#[derive(Debug, Default)]
struct Segment {
    next: i64,
    remaining: i64,
}

/// Hands out strictly increasing identifiers per namespace by leasing blocks
/// of `step` ids from a shared [`CounterStore`].
///
/// Callers for the same namespace serialize on that namespace's lock, which
/// is held across a refill so only one of them talks to the counter store.
/// Different namespaces never contend. The namespace table is a sharded map
/// and its shard lock only guards the insertion of a new namespace.
#[derive(Debug)]
pub struct SegmentAllocator<C> {
    counter: C,
    settings: AllocatorSettings,
    segments: DashMap<String, Arc<Mutex<Segment>>>,
}

impl<C: CounterStore> SegmentAllocator<C> {
    /// Creates an allocator, rejecting a non-positive step or an empty retry
    /// budget.
    pub fn new(counter: C, settings: AllocatorSettings) -> Result<Self, Error> {
        if settings.step <= 0 {
            return Err(Error::InvalidStep {
                step: settings.step,
            });
        }
        if settings.max_retries == 0 {
            return Err(Error::InvalidRetries);
        }

        Ok(Self {
            counter,
            settings,
            segments: DashMap::new(),
        })
    }

    pub fn settings(&self) -> &AllocatorSettings {
        &self.settings
    }

    pub fn counter(&self) -> &C {
        &self.counter
    }

    /// Returns the next identifier for `namespace`.
    ///
    /// On failure the namespace's lease is left exactly as it was, so a later
    /// call retries the refill from a clean state.
    pub async fn next_id(&self, namespace: &str) -> Result<i64, Error> {
        let segment = self.segment(namespace);
        let mut segment = segment.lock().await;

        if segment.remaining == 0 {
            let next = self.lease(namespace).await?;
            segment.next = next;
            segment.remaining = self.settings.step;
        }

        let id = segment.next;
        segment.next += 1;
        segment.remaining -= 1;
        trace!(namespace, id, remaining = segment.remaining, "Allocated id");

        Ok(id)
    }

    fn segment(&self, namespace: &str) -> Arc<Mutex<Segment>> {
        if let Some(existing) = self.segments.get(namespace) {
            return Arc::clone(existing.value());
        }

        // Two callers may race here; `entry` makes only one insertion win.
        Arc::clone(self.segments.entry(namespace.to_string()).or_default().value())
    }

    /// Reserves a fresh block and returns its first identifier.
    async fn lease(&self, namespace: &str) -> Result<i64, Error> {
        let key = format!("{}{}", self.settings.key_prefix, namespace);
        let step = self.settings.step;
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.counter.incr_by(&key, step).await {
                Ok(value) if value < step => {
                    error!(namespace, key = %key, value, step, "Counter below lease step");
                    return Err(Error::CounterRegressed { key, value, step });
                }
                Ok(value) => {
                    let first = value - step + 1;
                    debug!(namespace, first, last = value, "Leased new id segment");
                    return Ok(first);
                }
                Err(e) if attempts < self.settings.max_retries => {
                    warn!(namespace, attempts, error = %e, "Counter store call failed, retrying");
                    tokio::time::sleep(self.settings.retry_interval).await;
                }
                Err(e) => {
                    error!(namespace, attempts, error = %e, "Counter store retries exhausted");
                    return Err(Error::Exhausted {
                        key,
                        attempts,
                        source: e,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::InMemoryCounterStore;
    use std::collections::HashSet;

    fn settings(step: i64) -> AllocatorSettings {
        AllocatorSettings::builder()
            .step(step)
            .max_retries(3)
            .retry_interval(Duration::from_millis(1))
            .build()
    }

    fn allocator(step: i64) -> SegmentAllocator<Arc<InMemoryCounterStore>> {
        SegmentAllocator::new(Arc::new(InMemoryCounterStore::new()), settings(step)).unwrap()
    }

    #[tokio::test]
    async fn one_increment_per_lease() {
        let alloc = allocator(5);

        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(alloc.next_id("t").await.unwrap());
        }

        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(alloc.counter().calls(), 1);

        assert_eq!(alloc.next_id("t").await.unwrap(), 6);
        assert_eq!(alloc.counter().calls(), 2);
        assert_eq!(alloc.counter().value("seq:t"), Some(10));
    }

    #[tokio::test]
    async fn lease_continues_from_existing_high_water_mark() {
        let alloc = allocator(10);
        alloc.counter().set("seq:short_links", 40);

        assert_eq!(alloc.next_id("short_links").await.unwrap(), 41);
        assert_eq!(alloc.next_id("short_links").await.unwrap(), 42);
    }

    #[tokio::test]
    async fn namespaces_are_independent() {
        let alloc = allocator(3);

        assert_eq!(alloc.next_id("a").await.unwrap(), 1);
        assert_eq!(alloc.next_id("b").await.unwrap(), 1);
        assert_eq!(alloc.next_id("a").await.unwrap(), 2);

        assert_eq!(alloc.counter().value("seq:a"), Some(3));
        assert_eq!(alloc.counter().value("seq:b"), Some(3));
    }

    #[tokio::test]
    async fn concurrent_callers_get_distinct_increasing_ids() {
        let alloc = Arc::new(allocator(7));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let alloc = Arc::clone(&alloc);
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                for _ in 0..50 {
                    ids.push(alloc.next_id("links").await.unwrap());
                }
                ids
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            let ids = handle.await.unwrap();
            // each caller observes its own ids in increasing order
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
            all.extend(ids);
        }

        let unique: HashSet<_> = all.iter().copied().collect();
        assert_eq!(unique.len(), 400);

        all.sort_unstable();
        assert_eq!(all, (1..=400).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let alloc = allocator(5);
        alloc.counter().fail_next(2);

        assert_eq!(alloc.next_id("t").await.unwrap(), 1);
        assert_eq!(alloc.counter().calls(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_leave_lease_untouched() {
        let alloc = allocator(5);
        alloc.counter().fail_next(3);

        let err = alloc.next_id("t").await.unwrap_err();
        assert!(matches!(err, Error::Exhausted { attempts: 3, .. }));
        assert_eq!(alloc.counter().value("seq:t"), None);

        assert_eq!(alloc.next_id("t").await.unwrap(), 1);
        assert_eq!(alloc.next_id("t").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn regressed_counter_is_rejected() {
        let alloc = allocator(5);
        alloc.counter().set("seq:t", -10);

        let err = alloc.next_id("t").await.unwrap_err();
        assert!(matches!(err, Error::CounterRegressed { value: -5, .. }));
    }

    #[test]
    fn non_positive_step_is_rejected() {
        let counter = InMemoryCounterStore::new();
        let err = SegmentAllocator::new(counter, settings(0)).unwrap_err();
        assert_eq!(err, Error::InvalidStep { step: 0 });

        let counter = InMemoryCounterStore::new();
        assert!(SegmentAllocator::new(counter, settings(-3)).is_err());
    }

    #[test]
    fn empty_retry_budget_is_rejected() {
        let settings = AllocatorSettings::builder().max_retries(0).build();
        let err = SegmentAllocator::new(InMemoryCounterStore::new(), settings).unwrap_err();
        assert_eq!(err, Error::InvalidRetries);
    }

    #[test]
    fn default_settings() {
        let settings = AllocatorSettings::default();
        assert_eq!(settings.step, 1000);
        assert_eq!(settings.key_prefix, "seq:");
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.retry_interval, Duration::from_millis(100));
    }
}
