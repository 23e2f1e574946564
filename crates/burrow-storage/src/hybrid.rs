use crate::access::{AccessRecorder, AccessRecorderSettings};
use async_trait::async_trait;
use burrow_cache::LruCache;
use burrow_core::{
    HistoryRepository, HistoryTable, LinkRecord, LinkRepository, LinkStore, ShortCode,
    StorageError, StoreError, DEFAULT_HISTORY_PREFIX, LIVE_TABLE,
};
use burrow_segment::{CounterStore, SegmentAllocator};
use jiff::Timestamp;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace};
use typed_builder::TypedBuilder;

const DEFAULT_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(10_000) {
    Some(capacity) => capacity,
    None => unreachable!(),
};

/// Configures a [`HybridStore`].
#[derive(Debug, Clone, TypedBuilder)]
pub struct HybridStoreSettings {
    /// Maximum number of records held in memory.
    #[builder(default = DEFAULT_CACHE_CAPACITY)]
    pub cache_capacity: NonZeroUsize,
    /// Prefix of the monthly tables removed links are moved to.
    #[builder(default = DEFAULT_HISTORY_PREFIX.to_string(), setter(into))]
    pub history_prefix: String,
    #[builder(default)]
    pub access: AccessRecorderSettings,
}

impl Default for HybridStoreSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// A link store that keeps recently used records in an in-memory LRU cache
/// in front of a durable repository.
///
/// Reads are cache-aside: a miss falls through to the repository and
/// repopulates the cache. Writes go to the repository first and then to the
/// cache, so a `get` after a successful `save` always observes the record.
/// Access counts are updated in the background by an [`AccessRecorder`].
#[derive(Debug)]
pub struct HybridStore<R, C> {
    repo: Arc<R>,
    cache: LruCache<ShortCode, LinkRecord>,
    allocator: SegmentAllocator<C>,
    recorder: AccessRecorder,
    history_prefix: String,
    /// Bumped by every `remove` between the move and the cache eviction.
    removals: AtomicU64,
    closed: AtomicBool,
}

impl<R, C> HybridStore<R, C>
where
    R: LinkRepository + HistoryRepository,
    C: CounterStore,
{
    /// Creates a store and starts its access workers on the current runtime.
    pub fn new(repo: Arc<R>, allocator: SegmentAllocator<C>, settings: HybridStoreSettings) -> Self {
        let recorder = AccessRecorder::spawn(Arc::clone(&repo), settings.access);

        Self {
            repo,
            cache: LruCache::new(settings.cache_capacity),
            allocator,
            recorder,
            history_prefix: settings.history_prefix,
            removals: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repo
    }

    pub fn cache(&self) -> &LruCache<ShortCode, LinkRecord> {
        &self.cache
    }

    pub fn allocator(&self) -> &SegmentAllocator<C> {
        &self.allocator
    }

    /// Number of access-count updates dropped under load.
    pub fn dropped_access_updates(&self) -> u64 {
        self.recorder.dropped()
    }

    /// Moves a link out of the live table into the current month's history
    /// table and evicts it from the cache.
    ///
    /// Returns `false` if the code is not in the live table.
    pub async fn remove(&self, code: &ShortCode) -> Result<bool, StoreError> {
        self.ensure_open()?;

        let Some(record) = self.repo.find_by_code(code).await? else {
            self.cache.remove(code);
            return Ok(false);
        };
        let id = record.id.ok_or_else(|| {
            StorageError::InvalidData(format!("stored record '{code}' has no id"))
        })?;

        let table = HistoryTable::for_month(&self.history_prefix, Timestamp::now())
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;
        self.repo.ensure_history_table(&table).await?;
        let moved = self.repo.move_to_history(&table, id).await?;

        self.removals.fetch_add(1, Ordering::SeqCst);
        self.cache.remove(code);
        info!(code = %code, id, table = %table, moved, "Removed link");

        Ok(moved)
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl<R, C> LinkStore for HybridStore<R, C>
where
    R: LinkRepository + HistoryRepository,
    C: CounterStore,
{
    async fn save(&self, mut record: LinkRecord) -> Result<LinkRecord, StoreError> {
        self.ensure_open()?;

        if record.id.is_none() {
            record.id = Some(self.allocator.next_id(LIVE_TABLE).await?);
        }

        self.repo.insert(&record).await?;
        self.cache.put(record.code.clone(), record.clone());
        debug!(code = %record.code, id = ?record.id, "Saved link");

        Ok(record)
    }

    async fn get(&self, code: &ShortCode) -> Result<LinkRecord, StoreError> {
        self.ensure_open()?;
        let now = Timestamp::now();

        if let Some(record) = self.cache.get(code) {
            // Expired entries stay cached until evicted by recency.
            if record.is_expired_at(now) {
                debug!(code = %code, "Cache hit for expired link");
                return Err(StoreError::NotFound(code.clone()));
            }

            trace!(code = %code, "Cache hit");
            self.recorder.record(code, now);
            return Ok(record);
        }

        trace!(code = %code, "Cache miss, querying repository");
        let removals = self.removals.load(Ordering::SeqCst);
        let Some(record) = self.repo.find_by_code(code).await? else {
            return Err(StoreError::NotFound(code.clone()));
        };

        if record.is_expired_at(now) {
            debug!(code = %code, "Repository returned expired link");
            return Err(StoreError::NotFound(code.clone()));
        }

        self.cache.put(code.clone(), record.clone());
        // Undo the put if a `remove` ran while the record was loading.
        if self.removals.load(Ordering::SeqCst) != removals {
            self.cache.remove(code);
        }
        self.recorder.record(code, now);

        Ok(record)
    }

    async fn close(&self) -> Result<(), StoreError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }

        self.recorder.shutdown().await;
        self.repo.close().await?;
        info!("Link store closed");

        Ok(())
    }
}
