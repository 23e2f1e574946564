use async_trait::async_trait;
use burrow_core::repository::Result;
use burrow_core::{HistoryRepository, HistoryTable, LinkRecord, LinkRepository, ShortCode, StorageError};
use jiff::Timestamp;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct Tables {
    live: BTreeMap<i64, LinkRecord>,
    codes: HashMap<ShortCode, i64>,
    history: HashMap<String, BTreeMap<i64, LinkRecord>>,
}

impl Tables {
    fn history_mut(&mut self, table: &HistoryTable) -> Result<&mut BTreeMap<i64, LinkRecord>> {
        self.history
            .get_mut(table.as_str())
            .ok_or_else(|| StorageError::Query(format!("table '{}' doesn't exist", table)))
    }

    fn take_live(&mut self, id: i64) -> Option<LinkRecord> {
        let record = self.live.remove(&id)?;
        self.codes.remove(&record.code);
        Some(record)
    }

    /// Moves `ids` back from `table` into the live table.
    fn undo_moves(&mut self, table: &HistoryTable, ids: &[i64]) {
        for id in ids {
            let Some(record) = self
                .history
                .get_mut(table.as_str())
                .and_then(|rows| rows.remove(id))
            else {
                continue;
            };
            self.codes.insert(record.code.clone(), *id);
            self.live.insert(*id, record);
        }
    }
}

/// Backing store that keeps the live and history tables in process memory.
///
/// Every operation runs under one lock, so multi-row moves are all-or-nothing
/// just like the SQL transactions of [`MySqlRepository`](crate::MySqlRepository).
/// Failures can be injected to exercise callers' error paths.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    tables: Mutex<Tables>,
    failures_pending: AtomicU32,
    archive_fail_after: Mutex<Option<usize>>,
    closed: AtomicBool,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` operations fail without touching any table.
    pub fn fail_next(&self, count: u32) {
        self.failures_pending.store(count, Ordering::SeqCst);
    }

    /// Makes the next archive run fail once it has moved `rows` rows.
    ///
    /// The run puts the moved rows back before failing, like a rolled back
    /// transaction.
    pub fn fail_archive_after(&self, rows: usize) {
        *self.archive_fail_after.lock() = Some(rows);
    }

    /// Number of records in the live table.
    pub fn live_len(&self) -> usize {
        self.tables.lock().live.len()
    }

    /// Records in `table`, ordered by id. Empty if the table does not exist.
    pub fn history(&self, table: &str) -> Vec<LinkRecord> {
        self.tables
            .lock()
            .history
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Names of the history tables created so far.
    pub fn history_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.lock().history.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_closed() {
            return Err(StorageError::Unavailable("repository is closed".to_string()));
        }

        let injected = self
            .failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StorageError::Unavailable("injected failure".to_string()));
        }

        Ok(())
    }
}

#[async_trait]
impl LinkRepository for InMemoryRepository {
    async fn insert(&self, record: &LinkRecord) -> Result<()> {
        self.check()?;

        let Some(id) = record.id else {
            return Err(StorageError::InvalidData(format!(
                "record '{}' has no id",
                record.code
            )));
        };

        let mut tables = self.tables.lock();
        if tables.codes.contains_key(&record.code) || tables.live.contains_key(&id) {
            return Err(StorageError::Conflict(record.code.to_string()));
        }

        tables.codes.insert(record.code.clone(), id);
        tables.live.insert(id, record.clone());
        trace!(code = %record.code, id, "Inserted link record");

        Ok(())
    }

    async fn find_by_code(&self, code: &ShortCode) -> Result<Option<LinkRecord>> {
        self.check()?;

        let tables = self.tables.lock();
        Ok(tables
            .codes
            .get(code)
            .and_then(|id| tables.live.get(id))
            .cloned())
    }

    async fn record_access(&self, code: &ShortCode, at: Timestamp) -> Result<bool> {
        self.check()?;

        let mut tables = self.tables.lock();
        let Some(id) = tables.codes.get(code).copied() else {
            return Ok(false);
        };

        match tables.live.get_mut(&id) {
            Some(record) => {
                record.access_count += 1;
                record.last_access = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl HistoryRepository for InMemoryRepository {
    async fn ensure_history_table(&self, table: &HistoryTable) -> Result<bool> {
        self.check()?;

        let mut tables = self.tables.lock();
        if tables.history.contains_key(table.as_str()) {
            return Ok(false);
        }

        tables.history.insert(table.to_string(), BTreeMap::new());
        debug!(table = %table, "Created history table");
        Ok(true)
    }

    async fn archive_expired(
        &self,
        table: &HistoryTable,
        now: Timestamp,
        limit: u32,
    ) -> Result<u64> {
        self.check()?;

        let fail_after = self.archive_fail_after.lock().take();
        let mut tables = self.tables.lock();
        tables.history_mut(table)?;

        let candidates: Vec<i64> = tables
            .live
            .values()
            .filter(|record| record.expires_at < now)
            .filter_map(|record| record.id)
            .take(limit as usize)
            .collect();

        if candidates.is_empty() {
            return Ok(0);
        }

        let mut moved = Vec::with_capacity(candidates.len());
        for id in candidates {
            if fail_after == Some(moved.len()) {
                tables.undo_moves(table, &moved);
                return Err(StorageError::Operation(format!(
                    "injected failure after moving {} rows",
                    moved.len()
                )));
            }

            if let Some(record) = tables.take_live(id) {
                tables.history_mut(table)?.insert(id, record);
                moved.push(id);
            }
        }

        Ok(moved.len() as u64)
    }

    async fn move_to_history(&self, table: &HistoryTable, id: i64) -> Result<bool> {
        self.check()?;

        let mut tables = self.tables.lock();
        tables.history_mut(table)?;

        let Some(record) = tables.take_live(id) else {
            return Ok(false);
        };
        tables.history_mut(table)?.insert(id, record);

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::SignedDuration;

    fn ts(second: i64) -> Timestamp {
        Timestamp::from_second(second).unwrap()
    }

    fn record(id: i64, code: &str, expires_at: i64) -> LinkRecord {
        LinkRecord::new(
            ShortCode::new_unchecked(code),
            format!("https://example.com/{code}"),
            ts(0),
            ts(expires_at),
        )
        .with_id(id)
    }

    fn table() -> HistoryTable {
        HistoryTable::new("short_links_history_2501").unwrap()
    }

    #[tokio::test]
    async fn insert_and_find() {
        let repo = InMemoryRepository::new();
        repo.insert(&record(1, "abcd", 100)).await.unwrap();

        let found = repo
            .find_by_code(&ShortCode::new_unchecked("abcd"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, Some(1));
        assert!(repo
            .find_by_code(&ShortCode::new_unchecked("zzzz"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn insert_rejects_duplicates_and_missing_ids() {
        let repo = InMemoryRepository::new();
        repo.insert(&record(1, "abcd", 100)).await.unwrap();

        let same_code = repo.insert(&record(2, "abcd", 100)).await.unwrap_err();
        assert!(matches!(same_code, StorageError::Conflict(_)));

        let same_id = repo.insert(&record(1, "efgh", 100)).await.unwrap_err();
        assert!(matches!(same_id, StorageError::Conflict(_)));

        let mut unsaved = record(3, "ijkl", 100);
        unsaved.id = None;
        let no_id = repo.insert(&unsaved).await.unwrap_err();
        assert!(matches!(no_id, StorageError::InvalidData(_)));

        assert_eq!(repo.live_len(), 1);
    }

    #[tokio::test]
    async fn record_access_counts() {
        let repo = InMemoryRepository::new();
        let code = ShortCode::new_unchecked("abcd");
        repo.insert(&record(1, "abcd", 100)).await.unwrap();

        assert!(repo.record_access(&code, ts(10)).await.unwrap());
        assert!(repo.record_access(&code, ts(20)).await.unwrap());
        assert!(!repo
            .record_access(&ShortCode::new_unchecked("zzzz"), ts(30))
            .await
            .unwrap());

        let found = repo.find_by_code(&code).await.unwrap().unwrap();
        assert_eq!(found.access_count, 2);
        assert_eq!(found.last_access, Some(ts(20)));
    }

    #[tokio::test]
    async fn ensure_history_table_is_idempotent() {
        let repo = InMemoryRepository::new();

        assert!(repo.ensure_history_table(&table()).await.unwrap());
        assert!(!repo.ensure_history_table(&table()).await.unwrap());
        assert_eq!(repo.history_tables(), vec!["short_links_history_2501"]);
    }

    #[tokio::test]
    async fn archive_moves_only_expired_rows() {
        let repo = InMemoryRepository::new();
        repo.insert(&record(1, "old1", 10)).await.unwrap();
        repo.insert(&record(2, "old2", 20)).await.unwrap();
        repo.insert(&record(3, "live", 1_000)).await.unwrap();
        repo.ensure_history_table(&table()).await.unwrap();

        let moved = repo.archive_expired(&table(), ts(100), 1000).await.unwrap();

        assert_eq!(moved, 2);
        assert_eq!(repo.live_len(), 1);
        let archived: Vec<_> = repo
            .history(table().as_str())
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(archived, vec![Some(1), Some(2)]);
        assert!(repo
            .find_by_code(&ShortCode::new_unchecked("old1"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn archive_respects_limit() {
        let repo = InMemoryRepository::new();
        for id in 1..=5 {
            repo.insert(&record(id, &format!("code{id}"), 10))
                .await
                .unwrap();
        }
        repo.ensure_history_table(&table()).await.unwrap();

        assert_eq!(repo.archive_expired(&table(), ts(100), 2).await.unwrap(), 2);
        assert_eq!(repo.archive_expired(&table(), ts(100), 2).await.unwrap(), 2);
        assert_eq!(repo.archive_expired(&table(), ts(100), 2).await.unwrap(), 1);
        assert_eq!(repo.archive_expired(&table(), ts(100), 2).await.unwrap(), 0);
        assert_eq!(repo.live_len(), 0);
        assert_eq!(repo.history(table().as_str()).len(), 5);
    }

    #[tokio::test]
    async fn expiry_at_exactly_now_is_not_archived() {
        let repo = InMemoryRepository::new();
        repo.insert(&record(1, "edge", 100)).await.unwrap();
        repo.ensure_history_table(&table()).await.unwrap();

        assert_eq!(repo.archive_expired(&table(), ts(100), 10).await.unwrap(), 0);
        assert_eq!(repo.live_len(), 1);
    }

    #[tokio::test]
    async fn failure_mid_batch_puts_moved_rows_back() {
        let repo = InMemoryRepository::new();
        repo.ensure_history_table(&table()).await.unwrap();
        repo.insert(&record(1, "old1", 10)).await.unwrap();
        assert_eq!(repo.archive_expired(&table(), ts(15), 10).await.unwrap(), 1);

        for (id, code) in [(2, "old2"), (3, "old3"), (4, "old4")] {
            repo.insert(&record(id, code, 20)).await.unwrap();
        }
        repo.fail_archive_after(2);

        let err = repo.archive_expired(&table(), ts(100), 10).await.unwrap_err();
        assert!(matches!(err, StorageError::Operation(_)));
        assert_eq!(repo.live_len(), 3);
        let archived: Vec<_> = repo
            .history(table().as_str())
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(archived, vec![Some(1)]);
        for code in ["old2", "old3", "old4"] {
            assert!(repo
                .find_by_code(&ShortCode::new_unchecked(code))
                .await
                .unwrap()
                .is_some());
        }

        assert_eq!(repo.archive_expired(&table(), ts(100), 10).await.unwrap(), 3);
        assert_eq!(repo.history(table().as_str()).len(), 4);
    }

    #[tokio::test]
    async fn archive_into_missing_table_fails() {
        let repo = InMemoryRepository::new();
        repo.insert(&record(1, "old1", 10)).await.unwrap();

        let err = repo.archive_expired(&table(), ts(100), 10).await.unwrap_err();
        assert!(matches!(err, StorageError::Query(_)));
        assert_eq!(repo.live_len(), 1);
    }

    #[tokio::test]
    async fn move_to_history_by_id() {
        let repo = InMemoryRepository::new();
        repo.insert(&record(7, "abcd", 1_000)).await.unwrap();
        repo.ensure_history_table(&table()).await.unwrap();

        assert!(repo.move_to_history(&table(), 7).await.unwrap());
        assert!(!repo.move_to_history(&table(), 7).await.unwrap());
        assert_eq!(repo.live_len(), 0);
        assert_eq!(repo.history(table().as_str()).len(), 1);
    }

    #[tokio::test]
    async fn injected_failures_and_close() {
        let repo = InMemoryRepository::new();
        repo.fail_next(1);

        let err = repo.insert(&record(1, "abcd", 100)).await.unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)));
        repo.insert(&record(1, "abcd", 100)).await.unwrap();

        repo.close().await.unwrap();
        assert!(repo.is_closed());
        let err = repo
            .find_by_code(&ShortCode::new_unchecked("abcd"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)));
    }

    #[tokio::test]
    async fn expired_records_stay_readable_until_archived() {
        let repo = InMemoryRepository::new();
        let now = Timestamp::now();
        let expired = LinkRecord::new(
            ShortCode::new_unchecked("gone"),
            "https://example.com",
            now - SignedDuration::from_hours(2),
            now - SignedDuration::from_hours(1),
        )
        .with_id(1);
        repo.insert(&expired).await.unwrap();

        let found = repo.find_by_code(&expired.code).await.unwrap().unwrap();
        assert!(found.is_expired_at(now));
    }
}
