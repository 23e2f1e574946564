use async_trait::async_trait;
use burrow_core::repository::Result;
use burrow_core::{
    HistoryRepository, HistoryTable, LinkRecord, LinkRepository, ShortCode, StorageError,
    LIVE_TABLE,
};
use jiff::Timestamp;
use sqlx::mysql::MySqlRow;
use sqlx::{MySqlPool, Row};
use tracing::{debug, info, trace};

/// MySQL implementation of the link and history repositories.
///
/// Timestamps are stored as unix milliseconds. History tables are created on
/// demand with `CREATE TABLE ... LIKE short_links`, and rows are moved between
/// tables inside a single transaction.
#[derive(Debug, Clone)]
pub struct MySqlRepository {
    pool: MySqlPool,
}

impl MySqlRepository {
    /// Creates a repository from an existing MySQL connection pool.
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Creates a repository by opening a new MySQL connection pool.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = MySqlPool::connect(database_url)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self::new(pool))
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

fn parse_millis(column: &str, millis: i64) -> Result<Timestamp> {
    Timestamp::from_millisecond(millis).map_err(|e| {
        StorageError::InvalidData(format!("invalid {column} timestamp '{millis}': {e}"))
    })
}

fn row_to_record(row: &MySqlRow) -> Result<LinkRecord> {
    let id: i64 = row.try_get("id").map_err(map_sqlx_error)?;
    let code: String = row.try_get("short_code").map_err(map_sqlx_error)?;
    let original_url: String = row.try_get("original_url").map_err(map_sqlx_error)?;
    let created_at: i64 = row.try_get("created_at").map_err(map_sqlx_error)?;
    let expires_at: i64 = row.try_get("expires_at").map_err(map_sqlx_error)?;
    let access_count: u64 = row.try_get("access_count").map_err(map_sqlx_error)?;
    let last_access: Option<i64> = row.try_get("last_access").map_err(map_sqlx_error)?;

    Ok(LinkRecord {
        id: Some(id),
        code: ShortCode::new_unchecked(code),
        original_url,
        created_at: parse_millis("created_at", created_at)?,
        expires_at: parse_millis("expires_at", expires_at)?,
        access_count,
        last_access: last_access
            .map(|millis| parse_millis("last_access", millis))
            .transpose()?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(sqlx::error::DatabaseError::is_unique_violation)
}

pub(crate) fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => StorageError::Timeout(message),
        sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StorageError::Unavailable(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StorageError::InvalidData(message),
        _ => StorageError::Query(message),
    }
}

#[async_trait]
impl LinkRepository for MySqlRepository {
    async fn insert(&self, record: &LinkRecord) -> Result<()> {
        let Some(id) = record.id else {
            return Err(StorageError::InvalidData(format!(
                "record '{}' has no id",
                record.code
            )));
        };

        let result = sqlx::query(
            r#"
            INSERT INTO short_links
                (id, short_code, original_url, created_at, expires_at, access_count, last_access)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(record.code.as_str())
        .bind(&record.original_url)
        .bind(record.created_at.as_millisecond())
        .bind(record.expires_at.as_millisecond())
        .bind(record.access_count)
        .bind(record.last_access.map(|ts| ts.as_millisecond()))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                trace!(code = %record.code, id, "Inserted link record");
                Ok(())
            }
            Err(err) if is_unique_violation(&err) => {
                Err(StorageError::Conflict(record.code.to_string()))
            }
            Err(err) => Err(map_sqlx_error(err)),
        }
    }

    async fn find_by_code(&self, code: &ShortCode) -> Result<Option<LinkRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, short_code, original_url, created_at, expires_at, access_count, last_access
            FROM short_links
            WHERE short_code = ?
            LIMIT 1
            "#,
        )
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn record_access(&self, code: &ShortCode, at: Timestamp) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE short_links
            SET access_count = access_count + 1,
                last_access = ?
            WHERE short_code = ?
            "#,
        )
        .bind(at.as_millisecond())
        .bind(code.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        info!("MySQL connection pool closed");
        Ok(())
    }
}

#[async_trait]
impl HistoryRepository for MySqlRepository {
    async fn ensure_history_table(&self, table: &HistoryTable) -> Result<bool> {
        let existing: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM information_schema.tables
            WHERE table_schema = DATABASE()
              AND table_name = ?
            "#,
        )
        .bind(table.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if existing > 0 {
            return Ok(false);
        }

        // Identifiers cannot be bound; `HistoryTable` only admits [A-Za-z0-9_].
        let ddl = format!("CREATE TABLE IF NOT EXISTS `{table}` LIKE `{LIVE_TABLE}`");
        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        info!(table = %table, "Created history table");
        Ok(true)
    }

    async fn archive_expired(
        &self,
        table: &HistoryTable,
        now: Timestamp,
        limit: u32,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT id
            FROM short_links
            WHERE expires_at < ?
            ORDER BY id
            LIMIT ?
            FOR UPDATE
            "#,
        )
        .bind(now.as_millisecond())
        .bind(limit)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if ids.is_empty() {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Ok(0);
        }

        let copy = format!("INSERT INTO `{table}` SELECT * FROM `{LIVE_TABLE}` WHERE id = ?");
        let delete = format!("DELETE FROM `{LIVE_TABLE}` WHERE id = ?");

        // Dropping `tx` on an early return rolls the whole batch back.
        for id in &ids {
            sqlx::query(&copy)
                .bind(*id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            sqlx::query(&delete)
                .bind(*id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(table = %table, moved = ids.len(), "Archived expired links");

        Ok(ids.len() as u64)
    }

    async fn move_to_history(&self, table: &HistoryTable, id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let copy = format!("INSERT INTO `{table}` SELECT * FROM `{LIVE_TABLE}` WHERE id = ?");
        let copied = sqlx::query(&copy)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();

        if copied == 0 {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Ok(false);
        }

        let delete = format!("DELETE FROM `{LIVE_TABLE}` WHERE id = ?");
        sqlx::query(&delete)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(table = %table, id, "Moved link to history");

        Ok(true)
    }
}
