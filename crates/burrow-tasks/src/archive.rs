use crate::clock::{Clock, SystemClock};
use crate::error::{ArchiveError, TaskError};
use crate::task::Task;
use async_trait::async_trait;
use burrow_core::{HistoryRepository, HistoryTable, DEFAULT_HISTORY_PREFIX};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};
use typed_builder::TypedBuilder;

pub const DEFAULT_BATCH_SIZE: u32 = 1000;
pub const DEFAULT_ARCHIVE_CRON: &str = "0 0 3 * * *";

/// Configures [`ArchiveExpiredLinks`].
#[derive(Debug, Clone, Deserialize, TypedBuilder)]
#[serde(default)]
pub struct ArchiveSettings {
    #[builder(default = true)]
    pub enabled: bool,
    /// Six-field cron expression, seconds first.
    #[builder(default = DEFAULT_ARCHIVE_CRON.to_string(), setter(into))]
    pub cron: String,
    /// Maximum rows moved per run. Non-positive values mean the default.
    #[builder(default = i64::from(DEFAULT_BATCH_SIZE))]
    pub batch_size: i64,
    #[builder(default = DEFAULT_HISTORY_PREFIX.to_string(), setter(into))]
    pub history_prefix: String,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ArchiveSettings {
    pub fn effective_batch_size(&self) -> u32 {
        if self.batch_size <= 0 {
            return DEFAULT_BATCH_SIZE;
        }
        u32::try_from(self.batch_size).unwrap_or(u32::MAX)
    }
}

/// Outcome of one archival run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveReport {
    pub history_table: String,
    pub moved: u64,
}

/// Moves expired links out of the live table into the current month's
/// history table, one bounded batch per run.
pub struct ArchiveExpiredLinks<R, K = SystemClock> {
    repo: Arc<R>,
    settings: ArchiveSettings,
    clock: K,
}

impl<R: HistoryRepository> ArchiveExpiredLinks<R> {
    pub fn new(repo: Arc<R>, settings: ArchiveSettings) -> Self {
        Self::with_clock(repo, settings, SystemClock)
    }
}

impl<R: HistoryRepository, K: Clock> ArchiveExpiredLinks<R, K> {
    pub fn with_clock(repo: Arc<R>, settings: ArchiveSettings, clock: K) -> Self {
        Self {
            repo,
            settings,
            clock,
        }
    }

    pub fn settings(&self) -> &ArchiveSettings {
        &self.settings
    }

    /// Runs one archival pass.
    ///
    /// Either the whole batch lands in the history table or nothing moves.
    pub async fn archive(&self) -> Result<ArchiveReport, ArchiveError> {
        let now = self.clock.now();
        let table = HistoryTable::for_month(&self.settings.history_prefix, now)?;

        let created = self
            .repo
            .ensure_history_table(&table)
            .await
            .map_err(|source| ArchiveError::HistoryTable {
                table: table.to_string(),
                source,
            })?;
        if created {
            debug!(table = %table, "History table created");
        }

        let batch_size = self.settings.effective_batch_size();
        let moved = self
            .repo
            .archive_expired(&table, now, batch_size)
            .await
            .map_err(|source| ArchiveError::Batch {
                table: table.to_string(),
                source,
            })?;

        info!(table = %table, moved, batch_size, "Archived expired links");

        Ok(ArchiveReport {
            history_table: table.to_string(),
            moved,
        })
    }
}

#[async_trait]
impl<R: HistoryRepository, K: Clock> Task for ArchiveExpiredLinks<R, K> {
    fn name(&self) -> &str {
        "archive_expired_links"
    }

    fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    fn schedule(&self) -> &str {
        &self.settings.cron
    }

    async fn run(&self) -> Result<(), TaskError> {
        self.archive().await?;
        Ok(())
    }
}
