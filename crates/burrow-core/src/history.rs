use crate::error::{CoreError, Result};
use jiff::Timestamp;
use std::fmt::Display;

/// Name of the live links table.
pub const LIVE_TABLE: &str = "short_links";

/// Default prefix of the monthly history tables.
pub const DEFAULT_HISTORY_PREFIX: &str = "short_links_history_";

// MySQL identifier limit.
const MAX_TABLE_NAME: usize = 64;

/// A validated name of a monthly history table, e.g. `short_links_history_2501`.
///
/// The name is interpolated into DDL and DML, so it is restricted to ASCII
/// alphanumerics and underscores.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HistoryTable(String);

impl HistoryTable {
    /// The history table for the month `at` falls in, in UTC.
    pub fn for_month(prefix: &str, at: Timestamp) -> Result<Self> {
        Self::new(format!("{}{}", prefix, at.strftime("%y%m")))
    }

    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();

        if name.is_empty() || name.len() > MAX_TABLE_NAME {
            return Err(CoreError::InvalidTableName(format!(
                "length must be between 1 and {}, got {}",
                MAX_TABLE_NAME,
                name.len()
            )));
        }

        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(CoreError::InvalidTableName(format!(
                "must contain only alphanumeric characters or underscores: '{}'",
                name
            )));
        }

        if name == LIVE_TABLE {
            return Err(CoreError::InvalidTableName(
                "history table cannot be the live table".to_string(),
            ));
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for HistoryTable {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for HistoryTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
