use burrow_core::DEFAULT_HISTORY_PREFIX;
use burrow_tasks::archive::{DEFAULT_ARCHIVE_CRON, DEFAULT_BATCH_SIZE};
use burrow_tasks::ArchiveSettings;
use clap::{Parser, ValueEnum};
use std::fmt::{Display, Formatter};

pub const MYSQL_DSN_ENV: &str = "BURROW_ARCHIVER_MYSQL_DSN";
pub const CRON_ENV: &str = "BURROW_ARCHIVER_CRON";
pub const BATCH_SIZE_ENV: &str = "BURROW_ARCHIVER_BATCH_SIZE";
pub const HISTORY_PREFIX_ENV: &str = "BURROW_ARCHIVER_HISTORY_PREFIX";
pub const DISABLED_ENV: &str = "BURROW_ARCHIVER_DISABLED";
pub const LOG_FORMAT_ENV: &str = "BURROW_ARCHIVER_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    #[value(name = "text")]
    Text,
    #[value(name = "json")]
    Json,
}

impl Display for LogFormatArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormatArg::Text => write!(f, "text"),
            LogFormatArg::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Disabled,
    Once,
    Scheduled,
}

#[derive(Debug, Parser)]
#[command(name = "burrow-archiver")]
pub struct CLI {
    #[arg(long, env = MYSQL_DSN_ENV)]
    pub mysql_dsn: String,

    #[arg(long, env = CRON_ENV, default_value = DEFAULT_ARCHIVE_CRON)]
    pub cron: String,

    /// Rows moved per run; non-positive values fall back to the default.
    #[arg(long, env = BATCH_SIZE_ENV, default_value_t = i64::from(DEFAULT_BATCH_SIZE), allow_negative_numbers = true)]
    pub batch_size: i64,

    #[arg(long, env = HISTORY_PREFIX_ENV, default_value = DEFAULT_HISTORY_PREFIX)]
    pub history_prefix: String,

    /// Exit without archiving; also applies to `--once`.
    #[arg(long, env = DISABLED_ENV)]
    pub disabled: bool,

    /// Run a single archival pass and exit.
    #[arg(long)]
    pub once: bool,

    #[arg(long, env = LOG_FORMAT_ENV, value_enum, default_value_t = LogFormatArg::Text)]
    pub log_format: LogFormatArg,
}

impl CLI {
    pub fn archive_settings(&self) -> ArchiveSettings {
        ArchiveSettings::builder()
            .enabled(!self.disabled)
            .cron(self.cron.clone())
            .batch_size(self.batch_size)
            .history_prefix(self.history_prefix.clone())
            .build()
    }

    pub fn run_mode(&self) -> RunMode {
        if self.disabled {
            RunMode::Disabled
        } else if self.once {
            RunMode::Once
        } else {
            RunMode::Scheduled
        }
    }
}
