mod cli;

use crate::cli::{LogFormatArg, RunMode, CLI};
use anyhow::Context;
use burrow_storage::{LinkRepository, MySqlRepository};
use burrow_tasks::{ArchiveExpiredLinks, Scheduler, SchedulerError};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CLI::try_parse()?;
    init_tracing(config.log_format);

    let settings = config.archive_settings();
    info!(
        cron = %settings.cron,
        batch_size = settings.effective_batch_size(),
        history_prefix = %settings.history_prefix,
        enabled = settings.enabled,
        "starting archiver"
    );

    let mode = config.run_mode();
    if mode == RunMode::Disabled {
        info!("archival disabled, exiting");
        return Ok(());
    }

    let repository = Arc::new(
        MySqlRepository::connect(&config.mysql_dsn)
            .await
            .context("failed to connect to mysql")?,
    );
    let task = ArchiveExpiredLinks::new(Arc::clone(&repository), settings);

    if mode == RunMode::Once {
        let report = task.archive().await?;
        info!(table = %report.history_table, moved = report.moved, "archival pass complete");
        return Ok(());
    }

    let mut scheduler = Scheduler::new();
    scheduler.register(task);

    match scheduler.start() {
        Ok(scheduled) => info!(scheduled, "scheduler running"),
        Err(SchedulerError::InvalidSchedule(invalid)) => {
            for entry in &invalid {
                error!(
                    task = %entry.task,
                    expression = %entry.expression,
                    reason = %entry.reason,
                    "invalid schedule"
                );
            }
            anyhow::bail!("{} task(s) have an invalid schedule", invalid.len());
        }
        Err(e) => return Err(e.into()),
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown signal received");

    scheduler.shutdown().await;
    repository.close().await?;

    Ok(())
}

fn init_tracing(format: LogFormatArg) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormatArg::Text => builder.init(),
        LogFormatArg::Json => builder.json().init(),
    }
}
