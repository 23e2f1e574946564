use crate::error::TaskError;
use async_trait::async_trait;

/// A unit of periodic work run by the [`Scheduler`](crate::Scheduler).
#[async_trait]
pub trait Task: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Disabled tasks are skipped when the scheduler starts.
    fn is_enabled(&self) -> bool;

    /// Cron expression with six fields, seconds first, evaluated in UTC.
    fn schedule(&self) -> &str;

    async fn run(&self) -> Result<(), TaskError>;
}
