//! Scheduled maintenance of the link tables.

pub mod archive;
pub mod clock;
pub mod error;
pub mod scheduler;
pub mod task;

pub use archive::{ArchiveExpiredLinks, ArchiveReport, ArchiveSettings};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ArchiveError, InvalidSchedule, SchedulerError, TaskError};
pub use scheduler::{run_once, Scheduler};
pub use task::Task;
