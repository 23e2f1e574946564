use crate::error::{InvalidSchedule, SchedulerError, TaskError};
use crate::task::Task;
use chrono::Utc;
use cron::Schedule;
use std::any::Any;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const CRON_FIELDS: usize = 6;

/// Runs registered [`Task`]s on their cron schedules.
///
/// Each enabled task gets one loop that sleeps until the next fire time and
/// then runs the task to completion, so runs of the same task never overlap.
/// A run that overruns its next fire time delays it.
pub struct Scheduler {
    tasks: Vec<Arc<dyn Task>>,
    shutdown: watch::Sender<bool>,
    loops: Vec<JoinHandle<()>>,
    started: bool,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            tasks: Vec::new(),
            shutdown,
            loops: Vec::new(),
            started: false,
        }
    }

    pub fn register<T: Task>(&mut self, task: T) {
        self.tasks.push(Arc::new(task));
    }

    /// Starts a loop for every enabled task with a valid schedule.
    ///
    /// Tasks with an invalid schedule are left out and reported together in
    /// [`SchedulerError::InvalidSchedule`]; the others keep running.
    pub fn start(&mut self) -> Result<usize, SchedulerError> {
        if self.started {
            return Err(SchedulerError::AlreadyStarted);
        }
        self.started = true;

        let mut invalid = Vec::new();

        for task in &self.tasks {
            if !task.is_enabled() {
                info!(task = task.name(), "Task disabled, skipping");
                continue;
            }

            let schedule = match parse_schedule(task.schedule()) {
                Ok(schedule) => schedule,
                Err(reason) => {
                    error!(
                        task = task.name(),
                        schedule = task.schedule(),
                        reason = %reason,
                        "Failed to register task"
                    );
                    invalid.push(InvalidSchedule {
                        task: task.name().to_string(),
                        expression: task.schedule().to_string(),
                        reason,
                    });
                    continue;
                }
            };

            info!(task = task.name(), schedule = task.schedule(), "Task registered");
            self.loops.push(tokio::spawn(run_loop(
                Arc::clone(task),
                schedule,
                self.shutdown.subscribe(),
            )));
        }

        info!(scheduled = self.loops.len(), "Scheduler started");

        if invalid.is_empty() {
            Ok(self.loops.len())
        } else {
            Err(SchedulerError::InvalidSchedule(invalid))
        }
    }

    /// Stops every loop, waiting for in-flight runs to finish.
    pub async fn shutdown(mut self) {
        self.shutdown.send_replace(true);

        for handle in self.loops.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "Task loop terminated abnormally");
            }
        }

        info!("Scheduler stopped");
    }
}

fn parse_schedule(expression: &str) -> Result<Schedule, String> {
    let fields = expression.split_whitespace().count();
    if fields != CRON_FIELDS {
        return Err(format!("expected {CRON_FIELDS} fields, got {fields}"));
    }

    Schedule::from_str(expression).map_err(|e| e.to_string())
}

async fn run_loop(task: Arc<dyn Task>, schedule: Schedule, mut shutdown: watch::Receiver<bool>) {
    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            info!(task = task.name(), "No upcoming fire time, stopping");
            return;
        };
        let delay = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => return,
        }

        // Errors are already logged by `run_once`.
        let _ = run_once(Arc::clone(&task)).await;

        if *shutdown.borrow() {
            return;
        }
    }
}

/// Runs `task` once on its own tokio task and reports how it ended.
///
/// A panic inside the task is caught at the task boundary and returned as
/// [`TaskError::Panicked`].
pub async fn run_once(task: Arc<dyn Task>) -> Result<(), TaskError> {
    let name = task.name().to_string();
    info!(task = %name, "Task started");
    let started = Instant::now();

    let result = match tokio::spawn(async move { task.run().await }).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(TaskError::Panicked(panic_message(e.into_panic()))),
        Err(e) => Err(TaskError::Cancelled(e.to_string())),
    };

    let elapsed = started.elapsed();
    match &result {
        Ok(()) => info!(task = %name, ?elapsed, "Task finished"),
        Err(e) => error!(task = %name, ?elapsed, error = %e, "Task failed"),
    }

    result
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return message.to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic payload".to_string()
}
