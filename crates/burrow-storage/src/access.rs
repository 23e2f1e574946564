use burrow_core::{LinkRepository, ShortCode};
use jiff::Timestamp;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use typed_builder::TypedBuilder;

/// Configures an [`AccessRecorder`].
#[derive(Debug, Clone, TypedBuilder)]
pub struct AccessRecorderSettings {
    /// Updates buffered before new ones are dropped.
    #[builder(default = 1024)]
    pub queue_capacity: usize,
    #[builder(default = 4)]
    pub workers: usize,
}

impl Default for AccessRecorderSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug)]
struct AccessEvent {
    code: ShortCode,
    at: Timestamp,
}

/// Applies access-count updates in the background.
///
/// Updates go through a bounded queue drained by a fixed pool of workers.
/// Recording never waits: when the queue is full the update is dropped and
/// counted. Worker failures are logged and swallowed.
#[derive(Debug)]
pub struct AccessRecorder {
    sender: Mutex<Option<Sender<AccessEvent>>>,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    dropped: AtomicU64,
}

impl AccessRecorder {
    /// Starts the worker pool on the current tokio runtime.
    pub fn spawn<R: LinkRepository>(repo: Arc<R>, settings: AccessRecorderSettings) -> Self {
        let (sender, receiver) = mpsc::channel(settings.queue_capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let workers = (0..settings.workers.max(1))
            .map(|worker| {
                tokio::spawn(run_worker(worker, Arc::clone(&receiver), Arc::clone(&repo)))
            })
            .collect();

        Self {
            sender: Mutex::new(Some(sender)),
            workers: tokio::sync::Mutex::new(workers),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueues an access of `code` at `at`.
    pub fn record(&self, code: &ShortCode, at: Timestamp) {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            trace!(code = %code, "Access recorder stopped, ignoring access");
            return;
        };

        let event = AccessEvent {
            code: code.clone(),
            at,
        };

        match sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(code = %event.code, "Access queue full, dropping update");
            }
            Err(TrySendError::Closed(event)) => {
                trace!(code = %event.code, "Access queue closed, dropping update");
            }
        }
    }

    /// Number of updates dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stops accepting updates, drains the queue and waits for the workers.
    pub async fn shutdown(&self) {
        // Dropping the only sender lets the workers drain and exit.
        drop(self.sender.lock().take());

        let workers = std::mem::take(&mut *self.workers.lock().await);
        for handle in workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "Access worker terminated abnormally");
            }
        }
    }
}

async fn run_worker<R: LinkRepository>(
    worker: usize,
    receiver: Arc<tokio::sync::Mutex<Receiver<AccessEvent>>>,
    repo: Arc<R>,
) {
    loop {
        // The lock is released before the update runs, so workers apply
        // updates concurrently.
        let event = receiver.lock().await.recv().await;
        let Some(event) = event else {
            break;
        };

        match repo.record_access(&event.code, event.at).await {
            Ok(true) => trace!(worker, code = %event.code, "Recorded access"),
            Ok(false) => debug!(worker, code = %event.code, "Access for unknown code"),
            Err(e) => warn!(worker, code = %event.code, error = %e, "Failed to record access"),
        }
    }

    trace!(worker, "Access worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryRepository;
    use awaitility::at_most;
    use burrow_core::LinkRecord;
    use std::time::Duration;

    async fn repo_with(code: &str) -> Arc<InMemoryRepository> {
        let repo = Arc::new(InMemoryRepository::new());
        let record = LinkRecord::new(
            ShortCode::new_unchecked(code),
            "https://example.com",
            Timestamp::UNIX_EPOCH,
            Timestamp::MAX,
        )
        .with_id(1);
        repo.insert(&record).await.unwrap();
        repo
    }

    async fn access_count(repo: &InMemoryRepository, code: &ShortCode) -> u64 {
        repo.find_by_code(code).await.unwrap().unwrap().access_count
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn records_accesses_in_background() {
        let repo = repo_with("abcd").await;
        let code = ShortCode::new_unchecked("abcd");
        let recorder = AccessRecorder::spawn(Arc::clone(&repo), AccessRecorderSettings::default());

        for _ in 0..10 {
            recorder.record(&code, Timestamp::now());
        }

        at_most(Duration::from_secs(2))
            .poll_interval(Duration::from_millis(10))
            .until_async(|| async { access_count(&repo, &code).await == 10 })
            .await;

        assert_eq!(recorder.dropped(), 0);
        recorder.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_drains_queued_updates() {
        let repo = repo_with("abcd").await;
        let code = ShortCode::new_unchecked("abcd");
        let recorder = AccessRecorder::spawn(
            Arc::clone(&repo),
            AccessRecorderSettings::builder().workers(1).build(),
        );

        for _ in 0..100 {
            recorder.record(&code, Timestamp::now());
        }
        recorder.shutdown().await;

        assert_eq!(access_count(&repo, &code).await, 100);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn full_queue_drops_and_counts() {
        let repo = repo_with("abcd").await;
        let code = ShortCode::new_unchecked("abcd");
        let recorder = AccessRecorder::spawn(
            Arc::clone(&repo),
            AccessRecorderSettings::builder()
                .queue_capacity(2)
                .workers(1)
                .build(),
        );

        // The single-threaded runtime cannot run the worker until we yield,
        // so only the first two updates fit.
        for _ in 0..5 {
            recorder.record(&code, Timestamp::now());
        }
        assert_eq!(recorder.dropped(), 3);

        recorder.shutdown().await;
        assert_eq!(access_count(&repo, &code).await, 2);
    }

    #[tokio::test]
    async fn records_after_shutdown_are_ignored() {
        let repo = repo_with("abcd").await;
        let code = ShortCode::new_unchecked("abcd");
        let recorder = AccessRecorder::spawn(Arc::clone(&repo), AccessRecorderSettings::default());

        recorder.shutdown().await;
        recorder.record(&code, Timestamp::now());

        assert_eq!(recorder.dropped(), 0);
        assert_eq!(access_count(&repo, &code).await, 0);
    }

    #[tokio::test]
    async fn worker_errors_are_swallowed() {
        let repo = repo_with("abcd").await;
        let code = ShortCode::new_unchecked("abcd");
        let recorder = AccessRecorder::spawn(
            Arc::clone(&repo),
            AccessRecorderSettings::builder().workers(1).build(),
        );

        repo.fail_next(1);
        recorder.record(&code, Timestamp::now());
        recorder.record(&code, Timestamp::now());
        recorder.shutdown().await;

        assert_eq!(access_count(&repo, &code).await, 1);
    }
}
