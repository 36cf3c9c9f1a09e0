//! Bounded worker pool (C6), per `spec.md` §4.6: a fixed number of workers
//! consuming jobs in arrival order from a bounded queue, retrying a failing
//! job up to `max_retries` times with a fixed delay between attempts.
//!
//! Grounded on the `Arc<Self>`-receiver manager shape of the teacher's
//! `RunningActionsManager` (`cas/worker/running_actions_manager.rs`), adapted
//! from a one-action-at-a-time interface to a generic job queue; retries reuse
//! `cdn_edge_store::Retrier` so the delay schedule is injectable in tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cdn_edge_error::{make_err, Code, Error};
use cdn_edge_store::{RetryResult, Retrier};
use cdn_edge_util::Metrics;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    QueueFull,
    ShuttingDown,
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerPoolConfig {
    pub workers: usize,
    pub queue_size: usize,
    pub max_retries: usize,
    pub retry_delay: Duration,
}

type Task = Arc<dyn Fn() -> BoxFuture<'static, Result<(), Error>> + Send + Sync>;

struct Job {
    task: Task,
    response: oneshot::Sender<Result<(), Error>>,
}

/// A bounded pool of workers draining a single FIFO job queue.
pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutting_down: AtomicBool,
    config: WorkerPoolConfig,
}

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

impl WorkerPool {
    pub fn start(config: WorkerPoolConfig, metrics: Arc<Metrics>) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(config.queue_size);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let pool = Arc::new(WorkerPool {
            sender: Mutex::new(Some(sender)),
            handles: Mutex::new(Vec::new()),
            shutting_down: AtomicBool::new(false),
            config,
        });

        let mut handles = Vec::with_capacity(config.workers);
        for worker_id in 0..config.workers {
            let receiver = receiver.clone();
            let metrics = metrics.clone();
            let retry_delay = config.retry_delay;
            let max_retries = config.max_retries;
            handles.push(tokio::spawn(async move {
                worker_loop(worker_id, receiver, retry_delay, max_retries, metrics).await;
            }));
        }
        *pool.handles.lock() = handles;
        pool
    }

    /// Enqueues `task`, returning immediately with the admission outcome and a
    /// receiver that yields the job's single final result.
    pub fn submit<F>(&self, task: F) -> (SubmitOutcome, oneshot::Receiver<Result<(), Error>>)
    where
        F: Fn() -> BoxFuture<'static, Result<(), Error>> + Send + Sync + 'static,
    {
        let (response_tx, response_rx) = oneshot::channel();
        if self.shutting_down.load(Ordering::SeqCst) {
            return (SubmitOutcome::ShuttingDown, response_rx);
        }
        let sender = self.sender.lock().clone();
        let Some(sender) = sender else {
            return (SubmitOutcome::ShuttingDown, response_rx);
        };
        let job = Job {
            task: Arc::new(task),
            response: response_tx,
        };
        match sender.try_send(job) {
            Ok(()) => (SubmitOutcome::Accepted, response_rx),
            Err(mpsc::error::TrySendError::Full(_)) => (SubmitOutcome::QueueFull, response_rx),
            Err(mpsc::error::TrySendError::Closed(_)) => (SubmitOutcome::ShuttingDown, response_rx),
        }
    }

    /// Stops admitting new jobs, lets already-queued jobs drain, and waits up
    /// to 30 seconds for every worker to finish.
    pub async fn shutdown(&self) -> Result<(), Error> {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.sender.lock().take();

        let handles = std::mem::take(&mut *self.handles.lock());
        let drain = futures::future::join_all(handles);
        match tokio::time::timeout(DRAIN_TIMEOUT, drain).await {
            Ok(_) => Ok(()),
            Err(_) => Err(make_err!(Code::Unavailable, "worker pool did not drain within 30s")),
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    retry_delay: Duration,
    max_retries: usize,
    metrics: Arc<Metrics>,
) {
    let retrier = Retrier::new(Box::new(|d| Box::pin(tokio::time::sleep(d))));
    loop {
        let job = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };
        let Some(job) = job else {
            break;
        };
        tracing::debug!(worker_id, "running job");
        let task = job.task.clone();
        let result = retrier
            .retry(std::iter::repeat(retry_delay).take(max_retries), || {
                let task = task.clone();
                async move {
                    match task().await {
                        Ok(()) => RetryResult::Ok(()),
                        Err(err) => RetryResult::Retry(err),
                    }
                }
            })
            .await;
        let outcome_label = if result.is_ok() { "success" } else { "failure" };
        metrics
            .worker_jobs_total
            .get_or_create(&cdn_edge_util::metrics::OutcomeLabel {
                outcome: outcome_label.to_string(),
            })
            .inc();
        let _ = job.response.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicI32;

    fn config() -> WorkerPoolConfig {
        WorkerPoolConfig {
            workers: 2,
            queue_size: 4,
            max_retries: 2,
            retry_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn accepted_job_eventually_succeeds() {
        let pool = WorkerPool::start(config(), Arc::new(Metrics::new()));
        let (outcome, rx) = pool.submit(|| Box::pin(async { Ok(()) }));
        assert_eq!(outcome, SubmitOutcome::Accepted);
        assert!(rx.await.unwrap().is_ok());
        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn retries_until_max_retries_then_reports_failure() {
        let pool = WorkerPool::start(config(), Arc::new(Metrics::new()));
        let attempts = Arc::new(AtomicI32::new(0));
        let attempts_clone = attempts.clone();
        let (outcome, rx) = pool.submit(move || {
            let attempts = attempts_clone.clone();
            Box::pin(async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(make_err!(Code::Unavailable, "always fails"))
            })
        });
        assert_eq!(outcome, SubmitOutcome::Accepted);
        assert!(rx.await.unwrap().is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn rejects_submissions_after_shutdown() {
        let pool = WorkerPool::start(config(), Arc::new(Metrics::new()));
        pool.shutdown().await.unwrap();
        let (outcome, _rx) = pool.submit(|| Box::pin(async { Ok(()) }));
        assert_eq!(outcome, SubmitOutcome::ShuttingDown);
    }
}
