//! Batch processor (C7), per `spec.md` §4.7: buffers items, flushing a batch
//! when it reaches `batch_size` or when `flush_timeout` elapses since the
//! last flush, bounding concurrent batches with a semaphore, and retrying
//! failed items as a smaller batch up to `max_retries` times.

use std::sync::Arc;
use std::time::Duration;

use cdn_edge_error::Error;
use cdn_edge_util::metrics::OutcomeLabel;
use cdn_edge_util::Metrics;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub struct BatchProcessorConfig {
    pub batch_size: usize,
    pub flush_timeout: Duration,
    pub max_concurrent: usize,
    pub max_retries: usize,
    pub retry_delay: Duration,
}

/// A single item's outcome from one processor invocation.
pub struct ItemOutcome<T> {
    pub item: T,
    pub result: Result<(), Error>,
}

type ProcessorFn<T> = Arc<dyn Fn(Vec<T>) -> BoxFuture<'static, Vec<ItemOutcome<T>>> + Send + Sync>;

struct Shared<T> {
    buffer: Mutex<Vec<T>>,
    config: BatchProcessorConfig,
    semaphore: Arc<Semaphore>,
    processor: ProcessorFn<T>,
    metrics: Arc<Metrics>,
    flush_notify: Notify,
}

/// Buffers items of type `T` and dispatches them in batches to a
/// caller-supplied processor function.
pub struct BatchProcessor<T> {
    shared: Arc<Shared<T>>,
    shutdown: CancellationToken,
    background: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> BatchProcessor<T> {
    pub fn start<F>(config: BatchProcessorConfig, metrics: Arc<Metrics>, processor: F) -> Self
    where
        F: Fn(Vec<T>) -> BoxFuture<'static, Vec<ItemOutcome<T>>> + Send + Sync + 'static,
    {
        let shared = Arc::new(Shared {
            buffer: Mutex::new(Vec::new()),
            config,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            processor: Arc::new(processor),
            metrics,
            flush_notify: Notify::new(),
        });
        let shutdown = CancellationToken::new();

        let loop_shared = shared.clone();
        let loop_shutdown = shutdown.clone();
        let background = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(loop_shared.config.flush_timeout) => {
                        flush(&loop_shared).await;
                    }
                    _ = loop_shared.flush_notify.notified() => {
                        flush(&loop_shared).await;
                    }
                    _ = loop_shutdown.cancelled() => {
                        final_flush(&loop_shared).await;
                        break;
                    }
                }
            }
        });

        BatchProcessor {
            shared,
            shutdown,
            background: Mutex::new(Some(background)),
        }
    }

    /// Appends `item` to the buffer, triggering an immediate flush if the
    /// buffer has reached `batch_size`.
    pub fn append(&self, item: T) {
        let should_flush = {
            let mut buffer = self.shared.buffer.lock();
            buffer.push(item);
            buffer.len() >= self.shared.config.batch_size
        };
        if should_flush {
            self.shared.flush_notify.notify_one();
        }
    }

    /// Cancels the background flush loop (which performs one final flush of
    /// any partial batch) and waits for it to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Some(handle) = self.background.lock().take() {
            let _ = handle.await;
        }
    }
}

async fn flush<T: Send + 'static>(shared: &Arc<Shared<T>>) {
    let batch = {
        let mut buffer = shared.buffer.lock();
        if buffer.is_empty() {
            return;
        }
        std::mem::take(&mut *buffer)
    };
    let shared = shared.clone();
    let permit = shared
        .semaphore
        .clone()
        .acquire_owned()
        .await
        .expect("batch processor semaphore never closes");
    tokio::spawn(async move {
        let _permit = permit;
        process_with_retries(&shared, batch).await;
    });
}

/// Flushes synchronously, awaiting the processor instead of detaching it,
/// so a caller awaiting shutdown actually observes the final batch land.
async fn final_flush<T: Send + 'static>(shared: &Arc<Shared<T>>) {
    let batch = {
        let mut buffer = shared.buffer.lock();
        if buffer.is_empty() {
            return;
        }
        std::mem::take(&mut *buffer)
    };
    let _permit = shared
        .semaphore
        .acquire()
        .await
        .expect("batch processor semaphore never closes");
    process_with_retries(shared, batch).await;
}

async fn process_with_retries<T: Send + 'static>(shared: &Arc<Shared<T>>, mut remaining: Vec<T>) {
    for attempt in 0..=shared.config.max_retries {
        if remaining.is_empty() {
            return;
        }
        let outcomes = (shared.processor)(remaining).await;
        let mut failed = Vec::new();
        for outcome in outcomes {
            let label = if outcome.result.is_ok() { "success" } else { "failure" };
            shared
                .metrics
                .batch_items_total
                .get_or_create(&OutcomeLabel { outcome: label.to_string() })
                .inc();
            if let Err(err) = outcome.result {
                tracing::warn!(%err, attempt, "batch item failed");
                failed.push(outcome.item);
            }
        }
        remaining = failed;
        if !remaining.is_empty() && attempt < shared.config.max_retries {
            tokio::time::sleep(shared.config.retry_delay).await;
        }
    }
    if !remaining.is_empty() {
        tracing::warn!(count = remaining.len(), "batch items exhausted retries");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn config() -> BatchProcessorConfig {
        BatchProcessorConfig {
            batch_size: 3,
            flush_timeout: Duration::from_millis(20),
            max_concurrent: 2,
            max_retries: 2,
            retry_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn flushes_when_batch_size_reached() {
        let processed = Arc::new(AtomicUsize::new(0));
        let processed_clone = processed.clone();
        let processor = BatchProcessor::start(config(), Arc::new(Metrics::new()), move |items: Vec<i32>| {
            let processed = processed_clone.clone();
            Box::pin(async move {
                processed.fetch_add(items.len(), Ordering::SeqCst);
                items
                    .into_iter()
                    .map(|item| ItemOutcome { item, result: Ok(()) })
                    .collect()
            })
        });
        processor.append(1);
        processor.append(2);
        processor.append(3);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(processed.load(Ordering::SeqCst), 3);
        processor.shutdown().await;
    }

    #[tokio::test]
    async fn flushes_partial_batch_on_timeout() {
        let processed = Arc::new(AtomicUsize::new(0));
        let processed_clone = processed.clone();
        let processor = BatchProcessor::start(config(), Arc::new(Metrics::new()), move |items: Vec<i32>| {
            let processed = processed_clone.clone();
            Box::pin(async move {
                processed.fetch_add(items.len(), Ordering::SeqCst);
                items
                    .into_iter()
                    .map(|item| ItemOutcome { item, result: Ok(()) })
                    .collect()
            })
        });
        processor.append(1);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(processed.load(Ordering::SeqCst), 1);
        processor.shutdown().await;
    }

    #[tokio::test]
    async fn retries_failed_items_as_smaller_batch() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();
        let processor = BatchProcessor::start(config(), Arc::new(Metrics::new()), move |items: Vec<i32>| {
            let attempts = attempts_clone.clone();
            Box::pin(async move {
                let attempt_no = attempts.fetch_add(1, Ordering::SeqCst);
                items
                    .into_iter()
                    .map(|item| ItemOutcome {
                        item,
                        result: if attempt_no == 0 {
                            Err(cdn_edge_error::make_err!(cdn_edge_error::Code::Unavailable, "transient"))
                        } else {
                            Ok(())
                        },
                    })
                    .collect()
            })
        });
        processor.append(1);
        processor.append(2);
        processor.append(3);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(attempts.load(Ordering::SeqCst) >= 2);
        processor.shutdown().await;
    }
}
