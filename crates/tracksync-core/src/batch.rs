//! Resilient bounded-concurrency batch application.
//!
//! Items are chunked into batches; within a batch a counting semaphore caps
//! how many workers run at once. Each item retries on its own with
//! exponential backoff, and an item that exhausts its attempts is recorded as
//! a failure without affecting the others. Output order matches input order.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Retry and concurrency policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Items per batch; batches run one after another.
    pub batch_size: usize,
    /// Maximum workers in flight at once.
    pub max_concurrency: usize,
    /// Attempts per item, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry (milliseconds).
    pub retry_delay_ms: u64,
    /// Multiplier applied to the delay after every failed retry.
    pub backoff_factor: u32,
    /// Per-attempt deadline; a timeout counts as a retryable failure.
    pub item_timeout_ms: Option<u64>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_concurrency: 10,
            max_attempts: 3,
            retry_delay_ms: 200,
            backoff_factor: 2,
            item_timeout_ms: None,
        }
    }
}

impl BatchConfig {
    fn retry_delay(&self, failed_attempt: u32) -> Duration {
        let factor = u64::from(self.backoff_factor.max(1))
            .saturating_pow(failed_attempt.saturating_sub(1));
        Duration::from_millis(self.retry_delay_ms.saturating_mul(factor))
    }
}

/// Terminal error recorded for a failed item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchItemError<E> {
    /// The worker's own error from the last attempt.
    Failed(E),
    /// The last attempt exceeded `item_timeout_ms`.
    TimedOut { timeout_ms: u64 },
    /// Cancellation was observed before the item (or its retry) started.
    Cancelled,
}

impl<E: std::fmt::Display> std::fmt::Display for BatchItemError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchItemError::Failed(e) => write!(f, "{e}"),
            BatchItemError::TimedOut { timeout_ms } => write!(f, "timed out after {timeout_ms}ms"),
            BatchItemError::Cancelled => f.write_str("cancelled before start"),
        }
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for BatchItemError<E> {}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchSuccess<R> {
    /// Position of the item in the input list.
    pub index: usize,
    pub output: R,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchFailure<T, E> {
    /// Position of the item in the input list.
    pub index: usize,
    /// The original item, for caller-side retry tooling.
    pub item: T,
    pub error: BatchItemError<E>,
    pub attempts: u32,
}

/// Successes and failures, each in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome<T, R, E> {
    pub successes: Vec<BatchSuccess<R>>,
    pub failures: Vec<BatchFailure<T, E>>,
}

impl<T, R, E> Default for BatchOutcome<T, R, E> {
    fn default() -> Self {
        Self {
            successes: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl<T, R, E> BatchOutcome<T, R, E> {
    pub fn total(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Cooperative stop signal shared between a pass and its batch processor.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchProcessor {
    config: BatchConfig,
}

impl BatchProcessor {
    pub fn new(config: BatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Copy of this processor using a different batch size.
    pub fn with_batch_size(&self, batch_size: usize) -> Self {
        Self {
            config: BatchConfig {
                batch_size,
                ..self.config.clone()
            },
        }
    }

    /// Apply `worker` to every item. Never fails as a whole.
    pub async fn process<T, R, E, F, Fut>(&self, items: Vec<T>, worker: F) -> BatchOutcome<T, R, E>
    where
        T: Clone,
        E: std::fmt::Display,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        self.process_with_cancel(items, worker, &CancellationFlag::new())
            .await
    }

    /// Like [`process`](Self::process), but items not yet started when
    /// `cancel` is raised are recorded as [`BatchItemError::Cancelled`].
    /// Attempts already running complete normally.
    pub async fn process_with_cancel<T, R, E, F, Fut>(
        &self,
        items: Vec<T>,
        worker: F,
        cancel: &CancellationFlag,
    ) -> BatchOutcome<T, R, E>
    where
        T: Clone,
        E: std::fmt::Display,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let mut outcome = BatchOutcome::default();
        if items.is_empty() {
            return outcome;
        }

        let total = items.len();
        let batch_size = self.config.batch_size.max(1);
        let semaphore = Semaphore::new(self.config.max_concurrency.max(1));
        let mut pending = items.into_iter().enumerate();

        loop {
            let chunk: Vec<(usize, T)> = pending.by_ref().take(batch_size).collect();
            if chunk.is_empty() {
                break;
            }
            debug!(first = chunk[0].0, len = chunk.len(), total, "processing batch");

            let results = join_all(
                chunk
                    .into_iter()
                    .map(|(index, item)| self.run_item(index, item, &worker, &semaphore, cancel)),
            )
            .await;

            for result in results {
                match result {
                    Ok(success) => outcome.successes.push(success),
                    Err(failure) => outcome.failures.push(failure),
                }
            }
        }

        if !outcome.failures.is_empty() {
            warn!(
                failed = outcome.failures.len(),
                succeeded = outcome.successes.len(),
                "batch finished with failures"
            );
        }
        outcome
    }

    async fn run_item<T, R, E, F, Fut>(
        &self,
        index: usize,
        item: T,
        worker: &F,
        semaphore: &Semaphore,
        cancel: &CancellationFlag,
    ) -> Result<BatchSuccess<R>, BatchFailure<T, E>>
    where
        T: Clone,
        E: std::fmt::Display,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let _permit = semaphore.acquire().await.ok();
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(BatchFailure {
                    index,
                    item,
                    error: BatchItemError::Cancelled,
                    attempts,
                });
            }
            attempts += 1;

            let attempt = worker(item.clone());
            let result = match self.config.item_timeout_ms {
                Some(timeout_ms) => {
                    match tokio::time::timeout(Duration::from_millis(timeout_ms), attempt).await {
                        Ok(res) => res.map_err(BatchItemError::Failed),
                        Err(_elapsed) => Err(BatchItemError::TimedOut { timeout_ms }),
                    }
                }
                None => attempt.await.map_err(BatchItemError::Failed),
            };

            match result {
                Ok(output) => {
                    return Ok(BatchSuccess {
                        index,
                        output,
                        attempts,
                    })
                }
                Err(error) if attempts >= max_attempts => {
                    warn!(index, attempts, error = %error, "item failed after exhausting retries");
                    return Err(BatchFailure {
                        index,
                        item,
                        error,
                        attempts,
                    });
                }
                Err(error) => {
                    let delay = self.config.retry_delay(attempts);
                    debug!(index, attempts, error = %error, delay_ms = delay.as_millis() as u64, "retrying item");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
