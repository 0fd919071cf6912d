//! Capacity-capped priority queue drained by a single background task.
//!
//! Higher priority runs first; equal priorities run in insertion order.
//! Each queued operation reports its outcome through its own
//! [`QueueHandle`], so a failing operation never disturbs the others.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::AppError;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Type-erased queued work.
trait Job: Send {
    fn run(self: Box<Self>) -> BoxFuture;
    fn reject(self: Box<Self>, error: AppError);
}

struct PendingJob<F, T> {
    operation: F,
    tx: oneshot::Sender<Result<T, AppError>>,
}

impl<F, Fut, T> Job for PendingJob<F, T>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, AppError>> + Send + 'static,
    T: Send + 'static,
{
    fn run(self: Box<Self>) -> BoxFuture {
        let PendingJob { operation, tx } = *self;
        Box::pin(async move {
            let result = operation().await;
            // The caller may have dropped its handle; nothing to do then.
            let _ = tx.send(result);
        })
    }

    fn reject(self: Box<Self>, error: AppError) {
        let _ = self.tx.send(Err(error));
    }
}

struct QueuedOperation {
    id: u64,
    priority: i32,
    enqueued_at: Instant,
    job: Box<dyn Job>,
}

/// Configuration for a [`RequestQueue`].
#[derive(Debug, Clone, PartialEq)]
pub struct RequestQueueConfig {
    /// Maximum number of pending (not yet started) operations.
    pub max_size: usize,
    /// Pause between two drained operations.
    pub pause: Duration,
}

impl RequestQueueConfig {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            ..Default::default()
        }
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }
}

impl Default for RequestQueueConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            pause: Duration::from_millis(10),
        }
    }
}

struct QueueInner {
    entries: VecDeque<QueuedOperation>,
    next_id: u64,
    draining: bool,
}

fn lock(inner: &Mutex<QueueInner>) -> MutexGuard<'_, QueueInner> {
    inner.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("Recovered from poisoned request queue mutex");
        poisoned.into_inner()
    })
}

/// Pending result of a queued operation.
///
/// Resolves once the drain task has run the operation, or with
/// [`AppError::QueueCleared`] if the queue was cleared first.
#[derive(Debug)]
pub struct QueueHandle<T> {
    id: u64,
    rx: oneshot::Receiver<Result<T, AppError>>,
}

impl<T> QueueHandle<T> {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<T> Future for QueueHandle<T> {
    type Output = Result<T, AppError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(AppError::Aborted(
                    "queued operation dropped before completion".into(),
                ))
            })
        })
    }
}

/// Priority request queue. Cloning shares the same queue.
#[derive(Clone)]
pub struct RequestQueue {
    config: RequestQueueConfig,
    inner: Arc<Mutex<QueueInner>>,
}

impl RequestQueue {
    pub fn new(config: RequestQueueConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(QueueInner {
                entries: VecDeque::new(),
                next_id: 0,
                draining: false,
            })),
        }
    }

    pub fn config(&self) -> &RequestQueueConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner).entries.is_empty()
    }

    pub fn is_draining(&self) -> bool {
        lock(&self.inner).draining
    }

    /// Queue `operation` and make sure the drain task is running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn enqueue<F, Fut, T>(&self, operation: F, priority: i32) -> Result<QueueHandle<T>, AppError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, AppError>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        let (id, start_drain) = {
            let mut inner = lock(&self.inner);
            if inner.entries.len() >= self.config.max_size {
                tracing::warn!(
                    max_size = self.config.max_size,
                    priority,
                    "Request queue full, rejecting operation"
                );
                return Err(AppError::QueueFull {
                    max_size: self.config.max_size,
                });
            }

            let id = inner.next_id;
            inner.next_id += 1;

            let position = inner.entries.partition_point(|e| e.priority >= priority);
            inner.entries.insert(
                position,
                QueuedOperation {
                    id,
                    priority,
                    enqueued_at: Instant::now(),
                    job: Box::new(PendingJob { operation, tx }),
                },
            );
            tracing::debug!(
                id,
                priority,
                position,
                pending = inner.entries.len(),
                "Operation queued"
            );

            let start_drain = !inner.draining;
            inner.draining = true;
            (id, start_drain)
        };

        if start_drain {
            tokio::spawn(drain(Arc::clone(&self.inner), self.config.pause));
        }

        Ok(QueueHandle { id, rx })
    }

    /// Reject every pending operation with [`AppError::QueueCleared`].
    ///
    /// An operation the drain task already started keeps running.
    /// Returns the number of rejected operations.
    pub fn clear(&self) -> usize {
        let drained: Vec<QueuedOperation> = lock(&self.inner).entries.drain(..).collect();
        let count = drained.len();
        for entry in drained {
            entry.job.reject(AppError::QueueCleared);
        }
        if count > 0 {
            tracing::info!(rejected = count, "Request queue cleared");
        }
        count
    }
}

async fn drain(inner: Arc<Mutex<QueueInner>>, pause: Duration) {
    loop {
        let entry = {
            let mut guard = lock(&inner);
            match guard.entries.pop_front() {
                Some(entry) => entry,
                None => {
                    guard.draining = false;
                    return;
                }
            }
        };

        let id = entry.id;
        tracing::debug!(
            id,
            priority = entry.priority,
            waited_ms = entry.enqueued_at.elapsed().as_millis() as u64,
            "Running queued operation"
        );

        // Run on its own task so a panicking operation cannot take the loop down.
        if let Err(e) = tokio::spawn(entry.job.run()).await {
            tracing::warn!(id, error = %e, "Queued operation panicked");
        }

        tokio::time::sleep(pause).await;
    }
}
