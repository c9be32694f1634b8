//! Bounded priority queue with concurrency limit and retries.
//!
//! # Responsibilities
//! - Admit work up to `max_queue_size` pending items (synchronous rejection beyond)
//! - Start the highest-priority pending item while `running < max_concurrent`
//! - Retry transient failures with exponential backoff and jitter
//! - Hand every caller back a tagged result carrying attempts and duration
//!
//! # Design Decisions
//! - Admission check and push happen under one lock; `enqueue` is not async
//! - Pending items live in a binary heap keyed by (priority desc, arrival asc)
//! - Each started item runs on its own Tokio task; a drop guard frees its
//!   running slot and pulls the next item, even if the task panics
//! - Only the failure message survives into `TaskFailure`

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use arc_swap::ArcSwap;
use futures_util::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::observability::metrics;
use crate::resilience::backoff::{calculate_backoff, MAX_BACKOFF};
use crate::resilience::retries::is_retryable;

/// Failure message given to items removed by [`RequestQueue::clear`].
pub const CLEARED_MESSAGE: &str = "Queue cleared";

/// Capacity failure: the pending portion of the queue is full.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Queue full (max: {max})")]
pub struct QueueFullError {
    pub max: usize,
}

/// Successful completion of a queued task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSuccess<T> {
    pub data: T,
    pub duration: Duration,
    pub attempts: u32,
}

/// Terminal failure of a queued task (retries exhausted, non-retryable, or cleared).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{error}")]
pub struct TaskFailure {
    pub error: String,
    pub attempts: u32,
    pub duration: Duration,
}

/// What a queued task resolves to.
pub type TaskResult<T> = Result<TaskSuccess<T>, TaskFailure>;

/// Per-item options for [`RequestQueue::enqueue`].
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Higher runs first.
    pub priority: i32,
    /// Overrides the queue's `max_retries`.
    pub max_retries: Option<u32>,
    /// Overrides the queue's base retry delay.
    pub retry_delay: Option<Duration>,
}

impl EnqueueOptions {
    pub fn with_priority(priority: i32) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }
}

/// Future for the result of an enqueued task.
#[derive(Debug)]
pub struct TaskHandle<T> {
    id: Uuid,
    rx: oneshot::Receiver<TaskResult<T>>,
}

impl<T> TaskHandle<T> {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = TaskResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|res| {
            res.unwrap_or_else(|_| {
                Err(TaskFailure {
                    error: "Task dropped before completion".to_string(),
                    attempts: 0,
                    duration: Duration::ZERO,
                })
            })
        })
    }
}

/// Queue statistics snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub dequeued: u64,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub running: usize,
    pub queued: usize,
    pub max_concurrent: usize,
    /// `running / max_concurrent`.
    pub utilization: f64,
    pub paused: bool,
}

/// Type-erased unit of queued work.
trait QueuedJob: Send {
    fn run(self: Box<Self>, inner: Arc<QueueInner>) -> BoxFuture<'static, ()>;
    fn cancel(self: Box<Self>, reason: &str, waited: Duration);
}

struct Job<F, T> {
    id: Uuid,
    task: F,
    options: EnqueueOptions,
    reply: oneshot::Sender<TaskResult<T>>,
}

impl<F, Fut, T, E> QueuedJob for Job<F, T>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: fmt::Display,
{
    fn run(self: Box<Self>, inner: Arc<QueueInner>) -> BoxFuture<'static, ()> {
        let Job { id, task, options, reply } = *self;

        Box::pin(async move {
            let config = inner.config.load_full();
            let max_retries = options.max_retries.unwrap_or(config.max_retries);
            let base_delay = options.retry_delay.unwrap_or_else(|| config.retry_delay());
            let started = Instant::now();
            let mut attempts = 0u32;

            let result = loop {
                attempts += 1;
                let outcome = task().await.map_err(|e| e.to_string());
                match outcome {
                    Ok(data) => {
                        break Ok(TaskSuccess {
                            data,
                            duration: started.elapsed(),
                            attempts,
                        })
                    }
                    Err(error) => {
                        let retries_so_far = attempts - 1;
                        if retries_so_far < max_retries && is_retryable(&error) {
                            let delay = calculate_backoff(retries_so_far, base_delay, MAX_BACKOFF);
                            inner.counters.retried.fetch_add(1, AtomicOrdering::Relaxed);
                            metrics::record_queue_event("retried");
                            tracing::debug!(
                                task_id = %id,
                                attempt = attempts,
                                delay_ms = delay.as_millis() as u64,
                                error = %error,
                                "Retrying queued task"
                            );
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        break Err(TaskFailure {
                            error,
                            attempts,
                            duration: started.elapsed(),
                        });
                    }
                }
            };

            match &result {
                Ok(_) => {
                    inner.counters.completed.fetch_add(1, AtomicOrdering::Relaxed);
                    metrics::record_queue_event("completed");
                }
                Err(failure) => {
                    inner.counters.failed.fetch_add(1, AtomicOrdering::Relaxed);
                    metrics::record_queue_event("failed");
                    tracing::warn!(
                        task_id = %id,
                        attempts = failure.attempts,
                        error = %failure.error,
                        "Queued task failed"
                    );
                }
            }

            // The caller may have stopped waiting.
            let _ = reply.send(result);
        })
    }

    fn cancel(self: Box<Self>, reason: &str, waited: Duration) {
        let _ = self.reply.send(Err(TaskFailure {
            error: reason.to_string(),
            attempts: 0,
            duration: waited,
        }));
    }
}

struct PendingItem {
    id: Uuid,
    priority: i32,
    seq: u64,
    enqueued_at: Instant,
    job: Box<dyn QueuedJob>,
}

impl PartialEq for PendingItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PendingItem {}

impl PartialOrd for PendingItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingItem {
    // Max-heap: higher priority first, then earlier arrival.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueState {
    pending: BinaryHeap<PendingItem>,
    running: usize,
    paused: bool,
    next_seq: u64,
}

#[derive(Default)]
struct QueueCounters {
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
}

struct QueueInner {
    config: ArcSwap<QueueConfig>,
    state: Mutex<QueueState>,
    counters: QueueCounters,
    idle: Notify,
}

impl QueueInner {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start pending items until the concurrency limit is reached.
    fn drain(self: &Arc<Self>) {
        loop {
            let (item, pending, running) = {
                let mut state = self.lock_state();
                let max_concurrent = self.config.load().max_concurrent;
                if state.paused || state.running >= max_concurrent {
                    return;
                }
                let Some(item) = state.pending.pop() else {
                    return;
                };
                state.running += 1;
                (item, state.pending.len(), state.running)
            };

            self.counters.dequeued.fetch_add(1, AtomicOrdering::Relaxed);
            metrics::record_queue_depth(pending, running);
            tracing::debug!(
                task_id = %item.id,
                priority = item.priority,
                wait_ms = item.enqueued_at.elapsed().as_millis() as u64,
                running,
                "Starting queued task"
            );

            let runtime = match Handle::try_current() {
                Ok(runtime) => runtime,
                Err(_) => {
                    tracing::error!(task_id = %item.id, "No Tokio runtime available, task left pending");
                    let mut state = self.lock_state();
                    state.running -= 1;
                    state.pending.push(item);
                    return;
                }
            };
            let inner = Arc::clone(self);
            runtime.spawn(async move {
                let _slot = RunningSlot(Arc::clone(&inner));
                item.job.run(inner).await;
            });
        }
    }

    fn is_idle(&self) -> bool {
        let state = self.lock_state();
        state.running == 0 && state.pending.is_empty()
    }
}

/// Holds one running slot; releasing it pulls the next pending item.
struct RunningSlot(Arc<QueueInner>);

impl Drop for RunningSlot {
    fn drop(&mut self) {
        let (idle, pending, running) = {
            let mut state = self.0.lock_state();
            state.running = state.running.saturating_sub(1);
            (
                state.running == 0 && state.pending.is_empty(),
                state.pending.len(),
                state.running,
            )
        };
        metrics::record_queue_depth(pending, running);
        if idle {
            self.0.idle.notify_waiters();
        }
        self.0.drain();
    }
}

/// Concurrency-limited priority queue with retry/backoff.
///
/// Cloning yields another handle to the same queue. Must be used from
/// within a Tokio runtime.
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<QueueInner>,
}

impl RequestQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                config: ArcSwap::from_pointee(config),
                state: Mutex::new(QueueState::default()),
                counters: QueueCounters::default(),
                idle: Notify::new(),
            }),
        }
    }

    /// Current configuration.
    pub fn config(&self) -> Arc<QueueConfig> {
        self.inner.config.load_full()
    }

    /// Replace the configuration; limits apply from the next admission or
    /// scheduling step.
    pub fn update_config(&self, config: QueueConfig) {
        self.inner.config.store(Arc::new(config));
        self.inner.drain();
    }

    /// Admit `task` or reject immediately when the pending set is full.
    ///
    /// `task` is called once per attempt.
    pub fn enqueue<F, Fut, T, E>(&self, task: F, options: EnqueueOptions) -> Result<TaskHandle<T>, QueueFullError>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + 'static,
    {
        let max_queue_size = self.inner.config.load().max_queue_size;
        let id = Uuid::new_v4();

        let handle = {
            let mut state = self.inner.lock_state();
            if state.pending.len() >= max_queue_size {
                drop(state);
                metrics::record_queue_event("rejected");
                tracing::warn!(max = max_queue_size, "Queue full, rejecting task");
                return Err(QueueFullError { max: max_queue_size });
            }

            let (reply, rx) = oneshot::channel();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.pending.push(PendingItem {
                id,
                priority: options.priority,
                seq,
                enqueued_at: Instant::now(),
                job: Box::new(Job {
                    id,
                    task,
                    options,
                    reply,
                }),
            });
            TaskHandle { id, rx }
        };

        self.inner.counters.enqueued.fetch_add(1, AtomicOrdering::Relaxed);
        metrics::record_queue_event("enqueued");
        self.inner.drain();
        Ok(handle)
    }

    /// Stop starting pending items. Running items finish normally.
    pub fn pause(&self) {
        self.inner.lock_state().paused = true;
        tracing::info!("Request queue paused");
    }

    /// Resume starting pending items.
    pub fn resume(&self) {
        self.inner.lock_state().paused = false;
        tracing::info!("Request queue resumed");
        self.inner.drain();
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock_state().paused
    }

    /// Reject every pending item with [`CLEARED_MESSAGE`]. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let (items, idle) = {
            let mut state = self.inner.lock_state();
            let items: Vec<PendingItem> = state.pending.drain().collect();
            (items, state.running == 0)
        };

        let cleared = items.len();
        for item in items {
            item.job.cancel(CLEARED_MESSAGE, item.enqueued_at.elapsed());
        }
        if idle {
            self.inner.idle.notify_waiters();
        }
        metrics::record_queue_depth(0, self.running());
        tracing::info!(cleared, "Request queue cleared");
        cleared
    }

    /// Resolves once nothing is pending or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.is_idle() {
                return;
            }
            notified.await;
        }
    }

    pub fn running(&self) -> usize {
        self.inner.lock_state().running
    }

    pub fn queued(&self) -> usize {
        self.inner.lock_state().pending.len()
    }

    pub fn get_stats(&self) -> QueueStats {
        let (running, queued, paused) = {
            let state = self.inner.lock_state();
            (state.running, state.pending.len(), state.paused)
        };
        let max_concurrent = self.inner.config.load().max_concurrent;
        let c = &self.inner.counters;

        QueueStats {
            enqueued: c.enqueued.load(AtomicOrdering::Relaxed),
            dequeued: c.dequeued.load(AtomicOrdering::Relaxed),
            completed: c.completed.load(AtomicOrdering::Relaxed),
            failed: c.failed.load(AtomicOrdering::Relaxed),
            retried: c.retried.load(AtomicOrdering::Relaxed),
            running,
            queued,
            max_concurrent,
            utilization: if max_concurrent == 0 {
                0.0
            } else {
                running as f64 / max_concurrent as f64
            },
            paused,
        }
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}
