//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: backend assumed down, calls fail fast
//! - Half-Open: cooldown elapsed, probing whether the backend recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure rate >= threshold with at least min_samples in window
//! Open → Half-Open: first call after the cooldown (evaluated lazily)
//! Half-Open → Closed: success_threshold probe successes
//! Half-Open → Open: any probe failure
//! ```
//!
//! # Design Decisions
//! - Per-key circuit breaker (one per backend/model key), created on first use
//! - Fail fast in Open state; the operation is never started
//! - Every failure counts the same; retryability belongs to the queue
//! - The caller's error is handed back untouched after bookkeeping
//! - Registry is a sharded map; no shard lock is held across an await

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

/// Maximum number of outcomes retained per breaker.
pub const MAX_HISTORY: usize = 100;

/// Error code carried by [`CircuitOpenError`].
pub const CIRCUIT_OPEN_CODE: &str = "CIRCUIT_OPEN";

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Availability failure: the breaker for `key` is open and cooling down.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Circuit breaker is OPEN for '{key}' (retry after {}ms)", .retry_after.as_millis())]
pub struct CircuitOpenError {
    /// Always [`CIRCUIT_OPEN_CODE`].
    pub code: &'static str,
    /// Breaker key that rejected the call.
    pub key: String,
    /// Time left until the breaker admits a probe.
    pub retry_after: Duration,
}

/// Error returned by [`CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// The circuit was open; the operation never ran.
    #[error(transparent)]
    Open(#[from] CircuitOpenError),

    /// The operation ran and failed with its own error.
    #[error("{0}")]
    Operation(E),
}

/// Outcome of a single operation, as kept in history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// One entry of a breaker's bounded history.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub at: Instant,
    pub outcome: Outcome,
    pub error: Option<String>,
}

/// Input to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerEvent {
    Success,
    Failure { failure_rate: u32 },
    CooldownElapsed,
    ForceOpen,
    ForceClose,
}

/// Result of feeding an event to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: CircuitState,
    /// Set `next_attempt_at = now + half_open_time`.
    pub schedule_retry: bool,
    /// Zero the failure and success counters.
    pub reset_counters: bool,
}

impl Transition {
    fn stay(state: CircuitState) -> Self {
        Self {
            next: state,
            schedule_retry: false,
            reset_counters: false,
        }
    }

    fn open() -> Self {
        Self {
            next: CircuitState::Open,
            schedule_retry: true,
            reset_counters: false,
        }
    }

    fn close() -> Self {
        Self {
            next: CircuitState::Closed,
            schedule_retry: false,
            reset_counters: true,
        }
    }
}

/// The breaker state machine.
///
/// `success_count` is the count after the event has been recorded.
pub fn transition(
    state: CircuitState,
    event: BreakerEvent,
    success_count: u32,
    config: &CircuitBreakerConfig,
) -> Transition {
    use BreakerEvent::*;
    use CircuitState::*;

    match (state, event) {
        (_, ForceOpen) => Transition::open(),
        (_, ForceClose) => Transition::close(),
        (Open, CooldownElapsed) => Transition::stay(HalfOpen),
        (HalfOpen, Success) if success_count >= config.success_threshold => Transition::close(),
        (HalfOpen, Failure { .. }) => Transition::open(),
        (Closed, Failure { failure_rate }) if failure_rate >= config.failure_threshold => Transition::open(),
        // Late results from calls admitted before the circuit opened do not move it.
        (state, _) => Transition::stay(state),
    }
}

/// Rounded failure percentage among entries inside `window`, or 0 when fewer
/// than `min_samples` entries are in the window.
pub fn failure_rate(
    history: &VecDeque<HistoryEntry>,
    now: Instant,
    window: Duration,
    min_samples: usize,
) -> u32 {
    let (total, failures) = history
        .iter()
        .filter(|e| now.saturating_duration_since(e.at) <= window)
        .fold((0usize, 0usize), |(total, failures), e| {
            (total + 1, failures + usize::from(e.outcome == Outcome::Failure))
        });

    if total == 0 || total < min_samples {
        return 0;
    }
    ((failures as f64 / total as f64) * 100.0).round() as u32
}

/// Availability state for a single key.
#[derive(Debug, Clone)]
pub struct BreakerState {
    pub key: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_at: Option<Instant>,
    pub last_success_at: Option<Instant>,
    pub next_attempt_at: Option<Instant>,
    pub history: VecDeque<HistoryEntry>,
    created_at: Instant,
}

impl BreakerState {
    fn new(key: &str, now: Instant) -> Self {
        Self {
            key: key.to_string(),
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
            last_success_at: None,
            next_attempt_at: None,
            history: VecDeque::new(),
            created_at: now,
        }
    }

    /// Drop entries outside the window, then cap the length.
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(front) = self.history.front() {
            if now.saturating_duration_since(front.at) > window {
                self.history.pop_front();
            } else {
                break;
            }
        }
        while self.history.len() > MAX_HISTORY {
            self.history.pop_front();
        }
    }

    fn record(&mut self, outcome: Outcome, error: Option<String>, now: Instant, config: &CircuitBreakerConfig) {
        self.history.push_back(HistoryEntry { at: now, outcome, error });
        self.prune(now, config.monitoring_window());

        let event = match outcome {
            Outcome::Success => {
                self.success_count += 1;
                self.last_success_at = Some(now);
                BreakerEvent::Success
            }
            Outcome::Failure => {
                self.failure_count += 1;
                self.last_failure_at = Some(now);
                BreakerEvent::Failure {
                    failure_rate: self.failure_rate(now, config),
                }
            }
        };
        self.handle(event, now, config);
    }

    fn failure_rate(&self, now: Instant, config: &CircuitBreakerConfig) -> u32 {
        failure_rate(&self.history, now, config.monitoring_window(), config.min_samples)
    }

    fn handle(&mut self, event: BreakerEvent, now: Instant, config: &CircuitBreakerConfig) {
        let t = transition(self.state, event, self.success_count, config);
        let previous = self.state;

        if t.reset_counters {
            self.failure_count = 0;
            self.success_count = 0;
        }
        if t.schedule_retry {
            self.next_attempt_at = Some(now + config.half_open_time());
        }
        if t.next == previous {
            return;
        }

        self.state = t.next;
        match t.next {
            CircuitState::Open => {
                self.success_count = 0;
                tracing::warn!(
                    key = %self.key,
                    from = %previous,
                    failure_rate = self.failure_rate(now, config),
                    retry_in_ms = config.half_open_time_ms,
                    "Circuit opened"
                );
            }
            CircuitState::HalfOpen => {
                self.success_count = 0;
                tracing::debug!(key = %self.key, "Circuit half-open, probing backend");
            }
            CircuitState::Closed => {
                self.next_attempt_at = None;
                tracing::info!(key = %self.key, from = %previous, "Circuit closed");
            }
        }
        metrics::record_circuit_transition(&self.key, t.next);
    }

    fn last_activity(&self) -> Instant {
        [self.last_success_at, self.last_failure_at]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(self.created_at)
    }

    fn health(&self, now: Instant, config: &CircuitBreakerConfig) -> BreakerHealth {
        let window = config.monitoring_window();
        let ago = |at: Option<Instant>| at.map(|at| now.saturating_duration_since(at).as_millis() as u64);

        BreakerHealth {
            key: self.key.clone(),
            state: self.state,
            failure_rate: self.failure_rate(now, config),
            recent_operations: self
                .history
                .iter()
                .filter(|e| now.saturating_duration_since(e.at) <= window)
                .count(),
            failure_count: self.failure_count,
            success_count: self.success_count,
            last_success_ms_ago: ago(self.last_success_at),
            last_failure_ms_ago: ago(self.last_failure_at),
            next_attempt_in_ms: match (self.state, self.next_attempt_at) {
                (CircuitState::Open, Some(at)) => Some(at.saturating_duration_since(now).as_millis() as u64),
                _ => None,
            },
        }
    }
}

/// Snapshot of a breaker, as reported by health endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerHealth {
    pub key: String,
    pub state: CircuitState,
    pub failure_rate: u32,
    pub recent_operations: usize,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_success_ms_ago: Option<u64>,
    pub last_failure_ms_ago: Option<u64>,
    pub next_attempt_in_ms: Option<u64>,
}

/// Registry of per-key circuit breakers.
pub struct CircuitBreaker {
    breakers: DashMap<String, BreakerState>,
    config: ArcSwap<CircuitBreakerConfig>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config: ArcSwap::from_pointee(config),
        }
    }

    /// Current configuration.
    pub fn config(&self) -> Arc<CircuitBreakerConfig> {
        self.config.load_full()
    }

    /// Replace the configuration; applies from the next call on.
    pub fn update_config(&self, config: CircuitBreakerConfig) {
        self.config.store(Arc::new(config));
    }

    /// Run `operation` guarded by the breaker for `key`.
    pub async fn execute<F, Fut, T, E>(&self, key: &str, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.admit(key)?;

        match operation().await {
            Ok(value) => {
                self.record(key, Outcome::Success, None);
                Ok(value)
            }
            Err(e) => {
                self.record(key, Outcome::Failure, Some(e.to_string()));
                Err(CircuitError::Operation(e))
            }
        }
    }

    /// Check whether a call may proceed, moving Open → Half-Open once the
    /// cooldown has passed.
    pub fn admit(&self, key: &str) -> Result<(), CircuitOpenError> {
        let config = self.config.load();
        let now = Instant::now();

        self.with_state(key, now, |s| {
            if s.state != CircuitState::Open {
                return Ok(());
            }
            match s.next_attempt_at {
                Some(at) if now < at => {
                    let retry_after = at - now;
                    tracing::debug!(key = %s.key, retry_after_ms = retry_after.as_millis() as u64, "Circuit open, rejecting call");
                    metrics::record_circuit_rejected(&s.key);
                    Err(CircuitOpenError {
                        code: CIRCUIT_OPEN_CODE,
                        key: s.key.clone(),
                        retry_after,
                    })
                }
                _ => {
                    s.handle(BreakerEvent::CooldownElapsed, now, &config);
                    Ok(())
                }
            }
        })
    }

    fn record(&self, key: &str, outcome: Outcome, error: Option<String>) {
        let config = self.config.load();
        let now = Instant::now();
        self.with_state(key, now, |s| s.record(outcome, error, now, &config));
    }

    fn with_state<R>(&self, key: &str, now: Instant, f: impl FnOnce(&mut BreakerState) -> R) -> R {
        if let Some(mut entry) = self.breakers.get_mut(key) {
            return f(entry.value_mut());
        }
        let mut entry = self
            .breakers
            .entry(key.to_string())
            .or_insert_with(|| BreakerState::new(key, now));
        f(entry.value_mut())
    }

    /// Current state for `key`.
    pub fn state(&self, key: &str) -> CircuitState {
        self.with_state(key, Instant::now(), |s| s.state)
    }

    /// Health snapshot for `key`.
    pub fn get_health(&self, key: &str) -> BreakerHealth {
        let config = self.config.load();
        let now = Instant::now();
        self.with_state(key, now, |s| s.health(now, &config))
    }

    /// Health snapshot of every known breaker, ordered by key.
    pub fn get_all_status(&self) -> BTreeMap<String, BreakerHealth> {
        let config = self.config.load();
        let now = Instant::now();
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().health(now, &config)))
            .collect()
    }

    /// Open the circuit for `key` regardless of its history.
    pub fn force_open(&self, key: &str) {
        let config = self.config.load();
        let now = Instant::now();
        self.with_state(key, now, |s| s.handle(BreakerEvent::ForceOpen, now, &config));
        tracing::warn!(key = %key, "Circuit forced open");
    }

    /// Close the circuit for `key` and zero its counters.
    pub fn force_close(&self, key: &str) {
        let config = self.config.load();
        let now = Instant::now();
        self.with_state(key, now, |s| s.handle(BreakerEvent::ForceClose, now, &config));
        tracing::info!(key = %key, "Circuit forced closed");
    }

    /// Restore `key` to a fresh closed breaker.
    pub fn reset(&self, key: &str) {
        self.breakers
            .insert(key.to_string(), BreakerState::new(key, Instant::now()));
        tracing::info!(key = %key, "Circuit reset");
    }

    /// Restore every known breaker to a fresh closed state.
    pub fn reset_all(&self) {
        let now = Instant::now();
        for mut entry in self.breakers.iter_mut() {
            let key = entry.key().clone();
            *entry.value_mut() = BreakerState::new(&key, now);
        }
        tracing::info!(count = self.breakers.len(), "All circuits reset");
    }

    /// Drop closed breakers idle for at least `max_idle`. Returns how many were removed.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let before = self.breakers.len();
        self.breakers.retain(|_, s| {
            s.state != CircuitState::Closed || now.saturating_duration_since(s.last_activity()) < max_idle
        });
        let evicted = before.saturating_sub(self.breakers.len());
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted idle circuit breakers");
        }
        evicted
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
