//! Generic circuit breaker primitive shared by the velocity counter service
//! (and, optionally, any other request-path dependency).
//!
//! A three-state machine (`Closed/Open/HalfOpen`) on atomics per spec §5
//! ("Circuit breaker state: a small per-operation state machine with
//! atomic counters; no lock on the hot path") — failure-threshold, then
//! cooldown, then a half-open trial before closing again. Guards exactly
//! one dependency, so there's no endpoint-keyed map, just a handful of
//! atomics.

use crossbeam::atomic::AtomicCell;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(v: u8) -> Self {
        match v {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Minimum number of requests in the rolling window before the failure
    /// ratio is even considered (spec §4.5: "rolling window of ≥10
    /// requests").
    pub min_requests: u32,
    /// Opens when `failures / requests >= failure_ratio` over the window.
    pub failure_ratio: f64,
    /// Cool-down before moving Open -> HalfOpen.
    pub cooldown: Duration,
    /// Consecutive successes required in HalfOpen before closing.
    pub half_open_success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            min_requests: 10,
            failure_ratio: 0.5,
            cooldown: Duration::from_secs(5),
            half_open_success_threshold: 3,
        }
    }
}

/// Lock-free circuit breaker. `requests`/`failures` form the current
/// rolling window and are reset whenever the state transitions.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: AtomicU8,
    requests: AtomicU32,
    failures: AtomicU32,
    half_open_successes: AtomicU32,
    opened_at: AtomicCell<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        CircuitBreaker {
            config,
            state: AtomicU8::new(CircuitState::Closed as u8),
            requests: AtomicU32::new(0),
            failures: AtomicU32::new(0),
            half_open_successes: AtomicU32::new(0),
            opened_at: AtomicCell::new(None),
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Call before attempting the guarded operation. Returns `false` when
    /// the breaker is open and the cooldown has not elapsed — the caller
    /// must use its fail-safe fallback without touching the dependency.
    pub fn allow_request(&self) -> bool {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = self
                    .opened_at
                    .load()
                    .map(|t| t.elapsed() >= self.config.cooldown)
                    .unwrap_or(true);
                if elapsed {
                    self.transition_to_half_open();
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        match self.state() {
            CircuitState::HalfOpen => {
                let successes = self.half_open_successes.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.config.half_open_success_threshold {
                    self.close();
                }
            }
            CircuitState::Closed => {
                self.requests.fetch_add(1, Ordering::AcqRel);
                self.maybe_roll_window();
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        match self.state() {
            CircuitState::HalfOpen => self.open(),
            CircuitState::Closed => {
                let requests = self.requests.fetch_add(1, Ordering::AcqRel) + 1;
                let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
                if requests >= self.config.min_requests
                    && (failures as f64 / requests as f64) >= self.config.failure_ratio
                {
                    self.open();
                }
            }
            CircuitState::Open => {}
        }
    }

    fn maybe_roll_window(&self) {
        // Bound the window so a long-lived closed breaker doesn't
        // accumulate an unbounded request count; reset once we have well
        // past the minimum sample size and are healthy.
        if self.requests.load(Ordering::Acquire) > self.config.min_requests * 100 {
            self.requests.store(0, Ordering::Release);
            self.failures.store(0, Ordering::Release);
        }
    }

    fn open(&self) {
        self.state.store(CircuitState::Open as u8, Ordering::Release);
        self.opened_at.store(Some(Instant::now()));
        self.half_open_successes.store(0, Ordering::Release);
    }

    fn transition_to_half_open(&self) {
        // Best-effort CAS: if another thread already moved it, that's fine.
        let _ = self.state.compare_exchange(
            CircuitState::Open as u8,
            CircuitState::HalfOpen as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    fn close(&self) {
        self.state.store(CircuitState::Closed as u8, Ordering::Release);
        self.requests.store(0, Ordering::Release);
        self.failures.store(0, Ordering::Release);
        self.half_open_successes.store(0, Ordering::Release);
    }
}
