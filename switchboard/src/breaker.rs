//! Per-upstream circuit breaker.
//!
//! Three states: closed, open, half-open. The breaker counts consecutive
//! failures; reaching `max_failures` opens the circuit, which fails fast
//! until `timeout` has elapsed since the last failure. The first caller
//! after the timeout becomes the half-open probe; while the probe is in
//! flight every other caller fails fast (single-probe, fail-fast is the
//! documented contract). One success from any state closes the circuit and
//! resets the counter.
//!
//! Transitions are linearisable: all state lives behind one mutex and each
//! `admit`/`record_*` call observes and mutates it atomically.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Breaker parameters, per upstream.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive counted failures that open the circuit. Minimum 1.
    pub max_failures: u32,
    /// How long an open circuit rejects before allowing a probe.
    pub timeout: Duration,
    /// A disabled breaker admits everything and records nothing.
    pub enabled: bool,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            timeout: Duration::from_secs(30),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: BreakerState,
    failures: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: 0,
                last_failure: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Asks to perform one operation. `Err(())` means fail fast without
    /// invoking the operation: the circuit is open (timeout not elapsed) or
    /// another caller already holds the half-open probe.
    pub fn admit(&self) -> Result<(), ()> {
        if !self.config.enabled {
            return Ok(());
        }
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.config.timeout {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    Ok(())
                } else {
                    Err(())
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(())
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Records a successful operation: counter to zero, circuit closed.
    pub fn record_success(&self) {
        if !self.config.enabled {
            return;
        }
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        inner.failures = 0;
        inner.state = BreakerState::Closed;
        inner.probe_in_flight = false;
    }

    /// Records a counted failure. In closed state the counter advances and
    /// opens the circuit at the threshold; a failed half-open probe reopens
    /// it with a fresh timestamp and an unchanged counter.
    pub fn record_failure(&self) {
        if !self.config.enabled {
            return;
        }
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        let now = Instant::now();
        match inner.state {
            BreakerState::Closed => {
                inner.failures += 1;
                inner.last_failure = Some(now);
                if inner.failures >= self.config.max_failures.max(1) {
                    inner.state = BreakerState::Open;
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.last_failure = Some(now);
                inner.probe_in_flight = false;
            }
            BreakerState::Open => {
                inner.last_failure = Some(now);
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker mutex poisoned").state
    }
}
