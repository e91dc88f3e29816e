//! Circuit breaker for the outbound LLM client
//!
//! Classic closed / open / half-open state machine. The whole retry loop
//! counts as one outcome against the breaker, and the half-open state admits
//! exactly one probe request at a time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

use crate::metrics::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::HalfOpen => "half_open",
            BreakerState::Open => "open",
        }
    }
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Circuit breaker guarding an outbound dependency
pub struct CircuitBreaker {
    max_failures: u32,
    timeout: Duration,
    inner: Mutex<BreakerInner>,
    metrics: Arc<Metrics>,
}

impl CircuitBreaker {
    pub fn new(max_failures: u32, timeout: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            max_failures,
            timeout,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
            metrics,
        }
    }

    /// Ask permission to issue a request. While open, rejection is immediate;
    /// after the open timeout a single probe is admitted.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock();

        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let expired = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.timeout)
                    .unwrap_or(true);
                if expired {
                    self.transition(&mut inner, BreakerState::HalfOpen);
                    inner.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                // Only one probe may be in flight
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        inner.probe_in_flight = false;

        if inner.state != BreakerState::Closed {
            self.transition(&mut inner, BreakerState::Closed);
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.probe_in_flight = false;

        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.max_failures {
                    self.transition(&mut inner, BreakerState::Open);
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::HalfOpen => {
                // Failed probe reopens the circuit
                self.transition(&mut inner, BreakerState::Open);
                inner.opened_at = Some(Instant::now());
            }
            BreakerState::Open => {}
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: BreakerState) {
        let from = inner.state;
        inner.state = to;
        warn!("circuit breaker changed from {} to {}", from.as_str(), to.as_str());
        self.metrics.record_circuit_transition(from.as_str(), to.as_str());
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        self.inner.lock().state.as_str()
    }
}
