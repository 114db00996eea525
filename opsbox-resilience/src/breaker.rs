//! Per-key circuit breaker.
//!
//! A breaker guards one logical dependency (`adapter:<name>`,
//! `cache:remote`). Consecutive failures in the Closed state trip it Open;
//! Open calls short-circuit with [`CircuitOpen`] until the cool-off elapses;
//! HalfOpen permits a fixed probe budget, closing again only when every
//! probe succeeds.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use smol_str::SmolStr;
use thiserror::Error;
use tracing::{debug, warn};

/// Breaker thresholds, configurable per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures in Closed before tripping Open.
    pub failure_threshold: u32,
    /// How long Open short-circuits before probing.
    pub cooloff: Duration,
    /// Number of probe calls permitted in HalfOpen.
    pub probe_count: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooloff: Duration::from_secs(30),
            probe_count: 2,
        }
    }
}

/// Observable breaker state, for health reporting and response metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow; consecutive failures are counted.
    Closed,
    /// Calls short-circuit until the cool-off elapses.
    Open,
    /// A bounded number of probe calls is in flight.
    HalfOpen,
}

/// Error returned when a breaker short-circuits a call.
#[derive(Debug, Clone, Error)]
#[error("circuit '{key}' is open, retry in {retry_in:?}")]
pub struct CircuitOpen {
    /// Breaker key.
    pub key: SmolStr,
    /// Time remaining until the breaker will probe again.
    pub retry_in: Duration,
}

enum State {
    Closed { failures: u32 },
    Open { until: Instant },
    HalfOpen { probes_left: u32, successes: u32 },
}

/// Failure-counting gate in front of an unreliable dependency.
///
/// State transitions are atomic; the internal mutex is never held across
/// awaits. While the breaker is Open, zero outbound calls are attempted:
/// callers must acquire via [`CircuitBreaker::try_call`] before dialing out.
pub struct CircuitBreaker {
    key: SmolStr,
    config: BreakerConfig,
    state: Mutex<State>,
}

impl CircuitBreaker {
    /// Creates a breaker for the given key.
    pub fn new(key: impl Into<SmolStr>, config: BreakerConfig) -> Self {
        Self {
            key: key.into(),
            config,
            state: Mutex::new(State::Closed { failures: 0 }),
        }
    }

    /// Breaker key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Requests permission for one outbound call.
    ///
    /// An Open breaker whose cool-off has elapsed transitions to HalfOpen
    /// and the call becomes its first probe.
    pub fn try_call(&self) -> Result<(), CircuitOpen> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match &mut *state {
            State::Closed { .. } => Ok(()),
            State::Open { until } => {
                let now = Instant::now();
                if now >= *until {
                    debug!(key = %self.key, "circuit half-open, probing");
                    *state = State::HalfOpen {
                        probes_left: self.config.probe_count.saturating_sub(1),
                        successes: 0,
                    };
                    Ok(())
                } else {
                    Err(CircuitOpen {
                        key: self.key.clone(),
                        retry_in: *until - now,
                    })
                }
            }
            State::HalfOpen { probes_left, .. } => {
                if *probes_left > 0 {
                    *probes_left -= 1;
                    Ok(())
                } else {
                    // Probe budget exhausted; wait for in-flight probes.
                    Err(CircuitOpen {
                        key: self.key.clone(),
                        retry_in: Duration::ZERO,
                    })
                }
            }
        }
    }

    /// Records a successful call.
    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match &mut *state {
            State::Closed { failures } => *failures = 0,
            State::HalfOpen { successes, .. } => {
                *successes += 1;
                if *successes >= self.config.probe_count {
                    debug!(key = %self.key, "circuit closed after successful probes");
                    *state = State::Closed { failures: 0 };
                }
            }
            State::Open { .. } => {}
        }
    }

    /// Records a failed call.
    pub fn record_failure(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match &mut *state {
            State::Closed { failures } => {
                *failures += 1;
                if *failures >= self.config.failure_threshold {
                    warn!(key = %self.key, failures, "circuit opened");
                    *state = State::Open {
                        until: Instant::now() + self.config.cooloff,
                    };
                }
            }
            State::HalfOpen { .. } => {
                warn!(key = %self.key, "probe failed, circuit re-opened");
                *state = State::Open {
                    until: Instant::now() + self.config.cooloff,
                };
            }
            State::Open { .. } => {}
        }
    }

    /// Current observable state.
    pub fn state(&self) -> CircuitState {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match &*state {
            State::Closed { .. } => CircuitState::Closed,
            State::Open { until } if Instant::now() < *until => CircuitState::Open,
            State::Open { .. } => CircuitState::HalfOpen,
            State::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    /// Whether calls would currently short-circuit.
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }
}

/// Process-wide map of breakers, one per logical key.
#[derive(Default)]
pub struct BreakerRegistry {
    breakers: DashMap<SmolStr, Arc<CircuitBreaker>>,
    default_config: BreakerConfig,
}

impl BreakerRegistry {
    /// Creates a registry handing out breakers with the given defaults.
    pub fn new(default_config: BreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            default_config,
        }
    }

    /// The breaker for `key`, created with the registry default on first use.
    pub fn breaker(&self, key: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(SmolStr::new(key))
            .or_insert_with(|| Arc::new(CircuitBreaker::new(key, self.default_config)))
            .clone()
    }

    /// The breaker for `key`, created with an explicit config on first use.
    ///
    /// An already-existing breaker keeps its original config.
    pub fn breaker_with(&self, key: &str, config: BreakerConfig) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(SmolStr::new(key))
            .or_insert_with(|| Arc::new(CircuitBreaker::new(key, config)))
            .clone()
    }

    /// Clears all breaker state. Used only by tests.
    pub fn reset(&self) {
        self.breakers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32, cooloff_ms: u64, probes: u32) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: threshold,
            cooloff: Duration::from_millis(cooloff_ms),
            probe_count: probes,
        }
    }

    #[test]
    fn trips_open_at_threshold() {
        let breaker = CircuitBreaker::new("adapter:web", config(3, 60_000, 1));
        for _ in 0..2 {
            breaker.try_call().unwrap();
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.try_call().unwrap();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.try_call().is_err());
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let breaker = CircuitBreaker::new("adapter:fs", config(2, 60_000, 1));
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_probe_failure_reopens() {
        let breaker = CircuitBreaker::new("adapter:web", config(1, 10, 1));
        breaker.record_failure();
        assert!(breaker.try_call().is_err());

        std::thread::sleep(Duration::from_millis(20));
        breaker.try_call().unwrap(); // probe
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.try_call().is_err());
    }

    #[test]
    fn half_open_closes_after_all_probes_succeed() {
        let breaker = CircuitBreaker::new("adapter:web", config(1, 10, 2));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(20));

        breaker.try_call().unwrap();
        breaker.try_call().unwrap();
        // Probe budget is spent; further calls short-circuit.
        assert!(breaker.try_call().is_err());

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.try_call().unwrap();
    }

    #[test]
    fn registry_reuses_breakers_per_key() {
        let registry = BreakerRegistry::default();
        let a = registry.breaker("adapter:web");
        let b = registry.breaker("adapter:web");
        assert!(Arc::ptr_eq(&a, &b));

        a.record_failure();
        registry.reset();
        let c = registry.breaker("adapter:web");
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
