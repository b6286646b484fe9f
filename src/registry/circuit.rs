//! Per-provider circuit breaker state machine (§4.1).
//!
//! Grounded in the three-state breaker shape surfaced by
//! `ProviderHealthStatus`/`consecutive_failures` in the retrieved
//! circuit-breaker reference implementation, generalized to the
//! closed/open/half-open transitions this spec names explicitly.

use std::time::{Duration, Instant};

use super::CircuitConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitTransition {
    Unchanged,
    Opened,
    Closed,
    HalfOpened,
}

#[derive(Debug, Clone)]
pub(super) struct Circuit {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    current_cooldown: Duration,
    half_open_probes_remaining: u32,
}

impl Circuit {
    pub fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            current_cooldown: Duration::ZERO,
            half_open_probes_remaining: 0,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Whether a call may be issued right now. Transitions `Open ->
    /// HalfOpen` lazily when the cooldown has elapsed, consuming one
    /// probe slot.
    pub fn may_call(&mut self, config: &CircuitConfig) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => self.half_open_probes_remaining > 0,
            CircuitState::Open => {
                let Some(opened_at) = self.opened_at else {
                    return true;
                };
                if opened_at.elapsed() >= self.current_cooldown {
                    self.state = CircuitState::HalfOpen;
                    self.half_open_probes_remaining = config.half_open_probes;
                    self.half_open_probes_remaining > 0
                } else {
                    false
                }
            }
        }
    }

    /// Record a call outcome, applying the breaker's transition rules.
    pub fn record(&mut self, ok: bool, config: &CircuitConfig) -> CircuitTransition {
        match self.state {
            CircuitState::Closed => {
                if ok {
                    self.consecutive_failures = 0;
                    CircuitTransition::Unchanged
                } else {
                    self.consecutive_failures += 1;
                    if self.consecutive_failures >= config.fail_threshold {
                        self.open(config.open_cooldown);
                        CircuitTransition::Opened
                    } else {
                        CircuitTransition::Unchanged
                    }
                }
            }
            CircuitState::HalfOpen => {
                if self.half_open_probes_remaining > 0 {
                    self.half_open_probes_remaining -= 1;
                }
                if ok {
                    self.close();
                    CircuitTransition::Closed
                } else {
                    let doubled = (self.current_cooldown * 2).min(config.max_open_cooldown);
                    self.open(doubled);
                    CircuitTransition::Opened
                }
            }
            CircuitState::Open => {
                // A report arriving while still open (e.g. a probe that
                // started just before cooldown elapsed) is ignored; the
                // next `may_call` decides the half-open transition.
                CircuitTransition::Unchanged
            }
        }
    }

    fn open(&mut self, cooldown: Duration) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.current_cooldown = cooldown;
        self.half_open_probes_remaining = 0;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.current_cooldown = Duration::ZERO;
        self.half_open_probes_remaining = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CircuitConfig {
        CircuitConfig {
            fail_threshold: 2,
            open_cooldown: Duration::from_millis(5),
            half_open_probes: 1,
            max_open_cooldown: Duration::from_millis(40),
        }
    }

    #[test]
    fn stays_closed_below_fail_threshold() {
        let mut c = Circuit::new();
        let cfg = config();
        assert_eq!(c.record(false, &cfg), CircuitTransition::Unchanged);
        assert_eq!(c.state(), CircuitState::Closed);
    }

    #[test]
    fn opens_at_fail_threshold() {
        let mut c = Circuit::new();
        let cfg = config();
        c.record(false, &cfg);
        assert_eq!(c.record(false, &cfg), CircuitTransition::Opened);
        assert_eq!(c.state(), CircuitState::Open);
    }

    #[test]
    fn reopens_with_doubled_cooldown_on_half_open_failure() {
        let mut c = Circuit::new();
        let cfg = config();
        c.record(false, &cfg);
        c.record(false, &cfg); // opens, cooldown = 5ms
        std::thread::sleep(Duration::from_millis(10));
        assert!(c.may_call(&cfg)); // half-open
        c.record(false, &cfg); // reopen, cooldown doubles to 10ms
        assert_eq!(c.state(), CircuitState::Open);
        assert_eq!(c.current_cooldown, Duration::from_millis(10));
    }

    #[test]
    fn cooldown_caps_at_max_open_cooldown() {
        let mut c = Circuit::new();
        let cfg = config();
        c.current_cooldown = Duration::from_millis(30);
        c.state = CircuitState::HalfOpen;
        c.half_open_probes_remaining = 1;
        c.record(false, &cfg);
        assert_eq!(c.current_cooldown, Duration::from_millis(40));
    }

    #[test]
    fn success_in_half_open_closes_circuit() {
        let mut c = Circuit::new();
        let cfg = config();
        c.record(false, &cfg);
        c.record(false, &cfg);
        std::thread::sleep(Duration::from_millis(10));
        c.may_call(&cfg);
        assert_eq!(c.record(true, &cfg), CircuitTransition::Closed);
        assert_eq!(c.state(), CircuitState::Closed);
    }
}
