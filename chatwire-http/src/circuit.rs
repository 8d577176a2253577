//! Per-route circuit breaker (§4.4): trips after a burst of
//! `network|timeout|server` failures, rejects fast while open, then lets a
//! single probe through half-open.

use std::{
    collections::HashMap,
    sync::Mutex,
};
use tokio::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Closed,
    Open { until: Instant },
    HalfOpen,
}

struct Breaker {
    state: State,
    failures: Vec<Instant>,
}

impl Breaker {
    fn new() -> Self {
        Self {
            state: State::Closed,
            failures: Vec::new(),
        }
    }
}

/// Settings governing when a route's breaker trips and how long it stays
/// open before probing again.
#[derive(Clone, Copy, Debug)]
pub struct CircuitSettings {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub monitoring_period: Duration,
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            monitoring_period: Duration::from_secs(60),
        }
    }
}

/// Whether a call may proceed, and what to do with its outcome.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Admission {
    /// Proceed normally.
    Allow,
    /// Proceed as the lone half-open probe; its outcome decides whether the
    /// breaker closes or reopens.
    Probe,
    /// Reject immediately; the breaker is open.
    Reject,
}

/// One breaker per route template, keyed by its bucket key string.
pub struct CircuitBreakers {
    settings: CircuitSettings,
    routes: Mutex<HashMap<String, Breaker>>,
}

impl CircuitBreakers {
    #[must_use]
    pub fn new(settings: CircuitSettings) -> Self {
        Self {
            settings,
            routes: Mutex::new(HashMap::new()),
        }
    }

    /// Check whether `route` may be called right now.
    pub fn admit(&self, route: &str, now: Instant) -> Admission {
        let mut routes = self.routes.lock().unwrap();
        let breaker = routes.entry(route.to_owned()).or_insert_with(Breaker::new);

        match breaker.state {
            State::Closed => Admission::Allow,
            State::Open { until } if now >= until => {
                breaker.state = State::HalfOpen;
                Admission::Probe
            }
            State::Open { .. } => Admission::Reject,
            State::HalfOpen => Admission::Reject,
        }
    }

    /// Record that a retryable (`network|timeout|server`) failure occurred
    /// for `route`, possibly tripping its breaker.
    pub fn record_failure(&self, route: &str, now: Instant) {
        let mut routes = self.routes.lock().unwrap();
        let breaker = routes.entry(route.to_owned()).or_insert_with(Breaker::new);

        if breaker.state == State::HalfOpen {
            breaker.state = State::Open {
                until: now + self.settings.reset_timeout,
            };
            breaker.failures.clear();
            return;
        }

        breaker.failures.retain(|at| now.duration_since(*at) <= self.settings.monitoring_period);
        breaker.failures.push(now);

        if breaker.failures.len() as u32 >= self.settings.failure_threshold {
            breaker.state = State::Open {
                until: now + self.settings.reset_timeout,
            };
            breaker.failures.clear();
        }
    }

    /// Record a success for `route`, closing a half-open breaker.
    pub fn record_success(&self, route: &str) {
        let mut routes = self.routes.lock().unwrap();

        if let Some(breaker) = routes.get_mut(route) {
            if breaker.state == State::HalfOpen {
                breaker.state = State::Closed;
                breaker.failures.clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Admission, CircuitBreakers, CircuitSettings};
    use tokio::time::{Duration, Instant};

    fn settings() -> CircuitSettings {
        CircuitSettings {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(10),
            monitoring_period: Duration::from_secs(60),
        }
    }

    #[test]
    fn trips_after_threshold_and_rejects() {
        let breakers = CircuitBreakers::new(settings());
        let now = Instant::now();

        for _ in 0..3 {
            breakers.record_failure("GET /x", now);
        }

        assert_eq!(breakers.admit("GET /x", now), Admission::Reject);
    }

    #[test]
    fn half_opens_after_reset_timeout_and_closes_on_success() {
        let breakers = CircuitBreakers::new(settings());
        let now = Instant::now();

        for _ in 0..3 {
            breakers.record_failure("GET /x", now);
        }

        let later = now + Duration::from_secs(11);
        assert_eq!(breakers.admit("GET /x", later), Admission::Probe);

        breakers.record_success("GET /x");
        assert_eq!(breakers.admit("GET /x", later), Admission::Allow);
    }

    #[test]
    fn half_open_failure_reopens() {
        let breakers = CircuitBreakers::new(settings());
        let now = Instant::now();

        for _ in 0..3 {
            breakers.record_failure("GET /x", now);
        }

        let later = now + Duration::from_secs(11);
        assert_eq!(breakers.admit("GET /x", later), Admission::Probe);

        breakers.record_failure("GET /x", later);
        assert_eq!(breakers.admit("GET /x", later), Admission::Reject);
    }

    #[test]
    fn failures_outside_monitoring_period_do_not_accumulate() {
        let breakers = CircuitBreakers::new(settings());
        let now = Instant::now();

        breakers.record_failure("GET /x", now);
        breakers.record_failure("GET /x", now + Duration::from_secs(70));
        breakers.record_failure("GET /x", now + Duration::from_secs(71));

        assert_eq!(
            breakers.admit("GET /x", now + Duration::from_secs(71)),
            Admission::Allow
        );
    }
}
