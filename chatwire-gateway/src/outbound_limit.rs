//! The shard's own outbound-frame limiter (§4.6): no more than 120 non-
//! heartbeat frames per 60 seconds. Heartbeats bypass this entirely.

use std::collections::VecDeque;
use tokio::time::{Duration, Instant};

const LIMIT: usize = 120;
const WINDOW: Duration = Duration::from_secs(60);

/// Tracks timestamps of recent non-heartbeat sends in a sliding window.
#[derive(Debug, Default)]
pub struct OutboundLimiter {
    sent: VecDeque<Instant>,
}

impl OutboundLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sent: VecDeque::new(),
        }
    }

    /// Whether a non-heartbeat frame may be sent right now; if not, returns
    /// how long the caller must wait.
    pub fn check(&mut self, now: Instant) -> Result<(), Duration> {
        self.evict_expired(now);

        if self.sent.len() < LIMIT {
            self.sent.push_back(now);
            return Ok(());
        }

        let oldest = *self.sent.front().expect("len == LIMIT > 0");
        Err(WINDOW - now.duration_since(oldest))
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some(&front) = self.sent.front() {
            if now.duration_since(front) >= WINDOW {
                self.sent.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{OutboundLimiter, LIMIT};
    use tokio::time::{Duration, Instant};

    #[test]
    fn admits_up_to_the_limit_then_defers() {
        let mut limiter = OutboundLimiter::new();
        let now = Instant::now();

        for _ in 0..LIMIT {
            assert!(limiter.check(now).is_ok());
        }

        assert!(limiter.check(now).is_err());
    }

    #[test]
    fn window_expiry_frees_capacity() {
        let mut limiter = OutboundLimiter::new();
        let now = Instant::now();

        for _ in 0..LIMIT {
            limiter.check(now).unwrap();
        }

        let later = now + Duration::from_secs(61);
        assert!(limiter.check(later).is_ok());
    }
}
