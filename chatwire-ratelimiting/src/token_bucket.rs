//! The per-bucket atomic limit/remaining/reset store (§4.1 of the
//! traffic-control engine's token bucket).

use crate::headers::RatelimitScope;
use std::sync::{
    atomic::{AtomicU32, AtomicU64, Ordering},
    Mutex,
};
use tokio::time::{Duration, Instant};

/// Safety margin added atop `resetAt` to absorb clock drift between client
/// and server; racing the reset exactly costs a 429 far larger than this.
const BASE_SAFETY_MARGIN: Duration = Duration::from_millis(75);

/// Upper bound on the adaptive delay multiplier.
const MAX_MULTIPLIER: f64 = 5.0;

/// Result of [`TokenBucket::try_admit`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Admission {
    /// The request may proceed; `remaining` has been decremented.
    Admit,
    /// The request must wait `wait_for` before retrying.
    Defer { wait_for: Duration },
}

/// Outcome of folding a response's rate-limit headers into the bucket.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UpdateOutcome {
    /// The bucket's canonical key is unchanged (or this was the first
    /// header-bearing response).
    Unchanged,
    /// The response revealed a canonical bucket key different from the one
    /// previously known; the owning manager should merge the two buckets.
    KeyChanged(String),
}

/// An atomic limit/remaining/reset-at cell governing admission for one
/// route (or the distinguished global bucket).
#[derive(Debug)]
pub struct TokenBucket {
    limit: AtomicU64,
    remaining: AtomicU64,
    reset_at: Mutex<Instant>,
    canonical_key: Mutex<Option<String>>,
    consecutive_rate_limits: AtomicU32,
    global: bool,
}

impl TokenBucket {
    /// Create a new bucket with an initial `limit`/`remaining`, assumed not
    /// yet due to reset.
    pub fn new(limit: u64, global: bool) -> Self {
        Self {
            limit: AtomicU64::new(limit),
            remaining: AtomicU64::new(limit),
            reset_at: Mutex::new(Instant::now()),
            canonical_key: Mutex::new(None),
            consecutive_rate_limits: AtomicU32::new(0),
            global,
        }
    }

    /// Whether this is the distinguished global bucket.
    pub const fn is_global(&self) -> bool {
        self.global
    }

    /// Current adaptive delay multiplier, bounded to `[1, 5]`.
    pub fn multiplier(&self) -> f64 {
        let consecutive = f64::from(self.consecutive_rate_limits.load(Ordering::Relaxed));

        (1.0 + consecutive * 0.5).min(MAX_MULTIPLIER)
    }

    /// Snapshot of the remaining admit count.
    pub fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::Relaxed)
    }

    /// Snapshot of the window limit.
    pub fn limit(&self) -> u64 {
        self.limit.load(Ordering::Relaxed)
    }

    /// Attempt to admit a request at `now`.
    ///
    /// Invariant maintained: at any observable moment `remaining >= 0`, and
    /// either `remaining > 0` or `now >= reset_at`, before any admit.
    pub fn try_admit(&self, now: Instant) -> Admission {
        loop {
            let remaining = self.remaining.load(Ordering::Acquire);

            if remaining == 0 {
                let reset_at = *self.reset_at.lock().unwrap();
                let remaining_wait = if reset_at > now {
                    reset_at - now
                } else {
                    Duration::ZERO
                };
                let wait_for = remaining_wait + BASE_SAFETY_MARGIN.mul_f64(self.multiplier());

                return Admission::Defer { wait_for };
            }

            if self
                .remaining
                .compare_exchange(
                    remaining,
                    remaining - 1,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                self.decay_multiplier();

                return Admission::Admit;
            }
        }
    }

    /// Fold a response's rate-limit headers into the bucket.
    pub fn update_from_headers(
        &self,
        limit: u64,
        server_remaining: u64,
        reset_after: Duration,
        bucket_key: Option<&str>,
        now: Instant,
    ) -> UpdateOutcome {
        self.limit.store(limit, Ordering::Relaxed);

        // Defend against clock skew: never trust a server-reported remaining
        // count larger than what we've already locally reserved down to.
        let local_remaining = self.remaining.load(Ordering::Relaxed);
        self.remaining
            .store(local_remaining.min(server_remaining), Ordering::Relaxed);

        *self.reset_at.lock().unwrap() = now + reset_after;

        let Some(bucket_key) = bucket_key else {
            return UpdateOutcome::Unchanged;
        };

        let mut canonical = self.canonical_key.lock().unwrap();

        match canonical.as_deref() {
            Some(known) if known == bucket_key => UpdateOutcome::Unchanged,
            Some(_) => {
                let previous = canonical.replace(bucket_key.to_owned());
                UpdateOutcome::KeyChanged(previous.expect("checked Some above"))
            }
            None => {
                *canonical = Some(bucket_key.to_owned());
                UpdateOutcome::Unchanged
            }
        }
    }

    /// Record a 429 response against this bucket.
    pub fn on_rate_limited(&self, retry_after: Duration, now: Instant) {
        self.remaining.store(0, Ordering::Relaxed);
        *self.reset_at.lock().unwrap() = now + retry_after;
        self.consecutive_rate_limits.fetch_add(1, Ordering::Relaxed);
    }

    fn decay_multiplier(&self) {
        let _ = self
            .consecutive_rate_limits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |value| {
                (value > 0).then_some(value - 1)
            });
    }
}

/// Interpret a 429 response's scope to decide whether the global bucket must
/// also be stamped. Kept as a free function since [`TokenBucket`] itself has
/// no notion of "the" global bucket; only the owning manager does.
pub fn affects_global(scope: Option<RatelimitScope>, global_flag: bool) -> bool {
    global_flag || matches!(scope, Some(RatelimitScope::Global))
}

#[cfg(test)]
mod tests {
    use super::{Admission, TokenBucket, UpdateOutcome};
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;
    use tokio::time::{self, Duration, Instant};

    assert_impl_all!(TokenBucket: Debug, Send, Sync);

    #[test]
    fn admits_while_remaining_and_defers_at_zero() {
        let bucket = TokenBucket::new(1, false);
        let now = Instant::now();

        assert_eq!(bucket.try_admit(now), Admission::Admit);

        match bucket.try_admit(now) {
            Admission::Defer { wait_for } => assert!(wait_for > Duration::ZERO),
            other => panic!("expected defer, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn defer_wait_includes_safety_margin() {
        let bucket = TokenBucket::new(1, false);
        let now = Instant::now();
        bucket.try_admit(now);
        bucket.update_from_headers(1, 0, Duration::from_secs(2), None, now);

        match bucket.try_admit(now) {
            Admission::Defer { wait_for } => {
                assert!(wait_for >= Duration::from_secs(2));
                assert!(wait_for < Duration::from_secs(3));
            }
            other => panic!("expected defer, got {other:?}"),
        }
    }

    #[test]
    fn remaining_takes_min_of_local_and_server() {
        let bucket = TokenBucket::new(5, false);
        let now = Instant::now();
        bucket.try_admit(now); // local remaining now 4

        bucket.update_from_headers(5, 10, Duration::from_secs(1), None, now);
        assert_eq!(bucket.remaining(), 4);

        bucket.update_from_headers(5, 1, Duration::from_secs(1), None, now);
        assert_eq!(bucket.remaining(), 1);
    }

    #[test]
    fn key_change_is_reported_once() {
        let bucket = TokenBucket::new(1, false);
        let now = Instant::now();

        assert_eq!(
            bucket.update_from_headers(1, 1, Duration::ZERO, Some("synthetic"), now),
            UpdateOutcome::Unchanged
        );
        assert_eq!(
            bucket.update_from_headers(1, 1, Duration::ZERO, Some("canonical"), now),
            UpdateOutcome::KeyChanged("synthetic".to_owned())
        );
        assert_eq!(
            bucket.update_from_headers(1, 1, Duration::ZERO, Some("canonical"), now),
            UpdateOutcome::Unchanged
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_widens_defer_via_multiplier() {
        let bucket = TokenBucket::new(1, false);
        let now = Instant::now();

        bucket.on_rate_limited(Duration::from_millis(100), now);
        let first = match bucket.try_admit(now) {
            Admission::Defer { wait_for } => wait_for,
            Admission::Admit => panic!("expected defer"),
        };

        bucket.on_rate_limited(Duration::from_millis(100), now);
        let second = match bucket.try_admit(now) {
            Admission::Defer { wait_for } => wait_for,
            Admission::Admit => panic!("expected defer"),
        };

        assert!(second > first, "{second:?} should exceed {first:?}");

        time::advance(Duration::from_millis(200)).await;
    }
}
