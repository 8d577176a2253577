//! The heartbeat driver (§4.5): ticks at the server-chosen interval, tracks
//! ping, and declares a connection zombie after two consecutive missed ACKs.

use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::time::{Duration, Instant};

/// Tracks send/ack timestamps for one session's heartbeat cadence.
#[derive(Debug)]
pub struct Heartbeats {
    interval: Duration,
    last_sent_at: AtomicU64,
    last_ack_at: AtomicU64,
    awaiting_ack: AtomicBool,
    missed: AtomicU64,
    epoch: Instant,
}

/// Result of a single heartbeat tick.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Tick {
    /// Send a heartbeat now.
    Send,
    /// Two consecutive ticks have fired with no intervening ACK: the
    /// connection must be torn down and reconnected.
    Zombie,
}

impl Heartbeats {
    /// Create a new tracker for `interval`, the value HELLO carried.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent_at: AtomicU64::new(0),
            last_ack_at: AtomicU64::new(0),
            awaiting_ack: AtomicBool::new(false),
            missed: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Jittered delay before the first tick: `interval * uniform(0, 1)`.
    #[must_use]
    pub fn first_delay(&self) -> Duration {
        let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
        self.interval.mul_f64(jitter)
    }

    /// Record that a heartbeat was just sent, and evaluate whether the
    /// previous tick went unacknowledged.
    ///
    /// Must be called once per tick, immediately before actually sending the
    /// frame.
    pub fn on_tick(&self, now: Instant) -> Tick {
        if self.awaiting_ack.swap(true, Ordering::AcqRel) {
            let missed = self.missed.fetch_add(1, Ordering::AcqRel) + 1;

            if missed >= 1 {
                return Tick::Zombie;
            }
        } else {
            self.missed.store(0, Ordering::Release);
        }

        self.last_sent_at
            .store(self.millis_since_epoch(now), Ordering::Release);

        Tick::Send
    }

    /// Record an ACK, clearing the missed-tick counter and computing ping.
    pub fn on_ack(&self, now: Instant) -> Duration {
        self.awaiting_ack.store(false, Ordering::Release);
        self.missed.store(0, Ordering::Release);

        let ack_millis = self.millis_since_epoch(now);
        self.last_ack_at.store(ack_millis, Ordering::Release);

        let sent_millis = self.last_sent_at.load(Ordering::Acquire);
        Duration::from_millis(ack_millis.saturating_sub(sent_millis))
    }

    fn millis_since_epoch(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.epoch)
            .as_millis()
            .try_into()
            .unwrap_or(u64::MAX)
    }
}
