//! Identify-concurrency bucketing and session-start-limit gating for shard
//! fleets.
//!
//! [`IdentifyQueue`] partitions shards into `max_concurrency` buckets by
//! `shard_id % max_concurrency` and serializes identifies within a bucket,
//! at least [`IdentifyQueue::MIN_INTERVAL`] apart; different buckets may
//! identify concurrently. [`SessionStartLimit`] is a one-shot gate over the
//! server-advertised daily cap on fresh identifies, consulted once at
//! bootstrap.

use std::{
    fmt::Debug,
    future::Future,
    pin::Pin,
    time::Duration,
};
use tokio::{
    sync::{mpsc, oneshot},
    time::sleep,
};

/// Paces a shard's identify against its fleet-mates.
///
/// Implementors resolve the returned future once the caller is clear to send
/// its IDENTIFY frame.
pub trait Queue: Debug + Send + Sync {
    /// Request a turn to identify. `shard_id` selects which bucket (if any)
    /// the implementation paces this request against.
    fn enqueue(&self, shard_id: u32) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// A queue that never paces; every request resolves immediately.
///
/// Useful behind a proxy gateway that already enforces identify spacing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpQueue;

impl Queue for NoOpQueue {
    fn enqueue(&self, _shard_id: u32) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async {})
    }
}

/// Minimum spacing, per the traffic-control engine's identify pacing
/// contract: shards sharing a bucket must identify at least 5 seconds
/// apart. A small margin is added to avoid racing the boundary exactly.
const MIN_BUCKET_INTERVAL: Duration = Duration::from_millis(5_500);

/// Paces identifies across `max_concurrency` buckets, each serialized
/// internally with at least [`MIN_BUCKET_INTERVAL`] between turns.
#[derive(Debug)]
pub struct IdentifyQueue {
    buckets: Vec<mpsc::UnboundedSender<oneshot::Sender<()>>>,
}

impl IdentifyQueue {
    /// The minimum spacing enforced between identifies sharing a bucket.
    pub const MIN_INTERVAL: Duration = MIN_BUCKET_INTERVAL;

    /// Build a queue with `max_concurrency` independent buckets, each paced
    /// at [`Self::MIN_INTERVAL`].
    pub fn new(max_concurrency: u32) -> Self {
        Self::with_interval(max_concurrency, MIN_BUCKET_INTERVAL)
    }

    /// Build a queue with a caller-chosen interval, which must be at least
    /// [`Self::MIN_INTERVAL`] to honor the pacing contract; smaller values
    /// are clamped up.
    pub fn with_interval(max_concurrency: u32, interval: Duration) -> Self {
        let interval = interval.max(MIN_BUCKET_INTERVAL);
        let max_concurrency = max_concurrency.max(1);

        let buckets = (0..max_concurrency)
            .map(|_| spawn_bucket(interval))
            .collect();

        Self { buckets }
    }

    /// Number of buckets this queue paces.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

impl Queue for IdentifyQueue {
    fn enqueue(&self, shard_id: u32) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let bucket = &self.buckets[shard_id as usize % self.buckets.len()];

        Box::pin(async move {
            let (tx, rx) = oneshot::channel();

            if bucket.send(tx).is_err() {
                return;
            }

            let _ = rx.await;
        })
    }
}

fn spawn_bucket(interval: Duration) -> mpsc::UnboundedSender<oneshot::Sender<()>> {
    let (tx, mut rx) = mpsc::unbounded_channel::<oneshot::Sender<()>>();

    tokio::spawn(async move {
        while let Some(waiter) = rx.recv().await {
            let _ = waiter.send(());

            #[cfg(feature = "tracing")]
            tracing::trace!(?interval, "identify bucket admitted a shard, pacing next turn");

            sleep(interval).await;
        }
    });

    tx
}

/// A server-advertised per-day cap on fresh IDENTIFY calls.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SessionStartLimit {
    pub total: u32,
    pub remaining: u32,
    pub reset_after: Duration,
    pub max_concurrency: u32,
}

/// The session start limit was insufficient to start the requested number
/// of shards.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ResourceExhausted {
    pub reset_after: Duration,
}

impl std::fmt::Display for ResourceExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "session start limit exhausted, resets in {:?}",
            self.reset_after
        )
    }
}

impl std::error::Error for ResourceExhausted {}

impl SessionStartLimit {
    /// Check that at least `shard_count` fresh identifies remain, failing
    /// fast rather than waiting out the reset window.
    ///
    /// This is a one-shot bootstrap check, not a long-running gate: the
    /// traffic-control engine's contract is to fail the manager's startup
    /// with the reset deadline attached, leaving retry policy to the caller.
    pub fn check(&self, shard_count: u32) -> Result<(), ResourceExhausted> {
        if self.remaining < shard_count {
            Err(ResourceExhausted {
                reset_after: self.reset_after,
            })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{IdentifyQueue, NoOpQueue, Queue, SessionStartLimit};
    use static_assertions::{assert_impl_all, assert_obj_safe};
    use std::{fmt::Debug, time::Duration};

    assert_impl_all!(NoOpQueue: Clone, Copy, Debug, Send, Sync);
    assert_impl_all!(IdentifyQueue: Debug, Send, Sync);
    assert_obj_safe!(Queue);

    #[tokio::test]
    async fn no_op_resolves_immediately() {
        let queue = NoOpQueue;

        tokio::time::timeout(Duration::from_millis(10), queue.enqueue(0))
            .await
            .expect("no-op queue must not pace");
    }

    #[tokio::test(start_paused = true)]
    async fn same_bucket_serializes_at_minimum_interval() {
        let queue = IdentifyQueue::new(2);

        queue.enqueue(0).await;

        let start = tokio::time::Instant::now();
        queue.enqueue(2).await; // shares bucket 0 with shard 0 (0 % 2 == 2 % 2)

        assert!(tokio::time::Instant::now() - start >= IdentifyQueue::MIN_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_buckets_identify_concurrently() {
        let queue = IdentifyQueue::new(2);

        let start = tokio::time::Instant::now();
        queue.enqueue(0).await;
        queue.enqueue(1).await; // different bucket, must not wait on bucket 0's pacing

        assert!(tokio::time::Instant::now() - start < IdentifyQueue::MIN_INTERVAL);
    }

    #[test]
    fn session_start_limit_fails_fast_when_insufficient() {
        let limit = SessionStartLimit {
            total: 1000,
            remaining: 2,
            reset_after: Duration::from_secs(3600),
            max_concurrency: 1,
        };

        assert!(limit.check(2).is_ok());
        assert_eq!(
            limit.check(3).unwrap_err().reset_after,
            Duration::from_secs(3600)
        );
    }
}
