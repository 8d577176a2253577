//! The event router (§4.8): fans a merged, per-shard-ordered stream of
//! dispatch envelopes out to handler pools, off each shard's own read loop.
//!
//! Two subscription kinds share one underlying stream: dispatch
//! subscriptions get a deep buffer and are the ones a handler pool should
//! actually use; raw subscriptions get a shallow buffer and may silently
//! drop the oldest buffered event under sustained backpressure, trading
//! completeness for a bound on memory use.

use crate::session::RoutedEvent;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};

/// Default per-subscriber buffer for raw subscriptions; dispatch
/// subscriptions get an 8x deeper buffer before they start dropping.
const DEFAULT_RAW_CAPACITY: usize = 256;

/// Fans dispatch envelopes, tagged by originating shard, out to subscribers.
///
/// Construct with [`EventRouter::new`], which also returns the sender every
/// shard session should be handed as its `events` channel.
pub struct EventRouter {
    dispatch: broadcast::Sender<RoutedEvent>,
    raw: broadcast::Sender<RoutedEvent>,
    pump: JoinHandle<()>,
}

impl EventRouter {
    /// Build a router with the default raw-subscription buffer depth.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedSender<RoutedEvent>) {
        Self::with_capacity(DEFAULT_RAW_CAPACITY)
    }

    /// Build a router whose raw subscriptions buffer up to `raw_capacity`
    /// events before dropping the oldest for a lagging subscriber.
    #[must_use]
    pub fn with_capacity(raw_capacity: usize) -> (Self, mpsc::UnboundedSender<RoutedEvent>) {
        let raw_capacity = raw_capacity.max(1);

        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let (dispatch_tx, _) = broadcast::channel(raw_capacity.saturating_mul(8));
        let (raw_tx, _) = broadcast::channel(raw_capacity);

        let pump = tokio::spawn(pump(incoming_rx, dispatch_tx.clone(), raw_tx.clone()));

        (
            Self {
                dispatch: dispatch_tx,
                raw: raw_tx,
                pump,
            },
            incoming_tx,
        )
    }

    /// Subscribe to the deep-buffered stream a handler pool should consume.
    #[must_use]
    pub fn subscribe_dispatch(&self) -> EventSubscription {
        EventSubscription {
            receiver: self.dispatch.subscribe(),
        }
    }

    /// Subscribe to the shallow-buffered stream, accepting silent drops
    /// under sustained load in exchange for a fixed memory footprint.
    #[must_use]
    pub fn subscribe_raw(&self) -> EventSubscription {
        EventSubscription {
            receiver: self.raw.subscribe(),
        }
    }
}

impl Drop for EventRouter {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// A single subscriber's view of the routed event stream.
pub struct EventSubscription {
    receiver: broadcast::Receiver<RoutedEvent>,
}

impl EventSubscription {
    /// Await the next event, transparently skipping past any events dropped
    /// while this subscriber was lagging.
    ///
    /// Returns `None` once the router itself has shut down.
    pub async fn recv(&mut self) -> Option<RoutedEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

async fn pump(
    mut incoming: mpsc::UnboundedReceiver<RoutedEvent>,
    dispatch: broadcast::Sender<RoutedEvent>,
    raw: broadcast::Sender<RoutedEvent>,
) {
    while let Some(event) = incoming.recv().await {
        let _ = dispatch.send(event.clone());
        let _ = raw.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::EventRouter;
    use crate::session::RoutedEvent;
    use chatwire_model::gateway::event::DispatchEvent;

    fn sample_event(shard_id: u32, sequence: u64) -> RoutedEvent {
        RoutedEvent {
            shard_id,
            sequence: Some(sequence),
            event: DispatchEvent::Resumed,
        }
    }

    #[tokio::test]
    async fn dispatch_subscriber_sees_events_in_send_order() {
        let (router, events) = EventRouter::new();
        let mut dispatch = router.subscribe_dispatch();

        events.send(sample_event(0, 1)).unwrap();
        events.send(sample_event(0, 2)).unwrap();

        assert_eq!(dispatch.recv().await.unwrap().sequence, Some(1));
        assert_eq!(dispatch.recv().await.unwrap().sequence, Some(2));
    }

    #[tokio::test]
    async fn raw_subscriber_skips_past_a_lag_instead_of_blocking() {
        let (router, events) = EventRouter::with_capacity(2);
        let mut raw = router.subscribe_raw();

        for sequence in 0..10 {
            events.send(sample_event(0, sequence)).unwrap();
        }

        // however many were dropped for lag, recv() must still make progress
        // rather than returning stale or duplicate events.
        let observed = raw.recv().await.unwrap();
        assert!(observed.sequence.unwrap() < 10);
    }

    #[tokio::test]
    async fn router_shutdown_ends_subscriptions() {
        let (router, events) = EventRouter::new();
        let mut dispatch = router.subscribe_dispatch();

        drop(events);
        drop(router);

        assert!(dispatch.recv().await.is_none());
    }
}
