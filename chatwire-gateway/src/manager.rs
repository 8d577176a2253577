//! The shard manager (§4.7): brings a fleet of shards online, paces fresh
//! identifies across the fleet's concurrency buckets, and tracks aggregate
//! status for callers that don't want to poll each shard individually.

use crate::{
    error::{Error, ErrorType, Result},
    session::{Ended, Identity, RoutedEvent, ShardSession, StatusHandle},
    state::ShardState,
};
use chatwire_model::gateway::{Intents, SessionStartLimit as WireSessionStartLimit};
use chatwire_queue::{IdentifyQueue, Queue, SessionStartLimit};
use futures_util::future::join_all;
use std::{collections::HashMap, ops::Range, sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time,
};

/// What the manager needs to bring a fleet of shards online.
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    pub token: String,
    pub intents: Intents,
    pub gateway_url: String,
    pub total_shards: u32,
    pub shard_ids: Range<u32>,
    pub max_concurrency: u32,
    pub session_start_limit: SessionStartLimit,
    pub large_threshold: Option<u32>,
    pub presence: Option<serde_json::Value>,
}

impl ManagerConfig {
    /// Adapt the wire shape a gateway bootstrap endpoint returns into the
    /// `Duration`-based shape the pacing queue consumes.
    #[must_use]
    pub fn session_start_limit_from_wire(wire: WireSessionStartLimit) -> SessionStartLimit {
        SessionStartLimit {
            total: wire.total,
            remaining: wire.remaining,
            reset_after: Duration::from_millis(wire.reset_after),
            max_concurrency: wire.max_concurrency,
        }
    }
}

/// A running shard worker's externally observable state.
#[derive(Clone, Debug)]
pub struct ShardHandle {
    status: StatusHandle,
}

impl ShardHandle {
    #[must_use]
    pub fn state(&self) -> ShardState {
        self.status.state()
    }

    #[must_use]
    pub fn ping(&self) -> Option<Duration> {
        self.status.ping()
    }
}

/// Aggregate status across the whole fleet a manager owns.
#[derive(Clone, Debug)]
pub struct FleetStatus {
    pub shards: HashMap<u32, ShardHandle>,
}

impl FleetStatus {
    #[must_use]
    pub fn ready_count(&self) -> usize {
        self.shards.values().filter(|shard| shard.state().is_ready()).count()
    }

    #[must_use]
    pub fn all_ready(&self) -> bool {
        !self.shards.is_empty() && self.ready_count() == self.shards.len()
    }

    /// Mean ping across shards currently reporting one; `None` if none are.
    #[must_use]
    pub fn average_ping(&self) -> Option<Duration> {
        let pings: Vec<Duration> = self.shards.values().filter_map(ShardHandle::ping).collect();

        if pings.is_empty() {
            return None;
        }

        let total: Duration = pings.iter().sum();
        Some(total / u32::try_from(pings.len()).unwrap_or(1))
    }
}

/// Owns and drives every shard worker this process is responsible for.
pub struct ShardManager {
    handles: HashMap<u32, ShardHandle>,
    workers: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
}

impl ShardManager {
    /// Fail fast if the session start limit can't cover `config.shard_ids`,
    /// then spawn one worker task per shard.
    ///
    /// Workers are independent: one shard's reconnect loop never blocks
    /// another's, except where they share an identify-concurrency bucket.
    pub fn start(config: ManagerConfig, events: mpsc::UnboundedSender<RoutedEvent>) -> Result<Self> {
        let shard_count = u32::try_from(config.shard_ids.clone().count()).unwrap_or(u32::MAX);

        config.session_start_limit.check(shard_count).map_err(|source| {
            let reset_after = source.reset_after;
            Error::with_source(ErrorType::ResourceExhausted { reset_after }, source)
        })?;

        let identify_queue = Arc::new(IdentifyQueue::new(config.max_concurrency));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = HashMap::with_capacity(shard_count as usize);
        let mut workers = Vec::with_capacity(shard_count as usize);

        for shard_id in config.shard_ids.clone() {
            let identity = Identity {
                token: config.token.clone(),
                intents: config.intents,
                shard: (shard_id, config.total_shards),
                large_threshold: config.large_threshold,
                presence: config.presence.clone(),
            };

            let mut session = ShardSession::new(identity, config.gateway_url.clone());
            handles.insert(
                shard_id,
                ShardHandle {
                    status: session.status_handle(),
                },
            );

            let identify_queue = Arc::clone(&identify_queue);
            let events = events.clone();
            let shutdown_rx = shutdown_rx.clone();

            workers.push(tokio::spawn(async move {
                run_shard_worker(shard_id, &mut session, identify_queue.as_ref(), &events, shutdown_rx).await;
            }));
        }

        let (ready_tx, ready_rx) = watch::channel(false);
        spawn_ready_watcher(handles.clone(), ready_tx);

        Ok(Self {
            handles,
            workers,
            shutdown_tx,
            ready_rx,
        })
    }

    /// A snapshot of every shard's current state and ping.
    #[must_use]
    pub fn status(&self) -> FleetStatus {
        FleetStatus {
            shards: self.handles.clone(),
        }
    }

    /// Command every shard to close with code 1000 and await their drain,
    /// up to `drain_timeout`; idempotent, and safe to call more than once.
    pub async fn shutdown(&mut self, drain_timeout: Duration) {
        let _ = self.shutdown_tx.send(true);

        let _ = time::timeout(drain_timeout, join_all(self.workers.iter_mut())).await;
    }

    /// Abort every shard worker immediately, without a clean close frame.
    ///
    /// Prefer [`ShardManager::shutdown`] for a coordinated drain; this is a
    /// last resort once a drain has already timed out.
    pub fn abort(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }

    /// Resolves the first (and only) time every requested shard reaches
    /// `READY` simultaneously (§4.7). Unlike [`ShardManager::status`],
    /// which must be polled, this fires exactly once; callers that await it
    /// after it has already fired resolve immediately.
    pub async fn ready(&self) {
        let mut rx = self.ready_rx.clone();

        if *rx.borrow() {
            return;
        }

        let _ = rx.changed().await;
    }
}

/// Polls `handles` until every shard reports `READY`, then fires `ready_tx`
/// exactly once and exits. An empty fleet never fires, matching
/// [`FleetStatus::all_ready`].
fn spawn_ready_watcher(handles: HashMap<u32, ShardHandle>, ready_tx: watch::Sender<bool>) {
    if handles.is_empty() {
        return;
    }

    tokio::spawn(async move {
        loop {
            if handles.values().all(|handle| handle.state().is_ready()) {
                let _ = ready_tx.send(true);
                return;
            }

            time::sleep(Duration::from_millis(50)).await;
        }
    });
}

async fn run_shard_worker(
    shard_id: u32,
    session: &mut ShardSession,
    identify_queue: &IdentifyQueue,
    events: &mpsc::UnboundedSender<RoutedEvent>,
    shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if !session.has_active_session() {
            identify_queue.enqueue(shard_id).await;
        }

        match session.run(events.clone(), shutdown_rx.clone()).await {
            Ok(Ended::Destroyed) => return,
            Ok(Ended::Reconnect) => {
                if *shutdown_rx.borrow() {
                    return;
                }

                let backoff = session.next_backoff();

                #[cfg(feature = "tracing")]
                tracing::warn!(shard_id, ?backoff, "shard reconnecting");

                time::sleep(backoff).await;
            }
            Err(_error) => {
                #[cfg(feature = "tracing")]
                tracing::error!(shard_id, error = %_error, "shard connection attempt failed");

                let backoff = session.next_backoff();
                time::sleep(backoff).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FleetStatus, ShardHandle};
    use crate::{session::{ShardSession, StatusHandle}, state::ShardState};
    use std::{collections::HashMap, time::Duration};
    use tokio::{sync::watch, time};

    fn handle_with(state: ShardState, ping: Option<Duration>) -> ShardHandle {
        let (handle, status) = fresh_handle();

        if let Some(ping) = ping {
            status.set_ping(ping);
        }
        status.set_state(state);

        handle
    }

    fn fresh_handle() -> (ShardHandle, StatusHandle) {
        let identity = crate::session::Identity {
            token: "token".to_owned(),
            intents: chatwire_model::gateway::Intents::empty(),
            shard: (0, 1),
            large_threshold: None,
            presence: None,
        };

        let session = ShardSession::new(identity, "wss://gateway.example.com".to_owned());
        let status = session.status_handle();

        (ShardHandle { status: status.clone() }, status)
    }

    #[test]
    fn ready_count_and_average_ping() {
        let mut shards = HashMap::new();
        shards.insert(0, handle_with(ShardState::Ready, Some(Duration::from_millis(40))));
        shards.insert(1, handle_with(ShardState::Ready, Some(Duration::from_millis(60))));
        shards.insert(2, handle_with(ShardState::Connecting, None));

        let status = FleetStatus { shards };

        assert_eq!(status.ready_count(), 2);
        assert!(!status.all_ready());
        assert_eq!(status.average_ping(), Some(Duration::from_millis(50)));
    }

    #[tokio::test(start_paused = true)]
    async fn ready_watcher_fires_once_every_shard_reports_ready() {
        let (handle0, status0) = fresh_handle();
        let (handle1, status1) = fresh_handle();

        let mut shards = HashMap::new();
        shards.insert(0, handle0);
        shards.insert(1, handle1);

        let (ready_tx, mut ready_rx) = watch::channel(false);
        super::spawn_ready_watcher(shards, ready_tx);

        time::sleep(Duration::from_millis(10)).await;
        assert!(!*ready_rx.borrow());

        status0.set_state(ShardState::Ready);
        status1.set_state(ShardState::Ready);

        ready_rx.changed().await.unwrap();
        assert!(*ready_rx.borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn ready_watcher_never_fires_for_an_empty_fleet() {
        let (ready_tx, ready_rx) = watch::channel(false);
        super::spawn_ready_watcher(HashMap::new(), ready_tx);

        time::sleep(Duration::from_millis(200)).await;
        assert!(!*ready_rx.borrow());
    }
}
