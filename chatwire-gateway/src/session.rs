//! A single shard's connection: owns its socket and state exclusively,
//! drives the state machine of §4.6, and forwards dispatch envelopes to
//! whoever is listening.

use crate::{
    error::{Error, ErrorType, Result},
    heartbeat::{Heartbeats, Tick},
    outbound_limit::OutboundLimiter,
    state::ShardState,
};
#[cfg(feature = "zlib-stock")]
use crate::compression::Inflater;
use chatwire_model::gateway::{
    close_code::{self, CloseAction},
    event::{DispatchEvent, GatewayEvent},
    payload::outgoing::{Heartbeat, Identify, IdentifyProperties, Resume},
    Intents,
};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::{
    sync::{
        atomic::{AtomicU64, AtomicU8, Ordering},
        Arc,
    },
    time::Duration as StdDuration,
};
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    time::{self, Duration, Instant},
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        protocol::{frame::coding::CloseCode as WsCloseCode, CloseFrame},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Identity and properties a shard authenticates with.
#[derive(Clone, Debug)]
pub struct Identity {
    pub token: String,
    pub intents: Intents,
    pub shard: (u32, u32),
    pub large_threshold: Option<u32>,
    pub presence: Option<serde_json::Value>,
}

/// A dispatch envelope forwarded to the event router (§3's "Dispatch
/// envelope", tagged with its originating shard).
#[derive(Clone, Debug)]
pub struct RoutedEvent {
    pub shard_id: u32,
    pub sequence: Option<u64>,
    pub event: DispatchEvent,
}

const NO_PING: u64 = u64::MAX;

/// A cheap, shareable window into a shard's live state and ping, updated as
/// the session runs. Used by the shard manager to answer aggregate status
/// queries without contending with the session's own run loop.
#[derive(Clone, Debug)]
pub struct StatusHandle {
    state: Arc<AtomicU8>,
    ping_millis: Arc<AtomicU64>,
}

impl StatusHandle {
    fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(encode_state(ShardState::Idle))),
            ping_millis: Arc::new(AtomicU64::new(NO_PING)),
        }
    }

    #[must_use]
    pub fn state(&self) -> ShardState {
        decode_state(self.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn ping(&self) -> Option<Duration> {
        match self.ping_millis.load(Ordering::Acquire) {
            NO_PING => None,
            millis => Some(Duration::from_millis(millis)),
        }
    }

    pub(crate) fn set_state(&self, state: ShardState) {
        self.state.store(encode_state(state), Ordering::Release);
    }

    pub(crate) fn set_ping(&self, ping: Duration) {
        self.ping_millis
            .store(u64::try_from(ping.as_millis()).unwrap_or(u64::MAX - 1), Ordering::Release);
    }
}

const fn encode_state(state: ShardState) -> u8 {
    match state {
        ShardState::Idle => 0,
        ShardState::Connecting => 1,
        ShardState::Connected => 2,
        ShardState::Identifying => 3,
        ShardState::Ready => 4,
        ShardState::Resuming => 5,
        ShardState::Reconnecting => 6,
        ShardState::Disconnected => 7,
        ShardState::Destroyed => 8,
    }
}

const fn decode_state(value: u8) -> ShardState {
    match value {
        1 => ShardState::Connecting,
        2 => ShardState::Connected,
        3 => ShardState::Identifying,
        4 => ShardState::Ready,
        5 => ShardState::Resuming,
        6 => ShardState::Reconnecting,
        7 => ShardState::Disconnected,
        8 => ShardState::Destroyed,
        _ => ShardState::Idle,
    }
}

/// Why a session's run loop ended.
#[derive(Debug)]
pub enum Ended {
    /// The caller asked the shard to close; it will not reconnect.
    Destroyed,
    /// The connection dropped and should be retried from `CONNECTING`.
    Reconnect,
}

/// The per-shard state record (§3's "Shard session").
pub struct ShardSession {
    identity: Identity,
    gateway_url: String,
    state: ShardState,
    sequence: Option<u64>,
    session_id: Option<String>,
    resume_url: Option<String>,
    heartbeats: Option<Heartbeats>,
    next_heartbeat_at: Option<Instant>,
    outbound: OutboundLimiter,
    close_code: Option<u16>,
    reconnect_attempt: u32,
    last_ping: Option<Duration>,
    status: StatusHandle,
    #[cfg(feature = "zlib-stock")]
    inflater: Inflater,
}

impl ShardSession {
    #[must_use]
    pub fn new(identity: Identity, gateway_url: String) -> Self {
        Self {
            identity,
            gateway_url,
            state: ShardState::Idle,
            sequence: None,
            session_id: None,
            resume_url: None,
            heartbeats: None,
            next_heartbeat_at: None,
            outbound: OutboundLimiter::new(),
            close_code: None,
            reconnect_attempt: 0,
            last_ping: None,
            status: StatusHandle::new(),
            #[cfg(feature = "zlib-stock")]
            inflater: Inflater::new(),
        }
    }

    #[must_use]
    pub const fn state(&self) -> ShardState {
        self.state
    }

    #[must_use]
    pub const fn shard_id(&self) -> u32 {
        self.identity.shard.0
    }

    #[must_use]
    pub const fn ping(&self) -> Option<Duration> {
        self.last_ping
    }

    /// A cheap handle the shard manager can poll for this shard's live
    /// state and ping without going through the session itself.
    #[must_use]
    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    /// Whether this shard holds a session it could attempt to resume,
    /// rather than needing a fresh IDENTIFY.
    #[must_use]
    pub fn has_active_session(&self) -> bool {
        self.session_id.is_some()
    }

    fn transition(&mut self, next: ShardState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal shard transition {} -> {next}",
            self.state
        );

        #[cfg(feature = "tracing")]
        tracing::debug!(shard_id = self.shard_id(), from = %self.state, to = %next, "shard state transition");

        self.state = next;
        self.status.set_state(next);
    }

    /// Run the shard until it is destroyed or its connection drops.
    ///
    /// On `Ended::Reconnect`, the caller (the shard manager) is expected to
    /// call [`ShardSession::run`] again after the backoff computed here has
    /// elapsed; session identity (`session_id`/`resume_url`) is preserved
    /// across the call so a resume can be attempted.
    pub async fn run(
        &mut self,
        events: mpsc::UnboundedSender<RoutedEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<Ended> {
        if *shutdown.borrow() {
            self.transition(ShardState::Destroyed);
            return Ok(Ended::Destroyed);
        }

        self.transition(ShardState::Connecting);

        let mut socket = self.connect().await?;
        self.transition(ShardState::Connected);

        let outcome = self.drive(&mut socket, &events, &mut shutdown).await;

        match &outcome {
            Ok(Ended::Destroyed) => {
                let _ = socket
                    .close(Some(CloseFrame {
                        code: WsCloseCode::Normal,
                        reason: "".into(),
                    }))
                    .await;
            }
            _ => {
                let _ = socket.close(None).await;
            }
        }

        outcome
    }

    async fn connect(&self) -> Result<WsStream> {
        let url = self.resume_url.as_deref().unwrap_or(&self.gateway_url);

        let (socket, _response) = connect_async(url)
            .await
            .map_err(|source| Error::with_source(ErrorType::Connecting, source))?;

        Ok(socket)
    }

    async fn drive(
        &mut self,
        socket: &mut WsStream,
        events: &mpsc::UnboundedSender<RoutedEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Ended> {
        loop {
            if *shutdown.borrow() {
                self.transition(ShardState::Destroyed);
                return Ok(Ended::Destroyed);
            }

            let tick_delay = self.next_heartbeat_delay();

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_ok() && *shutdown.borrow() {
                        self.transition(ShardState::Destroyed);
                        return Ok(Ended::Destroyed);
                    }
                }

                _ = sleep_or_pending(tick_delay) => {
                    if let Some(outcome) = self.on_heartbeat_tick(socket).await? {
                        return Ok(outcome);
                    }
                }

                message = socket.next() => {
                    let Some(message) = message else {
                        return Ok(Ended::Reconnect);
                    };

                    let message = message.map_err(|source| Error::with_source(ErrorType::Connecting, source))?;

                    if let Some(outcome) = self.on_message(socket, events, message).await? {
                        return Ok(outcome);
                    }
                }
            }
        }
    }

    /// Remaining time until the next heartbeat is due, not the full
    /// interval: a fresh `sleep` built from the constant interval on every
    /// loop pass would restart the countdown whenever another branch of the
    /// `select!` (e.g. an inbound message) won the race first.
    fn next_heartbeat_delay(&self) -> Option<Duration> {
        self.next_heartbeat_at
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    async fn on_heartbeat_tick(&mut self, socket: &mut WsStream) -> Result<Option<Ended>> {
        let Some(heartbeats) = &self.heartbeats else {
            return Ok(None);
        };

        match heartbeats.on_tick(Instant::now()) {
            Tick::Send => {
                self.next_heartbeat_at = Some(Instant::now() + heartbeats.interval());
                self.send_heartbeat(socket).await?;
                Ok(None)
            }
            Tick::Zombie => {
                #[cfg(feature = "tracing")]
                tracing::warn!(shard_id = self.shard_id(), "zombie connection detected");

                self.close_and_reconnect(socket).await?;
                Ok(Some(Ended::Reconnect))
            }
        }
    }

    async fn send_heartbeat(&mut self, socket: &mut WsStream) -> Result<()> {
        let payload = Heartbeat(self.sequence).serialize().map_err(|source| {
            Error::with_source(ErrorType::ParsingPayload, source)
        })?;

        socket
            .send(Message::Text(payload))
            .await
            .map_err(|source| Error::with_source(ErrorType::Sending, source))
    }

    async fn on_message(
        &mut self,
        socket: &mut WsStream,
        events: &mpsc::UnboundedSender<RoutedEvent>,
        message: Message,
    ) -> Result<Option<Ended>> {
        match message {
            Message::Text(text) => self.on_payload(socket, events, &text).await,
            Message::Binary(bytes) => self.on_binary(socket, events, &bytes).await,
            Message::Close(frame) => {
                self.close_code = frame.as_ref().map(|frame| frame.code.into());
                Ok(Some(self.classify_close()))
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Ok(None),
        }
    }

    #[cfg(feature = "zlib-stock")]
    async fn on_binary(
        &mut self,
        socket: &mut WsStream,
        events: &mpsc::UnboundedSender<RoutedEvent>,
        bytes: &[u8],
    ) -> Result<Option<Ended>> {
        self.inflater.extend(bytes);

        let message = self
            .inflater
            .message()
            .map_err(|source| Error::with_source(ErrorType::Compression, source))?;

        let Some(message) = message else {
            return Ok(None);
        };

        let text = std::str::from_utf8(message)
            .map_err(|source| Error::with_source(ErrorType::ParsingPayload, source))?
            .to_owned();

        self.on_payload(socket, events, &text).await
    }

    #[cfg(not(feature = "zlib-stock"))]
    async fn on_binary(
        &mut self,
        socket: &mut WsStream,
        events: &mpsc::UnboundedSender<RoutedEvent>,
        bytes: &[u8],
    ) -> Result<Option<Ended>> {
        let text = std::str::from_utf8(bytes)
            .map_err(|source| Error::with_source(ErrorType::ParsingPayload, source))?;
        self.on_payload(socket, events, text).await
    }

    async fn on_payload(
        &mut self,
        socket: &mut WsStream,
        events: &mpsc::UnboundedSender<RoutedEvent>,
        text: &str,
    ) -> Result<Option<Ended>> {
        let parsed = chatwire_model::gateway::event::parse(text)
            .map_err(|source| Error::with_source(ErrorType::ParsingPayload, source))?;

        match parsed {
            GatewayEvent::Hello(hello) => {
                let heartbeats = Heartbeats::new(Duration::from_millis(hello.heartbeat_interval));
                self.next_heartbeat_at = Some(Instant::now() + heartbeats.first_delay());
                self.heartbeats = Some(heartbeats);
                self.start_authentication(socket).await?;
                Ok(None)
            }
            GatewayEvent::HeartbeatAck => {
                if let Some(heartbeats) = &self.heartbeats {
                    let ping = heartbeats.on_ack(Instant::now());
                    self.last_ping = Some(ping);
                    self.status.set_ping(ping);
                }
                Ok(None)
            }
            GatewayEvent::Heartbeat(_) => {
                self.send_heartbeat(socket).await?;
                Ok(None)
            }
            GatewayEvent::Reconnect => {
                self.close_and_reconnect(socket).await?;
                Ok(Some(Ended::Reconnect))
            }
            GatewayEvent::InvalidSession(resumable) => {
                let delay = StdDuration::from_secs_f64(rand::thread_rng().gen_range(1.0..5.0));
                time::sleep(delay).await;

                if !resumable {
                    self.session_id = None;
                    self.resume_url = None;
                }

                self.start_authentication(socket).await?;
                Ok(None)
            }
            GatewayEvent::Dispatch(sequence, event) => {
                self.sequence = Some(self.sequence.map_or(sequence, |current| current.max(sequence)));

                if let DispatchEvent::Ready(ready) = event.as_ref() {
                    self.session_id = Some(ready.session_id.clone());
                    self.resume_url = Some(ready.resume_gateway_url.clone());
                    self.transition(ShardState::Ready);
                    self.reconnect_attempt = 0;
                } else if matches!(event.as_ref(), DispatchEvent::Resumed) {
                    self.transition(ShardState::Ready);
                    self.reconnect_attempt = 0;
                }

                let _ = events.send(RoutedEvent {
                    shard_id: self.shard_id(),
                    sequence: self.sequence,
                    event: *event,
                });

                Ok(None)
            }
        }
    }

    async fn start_authentication(&mut self, socket: &mut WsStream) -> Result<()> {
        if self.session_id.is_some() {
            self.transition(ShardState::Resuming);
            self.send_resume(socket).await
        } else {
            self.transition(ShardState::Identifying);
            self.send_identify(socket).await
        }
    }

    async fn await_outbound_slot(&mut self) {
        loop {
            match self.outbound.check(Instant::now()) {
                Ok(()) => return,
                Err(wait) => time::sleep(wait).await,
            }
        }
    }

    async fn send_identify(&mut self, socket: &mut WsStream) -> Result<()> {
        self.await_outbound_slot().await;

        let identify = Identify {
            token: self.identity.token.clone(),
            intents: self.identity.intents,
            properties: IdentifyProperties::new("chatwire"),
            compress: Some(cfg!(feature = "zlib-stock")),
            large_threshold: self.identity.large_threshold,
            shard: Some(self.identity.shard),
            presence: self.identity.presence.clone(),
        };

        let payload = chatwire_model::gateway::payload::outgoing::serialize_command(&identify)
            .map_err(|source| Error::with_source(ErrorType::ParsingPayload, source))?;

        socket
            .send(Message::Text(payload))
            .await
            .map_err(|source| Error::with_source(ErrorType::Sending, source))
    }

    async fn send_resume(&mut self, socket: &mut WsStream) -> Result<()> {
        let Some(session_id) = self.session_id.clone() else {
            return self.send_identify(socket).await;
        };

        self.await_outbound_slot().await;

        let resume = Resume {
            token: self.identity.token.clone(),
            session_id,
            seq: self.sequence.unwrap_or(0),
        };

        let payload = chatwire_model::gateway::payload::outgoing::serialize_command(&resume)
            .map_err(|source| Error::with_source(ErrorType::ParsingPayload, source))?;

        socket
            .send(Message::Text(payload))
            .await
            .map_err(|source| Error::with_source(ErrorType::Sending, source))
    }

    async fn close_and_reconnect(&mut self, socket: &mut WsStream) -> Result<()> {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: WsCloseCode::Library(4000),
                reason: "reconnecting".into(),
            })))
            .await;

        self.transition(ShardState::Reconnecting);

        Ok(())
    }

    fn classify_close(&mut self) -> Ended {
        match close_code::classify(self.close_code) {
            CloseAction::Fatal => {
                self.transition(ShardState::Destroyed);
                Ended::Destroyed
            }
            CloseAction::Resume => {
                self.transition(ShardState::Reconnecting);
                Ended::Reconnect
            }
            CloseAction::Reconnect => {
                self.session_id = None;
                self.resume_url = None;
                self.transition(ShardState::Reconnecting);
                Ended::Reconnect
            }
        }
    }

    /// Capped exponential backoff (base 1s, cap 60s, jitter ±20%) before the
    /// next `CONNECTING` attempt.
    #[must_use]
    pub fn next_backoff(&mut self) -> Duration {
        self.reconnect_attempt = self.reconnect_attempt.saturating_add(1);

        let base = 2f64.powi(i32::try_from(self.reconnect_attempt.min(6)).unwrap_or(6));
        let capped = base.min(60.0);
        let jitter = rand::thread_rng().gen_range(0.8..1.2);

        Duration::from_secs_f64(capped * jitter)
    }
}

async fn sleep_or_pending(delay: Option<Duration>) {
    match delay {
        Some(delay) => time::sleep(delay).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::{decode_state, encode_state, Identity, ShardSession, StatusHandle};
    use crate::state::ShardState;
    use std::time::Duration;

    fn identity() -> Identity {
        Identity {
            token: "token".to_owned(),
            intents: chatwire_model::gateway::Intents::empty(),
            shard: (0, 1),
            large_threshold: None,
            presence: None,
        }
    }

    fn session() -> ShardSession {
        ShardSession::new(identity(), "wss://gateway.example.com".to_owned())
    }

    #[test]
    fn state_encoding_round_trips_for_every_variant() {
        let variants = [
            ShardState::Idle,
            ShardState::Connecting,
            ShardState::Connected,
            ShardState::Identifying,
            ShardState::Ready,
            ShardState::Resuming,
            ShardState::Reconnecting,
            ShardState::Disconnected,
            ShardState::Destroyed,
        ];

        for state in variants {
            assert_eq!(decode_state(encode_state(state)), state);
        }
    }

    #[test]
    fn status_handle_reflects_state_and_ping_updates() {
        let handle = StatusHandle::new();
        assert_eq!(handle.state(), ShardState::Idle);
        assert_eq!(handle.ping(), None);

        handle.set_state(ShardState::Ready);
        handle.set_ping(Duration::from_millis(42));

        assert_eq!(handle.state(), ShardState::Ready);
        assert_eq!(handle.ping(), Some(Duration::from_millis(42)));
    }

    #[test]
    fn a_fresh_session_has_no_active_session_to_resume() {
        let session = session();
        assert!(!session.has_active_session());
        assert_eq!(session.state(), ShardState::Idle);
    }

    #[test]
    fn resumable_close_preserves_session_identity() {
        let mut session = session();
        session.session_id = Some("abc".to_owned());
        session.resume_url = Some("wss://resume.example.com".to_owned());
        session.transition(ShardState::Ready);

        // 4000 is in close_code's resumable set.
        session.close_code = Some(4000);
        let outcome = session.classify_close();

        assert!(matches!(outcome, super::Ended::Reconnect));
        assert!(session.has_active_session());
        assert_eq!(session.state(), ShardState::Reconnecting);
    }

    #[test]
    fn non_resumable_close_clears_session_identity() {
        let mut session = session();
        session.session_id = Some("abc".to_owned());
        session.resume_url = Some("wss://resume.example.com".to_owned());
        session.transition(ShardState::Ready);

        // an unrecognized close code falls back to a fresh reconnect.
        session.close_code = Some(4099);
        let outcome = session.classify_close();

        assert!(matches!(outcome, super::Ended::Reconnect));
        assert!(!session.has_active_session());
    }

    #[test]
    fn authentication_shutdown_is_fatal() {
        let mut session = session();
        session.transition(ShardState::Ready);

        // 4004 (authentication failed) is fatal.
        session.close_code = Some(4004);
        let outcome = session.classify_close();

        assert!(matches!(outcome, super::Ended::Destroyed));
        assert_eq!(session.state(), ShardState::Destroyed);
    }

    #[test]
    fn backoff_grows_and_caps_with_jitter() {
        let mut session = session();

        let first = session.next_backoff();
        assert!(first >= Duration::from_secs_f64(2.0 * 0.8));
        assert!(first <= Duration::from_secs_f64(2.0 * 1.2));

        for _ in 0..20 {
            let backoff = session.next_backoff();
            assert!(backoff <= Duration::from_secs_f64(60.0 * 1.2));
        }
    }

    #[test]
    fn heartbeat_delay_counts_down_to_a_fixed_deadline() {
        let mut session = session();
        let interval = Duration::from_secs(40);

        session.next_heartbeat_at = Some(super::Instant::now() + interval);

        let first = session.next_heartbeat_delay().unwrap();
        let second = session.next_heartbeat_delay().unwrap();

        // the deadline doesn't move just because time elapsed between calls;
        // it should only ever shrink, never reset back up to `interval`.
        assert!(first <= interval);
        assert!(second <= first);
    }

    #[test]
    fn no_heartbeats_yields_no_delay() {
        let session = session();
        assert!(session.next_heartbeat_delay().is_none());
    }
}
