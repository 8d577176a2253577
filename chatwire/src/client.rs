//! The top-level client: bootstraps against the REST API, brings up a
//! shard fleet sized to the result, and exposes one merged dispatch stream.

use crate::{
    config::ClientConfig,
    error::{Error, ErrorType, Result},
};
use chatwire_gateway::{EventRouter, EventSubscription, FleetStatus, ManagerConfig, ShardManager};
use chatwire_http::{Client as RestClient, MajorParams, OutboundRequest, RouteTemplate, Segment};
use chatwire_model::gateway::session_start_limit::GatewayInfo;
use chatwire_ratelimiting::Priority;
use hyper::Method;
use std::time::Duration;

/// Default timeout `shutdown()` waits for the shard fleet to drain before
/// giving up and aborting outstanding workers.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// An online, sharded chatwire client.
///
/// Cheaply cloneable: the REST client is reference-counted internally and
/// the event router may be subscribed to from any number of places.
pub struct Client {
    rest: RestClient,
    router: EventRouter,
    manager: ShardManager,
}

impl Client {
    /// Bootstrap against the REST API (`GET /gateway/bot`) and bring up a
    /// shard fleet sized to `config`'s `shard_count`/`shard_ids`, falling
    /// back to the server's recommendation when unset.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorType::Rest`] if the bootstrap request fails,
    /// [`ErrorType::SessionStartLimitExhausted`] if too few session starts
    /// remain for the requested shard range, or [`ErrorType::Gateway`] if
    /// the shard fleet otherwise fails to start.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let rest = RestClient::new(format!("Bot {}", config.token), config.rest.clone());

        let info = fetch_gateway_info(&rest).await?;

        let shard_count = config.shard_count.unwrap_or(info.shards);
        let shard_ids = config.shard_ids.clone().unwrap_or(0..shard_count);

        let session_start_limit = ManagerConfig::session_start_limit_from_wire(info.session_start_limit);

        let manager_config = ManagerConfig {
            token: config.token.clone(),
            intents: config.intents,
            gateway_url: info.url,
            total_shards: shard_count,
            shard_ids,
            max_concurrency: session_start_limit.max_concurrency,
            session_start_limit,
            large_threshold: config.large_threshold,
            presence: config.presence.clone(),
        };

        let (router, events) = match config.raw_event_buffer {
            Some(capacity) => EventRouter::with_capacity(capacity),
            None => EventRouter::new(),
        };

        let manager = ShardManager::start(manager_config, events).map_err(|source| {
            if let chatwire_gateway::ErrorType::ResourceExhausted { reset_after } = source.kind() {
                let reset_after = *reset_after;
                Error::with_source(ErrorType::SessionStartLimitExhausted { reset_after }, source)
            } else {
                Error::with_source(ErrorType::Gateway, source)
            }
        })?;

        Ok(Self { rest, router, manager })
    }

    /// The REST engine backing this client, for issuing API calls.
    #[must_use]
    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    /// Subscribe to the deep-buffered dispatch stream a handler pool
    /// should consume.
    #[must_use]
    pub fn events(&self) -> EventSubscription {
        self.router.subscribe_dispatch()
    }

    /// Subscribe to the shallow-buffered raw stream, trading completeness
    /// for a bounded memory footprint under sustained backpressure.
    #[must_use]
    pub fn raw_events(&self) -> EventSubscription {
        self.router.subscribe_raw()
    }

    /// A snapshot of every shard's current state and ping.
    #[must_use]
    pub fn status(&self) -> FleetStatus {
        self.manager.status()
    }

    /// Resolves the first time every shard in the fleet reaches `READY`
    /// simultaneously; fires exactly once. Awaiting it again after it has
    /// already fired resolves immediately.
    pub async fn ready(&self) {
        self.manager.ready().await;
    }

    /// Command every shard to close with code 1000 and await the fleet's
    /// drain, up to a default timeout.
    ///
    /// Idempotent: calling this more than once has the same observable
    /// effect as calling it once (§8 property 6).
    pub async fn shutdown(&mut self) {
        self.manager.shutdown(DEFAULT_SHUTDOWN_TIMEOUT).await;
    }

    /// As [`Client::shutdown`], but with an explicit drain timeout.
    pub async fn shutdown_with_timeout(&mut self, drain_timeout: Duration) {
        self.manager.shutdown(drain_timeout).await;
    }
}

async fn fetch_gateway_info(rest: &RestClient) -> Result<GatewayInfo> {
    let route = RouteTemplate::new(
        Method::GET,
        &[Segment::Literal("gateway"), Segment::Literal("bot")],
        MajorParams::None,
    );

    let outbound = OutboundRequest {
        route,
        path: "/gateway/bot".to_owned(),
        body: None,
        headers: Vec::new(),
        priority: Priority::Normal,
        audit_log_reason: None,
    };

    let response = rest
        .execute(outbound)
        .await
        .map_err(|source| Error::with_source(ErrorType::Rest, source))?;

    let (_parts, body) = response.into_parts();

    serde_json::from_slice(&body).map_err(|source| Error::with_source(ErrorType::Rest, source))
}

#[allow(unused)]
fn assert_send_sync<T: Send + Sync>() {}

#[cfg(test)]
mod tests {
    #[test]
    fn client_is_send_and_sync() {
        super::assert_send_sync::<super::Client>();
    }
}
