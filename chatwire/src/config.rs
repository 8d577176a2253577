//! Client configuration (§6, §10.3): a builder with chained setters, a
//! `Default` impl supplying the recognized defaults, and a validating
//! `.build()` that only fails when a required field (the token) is missing.

use crate::error::{Error, ErrorType, Result};
use chatwire_http::RestOptions;
use chatwire_model::gateway::Intents;
use std::ops::Range;

/// Everything needed to bring a sharded client online.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub(crate) token: String,
    pub(crate) intents: Intents,
    pub(crate) shard_count: Option<u32>,
    pub(crate) shard_ids: Option<Range<u32>>,
    pub(crate) presence: Option<serde_json::Value>,
    pub(crate) large_threshold: Option<u32>,
    pub(crate) rest: RestOptions,
    pub(crate) raw_event_buffer: Option<usize>,
}

impl ClientConfig {
    /// Start building a configuration for `token`.
    #[must_use]
    pub fn builder(token: impl Into<String>) -> ClientConfigBuilder {
        ClientConfigBuilder::new(token)
    }
}

/// Builds a [`ClientConfig`] (§10.3's builder convention).
#[derive(Clone, Debug)]
pub struct ClientConfigBuilder {
    token: String,
    intents: Intents,
    shard_count: Option<u32>,
    shard_ids: Option<Range<u32>>,
    presence: Option<serde_json::Value>,
    large_threshold: Option<u32>,
    rest: RestOptions,
    raw_event_buffer: Option<usize>,
}

impl ClientConfigBuilder {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            intents: Intents::empty(),
            shard_count: None,
            shard_ids: None,
            presence: None,
            large_threshold: None,
            rest: RestOptions::default(),
            raw_event_buffer: None,
        }
    }

    #[must_use]
    pub fn intents(mut self, intents: Intents) -> Self {
        self.intents = intents;
        self
    }

    /// Fix the total shard count, rather than asking the gateway bootstrap
    /// endpoint for a recommendation.
    #[must_use]
    pub fn shard_count(mut self, shard_count: u32) -> Self {
        self.shard_count = Some(shard_count);
        self
    }

    /// Run only this subset of shard IDs, for a process that is one of
    /// several sharing a single bot's total shard count.
    #[must_use]
    pub fn shard_ids(mut self, shard_ids: Range<u32>) -> Self {
        self.shard_ids = Some(shard_ids);
        self
    }

    #[must_use]
    pub fn presence(mut self, presence: serde_json::Value) -> Self {
        self.presence = Some(presence);
        self
    }

    #[must_use]
    pub fn large_threshold(mut self, large_threshold: u32) -> Self {
        self.large_threshold = Some(large_threshold);
        self
    }

    #[must_use]
    pub fn rest(mut self, rest: RestOptions) -> Self {
        self.rest = rest;
        self
    }

    /// Raw-subscription buffer depth for the event router (§4.8); defaults
    /// to the router's own default if unset.
    #[must_use]
    pub fn raw_event_buffer(mut self, capacity: usize) -> Self {
        self.raw_event_buffer = Some(capacity);
        self
    }

    /// Validate and finish building.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorType::Configuration`] if the token is empty, or if
    /// `shard_ids` is set without `shard_count` and extends beyond the
    /// gateway-recommended shard count once it becomes known.
    pub fn build(self) -> Result<ClientConfig> {
        if self.token.trim().is_empty() {
            return Err(Error::new(ErrorType::Configuration {
                message: "token must not be empty".to_owned(),
            }));
        }

        if let (Some(count), Some(ids)) = (self.shard_count, &self.shard_ids) {
            if ids.end > count {
                return Err(Error::new(ErrorType::Configuration {
                    message: format!("shard_ids {ids:?} exceed shard_count {count}"),
                }));
            }
        }

        Ok(ClientConfig {
            token: self.token,
            intents: self.intents,
            shard_count: self.shard_count,
            shard_ids: self.shard_ids,
            presence: self.presence,
            large_threshold: self.large_threshold,
            rest: self.rest,
            raw_event_buffer: self.raw_event_buffer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::ClientConfig;
    use chatwire_model::gateway::Intents;

    #[test]
    fn empty_token_is_rejected() {
        let result = ClientConfig::builder("").build();
        assert!(result.is_err());
    }

    #[test]
    fn shard_ids_outside_shard_count_are_rejected() {
        let result = ClientConfig::builder("token")
            .shard_count(2)
            .shard_ids(0..4)
            .build();

        assert!(result.is_err());
    }

    #[test]
    fn a_well_formed_config_builds() {
        let config = ClientConfig::builder("token")
            .intents(Intents::GUILDS | Intents::GUILD_MESSAGES)
            .shard_count(4)
            .shard_ids(0..2)
            .build()
            .unwrap();

        assert_eq!(config.shard_count, Some(4));
        assert_eq!(config.shard_ids, Some(0..2));
    }
}
