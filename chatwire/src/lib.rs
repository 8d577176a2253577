//! A sharded, async client for the chatwire ecosystem.
//!
//! Ties together [`chatwire_gateway`]'s shard fleet, [`chatwire_http`]'s
//! rate-limit-aware REST engine, and a merged dispatch event stream behind
//! one [`Client`].

pub mod client;
pub mod config;
pub mod error;

pub use client::Client;
pub use config::{ClientConfig, ClientConfigBuilder};
pub use error::{Error, ErrorType, Result};
