//! Gateway (WebSocket) shard implementation for the chatwire ecosystem.
//!
//! A [`manager::ShardManager`] owns a fleet of [`session::ShardSession`]s,
//! each driving its own socket through the connection state machine in
//! [`state`]; dispatch envelopes flow out through a [`router::EventRouter`]
//! shared across the whole fleet.

#[cfg(feature = "zlib-stock")]
pub mod compression;
pub mod error;
pub mod heartbeat;
pub mod manager;
pub mod outbound_limit;
pub mod router;
pub mod session;
pub mod state;

pub use error::{Error, ErrorType, Result};
pub use manager::{FleetStatus, ManagerConfig, ShardHandle, ShardManager};
pub use router::{EventRouter, EventSubscription};
pub use session::{Ended, Identity, RoutedEvent, ShardSession, StatusHandle};
pub use state::ShardState;
