//! Outgoing gateway command payloads.

pub mod outgoing;
