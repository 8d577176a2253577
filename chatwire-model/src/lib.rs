//! Wire types shared by the chatwire gateway and REST crates.
//!
//! This crate intentionally does not model the target platform's domain
//! objects (users, guilds, channels, messages, ...); it carries only the
//! envelope, opcode, intent, and session types the traffic-control engine
//! itself needs to speak the wire protocols.

pub mod gateway;
pub mod snowflake;

pub use snowflake::Snowflake;
