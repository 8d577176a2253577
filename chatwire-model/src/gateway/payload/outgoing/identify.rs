use super::Command;
use crate::gateway::{Intents, OpCode};
use serde::Serialize;

/// Properties identifying the client/OS, sent alongside every IDENTIFY.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct IdentifyProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl IdentifyProperties {
    /// Build properties naming a library and the host OS.
    pub fn new(browser: impl Into<String>) -> Self {
        let browser = browser.into();

        Self {
            os: std::env::consts::OS.to_owned(),
            device: browser.clone(),
            browser,
        }
    }
}

/// The `[shard_id, shard_count]` pair sent on IDENTIFY for a sharded session.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct IdentifyInfo {
    pub id: u32,
    pub total: u32,
}

/// The `IDENTIFY` command (opcode 2): opens a fresh session.
#[derive(Clone, Debug, Serialize)]
pub struct Identify {
    pub token: String,
    pub intents: Intents,
    pub properties: IdentifyProperties,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compress: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard: Option<(u32, u32)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<serde_json::Value>,
}

impl Command for Identify {
    const OP: OpCode = OpCode::Identify;
}
