use super::Command;
use crate::gateway::OpCode;
use serde::Serialize;

/// The `PRESENCE UPDATE` command (opcode 3).
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct UpdatePresence {
    pub since: Option<u64>,
    pub activities: Vec<serde_json::Value>,
    pub status: String,
    pub afk: bool,
}

impl Command for UpdatePresence {
    const OP: OpCode = OpCode::PresenceUpdate;
}
