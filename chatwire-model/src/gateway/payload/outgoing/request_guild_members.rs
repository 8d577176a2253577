use super::Command;
use crate::gateway::OpCode;
use crate::Snowflake;
use serde::Serialize;

/// The `REQUEST GUILD MEMBERS` command (opcode 8).
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct RequestGuildMembers {
    pub guild_id: Snowflake,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presences: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_ids: Option<Vec<Snowflake>>,
}

impl Command for RequestGuildMembers {
    const OP: OpCode = OpCode::RequestGuildMembers;
}
