use super::Command;
use crate::gateway::OpCode;
use crate::Snowflake;
use serde::Serialize;

/// The `VOICE STATE UPDATE` command (opcode 4).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct UpdateVoiceState {
    pub guild_id: Snowflake,
    pub channel_id: Option<Snowflake>,
    pub self_mute: bool,
    pub self_deaf: bool,
}

impl Command for UpdateVoiceState {
    const OP: OpCode = OpCode::VoiceStateUpdate;
}
