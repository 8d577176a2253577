//! Payload shapes for commands a shard sends to the gateway.

mod identify;
mod request_guild_members;
mod resume;
mod update_presence;
mod update_voice_state;

pub use identify::{Identify, IdentifyInfo, IdentifyProperties};
pub use request_guild_members::RequestGuildMembers;
pub use resume::Resume;
pub use update_presence::UpdatePresence;
pub use update_voice_state::UpdateVoiceState;

use crate::gateway::OpCode;
use serde::Serialize;

/// A command that can be serialized as an outgoing `{"op": ..., "d": ...}` frame.
pub trait Command: Serialize {
    /// The opcode this command is sent under.
    const OP: OpCode;
}

/// Envelope wrapping a command's payload with its opcode, matching the wire
/// shape every outgoing frame takes.
#[derive(Serialize)]
struct CommandEnvelope<'a, T> {
    op: u8,
    d: &'a T,
}

/// Serialize a command to its wire JSON representation.
pub fn serialize_command<T: Command>(command: &T) -> serde_json::Result<String> {
    serde_json::to_string(&CommandEnvelope {
        op: T::OP as u8,
        d: command,
    })
}

/// The `HEARTBEAT` command (opcode 1): carries the session's last sequence,
/// or `null` before the first dispatch has been observed.
pub struct Heartbeat(pub Option<u64>);

impl Heartbeat {
    /// Serialize this heartbeat to its wire JSON representation.
    ///
    /// `d` here is the bare sequence number (or `null`), not an object, so
    /// this bypasses the [`Command`]/[`CommandEnvelope`] machinery used by
    /// the other outgoing payloads.
    pub fn serialize(&self) -> serde_json::Result<String> {
        #[derive(Serialize)]
        struct Frame {
            op: u8,
            d: Option<u64>,
        }

        serde_json::to_string(&Frame {
            op: OpCode::Heartbeat as u8,
            d: self.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Heartbeat;

    #[test]
    fn heartbeat_with_sequence() {
        let json = Heartbeat(Some(5)).serialize().unwrap();

        assert_eq!(json, r#"{"op":1,"d":5}"#);
    }

    #[test]
    fn heartbeat_without_sequence() {
        let json = Heartbeat(None).serialize().unwrap();

        assert_eq!(json, r#"{"op":1,"d":null}"#);
    }
}
