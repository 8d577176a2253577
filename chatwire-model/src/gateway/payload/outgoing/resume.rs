use super::Command;
use crate::gateway::OpCode;
use serde::Serialize;

/// The `RESUME` command (opcode 6): reattaches to an existing session.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Resume {
    pub token: String,
    pub session_id: String,
    pub seq: u64,
}

impl Command for Resume {
    const OP: OpCode = OpCode::Resume;
}

#[cfg(test)]
mod tests {
    use super::Resume;
    use crate::gateway::payload::outgoing::serialize_command;

    #[test]
    fn serializes() {
        let resume = Resume {
            token: "token".to_owned(),
            session_id: "session".to_owned(),
            seq: 3,
        };

        let json = serialize_command(&resume).unwrap();

        assert_eq!(
            json,
            r#"{"op":6,"d":{"token":"token","session_id":"session","seq":3}}"#
        );
    }
}
