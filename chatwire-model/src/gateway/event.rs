//! The dispatch envelope and the small set of dispatch payloads the
//! traffic-control engine itself needs to interpret (`READY`, `RESUMED`).
//! Every other dispatch payload is left as a raw [`serde_json::Value`] for
//! the event router to forward untouched.

use crate::gateway::OpCode;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Payload carried by a `READY` dispatch.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Ready {
    pub session_id: String,
    pub resume_gateway_url: String,
    #[serde(rename = "v")]
    pub version: u8,
}

/// The small set of dispatch payloads this crate interprets directly.
#[derive(Clone, Debug, PartialEq)]
pub enum DispatchEvent {
    /// Session handshake completed; carries the new session identity.
    Ready(Box<Ready>),
    /// A RESUME was accepted; replayed dispatches follow.
    Resumed,
    /// Any other event name; left for the caller to interpret.
    Other {
        /// The dispatch's `t` field.
        event_type: String,
        /// The dispatch's raw, unparsed `d` field.
        data: Box<RawValue>,
    },
}

impl DispatchEvent {
    /// Parse a dispatch payload given its event name and raw `d` field.
    pub fn from_parts(event_type: &str, data: &RawValue) -> serde_json::Result<Self> {
        match event_type {
            "READY" => Ok(Self::Ready(Box::new(serde_json::from_str(data.get())?))),
            "RESUMED" => Ok(Self::Resumed),
            other => Ok(Self::Other {
                event_type: other.to_owned(),
                data: RawValue::from_string(data.get().to_owned())
                    .expect("RawValue round-trips valid JSON"),
            }),
        }
    }
}

/// Payload carried by a `HELLO` (opcode 10).
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Hello {
    pub heartbeat_interval: u64,
}

/// A fully parsed inbound gateway frame.
#[derive(Clone, Debug, PartialEq)]
pub enum GatewayEvent {
    Dispatch(u64, Box<DispatchEvent>),
    Heartbeat(Option<u64>),
    HeartbeatAck,
    Hello(Hello),
    InvalidSession(bool),
    Reconnect,
}

impl GatewayEvent {
    /// The opcode this event corresponds to.
    pub const fn op(&self) -> OpCode {
        match self {
            Self::Dispatch(..) => OpCode::Dispatch,
            Self::Heartbeat(_) => OpCode::Heartbeat,
            Self::HeartbeatAck => OpCode::HeartbeatAck,
            Self::Hello(_) => OpCode::Hello,
            Self::InvalidSession(_) => OpCode::InvalidSession,
            Self::Reconnect => OpCode::Reconnect,
        }
    }
}

/// Minimal frame shape used only to read `op`/`s`/`t` before dispatching to a
/// typed parse; the `d` field is kept raw so it can be handed to
/// [`DispatchEvent::from_parts`] or to the event router untouched.
#[derive(Deserialize)]
struct Envelope<'a> {
    op: u8,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<&'a str>,
    #[serde(default, borrow)]
    d: Option<&'a RawValue>,
}

/// Errors produced while parsing a raw gateway frame.
#[derive(Debug)]
#[non_exhaustive]
pub enum GatewayEventParsingError {
    /// The envelope itself was not valid JSON, or its `op` was unrecognized.
    Envelope(serde_json::Error),
    /// A recognized envelope's `d` field did not match the opcode's expected shape.
    Payload(serde_json::Error),
    /// The opcode requires a payload (`d`) that was missing.
    MissingPayload,
}

impl std::fmt::Display for GatewayEventParsingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Envelope(source) => write!(f, "invalid gateway envelope: {source}"),
            Self::Payload(source) => write!(f, "invalid gateway payload: {source}"),
            Self::MissingPayload => f.write_str("opcode requires a payload but none was present"),
        }
    }
}

impl std::error::Error for GatewayEventParsingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Envelope(source) | Self::Payload(source) => Some(source),
            Self::MissingPayload => None,
        }
    }
}

/// Parse a raw JSON gateway frame into a [`GatewayEvent`].
pub fn parse(json: &str) -> Result<GatewayEvent, GatewayEventParsingError> {
    let envelope: Envelope<'_> =
        serde_json::from_str(json).map_err(GatewayEventParsingError::Envelope)?;

    let op = OpCode::from_u8(envelope.op).ok_or_else(|| {
        GatewayEventParsingError::Envelope(serde::de::Error::custom(format!(
            "unknown opcode {}",
            envelope.op
        )))
    })?;

    match op {
        OpCode::Dispatch => {
            let data = envelope.d.ok_or(GatewayEventParsingError::MissingPayload)?;
            let event_type = envelope.t.ok_or(GatewayEventParsingError::MissingPayload)?;
            let sequence = envelope.s.ok_or(GatewayEventParsingError::MissingPayload)?;
            let dispatch = DispatchEvent::from_parts(event_type, data)
                .map_err(GatewayEventParsingError::Payload)?;

            Ok(GatewayEvent::Dispatch(sequence, Box::new(dispatch)))
        }
        OpCode::Heartbeat => Ok(GatewayEvent::Heartbeat(envelope.s)),
        OpCode::HeartbeatAck => Ok(GatewayEvent::HeartbeatAck),
        OpCode::Hello => {
            let data = envelope.d.ok_or(GatewayEventParsingError::MissingPayload)?;
            let hello: Hello =
                serde_json::from_str(data.get()).map_err(GatewayEventParsingError::Payload)?;

            Ok(GatewayEvent::Hello(hello))
        }
        OpCode::InvalidSession => {
            let data = envelope.d.ok_or(GatewayEventParsingError::MissingPayload)?;
            let resumable: bool =
                serde_json::from_str(data.get()).map_err(GatewayEventParsingError::Payload)?;

            Ok(GatewayEvent::InvalidSession(resumable))
        }
        OpCode::Reconnect => Ok(GatewayEvent::Reconnect),
        OpCode::Identify
        | OpCode::PresenceUpdate
        | OpCode::VoiceStateUpdate
        | OpCode::RequestGuildMembers => Err(GatewayEventParsingError::Envelope(
            serde::de::Error::custom(format!("opcode {} is outbound-only", envelope.op)),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::{parse, DispatchEvent, GatewayEvent};
    use crate::gateway::OpCode;

    #[test]
    fn parses_hello() {
        let event = parse(r#"{"op":10,"d":{"heartbeat_interval":41250}}"#).unwrap();

        match event {
            GatewayEvent::Hello(hello) => assert_eq!(hello.heartbeat_interval, 41_250),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn parses_ready_dispatch() {
        let json = r#"{"op":0,"s":1,"t":"READY","d":{"session_id":"abc","resume_gateway_url":"wss://resume.example.com","v":10}}"#;
        let event = parse(json).unwrap();

        match event {
            GatewayEvent::Dispatch(seq, dispatch) => {
                assert_eq!(seq, 1);
                match *dispatch {
                    DispatchEvent::Ready(ready) => {
                        assert_eq!(ready.session_id, "abc");
                        assert_eq!(ready.resume_gateway_url, "wss://resume.example.com");
                    }
                    other => panic!("unexpected dispatch: {other:?}"),
                }
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn parses_unknown_dispatch_as_other() {
        let json = r#"{"op":0,"s":5,"t":"MESSAGE_CREATE","d":{"content":"hi"}}"#;
        let event = parse(json).unwrap();

        match event {
            GatewayEvent::Dispatch(_, dispatch) => match *dispatch {
                DispatchEvent::Other { event_type, .. } => {
                    assert_eq!(event_type, "MESSAGE_CREATE");
                }
                other => panic!("unexpected dispatch: {other:?}"),
            },
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn op_accessor_matches_parsed_variant() {
        let event = parse(r#"{"op":11}"#).unwrap();

        assert_eq!(event.op(), OpCode::HeartbeatAck);
    }
}
