//! Gateway close code classification.

/// A recognized gateway close code.
///
/// Values outside this set (including ordinary WebSocket codes like 1000 and
/// 1001) are classified by [`CloseCode::classify`] without needing a named
/// variant.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum CloseCode {
    UnknownError = 4000,
    UnknownOpcode = 4001,
    DecodeError = 4002,
    NotAuthenticated = 4003,
    AuthenticationFailed = 4004,
    AlreadyAuthenticated = 4005,
    InvalidSequence = 4007,
    RateLimited = 4008,
    SessionTimedOut = 4009,
    InvalidShard = 4010,
    ShardingRequired = 4011,
    InvalidApiVersion = 4012,
    InvalidIntents = 4013,
    DisallowedIntents = 4014,
}

impl CloseCode {
    /// Convert a raw close code into a known variant, if recognized.
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            4000 => Some(Self::UnknownError),
            4001 => Some(Self::UnknownOpcode),
            4002 => Some(Self::DecodeError),
            4003 => Some(Self::NotAuthenticated),
            4004 => Some(Self::AuthenticationFailed),
            4005 => Some(Self::AlreadyAuthenticated),
            4007 => Some(Self::InvalidSequence),
            4008 => Some(Self::RateLimited),
            4009 => Some(Self::SessionTimedOut),
            4010 => Some(Self::InvalidShard),
            4011 => Some(Self::ShardingRequired),
            4012 => Some(Self::InvalidApiVersion),
            4013 => Some(Self::InvalidIntents),
            4014 => Some(Self::DisallowedIntents),
            _ => None,
        }
    }

    /// The numeric close code.
    pub const fn code(self) -> u16 {
        self as u16
    }
}

/// What a shard should do after observing a close code.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CloseAction {
    /// Reopen a socket against `resumeURL` (if set) and send RESUME.
    Resume,
    /// Reopen a fresh socket and send IDENTIFY, discarding the existing session.
    Reconnect,
    /// The session cannot be recovered; surface a fatal error.
    Fatal,
}

/// Classify a raw close code into the action the session should take.
///
/// This follows the resumable/terminal table in the traffic-control engine's
/// shard session state machine, which is authoritative where other framings
/// of the same classification disagree: resumable codes are exactly
/// `{4000, 4001, 4002, 4003, 4005, 4007, 4008, 4009}`; terminal codes are
/// `{4004, 4010, 4011, 4012, 4013, 4014}` plus a clean `1000` (caller-driven
/// shutdown, not worth reconnecting); everything else, including the
/// ordinary abnormal closes `1001`/`1006`, falls back to a fresh reconnect.
pub fn classify(close_code: Option<u16>) -> CloseAction {
    let Some(raw) = close_code else {
        return CloseAction::Reconnect;
    };

    match CloseCode::from_u16(raw) {
        Some(
            CloseCode::AuthenticationFailed
            | CloseCode::InvalidShard
            | CloseCode::ShardingRequired
            | CloseCode::InvalidApiVersion
            | CloseCode::InvalidIntents
            | CloseCode::DisallowedIntents,
        ) => CloseAction::Fatal,
        Some(
            CloseCode::UnknownError
            | CloseCode::UnknownOpcode
            | CloseCode::DecodeError
            | CloseCode::NotAuthenticated
            | CloseCode::AlreadyAuthenticated
            | CloseCode::InvalidSequence
            | CloseCode::RateLimited
            | CloseCode::SessionTimedOut,
        ) => CloseAction::Resume,
        None if raw == 1000 => CloseAction::Fatal,
        None => CloseAction::Reconnect,
    }
}

#[cfg(test)]
mod tests {
    use super::{classify, CloseAction, CloseCode};
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(CloseCode: Clone, Copy, Debug, Eq, Send, Sync);

    #[test]
    fn fatal_codes() {
        for code in [4004, 4010, 4011, 4012, 4013, 4014] {
            assert_eq!(classify(Some(code)), CloseAction::Fatal, "{code}");
        }
    }

    #[test]
    fn resumable_codes() {
        for code in [4000, 4001, 4002, 4003, 4005, 4007, 4008, 4009] {
            assert_eq!(classify(Some(code)), CloseAction::Resume, "{code}");
        }
    }

    #[test]
    fn abnormal_clean_closes_reconnect() {
        for code in [1001, 1006] {
            assert_eq!(classify(Some(code)), CloseAction::Reconnect, "{code}");
        }
    }

    #[test]
    fn clean_close_is_fatal_and_missing_code_reconnects() {
        assert_eq!(classify(Some(1000)), CloseAction::Fatal);
        assert_eq!(classify(None), CloseAction::Reconnect);
    }
}
