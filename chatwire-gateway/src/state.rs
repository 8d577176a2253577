//! The shard connection state machine (§4.6).

use std::fmt::{Display, Formatter, Result as FmtResult};

/// A shard's current connection stage.
///
/// ```text
/// IDLE → CONNECTING → CONNECTED → IDENTIFYING → READY
///                            ↘           ↘       ↙ ↘
///                             RESUMING ← ──────── RECONNECTING → DESTROYED
///                                       ↗
///                     DISCONNECTED ─────┘
/// ```
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ShardState {
    Idle,
    Connecting,
    Connected,
    Identifying,
    Ready,
    Resuming,
    Reconnecting,
    Disconnected,
    Destroyed,
}

impl Default for ShardState {
    fn default() -> Self {
        Self::Idle
    }
}

impl Display for ShardState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(match self {
            Self::Idle => "Idle",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Identifying => "Identifying",
            Self::Ready => "Ready",
            Self::Resuming => "Resuming",
            Self::Reconnecting => "Reconnecting",
            Self::Disconnected => "Disconnected",
            Self::Destroyed => "Destroyed",
        })
    }
}

impl ShardState {
    /// Whether `next` is a transition this state machine permits from `self`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use ShardState::{
            Connected, Connecting, Destroyed, Disconnected, Identifying, Idle, Ready,
            Reconnecting, Resuming,
        };

        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Connected)
                | (Connected, Identifying)
                | (Connected, Resuming)
                | (Identifying, Ready)
                | (Identifying, Resuming)
                | (Resuming, Identifying)
                | (Ready, Resuming)
                | (Ready, Reconnecting)
                | (Resuming, Ready)
                | (Resuming, Reconnecting)
                | (Reconnecting, Connecting)
                | (Reconnecting, Destroyed)
                | (Disconnected, Reconnecting)
                | (_, Destroyed)
                | (Connecting, Reconnecting)
                | (Connected, Reconnecting)
                | (Identifying, Reconnecting)
        )
    }

    /// Whether the shard is fully up and can accept outbound commands beyond
    /// identify/resume.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }
}

#[cfg(test)]
mod tests {
    use super::ShardState;

    #[test]
    fn happy_path_is_permitted() {
        assert!(ShardState::Idle.can_transition_to(ShardState::Connecting));
        assert!(ShardState::Connecting.can_transition_to(ShardState::Connected));
        assert!(ShardState::Connected.can_transition_to(ShardState::Identifying));
        assert!(ShardState::Identifying.can_transition_to(ShardState::Ready));
    }

    #[test]
    fn ready_can_resume_or_reconnect() {
        assert!(ShardState::Ready.can_transition_to(ShardState::Resuming));
        assert!(ShardState::Ready.can_transition_to(ShardState::Reconnecting));
        assert!(ShardState::Resuming.can_transition_to(ShardState::Ready));
    }

    #[test]
    fn a_reconnected_socket_may_resume_without_reidentifying() {
        assert!(ShardState::Connected.can_transition_to(ShardState::Resuming));
    }

    #[test]
    fn any_state_can_be_destroyed() {
        for state in [
            ShardState::Idle,
            ShardState::Connecting,
            ShardState::Connected,
            ShardState::Identifying,
            ShardState::Ready,
            ShardState::Resuming,
            ShardState::Reconnecting,
            ShardState::Disconnected,
        ] {
            assert!(state.can_transition_to(ShardState::Destroyed));
        }
    }

    #[test]
    fn ready_cannot_jump_to_identifying_directly() {
        assert!(!ShardState::Ready.can_transition_to(ShardState::Identifying));
    }
}
