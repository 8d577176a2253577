use bitflags::bitflags;
use serde::{
    de::{Deserializer, Error as DeError},
    ser::Serializer,
    Deserialize, Serialize,
};

bitflags! {
    /// Bitfield selecting which event families the gateway delivers to a session.
    #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
    pub struct Intents: u64 {
        const GUILDS = 1 << 0;
        const GUILD_MEMBERS = 1 << 1;
        const GUILD_BANS = 1 << 2;
        const GUILD_EMOJIS_AND_STICKERS = 1 << 3;
        const GUILD_INTEGRATIONS = 1 << 4;
        const GUILD_WEBHOOKS = 1 << 5;
        const GUILD_INVITES = 1 << 6;
        const GUILD_VOICE_STATES = 1 << 7;
        const GUILD_PRESENCES = 1 << 8;
        const GUILD_MESSAGES = 1 << 9;
        const GUILD_MESSAGE_REACTIONS = 1 << 10;
        const GUILD_MESSAGE_TYPING = 1 << 11;
        const DIRECT_MESSAGES = 1 << 12;
        const DIRECT_MESSAGE_REACTIONS = 1 << 13;
        const DIRECT_MESSAGE_TYPING = 1 << 14;
        const MESSAGE_CONTENT = 1 << 15;
        const GUILD_SCHEDULED_EVENTS = 1 << 16;
    }
}

impl Intents {
    /// Privileged intents requiring prior opt-in through the developer portal.
    pub const fn privileged() -> Self {
        Self::from_bits_truncate(
            Self::GUILD_MEMBERS.bits() | Self::GUILD_PRESENCES.bits() | Self::MESSAGE_CONTENT.bits(),
        )
    }
}

impl Serialize for Intents {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.bits())
    }
}

impl<'de> Deserialize<'de> for Intents {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u64::deserialize(deserializer)?;

        Self::from_bits(bits).ok_or_else(|| DeError::custom("unknown intents bit set"))
    }
}

#[cfg(test)]
mod tests {
    use super::Intents;
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(Intents: Clone, Copy, Debug, Eq, Send, Sync);

    #[test]
    fn privileged_subset() {
        let privileged = Intents::privileged();

        assert!(privileged.contains(Intents::GUILD_MEMBERS));
        assert!(privileged.contains(Intents::GUILD_PRESENCES));
        assert!(privileged.contains(Intents::MESSAGE_CONTENT));
        assert!(!privileged.contains(Intents::GUILDS));
    }

    #[test]
    fn serializes_as_integer() {
        let value = Intents::GUILDS | Intents::GUILD_MESSAGES;

        assert_eq!(serde_json::to_string(&value).unwrap(), "513");
    }
}
