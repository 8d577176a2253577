//! Snowflake identifiers.

use serde::{
    de::{Deserializer, Error as DeError, Visitor},
    ser::Serializer,
    Deserialize, Serialize,
};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    num::NonZeroU64,
};

/// Milliseconds since 2015-01-01T00:00:00Z, the platform's custom epoch.
const DISCORD_EPOCH: u64 = 1_420_070_400_000;

/// Opaque 64-bit identifier.
///
/// Serializes and deserializes as a decimal string on the wire, matching the
/// platform's convention of avoiding precision loss in languages whose
/// numeric type is an IEEE-754 double.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Snowflake(NonZeroU64);

impl Snowflake {
    /// Create a snowflake from its raw integer value.
    ///
    /// Returns `None` if `value` is zero, which is never a valid id.
    pub const fn new(value: u64) -> Option<Self> {
        match NonZeroU64::new(value) {
            Some(inner) => Some(Self(inner)),
            None => None,
        }
    }

    /// The raw integer value.
    pub const fn get(self) -> u64 {
        self.0.get()
    }

    /// The UTC millisecond timestamp encoded in the high 42 bits.
    pub const fn timestamp_millis(self) -> u64 {
        (self.0.get() >> 22) + DISCORD_EPOCH
    }
}

impl Display for Snowflake {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(&self.0.get(), f)
    }
}

impl Serialize for Snowflake {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(SnowflakeVisitor)
    }
}

struct SnowflakeVisitor;

impl<'de> Visitor<'de> for SnowflakeVisitor {
    type Value = Snowflake;

    fn expecting(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str("a non-zero integer or decimal string")
    }

    fn visit_u64<E: DeError>(self, value: u64) -> Result<Self::Value, E> {
        Snowflake::new(value).ok_or_else(|| E::custom("snowflake value is zero"))
    }

    fn visit_str<E: DeError>(self, value: &str) -> Result<Self::Value, E> {
        let parsed = value.parse().map_err(E::custom)?;

        self.visit_u64(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::Snowflake;
    use serde_test::Token;
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(Snowflake: Clone, Copy, Debug, Eq, Send, Sync);

    #[test]
    fn timestamp_extraction() {
        // first discord snowflake ever minted, widely cited as a fixture.
        let id = Snowflake::new(175_928_847_299_117_063).unwrap();

        assert_eq!(id.timestamp_millis(), 1_462_015_105_796);
    }

    #[test]
    fn roundtrip() {
        let id = Snowflake::new(123).unwrap();

        serde_test::assert_tokens(&id, &[Token::Str("123")]);
    }
}
