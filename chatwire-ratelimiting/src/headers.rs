//! Parse rate-limit headers from a REST response.

use std::{
    error::Error,
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    str::{self, FromStr, Utf8Error},
};

/// An error parsing one or more rate-limit headers.
#[derive(Debug)]
pub struct HeaderParsingError {
    kind: HeaderParsingErrorType,
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl HeaderParsingError {
    #[must_use = "retrieving the type has no effect if left unused"]
    pub const fn kind(&self) -> &HeaderParsingErrorType {
        &self.kind
    }

    #[must_use = "consuming the error into its parts has no effect if left unused"]
    pub fn into_parts(self) -> (HeaderParsingErrorType, Option<Box<dyn Error + Send + Sync>>) {
        (self.kind, self.source)
    }

    fn missing(name: HeaderName) -> Self {
        Self {
            kind: HeaderParsingErrorType::Missing { name },
            source: None,
        }
    }

    fn not_utf8(name: HeaderName, value: Vec<u8>, source: Utf8Error) -> Self {
        Self {
            kind: HeaderParsingErrorType::NotUtf8 { name, value },
            source: Some(Box::new(source)),
        }
    }
}

impl Display for HeaderParsingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            HeaderParsingErrorType::Missing { name } => {
                write!(f, "header '{name}' is missing")
            }
            HeaderParsingErrorType::NotUtf8 { name, value } => {
                write!(f, "header '{name}' is not valid UTF-8: {value:?}")
            }
            HeaderParsingErrorType::Parsing { kind, name, value } => {
                write!(f, "header '{name}' can not be parsed as a {kind}: '{value}'")
            }
        }
    }
}

impl Error for HeaderParsingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn Error + 'static))
    }
}

/// Type of [`HeaderParsingError`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum HeaderParsingErrorType {
    Missing { name: HeaderName },
    NotUtf8 { name: HeaderName, value: Vec<u8> },
    Parsing {
        kind: HeaderType,
        name: HeaderName,
        value: String,
    },
}

/// Typed name of a rate-limit header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum HeaderName {
    Bucket,
    Global,
    Limit,
    Remaining,
    ResetAfter,
    Reset,
    RetryAfter,
    Scope,
}

impl HeaderName {
    pub const BUCKET: &'static str = "x-ratelimit-bucket";
    pub const GLOBAL: &'static str = "x-ratelimit-global";
    pub const LIMIT: &'static str = "x-ratelimit-limit";
    pub const REMAINING: &'static str = "x-ratelimit-remaining";
    pub const RESET_AFTER: &'static str = "x-ratelimit-reset-after";
    pub const RESET: &'static str = "x-ratelimit-reset";
    // deliberately missing the `x-ratelimit-` prefix, per the wire contract.
    pub const RETRY_AFTER: &'static str = "retry-after";
    pub const SCOPE: &'static str = "x-ratelimit-scope";

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bucket => Self::BUCKET,
            Self::Global => Self::GLOBAL,
            Self::Limit => Self::LIMIT,
            Self::Remaining => Self::REMAINING,
            Self::ResetAfter => Self::RESET_AFTER,
            Self::Reset => Self::RESET,
            Self::RetryAfter => Self::RETRY_AFTER,
            Self::Scope => Self::SCOPE,
        }
    }
}

impl Display for HeaderName {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.name())
    }
}

/// Expected type of a header's value, used in parse error messages.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum HeaderType {
    Bool,
    Float,
    Integer,
    String,
}

impl HeaderType {
    const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Float => "float",
            Self::Integer => "integer",
            Self::String => "string",
        }
    }
}

impl Display for HeaderType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.name())
    }
}

/// Scope of a rate limit, present on 429 responses and `x-ratelimit-scope`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RatelimitScope {
    /// Affects the application as a whole.
    Global,
    /// Affects all applications sharing the same resource, not this
    /// application's individual bucket.
    Shared,
    /// Affects only this bucket.
    User,
}

impl Display for RatelimitScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(match self {
            Self::Global => "global",
            Self::Shared => "shared",
            Self::User => "user",
        })
    }
}

impl FromStr for RatelimitScope {
    type Err = HeaderParsingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "global" => Self::Global,
            "shared" => Self::Shared,
            "user" => Self::User,
            _ => {
                return Err(HeaderParsingError {
                    kind: HeaderParsingErrorType::Parsing {
                        kind: HeaderType::String,
                        name: HeaderName::Scope,
                        value: s.to_owned(),
                    },
                    source: None,
                })
            }
        })
    }
}

/// Headers denoting a global rate limit (applies across all buckets).
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct GlobalLimited {
    retry_after: u64,
    scope: Option<RatelimitScope>,
}

impl GlobalLimited {
    #[must_use]
    pub const fn retry_after(&self) -> u64 {
        self.retry_after
    }

    #[must_use]
    pub const fn scope(&self) -> Option<RatelimitScope> {
        self.scope
    }
}

/// Headers describing a bucket's current limit/remaining/reset.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Present {
    bucket: Option<String>,
    limit: u64,
    remaining: u64,
    reset_after_millis: u64,
    reset_at_millis: u64,
    retry_after: Option<u64>,
    scope: Option<RatelimitScope>,
}

impl Present {
    #[must_use]
    pub fn bucket(&self) -> Option<&str> {
        self.bucket.as_deref()
    }

    #[must_use]
    pub fn into_bucket(self) -> Option<String> {
        self.bucket
    }

    #[must_use]
    pub const fn limit(&self) -> u64 {
        self.limit
    }

    #[must_use]
    pub const fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Milliseconds until the bucket resets.
    #[must_use]
    pub const fn reset_after_millis(&self) -> u64 {
        self.reset_after_millis
    }

    /// Unix timestamp in milliseconds when the bucket resets.
    #[must_use]
    pub const fn reset_at_millis(&self) -> u64 {
        self.reset_at_millis
    }

    /// Seconds to wait before retrying, carried on a 429's `retry-after`
    /// header. Only present on a rate-limited response.
    #[must_use]
    pub const fn retry_after(&self) -> Option<u64> {
        self.retry_after
    }

    #[must_use]
    pub const fn scope(&self) -> Option<RatelimitScope> {
        self.scope
    }
}

/// Parsed rate-limit headers: either a global lockout, per-bucket
/// information, or nothing (the route is not rate-limited).
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum RatelimitHeaders {
    GlobalLimited(GlobalLimited),
    None,
    Present(Present),
}

impl RatelimitHeaders {
    #[must_use]
    pub const fn is_global(&self) -> bool {
        matches!(self, Self::GlobalLimited(_))
    }

    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    #[must_use]
    pub const fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    /// Parse headers from an iterator of lowercased name/value pairs.
    ///
    /// # Errors
    ///
    /// Returns an error if a required header is missing or a present header
    /// value does not match its expected type.
    pub fn from_pairs<'a>(
        headers: impl Iterator<Item = (&'a str, &'a [u8])>,
    ) -> Result<Self, HeaderParsingError> {
        let mut bucket = None;
        let mut global = false;
        let mut limit = None;
        let mut remaining = None;
        let mut reset = None;
        let mut reset_after = None;
        let mut retry_after = None;
        let mut scope = None;

        for (name, value) in headers {
            match name {
                HeaderName::BUCKET => {
                    bucket.replace(header_str(HeaderName::Bucket, value)?);
                }
                HeaderName::GLOBAL => {
                    global = header_bool(HeaderName::Global, value)?;
                }
                HeaderName::LIMIT => {
                    limit.replace(header_int(HeaderName::Limit, value)?);
                }
                HeaderName::REMAINING => {
                    remaining.replace(header_int(HeaderName::Remaining, value)?);
                }
                HeaderName::RESET => {
                    let value = header_float(HeaderName::Reset, value)?;

                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    reset.replace((value * 1000.).ceil() as u64);
                }
                HeaderName::RESET_AFTER => {
                    let value = header_float(HeaderName::ResetAfter, value)?;

                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    reset_after.replace((value * 1000.).ceil() as u64);
                }
                HeaderName::RETRY_AFTER => {
                    retry_after.replace(header_int(HeaderName::RetryAfter, value)?);
                }
                HeaderName::SCOPE => {
                    let value = header_str(HeaderName::Scope, value)?;

                    scope.replace(RatelimitScope::from_str(value)?);
                }
                _ => continue,
            }
        }

        if global {
            let retry_after =
                retry_after.ok_or_else(|| HeaderParsingError::missing(HeaderName::RetryAfter))?;

            return Ok(Self::GlobalLimited(GlobalLimited { retry_after, scope }));
        }

        if bucket.is_none()
            && limit.is_none()
            && remaining.is_none()
            && reset.is_none()
            && reset_after.is_none()
        {
            return Ok(Self::None);
        }

        Ok(Self::Present(Present {
            bucket: bucket.map(Into::into),
            limit: limit.ok_or_else(|| HeaderParsingError::missing(HeaderName::Limit))?,
            remaining: remaining
                .ok_or_else(|| HeaderParsingError::missing(HeaderName::Remaining))?,
            reset_at_millis: reset.ok_or_else(|| HeaderParsingError::missing(HeaderName::Reset))?,
            reset_after_millis: reset_after
                .ok_or_else(|| HeaderParsingError::missing(HeaderName::ResetAfter))?,
            retry_after,
            scope,
        }))
    }
}

fn header_bool(name: HeaderName, value: &[u8]) -> Result<bool, HeaderParsingError> {
    let text = header_str(name, value)?;

    text.parse().map_err(|source| HeaderParsingError {
        kind: HeaderParsingErrorType::Parsing {
            kind: HeaderType::Bool,
            name,
            value: text.to_owned(),
        },
        source: Some(Box::new(source)),
    })
}

fn header_float(name: HeaderName, value: &[u8]) -> Result<f64, HeaderParsingError> {
    let text = header_str(name, value)?;

    text.parse().map_err(|source| HeaderParsingError {
        kind: HeaderParsingErrorType::Parsing {
            kind: HeaderType::Float,
            name,
            value: text.to_owned(),
        },
        source: Some(Box::new(source)),
    })
}

fn header_int(name: HeaderName, value: &[u8]) -> Result<u64, HeaderParsingError> {
    let text = header_str(name, value)?;

    text.parse().map_err(|source| HeaderParsingError {
        kind: HeaderParsingErrorType::Parsing {
            kind: HeaderType::Integer,
            name,
            value: text.to_owned(),
        },
        source: Some(Box::new(source)),
    })
}

fn header_str(name: HeaderName, value: &[u8]) -> Result<&str, HeaderParsingError> {
    str::from_utf8(value).map_err(|source| HeaderParsingError::not_utf8(name, value.to_owned(), source))
}

#[cfg(test)]
mod tests {
    use super::{HeaderParsingError, HeaderParsingErrorType, HeaderType, RatelimitHeaders};
    use static_assertions::{assert_fields, assert_impl_all};
    use std::{error::Error, fmt::Debug};

    assert_fields!(HeaderParsingErrorType::Missing: name);
    assert_fields!(HeaderParsingErrorType::NotUtf8: name, value);
    assert_fields!(HeaderParsingErrorType::Parsing: kind, name, value);
    assert_impl_all!(HeaderParsingError: Error, Send, Sync);
    assert_impl_all!(HeaderType: Clone, Copy, Debug, Eq, Send, Sync);

    fn pairs<'a>(raw: &[(&'a str, &'a str)]) -> Vec<(&'a str, &'a [u8])> {
        raw.iter().map(|(k, v)| (*k, v.as_bytes())).collect()
    }

    #[test]
    fn parses_present_bucket_headers() {
        let raw = pairs(&[
            ("x-ratelimit-bucket", "abc123"),
            ("x-ratelimit-limit", "10"),
            ("x-ratelimit-remaining", "9"),
            ("x-ratelimit-reset", "1573795260.333"),
            ("x-ratelimit-reset-after", "10.000"),
        ]);

        let headers = RatelimitHeaders::from_pairs(raw.into_iter()).unwrap();

        match headers {
            RatelimitHeaders::Present(present) => {
                assert_eq!(present.bucket(), Some("abc123"));
                assert_eq!(present.remaining(), 9);
                assert_eq!(present.reset_after_millis(), 10_000);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_bucket_retry_after_on_a_429() {
        let raw = pairs(&[
            ("x-ratelimit-bucket", "abc123"),
            ("x-ratelimit-limit", "10"),
            ("x-ratelimit-remaining", "0"),
            ("x-ratelimit-reset", "1573795260.333"),
            ("x-ratelimit-reset-after", "10.000"),
            ("retry-after", "7"),
        ]);

        let headers = RatelimitHeaders::from_pairs(raw.into_iter()).unwrap();

        match headers {
            RatelimitHeaders::Present(present) => assert_eq!(present.retry_after(), Some(7)),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_global_lockout() {
        let raw = pairs(&[("retry-after", "487"), ("x-ratelimit-global", "true")]);

        let headers = RatelimitHeaders::from_pairs(raw.into_iter()).unwrap();

        match headers {
            RatelimitHeaders::GlobalLimited(global) => assert_eq!(global.retry_after(), 487),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn no_relevant_headers_is_none() {
        let raw = pairs(&[("content-type", "application/json")]);

        assert!(RatelimitHeaders::from_pairs(raw.into_iter())
            .unwrap()
            .is_none());
    }

    #[test]
    fn missing_required_field_errors() {
        let raw = pairs(&[("x-ratelimit-bucket", "abc123")]);

        let error = RatelimitHeaders::from_pairs(raw.into_iter()).unwrap_err();

        assert!(matches!(
            error.kind(),
            HeaderParsingErrorType::Missing { .. }
        ));
    }
}
