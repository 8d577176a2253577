//! The facade's error taxonomy (§7): wraps each subsystem's own `{kind,
//! source}` error as a source rather than redefining their kinds, so
//! application code can match on one type while internals stay narrowly
//! scoped.

use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
    result::Result as StdResult,
};

pub type Result<T, E = Error> = StdResult<T, E>;

/// How serious an error is, independent of whether it's retryable.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// An error encountered constructing or running a client.
#[derive(Debug)]
pub struct Error {
    kind: ErrorType,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    #[must_use = "retrieving the type has no effect if left unused"]
    pub const fn kind(&self) -> &ErrorType {
        &self.kind
    }

    #[must_use = "consuming the error into its parts has no effect if left unused"]
    pub fn into_parts(self) -> (ErrorType, Option<Box<dyn StdError + Send + Sync>>) {
        (self.kind, self.source)
    }

    pub(crate) fn new(kind: ErrorType) -> Self {
        Self { kind, source: None }
    }

    pub(crate) fn with_source(kind: ErrorType, source: impl StdError + Send + Sync + 'static) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
        }
    }

    /// Severity, computed from `kind` rather than stored (§7): it is
    /// entirely a function of the kind, and storing it separately would
    /// let the two drift out of sync.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self.kind {
            ErrorType::Configuration { .. } => Severity::Low,
            ErrorType::Gateway | ErrorType::Rest => Severity::High,
            ErrorType::SessionStartLimitExhausted { .. } => Severity::High,
            ErrorType::ShutdownTimedOut => Severity::Medium,
        }
    }

    /// Whether constructing or reconnecting again, as-is, could plausibly
    /// succeed. Computed, not stored, for the same reason as `severity`.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorType::SessionStartLimitExhausted { .. })
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            ErrorType::Configuration { message } => write!(f, "invalid configuration: {message}"),
            ErrorType::Gateway => f.write_str("the gateway fleet failed"),
            ErrorType::Rest => f.write_str("the REST bootstrap request failed"),
            ErrorType::SessionStartLimitExhausted { reset_after } => write!(
                f,
                "session start limit exhausted; resets in {reset_after:?}"
            ),
            ErrorType::ShutdownTimedOut => f.write_str("shutdown did not finish draining within its timeout"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn StdError + 'static))
    }
}

/// Type of [`Error`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum ErrorType {
    /// A builder was missing a required field, or given an invalid value.
    Configuration { message: String },
    /// The shard fleet could not be brought up; see the wrapped source.
    Gateway,
    /// The gateway bootstrap request (`GET /gateway/bot`) failed; see the
    /// wrapped source.
    Rest,
    /// Not enough session starts remain to bring up the requested shards.
    SessionStartLimitExhausted { reset_after: std::time::Duration },
    /// `shutdown()`'s drain timeout elapsed before every shard finished.
    ShutdownTimedOut,
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorType, Severity};
    use static_assertions::assert_impl_all;
    use std::error::Error as StdError;
    use std::time::Duration;

    assert_impl_all!(Error: StdError, Send, Sync);

    #[test]
    fn configuration_errors_are_low_severity_and_not_retryable() {
        let error = Error::new(ErrorType::Configuration {
            message: "token is required".to_owned(),
        });

        assert_eq!(error.severity(), Severity::Low);
        assert!(!error.is_retryable());
    }

    #[test]
    fn session_start_limit_exhaustion_is_retryable() {
        let error = Error::new(ErrorType::SessionStartLimitExhausted {
            reset_after: Duration::from_secs(3600),
        });

        assert!(error.is_retryable());
        assert_eq!(error.severity(), Severity::High);
    }
}
