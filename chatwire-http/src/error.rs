//! The REST engine's error taxonomy.

use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
    result::Result as StdResult,
};

pub type Result<T, E = Error> = StdResult<T, E>;

/// An error encountered composing, dispatching, or interpreting a request.
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

    pub(crate) fn with_source(
        kind: ErrorType,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
        }
    }

    /// Whether retrying the same request, as-is, could plausibly succeed.
    ///
    /// Computed from `kind` rather than stored, so it always reflects the
    /// classification rules in one place.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorType::Network
                | ErrorType::Timeout
                | ErrorType::Server { .. }
                | ErrorType::RateLimited { .. }
        )
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            ErrorType::BuildingRequest => f.write_str("failed to build the request"),
            ErrorType::Json => f.write_str("request or response body could not be (de)serialized"),
            ErrorType::Network => f.write_str("the underlying connection failed"),
            ErrorType::Timeout => f.write_str("the request timed out"),
            ErrorType::RateLimited { retry_after } => {
                write!(f, "rate limited, retry after {retry_after:?}")
            }
            ErrorType::Server { status } => write!(f, "server error (status {status})"),
            ErrorType::Response { status } => write!(f, "non-retryable response (status {status})"),
            ErrorType::CircuitOpen { route } => {
                write!(f, "circuit open for route '{route}'")
            }
            ErrorType::AttemptsExhausted { attempts } => {
                write!(f, "gave up after {attempts} attempts")
            }
            ErrorType::Cancelled => f.write_str("request was cancelled before completion"),
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
    BuildingRequest,
    Json,
    Network,
    Timeout,
    RateLimited { retry_after: std::time::Duration },
    Server { status: u16 },
    Response { status: u16 },
    CircuitOpen { route: String },
    AttemptsExhausted { attempts: u32 },
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorType};
    use static_assertions::assert_impl_all;
    use std::error::Error as StdError;

    assert_impl_all!(Error: StdError, Send, Sync);

    #[test]
    fn retryable_classification() {
        assert!(Error::new(ErrorType::Network).is_retryable());
        assert!(Error::new(ErrorType::Timeout).is_retryable());
        assert!(Error::new(ErrorType::Server { status: 503 }).is_retryable());
        assert!(!Error::new(ErrorType::Response { status: 404 }).is_retryable());
        assert!(!Error::new(ErrorType::CircuitOpen {
            route: "GET /x".to_owned()
        })
        .is_retryable());
    }
}
