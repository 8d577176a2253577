//! The gateway's error taxonomy.

use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
    result::Result as StdResult,
};

pub type Result<T, E = Error> = StdResult<T, E>;

/// An error encountered driving a shard's connection.
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
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            ErrorType::Connecting => f.write_str("failed to open the websocket connection"),
            ErrorType::Sending => f.write_str("failed to send a frame over the websocket"),
            ErrorType::ParsingPayload => f.write_str("failed to parse a gateway payload"),
            ErrorType::Compression => f.write_str("failed to inflate a compressed payload"),
            ErrorType::IdentifyTimedOut => f.write_str("identify did not complete before the timeout"),
            ErrorType::ResourceExhausted { reset_after } => write!(
                f,
                "session start limit exhausted; resets in {reset_after:?}"
            ),
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
    Connecting,
    Sending,
    ParsingPayload,
    Compression,
    IdentifyTimedOut,
    ResourceExhausted { reset_after: std::time::Duration },
}
