use std::error::Error as StdError;
use std::fmt;

use crate::auth::sspi::SecurityStatus;

/// A `Result` alias where the `Err` case is `negotiate_provider::Error`.
pub type Result<T> = std::result::Result<T, Error>;

pub(crate) type BoxError = Box<dyn StdError + Send + Sync>;

/// The Errors that may occur while negotiating or talking to the platform.
///
/// Native failures carry the original status code, see [`Error::status`].
pub struct Error {
    inner: Box<Inner>,
}

struct Inner {
    kind: Kind,
    source: Option<BoxError>,
}

impl Error {
    fn new<E>(kind: Kind, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Box::new(Inner {
                kind,
                source: source.map(Into::into),
            }),
        }
    }

    /// Returns true if the client token was empty or malformed.
    pub fn is_invalid_token(&self) -> bool {
        matches!(self.inner.kind, Kind::InvalidToken)
    }

    /// Returns true if a native primitive returned a non-success status.
    pub fn is_native(&self) -> bool {
        matches!(self.inner.kind, Kind::Native(_))
    }

    /// Returns true if the local computer name could not be resolved.
    pub fn is_unresolved_host(&self) -> bool {
        matches!(self.inner.kind, Kind::UnresolvedHost)
    }

    /// Returns the native status code behind this error, if any.
    ///
    /// `InvalidToken` reports `SEC_E_INVALID_TOKEN` so callers that only look
    /// at codes see the same value the platform would have produced.
    pub fn status(&self) -> Option<SecurityStatus> {
        match self.inner.kind {
            Kind::Native(status) => Some(status),
            Kind::InvalidToken => Some(SecurityStatus::Other(SecurityStatus::SEC_E_INVALID_TOKEN)),
            _ => None,
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut builder = f.debug_struct("negotiate_provider::Error");

        builder.field("kind", &self.inner.kind);

        if let Some(ref source) = self.inner.source {
            builder.field("source", source);
        }

        builder.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.inner.kind {
            Kind::InvalidToken => f.write_str("invalid security token")?,
            Kind::Native(status) => write!(f, "native security call failed: {}", status)?,
            Kind::UnresolvedHost => f.write_str("unable to resolve local computer name")?,
            Kind::Runtime => f.write_str("blocking negotiation task did not complete")?,
        }

        if let Some(ref source) = self.inner.source {
            write!(f, ": {}", source)?;
        }

        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source.as_ref().map(|e| &**e as _)
    }
}

#[derive(Debug)]
pub(crate) enum Kind {
    InvalidToken,
    Native(SecurityStatus),
    UnresolvedHost,
    Runtime,
}

// constructors

pub(crate) fn invalid_token() -> Error {
    Error::new(Kind::InvalidToken, None::<Error>)
}

pub(crate) fn malformed_token<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::InvalidToken, Some(e))
}

pub(crate) fn native(status: SecurityStatus) -> Error {
    Error::new(Kind::Native(status), None::<Error>)
}

pub(crate) fn unresolved_host(status: SecurityStatus) -> Error {
    Error::new(Kind::UnresolvedHost, Some(native(status)))
}

pub(crate) fn runtime<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::Runtime, Some(e))
}
