//! Common error types for InvisiLock.

use thiserror::Error;

/// Message shown for every authentication or integrity failure.
///
/// Tag mismatches and truncated streams deliberately share this text so a
/// caller cannot tell which check rejected the input.
pub const AUTHENTICATION_FAILED: &str = "wrong password or corrupted data";

/// Top-level error type for InvisiLock operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid input provided (empty password, empty payload, bad parameters).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Container is structurally malformed.
    #[error("Malformed container: {0}")]
    Format(String),

    /// Container was produced by an incompatible format version or algorithm.
    #[error("Unsupported container: {0}")]
    UnsupportedVersion(String),

    /// Tag mismatch or truncated stream.
    #[error("Decryption failed: wrong password or corrupted data")]
    Authentication,

    /// Key derivation would need more memory than allowed or available.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Cryptographic primitive failed for a reason other than authentication.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Operation was stopped before completion.
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

/// Coarse classification of an [`Error`], stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    InvalidInput,
    Format,
    UnsupportedVersion,
    Authentication,
    ResourceExhausted,
    Internal,
    Io,
    Cancelled,
}

impl ErrorKind {
    /// Process exit code used by command-line callers.
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::Internal => 1,
            ErrorKind::InvalidInput => 2,
            ErrorKind::Format => 3,
            ErrorKind::UnsupportedVersion => 4,
            ErrorKind::Authentication => 5,
            ErrorKind::ResourceExhausted => 6,
            ErrorKind::Io => 7,
            ErrorKind::Cancelled => 8,
        }
    }
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::Format(_) => ErrorKind::Format,
            Error::UnsupportedVersion(_) => ErrorKind::UnsupportedVersion,
            Error::Authentication => ErrorKind::Authentication,
            Error::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Error::Crypto(_) | Error::Serialization(_) => ErrorKind::Internal,
            Error::Io(_) => ErrorKind::Io,
            Error::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    /// Shorthand for `self.kind().exit_code()`.
    pub fn exit_code(&self) -> u8 {
        self.kind().exit_code()
    }

    /// Whether this error means the input failed authentication.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Error::Authentication)
    }

    /// Recover a typed error that was carried through `std::io::Error`.
    ///
    /// `Read` adapters wrap library errors with [`std::io::Error::other`];
    /// this undoes that wrapping so callers see the original variant.
    pub fn from_io(err: std::io::Error) -> Self {
        if err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            match err.into_inner().map(|inner| inner.downcast::<Error>()) {
                Some(Ok(inner)) => *inner,
                Some(Err(other)) => Error::Io(std::io::Error::other(other)),
                None => Error::Io(std::io::Error::other("unknown I/O failure")),
            }
        } else {
            Error::Io(err)
        }
    }
}

impl Clone for Error {
    /// `Io` errors are rebuilt from their kind and message.
    fn clone(&self) -> Self {
        match self {
            Error::InvalidInput(msg) => Error::InvalidInput(msg.clone()),
            Error::Format(msg) => Error::Format(msg.clone()),
            Error::UnsupportedVersion(msg) => Error::UnsupportedVersion(msg.clone()),
            Error::Authentication => Error::Authentication,
            Error::ResourceExhausted(msg) => Error::ResourceExhausted(msg.clone()),
            Error::Crypto(msg) => Error::Crypto(msg.clone()),
            Error::Io(err) => Error::Io(std::io::Error::new(err.kind(), err.to_string())),
            Error::Serialization(msg) => Error::Serialization(msg.clone()),
            Error::Cancelled(msg) => Error::Cancelled(msg.clone()),
        }
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
