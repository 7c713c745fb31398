use std::{fmt, result};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Well-known error ids of the v23 runtime.
pub mod ids {
    pub const UNKNOWN: &str = "v.io/v23/verror.Unknown";
    pub const INTERNAL: &str = "v.io/v23/verror.Internal";
    pub const NOT_IMPLEMENTED: &str = "v.io/v23/verror.NotImplemented";
    pub const BAD_ARG: &str = "v.io/v23/verror.BadArg";
    pub const BAD_STATE: &str = "v.io/v23/verror.BadState";
    pub const NO_EXIST: &str = "v.io/v23/verror.NoExist";
    pub const NO_ACCESS: &str = "v.io/v23/verror.NoAccess";
    pub const CANCELED: &str = "v.io/v23/verror.Canceled";
    pub const TIMEOUT: &str = "v.io/v23/verror.Timeout";
}

/// An error produced by the native runtime, carrying its machine-readable id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VError {
    pub id: String,
    pub message: String,
}

impl VError {
    pub fn new<I: Into<String>, M: Into<String>>(id: I, message: M) -> Self {
        VError {
            id: id.into(),
            message: message.into(),
        }
    }

    pub fn unknown<M: Into<String>>(message: M) -> Self {
        Self::new(ids::UNKNOWN, message)
    }

    pub fn canceled() -> Self {
        Self::new(ids::CANCELED, "context canceled")
    }

    pub fn timeout() -> Self {
        Self::new(ids::TIMEOUT, "context deadline exceeded")
    }

    pub fn no_exist<M: Into<String>>(message: M) -> Self {
        Self::new(ids::NO_EXIST, message)
    }

    pub fn no_access<M: Into<String>>(message: M) -> Self {
        Self::new(ids::NO_ACCESS, message)
    }

    pub fn bad_state<M: Into<String>>(message: M) -> Self {
        Self::new(ids::BAD_STATE, message)
    }

    pub fn is(&self, id: &str) -> bool {
        self.id == id
    }
}

impl fmt::Display for VError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.id.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.id, self.message)
        }
    }
}

impl std::error::Error for VError {}

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Native(VError),
    #[error("end of stream")]
    EndOfStream,
    #[error("{0} is not initialized")]
    NotInitialized(&'static str),
    #[error("{0} is already initialized")]
    AlreadyInitialized(&'static str),
    #[error("invalid handle: {0}")]
    InvalidHandle(u64),
    #[error("handle {handle} does not hold a {expected}")]
    TypeMismatch { handle: u64, expected: &'static str },
    #[error("class not found: {0}")]
    MissingClass(String),
    #[error("method not found: {class}.{name}{sig}")]
    MissingMethod {
        class: String,
        name: String,
        sig: String,
    },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "jni-bridge")]
    #[error("jni error: {0}")]
    Jni(#[from] jni::errors::Error),
}

pub type Result<T> = result::Result<T, Error>;

impl From<VError> for Error {
    fn from(value: VError) -> Self {
        Error::Native(value)
    }
}

/// What the embedding side should raise for an [`Error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exception {
    /// A native runtime error; the id survives the crossing.
    VException { id: String, message: String },
    /// Normal completion of a stream.
    EndOfStream,
    /// A bridge-internal failure.
    Generic(String),
}

impl Error {
    pub fn config<T: fmt::Display>(inner: T) -> Self {
        Self::Config(inner.to_string())
    }
    pub fn runtime<T: fmt::Display>(inner: T) -> Self {
        Self::Runtime(inner.to_string())
    }
    pub fn invalid_argument<T: fmt::Display>(inner: T) -> Self {
        Self::InvalidArgument(inner.to_string())
    }

    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Error::EndOfStream)
    }

    /// The native error behind this error, if any.
    pub fn verror(&self) -> Option<&VError> {
        match self {
            Error::Native(e) => Some(e),
            _ => None,
        }
    }

    pub fn exception(&self) -> Exception {
        match self {
            Error::Native(e) => Exception::VException {
                id: e.id.clone(),
                message: e.message.clone(),
            },
            Error::EndOfStream => Exception::EndOfStream,
            other => Exception::Generic(other.to_string()),
        }
    }

    /// Collapses any error into a native error, for reporting back into the
    /// runtime from an inbound adapter.
    pub fn into_verror(self) -> VError {
        match self {
            Error::Native(e) => e,
            Error::EndOfStream => VError::new(ids::UNKNOWN, "end of stream"),
            Error::InvalidArgument(msg) => VError::new(ids::BAD_ARG, msg),
            other => VError::new(ids::INTERNAL, other.to_string()),
        }
    }
}
