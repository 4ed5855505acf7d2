use failure::{Backtrace, Context, Fail};
use std::fmt;

/// Error kinds for the `krpc_encoding` crate, matching §7 of the spec:
/// decode failures never panic and never produce a partially constructed
/// message.
#[derive(Debug, Fail)]
pub enum ErrorKind {
    #[fail(display = "failed to decode bencode message: {}", cause)]
    DecodeError { cause: serde_bencode::Error },

    #[fail(display = "failed to encode bencode message: {}", cause)]
    EncodeError { cause: serde_bencode::Error },

    #[fail(display = "compact record had invalid length: expected {}, got {}", expected, got)]
    BadCompactLength { expected: usize, got: usize },

    #[fail(display = "response shape did not match expected method {:?}", method)]
    ResponseShapeMismatch { method: Method },

    #[fail(display = "message carried no node id")]
    MissingNodeId,

    #[fail(display = "expected a response envelope (y=\"r\"), got y={:?}", y)]
    NotAResponse { y: String },
}

use crate::messages::Method;

#[derive(Debug)]
pub struct Error {
    inner: Context<ErrorKind>,
}

impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.inner.backtrace()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.inner.get_context()
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error {
            inner: Context::new(kind),
        }
    }
}

impl From<Context<ErrorKind>> for Error {
    fn from(inner: Context<ErrorKind>) -> Error {
        Error { inner }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
