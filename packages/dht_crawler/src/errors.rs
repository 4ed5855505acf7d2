//! Error taxonomy for the engine (spec §7). Causes, not types: local
//! recovery is the norm, the only fatal conditions are socket bind failure
//! at startup and out-of-memory.

use failure::{Backtrace, Context, Fail};
use std::fmt;

#[derive(Debug, Fail)]
pub enum ErrorKind {
    #[fail(display = "transport error: {}", _0)]
    Transport(tokio_krpc::Error),

    #[fail(display = "codec error: {}", _0)]
    Codec(krpc_encoding::Error),

    #[fail(display = "routing table is empty, cannot seed a lookup")]
    TableEmpty,

    #[fail(display = "announce_peer token was invalid")]
    TokenInvalid,

    #[fail(display = "operation was cancelled")]
    Cancelled,

    #[fail(display = "bootstrap did not complete within the configured timeout")]
    BootstrapTimedOut,

    #[fail(display = "failed to persist {}: {}", what, cause)]
    PersistenceWrite { what: &'static str, cause: std::io::Error },

    #[fail(display = "failed to load {}: {}", what, cause)]
    PersistenceRead { what: &'static str, cause: String },
}

impl From<tokio_krpc::Error> for ErrorKind {
    fn from(err: tokio_krpc::Error) -> ErrorKind {
        ErrorKind::Transport(err)
    }
}

impl From<krpc_encoding::Error> for ErrorKind {
    fn from(err: krpc_encoding::Error) -> ErrorKind {
        ErrorKind::Codec(err)
    }
}

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
        Error { inner: Context::new(kind) }
    }
}

impl From<tokio_krpc::Error> for Error {
    fn from(err: tokio_krpc::Error) -> Error {
        ErrorKind::from(err).into()
    }
}

impl From<krpc_encoding::Error> for Error {
    fn from(err: krpc_encoding::Error) -> Error {
        ErrorKind::from(err).into()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
