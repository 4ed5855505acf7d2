use failure::{Backtrace, Context, Fail};
use std::fmt;
use std::net::SocketAddr;

#[derive(Debug, Fail)]
pub enum ErrorKind {
    #[fail(display = "failed to bind UDP socket on {}: {}", addr, cause)]
    BindError { addr: SocketAddr, cause: std::io::Error },

    #[fail(display = "failed to send to {}: {}", to, cause)]
    SendError { to: SocketAddr, cause: std::io::Error },

    #[fail(display = "transaction table is at capacity ({} active)", capacity)]
    CapacityExceeded { capacity: usize },

    #[fail(display = "transaction {:?} timed out", transaction_id)]
    Timeout { transaction_id: Vec<u8> },

    #[fail(display = "no transaction matches id {:?}", transaction_id)]
    TransactionNotFound { transaction_id: Vec<u8> },

    #[fail(display = "remote returned an error: {}", _0)]
    RemoteError(krpc_encoding::KRPCError),

    #[fail(display = "codec error: {}", _0)]
    Codec(krpc_encoding::Error),

    #[fail(display = "operation was cancelled")]
    Cancelled,

    #[fail(display = "transaction outcome carried an unexpected message shape")]
    UnexpectedOutcome,
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

impl From<krpc_encoding::Error> for Error {
    fn from(err: krpc_encoding::Error) -> Error {
        ErrorKind::from(err).into()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
