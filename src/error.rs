//! Error codes for the networking engine
//!
//! A single code is fanned out to many subscribers (every protocol attached to
//! a stopping channel sees the same value), so the enum is cheap to clone and
//! compare. Per-connection detail beyond the code itself goes to the log.

use std::io;
use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Networking error codes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // -- Service ---------------------------------------------------------------
    #[error("service stopped")]
    ServiceStopped,
    #[error("operation failed")]
    OperationFailed,
    #[error("operation canceled")]
    OperationCanceled,
    #[error("channel stopped")]
    ChannelStopped,
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    // -- Timeouts --------------------------------------------------------------
    #[error("channel timed out")]
    ChannelTimeout,

    // -- Transport -------------------------------------------------------------
    #[error("unable to resolve {0}")]
    ResolveFailed(String),
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("accept failed: {0}")]
    AcceptFailed(String),
    #[error("listen failed: {0}")]
    ListenFailed(String),
    #[error("bad stream: {0}")]
    BadStream(String),

    // -- Protocol --------------------------------------------------------------
    #[error("invalid network magic 0x{0}")]
    InvalidMagic(String),
    #[error("payload of {size} bytes exceeds maximum of {maximum}")]
    OversizedPayload { size: usize, maximum: usize },
    #[error("invalid payload checksum")]
    InvalidChecksum,
    #[error("malformed {0} message")]
    BadMessage(String),
    #[error("unknown message command '{0}'")]
    UnknownMessage(String),
    #[error("peer version {0} below minimum {1}")]
    PeerVersionTooLow(u32, u32),
    #[error("peer advertises invalid services 0x{0:x}")]
    InvalidServices(u64),
    #[error("connection to self detected")]
    SelfConnection,
    #[error("pong nonce does not match ping")]
    PongMismatch,
    #[error("unexpected {0} message")]
    UnexpectedMessage(String),

    // -- Rejections ------------------------------------------------------------
    #[error("address already in use")]
    AddressInUse,
    #[error("address blocked")]
    AddressBlocked,
    #[error("loopback connection rejected")]
    Loopback,
    #[error("inbound connection limit reached")]
    InboundLimit,
    #[error("object not found")]
    NotFound,
    #[error("no address available")]
    AddressNotFound,

    // -- Session ---------------------------------------------------------------
    #[error("seeding unsuccessful")]
    SeedingUnsuccessful,

    // -- Storage ---------------------------------------------------------------
    #[error("file system error: {0}")]
    FileSystem(String),
}

/// Coarse classification of an [`Error`], used to pick logging level and
/// back-off policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Service,
    Timeout,
    Transport,
    Protocol,
    Rejected,
    Seeding,
    FileSystem,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ServiceStopped
            | Error::OperationFailed
            | Error::OperationCanceled
            | Error::ChannelStopped
            | Error::InvalidAddress(_) => ErrorKind::Service,
            Error::ChannelTimeout => ErrorKind::Timeout,
            Error::ResolveFailed(_)
            | Error::ConnectFailed(_)
            | Error::AcceptFailed(_)
            | Error::ListenFailed(_)
            | Error::BadStream(_) => ErrorKind::Transport,
            Error::InvalidMagic(_)
            | Error::OversizedPayload { .. }
            | Error::InvalidChecksum
            | Error::BadMessage(_)
            | Error::UnknownMessage(_)
            | Error::PeerVersionTooLow(..)
            | Error::InvalidServices(_)
            | Error::SelfConnection
            | Error::PongMismatch
            | Error::UnexpectedMessage(_) => ErrorKind::Protocol,
            Error::AddressInUse
            | Error::AddressBlocked
            | Error::Loopback
            | Error::InboundLimit
            | Error::NotFound
            | Error::AddressNotFound => ErrorKind::Rejected,
            Error::SeedingUnsuccessful => ErrorKind::Seeding,
            Error::FileSystem(_) => ErrorKind::FileSystem,
        }
    }

    /// True for the distinguished timeout code.
    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }

    /// True when the code reports an orderly shutdown rather than a failure.
    pub fn is_stop(&self) -> bool {
        matches!(self, Error::ServiceStopped | Error::ChannelStopped)
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::TimedOut => Error::ChannelTimeout,
            io::ErrorKind::UnexpectedEof => Error::BadStream("connection closed".to_string()),
            _ => Error::BadStream(error.to_string()),
        }
    }
}
