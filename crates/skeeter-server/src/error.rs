//! Relay error types.

use thiserror::Error;

use crate::multiplexer::PollStatus;

/// Relay errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The database session was lost or could not be established.
    ///
    /// This is the only recoverable kind: the supervisor discards the
    /// session and reconnects after the configured delay.
    #[error("database connectivity failure: {0}")]
    Connectivity(String),

    /// The multiplexer reported an error condition on the session socket.
    #[error("error status from poll: {0:?}")]
    Poll(PollStatus),

    /// Database error other than loss of connectivity.
    #[error("database error: {0}")]
    Database(String),

    /// Publish socket error.
    #[error("bus error: {0}")]
    Bus(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] skeeter_proto::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the supervisor should reconnect rather than halt.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Connectivity(_))
    }
}
