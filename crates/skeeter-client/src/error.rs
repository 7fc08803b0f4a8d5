//! Subscriber error types.

use thiserror::Error;

/// Subscriber errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Socket setup failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Receive failed.
    #[error("receive error: {0}")]
    Receive(String),

    /// Malformed message from the relay.
    #[error("protocol error: {0}")]
    Protocol(#[from] skeeter_proto::Error),

    /// No message within the receive timeout.
    #[error("receive timed out")]
    Timeout,
}
