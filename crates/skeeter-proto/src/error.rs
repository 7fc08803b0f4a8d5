//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A frame set had no frames.
    #[error("empty frame set")]
    EmptyFrameSet,

    /// A single frame is larger than the protocol allows.
    #[error("frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Invalid message format.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Invalid heartbeat payload.
    #[error("invalid heartbeat: {0}")]
    InvalidHeartbeat(String),
}
