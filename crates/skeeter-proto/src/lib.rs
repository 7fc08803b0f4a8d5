//! Skeeter wire protocol.
//!
//! The relay publishes every bus message as a *frame set*: one topic frame,
//! optionally followed by more frames, carried atomically inside a single
//! NNG message. This crate defines that envelope and the payload format of
//! the periodic heartbeat.
//!
//! # Modules
//!
//! - [`framing`] - Length-prefixed frame sets
//! - [`heartbeat`] - Heartbeat topic and payload
//! - [`error`] - Protocol error types

pub mod error;
pub mod framing;
pub mod heartbeat;

pub use error::Error;
pub use framing::{decode_frames, encode_frames, topic_prefix, FrameSet};
pub use heartbeat::{Heartbeat, HEARTBEAT_TOPIC};
