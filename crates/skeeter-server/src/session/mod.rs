//! Database session abstraction.
//!
//! The relay never blocks inside the database client. A [`Session`] is
//! polled for its [`Readiness`]; while it needs I/O, the caller waits on
//! [`Session::descriptor`] with the multiplexer and polls again.

mod postgres;

use std::borrow::Cow;
use std::os::fd::BorrowedFd;

use bytes::Bytes;

use crate::error::Error;
use crate::multiplexer::Interest;

pub use postgres::{PgSession, PgStream};

/// Statement that ends the subscription phase.
pub const COMMIT_COMMAND: &str = "COMMIT";

/// Low-level I/O state of a non-blocking session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Waiting for the socket to become readable.
    NeedsRead,
    /// Waiting for the socket to become writable.
    NeedsWrite,
    /// No I/O outstanding; the next command may be issued.
    Ready,
}

impl Readiness {
    /// The multiplexer interest implied by this state, if any.
    pub fn interest(self) -> Option<Interest> {
        match self {
            Readiness::NeedsRead => Some(Interest::Read),
            Readiness::NeedsWrite => Some(Interest::Write),
            Readiness::Ready => None,
        }
    }
}

/// One asynchronous notification received from the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    /// Channel the notification was raised on.
    pub channel: String,
    /// Payload, if the notifier supplied one.
    pub payload: Option<Bytes>,
    /// Backend process that raised it, when known.
    pub process_id: Option<i32>,
}

impl NotificationEvent {
    /// Create an event with a payload.
    pub fn new(channel: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            channel: channel.into(),
            payload: Some(payload.into()),
            process_id: None,
        }
    }

    /// Create an event without a payload.
    pub fn without_payload(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: None,
            process_id: None,
        }
    }

    /// Payload size in bytes (0 when absent).
    pub fn payload_len(&self) -> usize {
        self.payload.as_ref().map(Bytes::len).unwrap_or(0)
    }
}

/// A non-blocking database session.
pub trait Session {
    /// Advance any outstanding I/O and report what the session waits for.
    fn poll(&mut self) -> Result<Readiness, Error>;

    /// Socket to wait on, once one exists.
    fn descriptor(&self) -> Option<BorrowedFd<'_>>;

    /// Issue a command. Completion is observed through later `poll` calls.
    fn execute(&mut self, sql: &str) -> Result<(), Error>;

    /// Number of buffered notifications.
    fn pending_notifications(&self) -> usize;

    /// Remove the oldest buffered notification.
    fn pop_notification(&mut self) -> Option<NotificationEvent>;

    /// Close the session. Later calls fail with a connectivity error.
    fn close(&mut self) -> Result<(), Error>;
}

/// `LISTEN` statement for a channel, with the channel as an identifier.
pub fn listen_command(channel: &str) -> String {
    format!("LISTEN {}", quote_identifier(channel))
}

/// Render `name` as an SQL identifier.
///
/// Plain identifiers are left bare, so PostgreSQL folds them to lower case
/// exactly as it does for an unquoted `NOTIFY`. Anything else is quoted.
pub fn quote_identifier(name: &str) -> Cow<'_, str> {
    let mut chars = name.chars();
    let plain = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        }
        None => false,
    };

    if plain {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("\"{}\"", name.replace('"', "\"\"")))
    }
}

/// Whether an SQLSTATE code means the session is unusable but a new one may
/// succeed: connection exceptions, authorization failures, resource
/// exhaustion, and operator/crash shutdowns.
pub fn is_connectivity_state(code: &str) -> bool {
    code.starts_with("08")
        || code.starts_with("28")
        || code.starts_with("53")
        || matches!(code, "57P01" | "57P02" | "57P03")
}
