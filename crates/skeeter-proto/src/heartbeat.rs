//! Heartbeat topic and payload.
//!
//! The payload is ASCII text of the form
//! `sequence=<n>,database_connect=<timestamp>`, where the timestamp is the
//! wall-clock time the current database session was established, in
//! fractional Unix seconds, or `None` while no session is established.

use crate::Error;

/// Topic frame of every heartbeat message.
pub const HEARTBEAT_TOPIC: &str = "heartbeat";

/// Rendering of an absent connection timestamp.
pub const NO_CONNECTION: &str = "None";

/// A decoded heartbeat payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    /// Strictly increasing sequence number, starting at 1.
    pub sequence: u64,
    /// Connection timestamp as published, if connected.
    pub database_connect: Option<String>,
}

impl Heartbeat {
    /// Create a heartbeat payload.
    pub fn new(sequence: u64, database_connect: Option<String>) -> Self {
        Self {
            sequence,
            database_connect,
        }
    }

    /// Render the payload frame.
    pub fn to_payload(&self) -> String {
        format!(
            "sequence={},database_connect={}",
            self.sequence,
            self.database_connect.as_deref().unwrap_or(NO_CONNECTION)
        )
    }

    /// Parse a payload frame.
    pub fn parse(payload: &str) -> Result<Self, Error> {
        let (sequence, connect) = payload
            .split_once(',')
            .ok_or_else(|| Error::InvalidHeartbeat(payload.to_string()))?;

        let sequence = sequence
            .strip_prefix("sequence=")
            .and_then(|value| value.parse::<u64>().ok())
            .ok_or_else(|| Error::InvalidHeartbeat(format!("bad sequence in {payload:?}")))?;

        let connect = connect
            .strip_prefix("database_connect=")
            .ok_or_else(|| Error::InvalidHeartbeat(format!("bad timestamp in {payload:?}")))?;

        let database_connect = if connect == NO_CONNECTION {
            None
        } else {
            Some(connect.to_string())
        };

        Ok(Self {
            sequence,
            database_connect,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_without_connection() {
        let heartbeat = Heartbeat::new(1, None);
        assert_eq!(heartbeat.to_payload(), "sequence=1,database_connect=None");
    }

    #[test]
    fn test_payload_with_connection() {
        let heartbeat = Heartbeat::new(7, Some("1700000000.250000".to_string()));
        assert_eq!(
            heartbeat.to_payload(),
            "sequence=7,database_connect=1700000000.250000"
        );
    }

    #[test]
    fn test_parse() {
        let parsed = Heartbeat::parse("sequence=12,database_connect=1700000000.5").unwrap();
        assert_eq!(parsed.sequence, 12);
        assert_eq!(parsed.database_connect.as_deref(), Some("1700000000.5"));

        let parsed = Heartbeat::parse("sequence=3,database_connect=None").unwrap();
        assert_eq!(parsed, Heartbeat::new(3, None));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Heartbeat::parse("hello").is_err());
        assert!(Heartbeat::parse("sequence=x,database_connect=None").is_err());
        assert!(Heartbeat::parse("sequence=1,connect=None").is_err());
    }
}
