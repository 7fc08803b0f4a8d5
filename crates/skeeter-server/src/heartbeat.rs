//! Periodic liveness messages.
//!
//! There is no timer thread. Every wait loop in the relay calls
//! [`HeartbeatEmitter::check_and_maybe_emit`] on each wake, and the emitter
//! compares the monotonic clock against its deadline.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use skeeter_proto::{Heartbeat, HEARTBEAT_TOPIC};

use crate::bus::Publisher;
use crate::error::Error;

/// Heartbeat state and emission.
#[derive(Debug)]
pub struct HeartbeatEmitter {
    interval: Duration,
    sequence: u64,
    last_emission: Instant,
    connected_at: Option<DateTime<Utc>>,
}

impl HeartbeatEmitter {
    /// Create an emitter whose first heartbeat is due one interval after
    /// `now`.
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            sequence: 0,
            last_emission: now,
            connected_at: None,
        }
    }

    /// Sequence number of the last heartbeat sent (0 before the first).
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// When the current database session was established.
    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        self.connected_at
    }

    /// Record that a database session was established.
    pub fn mark_connected(&mut self, at: DateTime<Utc>) {
        self.connected_at = Some(at);
    }

    /// Record that the database session was lost.
    pub fn mark_disconnected(&mut self) {
        self.connected_at = None;
    }

    /// Time left until the next heartbeat is due.
    pub fn time_until_due(&self, now: Instant) -> Duration {
        (self.last_emission + self.interval).saturating_duration_since(now)
    }

    /// Emit a heartbeat if one is due. Returns whether one was sent.
    pub fn check_and_maybe_emit<P: Publisher>(
        &mut self,
        now: Instant,
        publisher: &mut P,
    ) -> Result<bool, Error> {
        if now.saturating_duration_since(self.last_emission) < self.interval {
            return Ok(false);
        }

        self.sequence += 1;
        let payload =
            Heartbeat::new(self.sequence, self.connected_at.map(format_timestamp)).to_payload();
        tracing::debug!(%payload, "sending heartbeat");

        publisher.send(HEARTBEAT_TOPIC.as_bytes(), true)?;
        publisher.send(payload.as_bytes(), false)?;
        self.last_emission = now;
        Ok(true)
    }
}

/// Fractional Unix seconds with microsecond precision.
fn format_timestamp(at: DateTime<Utc>) -> String {
    format!("{}.{:06}", at.timestamp(), at.timestamp_subsec_micros())
}
