//! Publish side of the bus.
//!
//! Frames sent with `more` set are held back until the final frame of the
//! set arrives; the whole set then leaves as one NNG message, so no
//! subscriber can observe a partial set.

use std::thread;
use std::time::{Duration, Instant};

use nng::options::Options;
use nng::{Message, Protocol, Socket};

use skeeter_proto::FrameSet;

use crate::config::RelayConfig;
use crate::error::Error;

/// A publish-only bus endpoint.
pub trait Publisher {
    /// Queue one frame; `more` marks that further frames of the same
    /// message follow.
    fn send(&mut self, frame: &[u8], more: bool) -> Result<(), Error>;

    /// Close the endpoint, allowing up to `linger` for queued messages to
    /// leave.
    fn close(&mut self, linger: Duration) -> Result<(), Error>;
}

/// NNG `PUB` socket bound to the configured address.
pub struct NngPublisher {
    socket: Socket,
    pending: FrameSet,
    last_send: Option<Instant>,
    messages_sent: u64,
    closed: bool,
}

impl NngPublisher {
    /// Create the socket, apply the high-water-mark and bind.
    pub fn bind(config: &RelayConfig) -> Result<Self, Error> {
        let socket = Socket::new(Protocol::Pub0)
            .map_err(|e| Error::Bus(format!("failed to create socket: {}", e)))?;

        if let Some(hwm) = config.hwm {
            tracing::info!(hwm, "setting pub socket high-water-mark");
            let depth = i32::try_from(hwm)
                .map_err(|_| Error::Config(format!("hwm {} is too large", hwm)))?;
            socket
                .set_opt::<nng::options::SendBufferSize>(depth)
                .map_err(|e| Error::Bus(format!("failed to set high-water-mark: {}", e)))?;
        }

        tracing::info!(address = %config.pub_socket_uri, "binding pub socket");
        socket.listen(&config.pub_socket_uri).map_err(|e| {
            Error::Bus(format!(
                "failed to listen on {}: {}",
                config.pub_socket_uri, e
            ))
        })?;

        Ok(Self {
            socket,
            pending: FrameSet::new(),
            last_send: None,
            messages_sent: 0,
            closed: false,
        })
    }

    /// Number of complete messages published.
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }
}

impl Publisher for NngPublisher {
    fn send(&mut self, frame: &[u8], more: bool) -> Result<(), Error> {
        if self.closed {
            return Err(Error::Bus("publish socket is closed".to_string()));
        }

        if let Err(e) = self.pending.push(frame) {
            self.pending.clear();
            return Err(e.into());
        }
        if more {
            return Ok(());
        }

        let encoded = self.pending.finish()?;
        self.socket
            .send(Message::from(&encoded[..]))
            .map_err(|(_, e)| Error::Bus(format!("failed to publish: {}", e)))?;

        self.last_send = Some(Instant::now());
        self.messages_sent += 1;
        Ok(())
    }

    fn close(&mut self, linger: Duration) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if !self.pending.is_empty() {
            tracing::warn!(
                frames = self.pending.len(),
                "discarding incomplete message on close"
            );
            self.pending.clear();
        }

        // NNG has no linger of its own; hold the socket open until the most
        // recent message has had `linger` to drain.
        if let Some(last_send) = self.last_send {
            let remaining = (last_send + linger).saturating_duration_since(Instant::now());
            if !remaining.is_zero() {
                tracing::debug!(
                    linger_ms = remaining.as_millis() as u64,
                    "waiting for pub socket to flush"
                );
                thread::sleep(remaining);
            }
        }

        tracing::info!(messages_sent = self.messages_sent, "closing pub socket");
        self.socket.close();
        Ok(())
    }
}
