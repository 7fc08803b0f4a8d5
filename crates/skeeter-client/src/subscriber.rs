//! Blocking bus subscriber.

use bytes::Bytes;
use nng::options::protocol::pubsub::Subscribe;
use nng::options::{Options, RecvTimeout};
use nng::{Protocol, Socket};

use skeeter_proto::{decode_frames, topic_prefix, Error as ProtoError, Heartbeat, HEARTBEAT_TOPIC};

use crate::config::SubscriberConfig;
use crate::error::Error;

/// A message received from the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusMessage {
    /// A database notification.
    Notification {
        channel: String,
        payload: Option<Bytes>,
    },
    /// A relay heartbeat.
    Heartbeat(Heartbeat),
}

impl BusMessage {
    /// Decode one frame set.
    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        let frames = decode_frames(data)?;
        let topic = std::str::from_utf8(frames[0])
            .map_err(|_| ProtoError::InvalidMessage("topic is not UTF-8".to_string()))?;

        if topic == HEARTBEAT_TOPIC {
            let payload = frames
                .get(1)
                .ok_or_else(|| ProtoError::InvalidHeartbeat("missing payload".to_string()))?;
            let payload = std::str::from_utf8(payload)
                .map_err(|_| ProtoError::InvalidHeartbeat("payload is not UTF-8".to_string()))?;
            return Ok(BusMessage::Heartbeat(Heartbeat::parse(payload)?));
        }

        match frames.len() {
            1 | 2 => Ok(BusMessage::Notification {
                channel: topic.to_string(),
                payload: frames.get(1).map(|p| Bytes::copy_from_slice(p)),
            }),
            n => Err(ProtoError::InvalidMessage(format!("unexpected {} frames", n)).into()),
        }
    }
}

/// NNG `SUB` socket connected to a relay.
pub struct Subscriber {
    socket: Socket,
}

impl Subscriber {
    /// Create the socket, subscribe and start dialing the relay.
    ///
    /// Dialing continues in the background, so the relay need not be up
    /// yet. Messages published before the connection completes are lost.
    pub fn connect(config: SubscriberConfig) -> Result<Self, Error> {
        let socket = Socket::new(Protocol::Sub0)
            .map_err(|e| Error::Connection(format!("failed to create socket: {}", e)))?;

        if config.topics.is_empty() {
            socket
                .set_opt::<Subscribe>(Vec::new())
                .map_err(|e| Error::Connection(format!("failed to subscribe: {}", e)))?;
        }
        for topic in &config.topics {
            socket
                .set_opt::<Subscribe>(topic_prefix(topic))
                .map_err(|e| Error::Connection(format!("failed to subscribe to {}: {}", topic, e)))?;
        }

        socket
            .set_opt::<RecvTimeout>(config.recv_timeout)
            .map_err(|e| Error::Connection(format!("failed to set recv timeout: {}", e)))?;

        tracing::debug!(address = %config.address, topics = ?config.topics, "dialing relay");
        socket.dial_async(&config.address).map_err(|e| {
            Error::Connection(format!("failed to connect to {}: {}", config.address, e))
        })?;

        Ok(Self { socket })
    }

    /// Block until the next message arrives.
    pub fn recv(&self) -> Result<BusMessage, Error> {
        let message = self.socket.recv().map_err(|e| match e {
            nng::Error::TimedOut => Error::Timeout,
            e => Error::Receive(e.to_string()),
        })?;
        BusMessage::decode(&message[..])
    }

    /// Close the socket.
    pub fn close(self) {
        self.socket.close();
    }
}
