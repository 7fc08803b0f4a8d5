//! Subscriber configuration.

use std::time::Duration;

use skeeter_proto::HEARTBEAT_TOPIC;

/// Default relay address.
pub const DEFAULT_ADDRESS: &str = "tcp://127.0.0.1:5555";

/// Subscriber configuration.
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Relay publish address (e.g., "tcp://127.0.0.1:5555" or "ipc:///tmp/skeeter.sock").
    pub address: String,

    /// Topics to receive. Empty receives everything.
    pub topics: Vec<String>,

    /// How long `recv` blocks before reporting a timeout. `None` blocks
    /// indefinitely.
    pub recv_timeout: Option<Duration>,
}

impl SubscriberConfig {
    /// Create a configuration for the given relay address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            topics: Vec::new(),
            recv_timeout: None,
        }
    }

    /// Add a notification channel to receive.
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topics.push(topic.into());
        self
    }

    /// Also receive relay heartbeats.
    pub fn with_heartbeats(self) -> Self {
        self.with_topic(HEARTBEAT_TOPIC)
    }

    /// Set the receive timeout.
    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = Some(timeout);
        self
    }
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ADDRESS)
    }
}
