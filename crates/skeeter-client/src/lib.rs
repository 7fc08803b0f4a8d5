//! Skeeter Client - subscriber library for the Skeeter relay.
//!
//! # Quick Start
//!
//! ```ignore
//! use skeeter_client::{BusMessage, Subscriber, SubscriberConfig};
//!
//! let config = SubscriberConfig::new("tcp://127.0.0.1:5555")
//!     .with_topic("orders")
//!     .with_heartbeats();
//! let subscriber = Subscriber::connect(config)?;
//!
//! loop {
//!     match subscriber.recv()? {
//!         BusMessage::Notification { channel, payload } => {
//!             println!("{channel}: {payload:?}");
//!         }
//!         BusMessage::Heartbeat(heartbeat) => {
//!             println!("relay alive, sequence {}", heartbeat.sequence);
//!         }
//!     }
//! }
//! ```

pub mod config;
pub mod error;
pub mod subscriber;

pub use config::SubscriberConfig;
pub use error::Error;
pub use subscriber::{BusMessage, Subscriber};

/// Re-export protocol types.
pub use skeeter_proto as proto;
