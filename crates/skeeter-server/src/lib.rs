//! Skeeter relay library.
//!
//! Listens on PostgreSQL notification channels and republishes every
//! notification on an NNG publish socket, alongside periodic heartbeats.

pub mod bus;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod forwarder;
pub mod halt;
pub mod heartbeat;
pub mod multiplexer;
pub mod session;
pub mod signals;
pub mod supervisor;

pub use bus::{NngPublisher, Publisher};
pub use config::{Args, RelayConfig};
pub use connection::{ConnectionManager, Phase};
pub use context::RelayContext;
pub use error::Error;
pub use forwarder::NotificationForwarder;
pub use halt::HaltFlag;
pub use heartbeat::HeartbeatEmitter;
pub use multiplexer::{Interest, Multiplexer, PollMultiplexer, PollStatus, Wake};
pub use session::{NotificationEvent, PgSession, Readiness, Session};
pub use signals::SignalHandlers;
pub use supervisor::{ExitStatus, SessionFactory, Supervisor};
