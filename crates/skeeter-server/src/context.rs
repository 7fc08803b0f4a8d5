//! Resources owned by one relay process.

use std::time::Instant;

use crate::config::RelayConfig;
use crate::halt::HaltFlag;
use crate::heartbeat::HeartbeatEmitter;

/// Everything the relay loop reads or mutates, constructed once at
/// startup and passed by reference to each component.
pub struct RelayContext<S, P, M> {
    /// Settings, fixed for the life of the process.
    pub config: RelayConfig,
    /// Current database session. Replaced wholesale on reconnect.
    pub session: S,
    /// Bus endpoint.
    pub publisher: P,
    /// Readiness waits on the session socket.
    pub multiplexer: M,
    /// Liveness state.
    pub heartbeat: HeartbeatEmitter,
    /// Stop request shared with signal handlers.
    pub halt: HaltFlag,
}

impl<S, P, M> RelayContext<S, P, M> {
    pub fn new(
        config: RelayConfig,
        session: S,
        publisher: P,
        multiplexer: M,
        halt: HaltFlag,
    ) -> Self {
        let heartbeat = HeartbeatEmitter::new(config.heartbeat_interval, Instant::now());
        Self {
            config,
            session,
            publisher,
            multiplexer,
            heartbeat,
            halt,
        }
    }
}
