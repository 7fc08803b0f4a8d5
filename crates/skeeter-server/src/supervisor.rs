//! Top-level relay loop: error classification, reconnects and shutdown.

use std::time::{Duration, Instant};

use crate::bus::Publisher;
use crate::config::RelayConfig;
use crate::connection::{ConnectionManager, Phase};
use crate::context::RelayContext;
use crate::error::Error;
use crate::halt::HaltFlag;
use crate::multiplexer::Multiplexer;
use crate::session::Session;

/// Opens database sessions, once at startup and again after every
/// connectivity failure.
pub trait SessionFactory {
    type Session: Session;

    fn open(&mut self, config: &RelayConfig) -> Result<Self::Session, Error>;
}

impl<S, F> SessionFactory for F
where
    S: Session,
    F: FnMut(&RelayConfig) -> Result<S, Error>,
{
    type Session = S;

    fn open(&mut self, config: &RelayConfig) -> Result<S, Error> {
        self(config)
    }
}

/// How the relay ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Halted on request.
    Success,
    /// Stopped by a fatal error.
    Failure,
}

impl ExitStatus {
    /// Process exit code.
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Failure => 1,
        }
    }
}

impl From<ExitStatus> for std::process::ExitCode {
    fn from(status: ExitStatus) -> Self {
        std::process::ExitCode::from(status.code())
    }
}

/// Runs the relay until halted or until a fatal error.
pub struct Supervisor<F: SessionFactory, P, M> {
    ctx: RelayContext<F::Session, P, M>,
    factory: F,
    manager: ConnectionManager,
}

impl<F, P, M> Supervisor<F, P, M>
where
    F: SessionFactory,
    P: Publisher,
    M: Multiplexer,
{
    /// Open the first session and assemble the relay.
    pub fn new(
        config: RelayConfig,
        mut factory: F,
        publisher: P,
        multiplexer: M,
        halt: HaltFlag,
    ) -> Result<Self, Error> {
        let session = factory.open(&config)?;
        let manager = ConnectionManager::new(config.notify_check_interval);
        Ok(Self {
            ctx: RelayContext::new(config, session, publisher, multiplexer, halt),
            factory,
            manager,
        })
    }

    /// Shared relay state.
    pub fn context(&self) -> &RelayContext<F::Session, P, M> {
        &self.ctx
    }

    /// Current phase of the active session.
    pub fn phase(&self) -> Phase {
        self.manager.phase()
    }

    /// Run until halted or a fatal error, then release the session and the
    /// publish socket.
    pub fn run(mut self) -> ExitStatus {
        tracing::info!(
            channels = ?self.ctx.config.channels,
            "relaying notifications"
        );

        let status = self.run_loop();
        self.shutdown(status);
        status
    }

    fn run_loop(&mut self) -> ExitStatus {
        while !self.ctx.halt.is_set() {
            let err = match self.manager.step(&mut self.ctx) {
                Ok(()) => continue,
                Err(err) => err,
            };

            if !err.is_recoverable() {
                tracing::error!(error = ?err, phase = ?self.manager.phase(), "fatal error");
                self.ctx.halt.set();
                return ExitStatus::Failure;
            }

            tracing::warn!(error = %err, phase = ?self.manager.phase(), "lost database connection");
            if let Err(err) = self.reconnect() {
                tracing::error!(error = ?err, "cannot reopen database session");
                self.ctx.halt.set();
                return ExitStatus::Failure;
            }
        }

        tracing::info!("halt requested");
        ExitStatus::Success
    }

    /// Drop the current session, open a fresh one and wait out the retry
    /// delay before it is first polled. The wait ends early on halt and
    /// keeps heartbeats on schedule.
    fn reconnect(&mut self) -> Result<(), Error> {
        if let Err(err) = self.ctx.session.close() {
            tracing::debug!(error = %err, "error closing failed session");
        }
        self.ctx.heartbeat.mark_disconnected();
        self.manager.reset();

        let delay = self.ctx.config.database_retry_delay;
        loop {
            let opened = match self.factory.open(&self.ctx.config) {
                Ok(session) => {
                    drop(std::mem::replace(&mut self.ctx.session, session));
                    true
                }
                Err(err) if err.is_recoverable() => {
                    tracing::warn!(error = %err, "database session unavailable");
                    false
                }
                Err(err) => return Err(err),
            };

            tracing::info!(delay_secs = delay.as_secs_f64(), "reconnecting after delay");
            if self.retry_wait(delay)? || opened {
                return Ok(());
            }
        }
    }

    /// Sleep for `delay`, sending heartbeats as they fall due. Returns
    /// whether a halt was requested.
    fn retry_wait(&mut self, delay: Duration) -> Result<bool, Error> {
        let ctx = &mut self.ctx;
        ctx.halt.clone().wait_timeout_with(delay, |now| {
            ctx.heartbeat.check_and_maybe_emit(now, &mut ctx.publisher)?;
            Ok(ctx.heartbeat.time_until_due(Instant::now()))
        })
    }

    fn shutdown(&mut self, status: ExitStatus) {
        if let Err(err) = self.ctx.session.close() {
            tracing::warn!(error = %err, "error closing database session");
        }
        if let Err(err) = self.ctx.publisher.close(self.ctx.config.linger) {
            tracing::warn!(error = %err, "error closing pub socket");
        }
        tracing::info!(
            forwarded = self.manager.forwarded(),
            heartbeats = self.ctx.heartbeat.sequence(),
            exit_code = status.code(),
            "relay stopped"
        );
    }
}
