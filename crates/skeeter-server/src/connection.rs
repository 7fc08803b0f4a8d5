//! Relay phase state machine.
//!
//! ```text
//! Connecting -> Subscribing(0) -> ... -> Subscribing(N) -> Committing -> SteadyCheck
//!                                                                          |    ^
//!                                                                          +----+
//! ```
//!
//! Every [`ConnectionManager::step`] first waits, in bounded rounds, until
//! the session has no I/O outstanding, then performs exactly one transition.
//! A connectivity error in any phase sends the supervisor back to
//! `Connecting` with a fresh session.

use std::time::{Duration, Instant};

use chrono::Utc;

use crate::bus::Publisher;
use crate::context::RelayContext;
use crate::error::Error;
use crate::forwarder::NotificationForwarder;
use crate::multiplexer::{Interest, Multiplexer, Wake};
use crate::session::{listen_command, Session, COMMIT_COMMAND};

/// Relay-level progress, independent of the session's I/O readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the session to finish connecting.
    Connecting,
    /// Next channel to `LISTEN` on.
    Subscribing(usize),
    /// All channels issued; commit next.
    Committing,
    /// Forwarding notifications.
    SteadyCheck,
}

/// Drives a session through its phases.
#[derive(Debug)]
pub struct ConnectionManager {
    phase: Phase,
    idle_wait: Option<Duration>,
    forwarder: NotificationForwarder,
}

impl ConnectionManager {
    pub fn new(notify_check_interval: Duration) -> Self {
        Self {
            phase: Phase::Connecting,
            idle_wait: None,
            forwarder: NotificationForwarder::new(notify_check_interval),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Notifications forwarded so far.
    pub fn forwarded(&self) -> u64 {
        self.forwarder.forwarded()
    }

    /// Start over with a new session.
    pub fn reset(&mut self) {
        self.phase = Phase::Connecting;
        self.idle_wait = None;
    }

    /// Advance the relay by one transition.
    ///
    /// Returns without acting if the halt flag is raised while waiting.
    pub fn step<S, P, M>(&mut self, ctx: &mut RelayContext<S, P, M>) -> Result<(), Error>
    where
        S: Session,
        P: Publisher,
        M: Multiplexer,
    {
        ctx.heartbeat
            .check_and_maybe_emit(Instant::now(), &mut ctx.publisher)?;

        if let Some(timeout) = self.idle_wait.take() {
            wait_cycle(ctx, Interest::Read, timeout)?;
        }

        if !await_ready(ctx)? {
            return Ok(());
        }

        self.phase = self.transition(ctx)?;
        Ok(())
    }

    fn transition<S, P, M>(&mut self, ctx: &mut RelayContext<S, P, M>) -> Result<Phase, Error>
    where
        S: Session,
        P: Publisher,
    {
        let channels = &ctx.config.channels;
        match self.phase {
            Phase::Connecting => {
                ctx.heartbeat.mark_connected(Utc::now());
                tracing::info!(channels = channels.len(), "start listening to channels");
                Ok(Phase::Subscribing(0))
            }
            Phase::Subscribing(index) if index < channels.len() => {
                let channel = &channels[index];
                tracing::info!(channel = %channel, "listening");
                ctx.session.execute(&listen_command(channel))?;
                Ok(Phase::Subscribing(index + 1))
            }
            Phase::Subscribing(_) => Ok(Phase::Committing),
            Phase::Committing => {
                tracing::info!("committing subscriptions");
                ctx.session.execute(COMMIT_COMMAND)?;
                Ok(Phase::SteadyCheck)
            }
            Phase::SteadyCheck => {
                self.idle_wait = self
                    .forwarder
                    .drain(&mut ctx.session, &mut ctx.publisher)?;
                Ok(Phase::SteadyCheck)
            }
        }
    }
}

/// Poll the session until it is ready, waiting on its socket in between.
///
/// Returns `false` if the halt flag was raised first.
fn await_ready<S, P, M>(ctx: &mut RelayContext<S, P, M>) -> Result<bool, Error>
where
    S: Session,
    P: Publisher,
    M: Multiplexer,
{
    let mut readiness = ctx.session.poll()?;
    while !ctx.halt.is_set() {
        let Some(interest) = readiness.interest() else {
            return Ok(true);
        };
        tracing::debug!(?readiness, "waiting on database session");

        while !ctx.halt.is_set() {
            if wait_cycle(ctx, interest, ctx.config.polling_interval)? {
                break;
            }
        }
        if ctx.halt.is_set() {
            break;
        }
        readiness = ctx.session.poll()?;
    }
    Ok(false)
}

/// One bounded wait on the session socket, preceded by a heartbeat check.
///
/// The wait never runs past the next heartbeat deadline. Returns whether
/// the socket woke up.
fn wait_cycle<S, P, M>(
    ctx: &mut RelayContext<S, P, M>,
    interest: Interest,
    timeout: Duration,
) -> Result<bool, Error>
where
    S: Session,
    P: Publisher,
    M: Multiplexer,
{
    ctx.heartbeat
        .check_and_maybe_emit(Instant::now(), &mut ctx.publisher)?;
    let timeout = timeout.min(ctx.heartbeat.time_until_due(Instant::now()));

    let fd = ctx
        .session
        .descriptor()
        .ok_or_else(|| Error::Connectivity("database session has no socket".to_string()))?;

    match ctx.multiplexer.wait(fd, interest, timeout)? {
        Wake::TimedOut => Ok(false),
        Wake::Ready(status) if status.is_error_only() => Err(Error::Poll(status)),
        Wake::Ready(status) => {
            if status.hangup {
                tracing::debug!(?status, "database socket hung up");
            }
            Ok(true)
        }
    }
}
