//! Scripted collaborators for driving the relay without a database or bus.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use skeeter_server::session::COMMIT_COMMAND;
use skeeter_server::{
    Error, HaltFlag, Interest, Multiplexer, NotificationEvent, Publisher, Readiness, RelayConfig,
    Session, Wake,
};

/// Behaviour of one scripted session.
#[derive(Default)]
pub struct SessionScript {
    /// Poll results handed out in order; `Ready` once exhausted.
    pub polls: VecDeque<Result<Readiness, Error>>,
    /// Fail when this statement is executed.
    pub fail_on: Option<(String, Error)>,
    /// Delivered once `COMMIT` has run and `deliver_after` has elapsed.
    pub notifications: Vec<NotificationEvent>,
    pub deliver_after: Duration,
}

impl SessionScript {
    pub fn with_polls(mut self, polls: impl IntoIterator<Item = Readiness>) -> Self {
        self.polls = polls.into_iter().map(Ok).collect();
        self
    }

    pub fn failing_on(mut self, sql: impl Into<String>, err: Error) -> Self {
        self.fail_on = Some((sql.into(), err));
        self
    }

    pub fn delivering(mut self, events: impl IntoIterator<Item = NotificationEvent>) -> Self {
        self.notifications = events.into_iter().collect();
        self
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.deliver_after = delay;
        self
    }
}

/// A statement as seen by a scripted session.
#[derive(Debug, Clone)]
pub struct Command {
    pub session: usize,
    pub sql: String,
    pub at: Instant,
}

/// Everything the scripted sessions observed, shared across reconnects.
#[derive(Debug, Default)]
pub struct Journal {
    pub opened: usize,
    pub closed: usize,
    pub commands: Vec<Command>,
}

impl Journal {
    pub fn statements(&self) -> Vec<(usize, String)> {
        self.commands
            .iter()
            .map(|c| (c.session, c.sql.clone()))
            .collect()
    }
}

pub type SharedJournal = Rc<RefCell<Journal>>;

/// Session backed by one end of a socket pair, so it has a real descriptor.
pub struct ScriptedSession {
    id: usize,
    socket: UnixStream,
    _peer: UnixStream,
    script: SessionScript,
    committed_at: Option<Instant>,
    pending: VecDeque<NotificationEvent>,
    closed: bool,
    journal: SharedJournal,
}

impl ScriptedSession {
    fn new(id: usize, script: SessionScript, journal: SharedJournal) -> Self {
        let (socket, peer) = UnixStream::pair().unwrap();
        Self {
            id,
            socket,
            _peer: peer,
            script,
            committed_at: None,
            pending: VecDeque::new(),
            closed: false,
            journal,
        }
    }
}

impl Session for ScriptedSession {
    fn poll(&mut self) -> Result<Readiness, Error> {
        if self.closed {
            return Err(Error::Connectivity("session closed".to_string()));
        }
        if let Some(committed_at) = self.committed_at {
            if committed_at.elapsed() >= self.script.deliver_after {
                self.pending.extend(self.script.notifications.drain(..));
            }
        }
        self.script.polls.pop_front().unwrap_or(Ok(Readiness::Ready))
    }

    fn descriptor(&self) -> Option<BorrowedFd<'_>> {
        Some(self.socket.as_fd())
    }

    fn execute(&mut self, sql: &str) -> Result<(), Error> {
        if self.closed {
            return Err(Error::Connectivity("session closed".to_string()));
        }
        self.journal.borrow_mut().commands.push(Command {
            session: self.id,
            sql: sql.to_string(),
            at: Instant::now(),
        });

        if matches!(&self.script.fail_on, Some((failing, _)) if failing == sql) {
            if let Some((_, err)) = self.script.fail_on.take() {
                return Err(err);
            }
        }
        if sql == COMMIT_COMMAND {
            self.committed_at = Some(Instant::now());
        }
        Ok(())
    }

    fn pending_notifications(&self) -> usize {
        self.pending.len()
    }

    fn pop_notification(&mut self) -> Option<NotificationEvent> {
        self.pending.pop_front()
    }

    fn close(&mut self) -> Result<(), Error> {
        if !self.closed {
            self.closed = true;
            self.journal.borrow_mut().closed += 1;
        }
        Ok(())
    }
}

/// Session factory handing out one script per connection attempt.
pub fn scripted_factory(
    scripts: impl IntoIterator<Item = SessionScript>,
    journal: SharedJournal,
) -> impl FnMut(&RelayConfig) -> Result<ScriptedSession, Error> {
    let mut scripts: VecDeque<SessionScript> = scripts.into_iter().collect();
    move |_config: &RelayConfig| {
        let id = {
            let mut journal = journal.borrow_mut();
            journal.opened += 1;
            journal.opened - 1
        };
        let script = scripts.pop_front().unwrap_or_default();
        Ok(ScriptedSession::new(id, script, Rc::clone(&journal)))
    }
}

/// Waits recorded by [`ScriptedMultiplexer`].
pub type SharedWaits = Rc<RefCell<Vec<(Interest, Duration)>>>;

/// Multiplexer that replays wake-ups and sleeps through timeouts.
pub struct ScriptedMultiplexer {
    pub wakes: VecDeque<Wake>,
    pub waits: SharedWaits,
    halt_after: Option<(usize, HaltFlag)>,
}

impl ScriptedMultiplexer {
    pub fn new(wakes: impl IntoIterator<Item = Wake>) -> Self {
        Self {
            wakes: wakes.into_iter().collect(),
            waits: SharedWaits::default(),
            halt_after: None,
        }
    }

    /// Raise `halt` on the `count`th wait instead of waiting.
    pub fn halt_after(mut self, count: usize, halt: &HaltFlag) -> Self {
        self.halt_after = Some((count, halt.clone()));
        self
    }
}

impl Multiplexer for ScriptedMultiplexer {
    fn wait(
        &mut self,
        _fd: BorrowedFd<'_>,
        interest: Interest,
        timeout: Duration,
    ) -> Result<Wake, Error> {
        let count = {
            let mut waits = self.waits.borrow_mut();
            waits.push((interest, timeout));
            waits.len()
        };
        if let Some((limit, halt)) = &self.halt_after {
            if count >= *limit {
                halt.set();
                return Ok(Wake::TimedOut);
            }
        }

        match self.wakes.pop_front() {
            Some(wake) => Ok(wake),
            None => {
                thread::sleep(timeout);
                Ok(Wake::TimedOut)
            }
        }
    }
}

/// Published state recorded by [`RecordingPublisher`].
#[derive(Debug, Default)]
pub struct Published {
    pub messages: Vec<Vec<Vec<u8>>>,
    pub closed_with: Option<Duration>,
}

impl Published {
    /// Messages not on the heartbeat topic.
    pub fn notifications(&self) -> Vec<Vec<Vec<u8>>> {
        self.messages
            .iter()
            .filter(|m| m[0] != b"heartbeat")
            .cloned()
            .collect()
    }

    /// Heartbeat payloads, in order.
    pub fn heartbeats(&self) -> Vec<skeeter_proto::Heartbeat> {
        self.messages
            .iter()
            .filter(|m| m[0] == b"heartbeat")
            .map(|m| skeeter_proto::Heartbeat::parse(std::str::from_utf8(&m[1]).unwrap()).unwrap())
            .collect()
    }
}

pub type SharedPublished = Rc<RefCell<Published>>;

/// Publisher that records complete frame sets.
pub struct RecordingPublisher {
    pub published: SharedPublished,
    partial: Vec<Vec<u8>>,
    halt_after: Option<(usize, HaltFlag)>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self {
            published: SharedPublished::default(),
            partial: Vec::new(),
            halt_after: None,
        }
    }

    /// Raise `halt` once `count` non-heartbeat messages have been published.
    pub fn halt_after(mut self, count: usize, halt: &HaltFlag) -> Self {
        self.halt_after = Some((count, halt.clone()));
        self
    }
}

impl Publisher for RecordingPublisher {
    fn send(&mut self, frame: &[u8], more: bool) -> Result<(), Error> {
        self.partial.push(frame.to_vec());
        if more {
            return Ok(());
        }

        let mut published = self.published.borrow_mut();
        published.messages.push(std::mem::take(&mut self.partial));
        if let Some((limit, halt)) = &self.halt_after {
            if published.notifications().len() >= *limit {
                halt.set();
            }
        }
        Ok(())
    }

    fn close(&mut self, linger: Duration) -> Result<(), Error> {
        self.published.borrow_mut().closed_with = Some(linger);
        Ok(())
    }
}

/// Configuration with short intervals for tests.
pub fn test_config(channels: &[&str]) -> RelayConfig {
    RelayConfig::new("dbname=test", "inproc://skeeter-test")
        .with_channels(channels.iter().copied())
        .with_linger(Duration::from_millis(5))
        .with_polling_interval(Duration::from_millis(200))
        .with_notify_check_interval(Duration::from_millis(10))
        .with_heartbeat_interval(Duration::from_secs(60))
        .with_database_retry_delay(Duration::from_millis(100))
}

pub fn frames(parts: &[&[u8]]) -> Vec<Vec<u8>> {
    parts.iter().map(|p| p.to_vec()).collect()
}
