//! Readiness waits on a single descriptor.

use std::os::fd::BorrowedFd;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::error::Error;

/// Direction the caller is waiting for. Errors are always watched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
}

/// Status bits reported for a woken descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStatus {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
    pub hangup: bool,
}

impl PollStatus {
    /// An error condition with no usable readiness alongside it.
    pub fn is_error_only(&self) -> bool {
        self.error && !self.readable && !self.writable
    }
}

impl From<PollFlags> for PollStatus {
    fn from(flags: PollFlags) -> Self {
        Self {
            readable: flags.contains(PollFlags::POLLIN),
            writable: flags.contains(PollFlags::POLLOUT),
            error: flags.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL),
            hangup: flags.contains(PollFlags::POLLHUP),
        }
    }
}

/// Outcome of one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// Nothing happened before the timeout, or a signal interrupted the wait.
    TimedOut,
    /// The descriptor reported status bits.
    Ready(PollStatus),
}

/// Waits for readiness of one descriptor with a timeout.
pub trait Multiplexer {
    fn wait(
        &mut self,
        fd: BorrowedFd<'_>,
        interest: Interest,
        timeout: Duration,
    ) -> Result<Wake, Error>;
}

/// `poll(2)` based multiplexer.
#[derive(Debug, Default)]
pub struct PollMultiplexer;

impl PollMultiplexer {
    pub fn new() -> Self {
        Self
    }
}

impl Multiplexer for PollMultiplexer {
    fn wait(
        &mut self,
        fd: BorrowedFd<'_>,
        interest: Interest,
        timeout: Duration,
    ) -> Result<Wake, Error> {
        let events = match interest {
            Interest::Read => PollFlags::POLLIN,
            Interest::Write => PollFlags::POLLOUT,
        } | PollFlags::POLLERR;

        let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let timeout = PollTimeout::try_from(millis).map_err(|e| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid poll timeout {}ms: {:?}", millis, e),
            ))
        })?;

        let mut fds = [PollFd::new(fd, events)];
        match poll(&mut fds, timeout) {
            Ok(0) => Ok(Wake::TimedOut),
            Ok(_) => {
                let revents = fds[0].revents().unwrap_or_else(PollFlags::empty);
                Ok(Wake::Ready(PollStatus::from(revents)))
            }
            // A signal landed; the caller re-checks the halt flag.
            Err(Errno::EINTR) => Ok(Wake::TimedOut),
            Err(errno) => Err(Error::Io(std::io::Error::from(errno))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsFd;
    use std::os::unix::net::UnixStream;
    use std::time::Instant;

    #[test]
    fn test_read_times_out_when_idle() {
        let (left, _right) = UnixStream::pair().unwrap();
        let mut mux = PollMultiplexer::new();

        let start = Instant::now();
        let wake = mux
            .wait(left.as_fd(), Interest::Read, Duration::from_millis(20))
            .unwrap();
        assert_eq!(wake, Wake::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_read_ready_after_peer_writes() {
        let (left, mut right) = UnixStream::pair().unwrap();
        right.write_all(b"x").unwrap();

        let mut mux = PollMultiplexer::new();
        match mux
            .wait(left.as_fd(), Interest::Read, Duration::from_secs(1))
            .unwrap()
        {
            Wake::Ready(status) => {
                assert!(status.readable);
                assert!(!status.is_error_only());
            }
            Wake::TimedOut => panic!("expected read readiness"),
        }
    }

    #[test]
    fn test_write_ready_on_fresh_socket() {
        let (left, _right) = UnixStream::pair().unwrap();
        let mut mux = PollMultiplexer::new();
        let wake = mux
            .wait(left.as_fd(), Interest::Write, Duration::from_secs(1))
            .unwrap();
        assert!(matches!(wake, Wake::Ready(status) if status.writable));
    }

    #[test]
    fn test_hangup_is_not_error_only() {
        let (left, right) = UnixStream::pair().unwrap();
        drop(right);

        let mut mux = PollMultiplexer::new();
        let wake = mux
            .wait(left.as_fd(), Interest::Read, Duration::from_secs(1))
            .unwrap();
        match wake {
            Wake::Ready(status) => {
                assert!(status.hangup || status.readable);
                assert!(!status.is_error_only());
            }
            Wake::TimedOut => panic!("expected hangup"),
        }
    }

    #[test]
    fn test_error_only_classification() {
        let status = PollStatus::from(PollFlags::POLLERR);
        assert!(status.is_error_only());

        let status = PollStatus::from(PollFlags::POLLERR | PollFlags::POLLIN);
        assert!(!status.is_error_only());

        let status = PollStatus::from(PollFlags::POLLNVAL);
        assert!(status.is_error_only());

        let status = PollStatus::from(PollFlags::POLLHUP);
        assert!(status.hangup);
        assert!(!status.is_error_only());
    }
}
