//! Process-wide halt flag.

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Longest sleep between halt checks while waiting.
pub const HALT_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Shared stop request, set by signal handlers or on fatal errors.
///
/// Once set it is never cleared.
#[derive(Debug, Clone, Default)]
pub struct HaltFlag {
    flag: Arc<AtomicBool>,
}

impl HaltFlag {
    /// Create an unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a halt.
    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether a halt was requested.
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// The underlying atomic, for registration with signal handlers.
    pub fn as_atomic(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    /// Sleep for up to `timeout`, returning early once the flag is set.
    ///
    /// Returns whether the flag is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.wait_timeout_with(timeout, |_| Ok::<_, Infallible>(HALT_CHECK_INTERVAL)) {
            Ok(set) => set,
            Err(never) => match never {},
        }
    }

    /// Like [`HaltFlag::wait_timeout`], but calls `on_wake` before every
    /// slice. `on_wake` returns the longest the next slice may sleep, and
    /// an error from it ends the wait.
    pub fn wait_timeout_with<E, F>(&self, timeout: Duration, mut on_wake: F) -> Result<bool, E>
    where
        F: FnMut(Instant) -> Result<Duration, E>,
    {
        let deadline = Instant::now() + timeout;
        while !self.is_set() {
            let now = Instant::now();
            let limit = on_wake(now)?;
            let remaining = deadline.saturating_duration_since(now);
            if remaining.is_zero() {
                break;
            }
            thread::sleep(remaining.min(limit).min(HALT_CHECK_INTERVAL));
        }
        Ok(self.is_set())
    }
}
