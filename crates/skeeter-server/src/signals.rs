//! Termination signal handling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::SigId;

use crate::error::Error;
use crate::halt::HaltFlag;

/// Registered handlers. Dropping this does not unregister them.
#[derive(Debug)]
pub struct SignalHandlers {
    interrupted: Arc<AtomicBool>,
    ids: Vec<SigId>,
}

impl SignalHandlers {
    /// Raise `halt` on SIGTERM or SIGINT.
    pub fn install(halt: &HaltFlag) -> Result<Self, Error> {
        let interrupted = Arc::new(AtomicBool::new(false));
        let ids = vec![
            signal_hook::flag::register(SIGTERM, halt.as_atomic())?,
            signal_hook::flag::register(SIGINT, halt.as_atomic())?,
            signal_hook::flag::register(SIGINT, Arc::clone(&interrupted))?,
        ];
        tracing::debug!(handlers = ids.len(), "signal handlers installed");
        Ok(Self { interrupted, ids })
    }

    /// Whether the halt came from an interactive interrupt.
    pub fn interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Remove the handlers; later signals take their default action.
    pub fn uninstall(self) {
        for id in self.ids {
            signal_hook::low_level::unregister(id);
        }
    }
}
