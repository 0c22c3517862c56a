//! Deferred signal handling.
//!
//! Signal handlers never touch the connection table. Arriving signals are surfaced through the
//! poll as a readiness source, folded into a single intent slot, and the slot is drained at the
//! top of each loop iteration.

use lircd_common::error::{LircdError, LircdResult};
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM, SIGUSR1};
use signal_hook_mio::v1_0::Signals;
use tracing::warn;

/// What the main loop should do about a caught signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalIntent {
    /// Tear everything down and exit.
    Shutdown(i32),
    /// Re-announce the configuration and notify clients.
    Reload,
}

/// Single-slot store for the most urgent pending intent.
#[derive(Debug, Default)]
pub struct SignalLatch {
    slot: Option<SignalIntent>,
}

impl SignalLatch {
    /// Folds one caught signal into the slot; shutdown outranks reload.
    pub fn latch(&mut self, signal: i32) {
        let intent = match signal {
            SIGHUP => SignalIntent::Reload,
            SIGTERM | SIGINT | SIGUSR1 => SignalIntent::Shutdown(signal),
            other => {
                warn!(signal = other, "ignoring unexpected signal");
                return;
            }
        };
        if matches!(self.slot, Some(SignalIntent::Shutdown(_))) {
            return;
        }
        self.slot = Some(intent);
    }

    /// Drains the pending intent, if any.
    pub fn take(&mut self) -> Option<SignalIntent> {
        self.slot.take()
    }
}

/// Installs the process signal handlers and returns the poll source carrying them.
pub fn subscribe() -> LircdResult<Signals> {
    Signals::new([SIGTERM, SIGINT, SIGUSR1, SIGHUP])
        .map_err(|error| LircdError::Io(format!("cannot install signal handlers: {error}")))
}

#[cfg(test)]
mod tests {
    use super::{SignalIntent, SignalLatch};
    use googletest::prelude::*;
    use rstest::rstest;
    use signal_hook::consts::signal::{SIGHUP, SIGTERM, SIGUSR1};

    #[rstest]
    fn latch_is_drained_once() {
        let mut latch = SignalLatch::default();
        latch.latch(SIGHUP);
        assert_that!(latch.take(), eq(Some(SignalIntent::Reload)));
        assert_that!(latch.take(), eq(None));
    }

    #[rstest]
    fn shutdown_outranks_reload() {
        let mut latch = SignalLatch::default();
        latch.latch(SIGTERM);
        latch.latch(SIGHUP);
        assert_that!(latch.take(), eq(Some(SignalIntent::Shutdown(SIGTERM))));
    }

    #[rstest]
    fn reload_is_replaced_by_a_later_shutdown() {
        let mut latch = SignalLatch::default();
        latch.latch(SIGHUP);
        latch.latch(SIGUSR1);
        assert_that!(latch.take(), eq(Some(SignalIntent::Shutdown(SIGUSR1))));
    }
}
