//! Pause gate for the training loop
//!
//! The gate is the only place the loop suspends. It can be opened and closed
//! from any thread, and a blocked waiter is released by opening the gate,
//! by cancellation, or by a stop request.

use tokio::sync::watch;

use super::cancellation::{CancellationToken, StopFlag};

/// Why a wait on the gate ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateWait {
    Opened,
    Cancelled,
    Stopped,
}

pub struct PauseGate {
    tx: watch::Sender<bool>,
}

impl PauseGate {
    /// Create an open gate
    pub fn new() -> Self {
        let (tx, _) = watch::channel(true);
        Self { tx }
    }

    /// Open the gate, releasing any waiter. Returns true if it was closed.
    pub fn open(&self) -> bool {
        !self.tx.send_replace(true)
    }

    /// Close the gate. Returns true if it was open.
    pub fn close(&self) -> bool {
        self.tx.send_replace(false)
    }

    pub fn is_open(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the gate opens, cancellation arrives or a stop is requested.
    /// Cancellation wins when several are ready at once.
    pub async fn wait(&self, cancel: &CancellationToken, stop: &StopFlag) -> GateWait {
        let mut rx = self.tx.subscribe();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => GateWait::Cancelled,
            _ = stop.requested() => GateWait::Stopped,
            _ = rx.wait_for(|open| *open) => GateWait::Opened,
        }
    }
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}
