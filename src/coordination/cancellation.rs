//! Cooperative cancellation and stop signals
//!
//! Both signals are checked by the training loop at well-defined points
//! (the top of each pass and while blocked on the pause gate). Neither one
//! interrupts a model step that is already running.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

struct Signal {
    requested: AtomicBool,
    tx: watch::Sender<bool>,
}

impl Signal {
    fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            requested: AtomicBool::new(false),
            tx,
        }
    }

    /// Returns false if the signal was already raised
    fn raise(&self) -> bool {
        if self.requested.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.tx.send_replace(true);
        true
    }

    fn clear(&self) {
        self.requested.store(false, Ordering::SeqCst);
        self.tx.send_replace(false);
    }

    fn is_raised(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    async fn raised(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|raised| *raised).await;
    }
}

/// Shared, one-way cancellation signal owned by whoever starts a run
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Signal>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Signal::new()),
        }
    }

    /// Request cancellation. Later calls are ignored.
    pub fn cancel(&self) {
        if self.inner.raise() {
            info!("Cancellation requested");
        } else {
            debug!("Cancellation already requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_raised()
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        self.inner.raised().await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Resettable stop request owned by a trainer
pub struct StopFlag {
    inner: Signal,
}

impl StopFlag {
    pub fn new() -> Self {
        Self {
            inner: Signal::new(),
        }
    }

    pub fn request(&self) {
        if !self.inner.raise() {
            debug!("Stop already requested");
        }
    }

    pub fn reset(&self) {
        self.inner.clear();
    }

    pub fn is_requested(&self) -> bool {
        self.inner.is_raised()
    }

    /// Resolves once `request` has been called
    pub async fn requested(&self) {
        self.inner.raised().await;
    }
}

impl Default for StopFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancel `token` when the process receives Ctrl+C (or SIGTERM on unix)
pub fn cancel_on_shutdown_signal(token: CancellationToken) {
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C");
                ctrl_c_token.cancel();
            }
            Err(e) => warn!("Failed to install Ctrl+C handler: {}", e),
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("Received SIGTERM");
                    token.cancel();
                }
                Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
            }
        });
    }
}
