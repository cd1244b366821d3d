//! Coordination primitives for the training loop
//!
//! - Cooperative cancellation and stop signals
//! - The pause gate the loop blocks on
//! - Observable trainer lifecycle states

pub mod cancellation;
pub mod pause_gate;
pub mod state;

pub use cancellation::{cancel_on_shutdown_signal, CancellationToken, StopFlag};
pub use pause_gate::{GateWait, PauseGate};
pub use state::TrainerState;
