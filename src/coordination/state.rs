//! Trainer lifecycle states

use serde::{Deserialize, Serialize};

/// Observable trainer state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainerState {
    /// No run has started yet
    Idle,
    /// The loop is stepping the model
    Training,
    /// The loop is blocked on the pause gate
    Paused,
    /// The last run ended
    Stopped,
}

impl TrainerState {
    /// Check if a run is in progress
    pub fn is_active(&self) -> bool {
        matches!(self, TrainerState::Training | TrainerState::Paused)
    }

    /// Check if the trainer is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, TrainerState::Stopped)
    }
}

impl std::fmt::Display for TrainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrainerState::Idle => write!(f, "idle"),
            TrainerState::Training => write!(f, "training"),
            TrainerState::Paused => write!(f, "paused"),
            TrainerState::Stopped => write!(f, "stopped"),
        }
    }
}
