//! Operator commands accepted by the console runner

use std::str::FromStr;

use thiserror::Error;

/// Commands an operator can issue while a run is in progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Cooperative stop, then wait for the run to finish
    Stop,
    /// Leave the console loop through the cancellation path
    Quit,
    /// Pause, reset the model's optimizer state, resume
    Reset,
    /// Block the loop on the pause gate
    Pause,
    /// Release the pause gate
    Resume,
    /// Print the current state and counters
    Status,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown command: {0} (try stop, quit, reset, pause, resume, status)")]
pub struct UnknownCommand(pub String);

impl FromStr for ControlCommand {
    type Err = UnknownCommand;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().as_str() {
            "s" | "stop" => Ok(ControlCommand::Stop),
            "q" | "quit" | "exit" => Ok(ControlCommand::Quit),
            "r" | "reset" => Ok(ControlCommand::Reset),
            "p" | "pause" => Ok(ControlCommand::Pause),
            "c" | "resume" | "continue" => Ok(ControlCommand::Resume),
            "?" | "status" => Ok(ControlCommand::Status),
            other => Err(UnknownCommand(other.to_string())),
        }
    }
}

impl std::fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlCommand::Stop => write!(f, "stop"),
            ControlCommand::Quit => write!(f, "quit"),
            ControlCommand::Reset => write!(f, "reset"),
            ControlCommand::Pause => write!(f, "pause"),
            ControlCommand::Resume => write!(f, "resume"),
            ControlCommand::Status => write!(f, "status"),
        }
    }
}
