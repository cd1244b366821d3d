//! Operator-facing driver for a trainer

pub mod command;
pub mod console;

pub use command::{ControlCommand, UnknownCommand};
pub use console::ConsoleRunner;
