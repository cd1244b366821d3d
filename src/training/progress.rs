//! Progress reporting sinks
//!
//! The trainer reports human readable progress through a [`ProgressSink`].
//! Every call is best effort: sinks must not fail and should return quickly
//! since they run inline with the training thread.

use std::io::Write;
use std::sync::Mutex;

use tracing::info;

/// Consumer of progress messages
#[cfg_attr(test, mockall::automock)]
pub trait ProgressSink: Send + Sync {
    /// Free-form status message
    fn message(&self, text: &str) {
        let _ = text;
    }

    /// Replace the current one-line item progress
    fn set_item_progress(&self, text: &str) {
        let _ = text;
    }

    /// Overall progress in `current` out of `total` units of `label`
    fn set_progress(&self, current: u64, total: u64, label: &str) {
        let _ = (current, total, label);
    }

    /// The run is over
    fn complete(&self) {}
}

/// Sink that forwards progress to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn message(&self, text: &str) {
        info!(target: "trainctl::progress", "{}", text);
    }

    fn set_item_progress(&self, text: &str) {
        info!(target: "trainctl::progress", "{}", text);
    }

    fn set_progress(&self, current: u64, total: u64, label: &str) {
        info!(target: "trainctl::progress", "{} {}/{}", label, current, total);
    }

    fn complete(&self) {
        info!(target: "trainctl::progress", "Training complete");
    }
}

/// Sink that writes progress lines to stdout, redrawing item progress in place
#[derive(Debug, Default)]
pub struct ConsoleProgressSink {
    item_line_open: Mutex<bool>,
}

impl ConsoleProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_line(&self, text: &str) {
        let mut open = self
            .item_line_open
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut out = std::io::stdout().lock();
        if *open {
            let _ = writeln!(out);
            *open = false;
        }
        let _ = writeln!(out, "{}", text);
    }
}

impl ProgressSink for ConsoleProgressSink {
    fn message(&self, text: &str) {
        self.write_line(text);
    }

    fn set_item_progress(&self, text: &str) {
        let mut open = self
            .item_line_open
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut out = std::io::stdout().lock();
        let _ = write!(out, "\r{}", text);
        let _ = out.flush();
        *open = true;
    }

    fn set_progress(&self, current: u64, total: u64, label: &str) {
        self.write_line(&format!("{} {}/{}", label, current, total));
    }

    fn complete(&self) {
        self.write_line("Training complete");
    }
}
