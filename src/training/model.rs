//! Capability contract between the trainer and the model it drives

use std::fmt::Debug;

use crate::error::{Result, TrainerError};
use crate::training::options::TrainerOptions;
use crate::training::session::{SessionSnapshot, TrainingSession};

/// A model the trainer can step.
///
/// Every hook is opaque to the trainer and may take arbitrary time. Errors
/// returned from any hook end the run as a fault.
pub trait TrainableModel: Send + 'static {
    /// Snapshot produced at report time
    type Report: Clone + Debug + Send + Sync + 'static;

    /// Perform one optimization step. Call `session.advance_epoch()` when the
    /// step completes a pass over the data.
    fn train_iteration(&mut self, session: &mut TrainingSession) -> Result<()>;

    /// Clear recurrent or otherwise accumulated state
    fn reset_memory(&mut self) -> Result<()>;

    /// Return accumulated metrics and clear the accumulators
    fn get_and_flush_training_report(&mut self, session: &SessionSnapshot) -> Result<Self::Report>;

    /// Reject option combinations this model cannot work with
    fn validate_options(&self, options: &TrainerOptions) -> Result<()> {
        let _ = options;
        Ok(())
    }

    /// Called once at the start of every run, before the first step
    fn init_training(&mut self, session: &mut TrainingSession) -> Result<()> {
        let _ = session;
        Ok(())
    }

    /// Trailing fragment of the progress line, e.g. the latest loss
    fn training_report_message(&self) -> Option<String> {
        None
    }

    /// Iteration part of the progress line. `other_len` is the length of the
    /// rest of the line, for models that pad or draw bars.
    fn iteration_progress(&self, session: &SessionSnapshot, other_len: usize) -> String {
        let _ = other_len;
        format!("I:{}", session.iteration)
    }

    /// Multiply the learning rate by `factor`
    fn scale_learning_rate(&mut self, factor: f64) -> Result<()> {
        let _ = factor;
        Err(TrainerError::Unsupported(
            "model does not support learning rate scaling".to_string(),
        ))
    }
}
