//! Console runner
//!
//! Starts a run and turns operator input lines into trainer control calls.
//! Whatever way the console loop ends, the shared cancellation token is
//! cancelled and the run handle awaited, so the run never outlives the runner.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

use crate::coordination::CancellationToken;
use crate::error::Result;
use crate::runner::command::ControlCommand;
use crate::training::{RunOutcome, TrainableModel, TrainerOrchestrator};

type ResetFn<M> = Box<dyn FnMut(&mut M) -> Result<()> + Send>;

/// How the console loop ended
enum Exit {
    Finished(Result<RunOutcome>),
    Stop,
    Quit,
}

/// Drives a trainer from a line-oriented command stream
pub struct ConsoleRunner<M: TrainableModel> {
    trainer: Arc<TrainerOrchestrator<M>>,
    cancel: CancellationToken,
    on_reset: Option<ResetFn<M>>,
}

impl<M: TrainableModel> ConsoleRunner<M> {
    pub fn new(trainer: Arc<TrainerOrchestrator<M>>) -> Self {
        Self {
            trainer,
            cancel: CancellationToken::new(),
            on_reset: None,
        }
    }

    /// Share an externally owned cancellation token (e.g. wired to Ctrl+C)
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Model mutation performed by the `reset` command while the loop is paused
    pub fn on_reset<F>(mut self, reset: F) -> Self
    where
        F: FnMut(&mut M) -> Result<()> + Send + 'static,
    {
        self.on_reset = Some(Box::new(reset));
        self
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start training and process commands until the run ends or input closes
    pub async fn run<R>(mut self, input: R) -> Result<RunOutcome>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut handle = self.trainer.train(self.cancel.clone())?;
        info!(run_id = %handle.run_id(), "Console runner attached");

        let mut lines = input.lines();
        let exit = loop {
            tokio::select! {
                outcome = &mut handle => break Exit::Finished(outcome),
                line = lines.next_line() => match line {
                    Ok(Some(text)) => {
                        if text.trim().is_empty() {
                            continue;
                        }
                        match text.parse::<ControlCommand>() {
                            Ok(ControlCommand::Stop) => break Exit::Stop,
                            Ok(ControlCommand::Quit) => break Exit::Quit,
                            Ok(command) => self.apply(command).await,
                            Err(e) => warn!("{}", e),
                        }
                    }
                    Ok(None) => {
                        debug!("Control input closed");
                        break Exit::Quit;
                    }
                    Err(e) => {
                        warn!("Failed to read control input: {}", e);
                        break Exit::Quit;
                    }
                },
            }
        };

        let outcome = match exit {
            Exit::Finished(outcome) => outcome,
            Exit::Stop => {
                info!("Stopping training");
                self.trainer.stop();
                (&mut handle).await
            }
            Exit::Quit => {
                info!("Stopping training manually");
                self.cancel.cancel();
                (&mut handle).await
            }
        };

        self.cancel.cancel();
        outcome
    }

    async fn apply(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::Reset => self.reset().await,
            ControlCommand::Pause => self.trainer.pause(),
            ControlCommand::Resume => self.trainer.resume(),
            ControlCommand::Status => {
                let progress = self.trainer.progress();
                println!(
                    "{} | iteration {} | epoch {}/{}",
                    self.trainer.state(),
                    progress.iteration,
                    progress.epoch,
                    self.trainer.options().max_epoch
                );
            }
            ControlCommand::Stop | ControlCommand::Quit => {}
        }
    }

    async fn reset(&mut self) {
        let Some(mut reset) = self.on_reset.take() else {
            warn!("No reset action configured");
            return;
        };

        info!("Resetting optimizer state");
        self.trainer.pause();

        // Waiting for the model lock can take as long as a training step
        let trainer = self.trainer.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let result = trainer.with_model(|model| reset(model));
            (reset, result)
        })
        .await;

        match joined {
            Ok((reset, result)) => {
                self.on_reset = Some(reset);
                if let Err(e) = result {
                    warn!("Reset failed: {}", e);
                }
            }
            Err(e) => warn!("Reset task failed: {}", e),
        }
        self.trainer.resume();
    }
}
