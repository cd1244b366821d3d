#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use trainctl::coordination::TrainerState;
use trainctl::error::{Result, TrainerError};
use trainctl::training::{
    ProgressSink, RunResource, SessionSnapshot, TrainableModel, TrainerControl, TrainerObserver,
    TrainingSession,
};

/// Model whose behavior is fixed up front so runs are deterministic
pub struct ScriptedModel {
    pub steps: u64,
    /// Advance the session epoch every N model steps (0 = never)
    pub epoch_every: u64,
    pub fail_at: Option<u64>,
    pub panic_at: Option<u64>,
    pub resets_at: Vec<u64>,
    pub reports: Vec<u64>,
    pub learning_rate: f64,
    pub inits: u64,
    pub step_delay: Duration,
    pub released: Arc<AtomicUsize>,
}

impl ScriptedModel {
    pub fn new(epoch_every: u64) -> Self {
        Self {
            steps: 0,
            epoch_every,
            fail_at: None,
            panic_at: None,
            resets_at: Vec::new(),
            reports: Vec::new(),
            learning_rate: 1.0,
            inits: 0,
            step_delay: Duration::ZERO,
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing_at(mut self, step: u64) -> Self {
        self.fail_at = Some(step);
        self
    }

    pub fn panicking_at(mut self, step: u64) -> Self {
        self.panic_at = Some(step);
        self
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }
}

struct ReleaseCounter(Arc<AtomicUsize>);

impl RunResource for ReleaseCounter {
    fn name(&self) -> &str {
        "release_counter"
    }

    fn release(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl TrainableModel for ScriptedModel {
    type Report = u64;

    fn train_iteration(&mut self, session: &mut TrainingSession) -> Result<()> {
        if !self.step_delay.is_zero() {
            std::thread::sleep(self.step_delay);
        }
        self.steps += 1;
        if Some(self.steps) == self.fail_at {
            return Err(TrainerError::Model(format!("scripted failure at step {}", self.steps)));
        }
        if Some(self.steps) == self.panic_at {
            panic!("scripted panic at step {}", self.steps);
        }
        if self.epoch_every > 0 && self.steps % self.epoch_every == 0 {
            session.advance_epoch();
        }
        Ok(())
    }

    fn reset_memory(&mut self) -> Result<()> {
        self.resets_at.push(self.steps);
        Ok(())
    }

    fn get_and_flush_training_report(&mut self, session: &SessionSnapshot) -> Result<u64> {
        self.reports.push(session.iteration);
        Ok(self.steps)
    }

    fn init_training(&mut self, session: &mut TrainingSession) -> Result<()> {
        self.inits += 1;
        session.register_resource(Box::new(ReleaseCounter(self.released.clone())));
        Ok(())
    }

    fn training_report_message(&self) -> Option<String> {
        Some(format!("lr={}", self.learning_rate))
    }

    fn scale_learning_rate(&mut self, factor: f64) -> Result<()> {
        self.learning_rate *= factor;
        Ok(())
    }
}

/// Sink that records every call as a line of text
#[derive(Default)]
pub struct RecordingSink {
    pub lines: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    fn push(&self, line: String) {
        self.lines.lock().unwrap().push(line);
    }
}

impl ProgressSink for RecordingSink {
    fn message(&self, text: &str) {
        self.push(format!("message:{text}"));
    }

    fn set_item_progress(&self, text: &str) {
        self.push(format!("item:{text}"));
    }

    fn set_progress(&self, current: u64, total: u64, label: &str) {
        self.push(format!("progress:{label} {current}/{total}"));
    }

    fn complete(&self) {
        self.push("complete".to_string());
    }
}

/// Observer that runs a closure after every trained iteration
pub struct OnIteration<F>(pub F);

impl<F> TrainerObserver<u64> for OnIteration<F>
where
    F: Fn(u64) + Send + Sync,
{
    fn on_sequence_trained(&self, session: &SessionSnapshot) {
        (self.0)(session.iteration);
    }
}

pub async fn wait_for_state(control: &TrainerControl<u64>, state: TrainerState) {
    let mut rx = control.state_changes();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
        .await
        .expect("timed out waiting for trainer state")
        .expect("state channel closed");
}
