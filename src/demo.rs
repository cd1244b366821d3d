//! Demonstration model: one-feature linear regression fitted with momentum SGD
//! on synthetic data. It exists so the binary has something to train.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::DemoConfig;
use crate::error::{Result, TrainerError};
use crate::training::{RunResource, SessionSnapshot, TrainableModel, TrainerOptions, TrainingSession};

const TRUE_WEIGHT: f64 = 2.5;
const TRUE_BIAS: f64 = -0.75;
const NOISE: f64 = 0.05;

/// Metrics accumulated since the previous report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionReport {
    pub mean_loss: f64,
    pub steps: u64,
    pub weight: f64,
    pub bias: f64,
    pub learning_rate: f64,
}

/// Logs how many steps a run took when the run ends
struct StepCounter {
    steps: Arc<AtomicU64>,
}

impl RunResource for StepCounter {
    fn name(&self) -> &str {
        "demo_step_counter"
    }

    fn release(&mut self) {
        info!("Demo run performed {} steps", self.steps.swap(0, Ordering::SeqCst));
    }
}

pub struct LinearRegressionModel {
    xs: Vec<f64>,
    ys: Vec<f64>,
    order: Vec<usize>,
    cursor: usize,
    batch_size: usize,
    weight: f64,
    bias: f64,
    learning_rate: f64,
    momentum: f64,
    velocity: (f64, f64),
    loss_sum: f64,
    loss_count: u64,
    last_loss: f64,
    run_steps: Arc<AtomicU64>,
    step_delay: Duration,
    rng: StdRng,
}

impl LinearRegressionModel {
    pub fn new(config: &DemoConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let xs: Vec<f64> = (0..config.samples).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let ys = xs
            .iter()
            .map(|x| TRUE_WEIGHT * x + TRUE_BIAS + rng.gen_range(-NOISE..NOISE))
            .collect();

        Self {
            order: (0..config.samples).collect(),
            xs,
            ys,
            cursor: 0,
            batch_size: config.batch_size.max(1),
            weight: 0.0,
            bias: 0.0,
            learning_rate: config.learning_rate,
            momentum: config.momentum,
            velocity: (0.0, 0.0),
            loss_sum: 0.0,
            loss_count: 0,
            last_loss: f64::NAN,
            run_steps: Arc::new(AtomicU64::new(0)),
            step_delay: Duration::from_millis(config.step_delay_ms),
            rng,
        }
    }

    pub fn parameters(&self) -> (f64, f64) {
        (self.weight, self.bias)
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn batches_per_epoch(&self) -> usize {
        self.xs.len() / self.batch_size
    }

    /// Clear the momentum buffer, as an operator would after a bad stretch
    pub fn reset_optimizer(&mut self) -> Result<()> {
        info!("Resetting optimizer momentum");
        self.velocity = (0.0, 0.0);
        Ok(())
    }
}

impl TrainableModel for LinearRegressionModel {
    type Report = RegressionReport;

    fn train_iteration(&mut self, session: &mut TrainingSession) -> Result<()> {
        if !self.step_delay.is_zero() {
            std::thread::sleep(self.step_delay);
        }

        let batch = &self.order[self.cursor..self.cursor + self.batch_size];
        let n = batch.len() as f64;

        let (mut grad_w, mut grad_b, mut loss) = (0.0, 0.0, 0.0);
        for &i in batch {
            let err = self.weight * self.xs[i] + self.bias - self.ys[i];
            loss += err * err;
            grad_w += 2.0 * err * self.xs[i];
            grad_b += 2.0 * err;
        }
        loss /= n;

        if !loss.is_finite() {
            return Err(TrainerError::Model(format!(
                "loss diverged at iteration {}",
                session.iteration() + 1
            )));
        }

        self.velocity.0 = self.momentum * self.velocity.0 + grad_w / n;
        self.velocity.1 = self.momentum * self.velocity.1 + grad_b / n;
        self.weight -= self.learning_rate * self.velocity.0;
        self.bias -= self.learning_rate * self.velocity.1;

        self.loss_sum += loss;
        self.loss_count += 1;
        self.last_loss = loss;
        self.run_steps.fetch_add(1, Ordering::SeqCst);

        self.cursor += self.batch_size;
        if self.cursor + self.batch_size > self.xs.len() {
            self.cursor = 0;
            self.order.shuffle(&mut self.rng);
            session.advance_epoch();
        }
        Ok(())
    }

    fn reset_memory(&mut self) -> Result<()> {
        debug!("Clearing momentum buffer");
        self.velocity = (0.0, 0.0);
        Ok(())
    }

    fn get_and_flush_training_report(&mut self, _session: &SessionSnapshot) -> Result<RegressionReport> {
        let mean_loss = if self.loss_count == 0 {
            0.0
        } else {
            self.loss_sum / self.loss_count as f64
        };
        let report = RegressionReport {
            mean_loss,
            steps: self.loss_count,
            weight: self.weight,
            bias: self.bias,
            learning_rate: self.learning_rate,
        };
        self.loss_sum = 0.0;
        self.loss_count = 0;
        Ok(report)
    }

    fn validate_options(&self, options: &TrainerOptions) -> Result<()> {
        if self.batches_per_epoch() == 0 {
            return Err(TrainerError::InvalidOptions(
                "demo model needs at least one full batch of samples".to_string(),
            ));
        }
        debug!("Demo model accepted options: {:?}", options);
        Ok(())
    }

    fn init_training(&mut self, session: &mut TrainingSession) -> Result<()> {
        self.cursor = 0;
        self.run_steps.store(0, Ordering::SeqCst);
        session.register_resource(Box::new(StepCounter {
            steps: self.run_steps.clone(),
        }));
        Ok(())
    }

    fn training_report_message(&self) -> Option<String> {
        Some(format!(
            "loss={:.5} w={:.3} b={:.3} lr={:.4}",
            self.last_loss, self.weight, self.bias, self.learning_rate
        ))
    }

    fn scale_learning_rate(&mut self, factor: f64) -> Result<()> {
        self.learning_rate *= factor;
        debug!("Learning rate now {}", self.learning_rate);
        Ok(())
    }
}
