//! Payload-carrying actions fired by the trainer on a schedule

use tracing::{debug, info};

use crate::error::{Result, TrainerError};
use crate::schedule::periodic::{Periodic, PeriodicAction};
use crate::training::model::TrainableModel;
use crate::training::session::SessionSnapshot;

/// An action registered with a trainer.
///
/// Actions are subscribed when a run starts and unsubscribed when it ends.
/// While subscribed, the trainer calls `execute` whenever the schedule fires,
/// on the training thread.
pub trait ScheduledAction<M>: Send {
    fn name(&self) -> &str;

    fn schedule(&self) -> &PeriodicAction;

    fn subscribe(&mut self) {}

    fn unsubscribe(&mut self) {}

    fn execute(&mut self, model: &mut M, session: &SessionSnapshot) -> Result<()>;
}

/// Scales the model's learning rate each time its schedule fires
#[derive(Debug, Clone, PartialEq)]
pub struct LearningRateScalingAction {
    schedule: PeriodicAction,
    scale_factor: f64,
    subscribed: bool,
}

fn check_factor(scale_factor: f64) -> Result<f64> {
    if scale_factor.is_finite() && scale_factor > 0.0 {
        Ok(scale_factor)
    } else {
        Err(TrainerError::InvalidOptions(format!(
            "learning rate scale factor must be positive, got {}",
            scale_factor
        )))
    }
}

impl LearningRateScalingAction {
    /// Scale every `period` epochs
    pub fn new(period: u32, scale_factor: f64) -> Result<Self> {
        Ok(Self {
            schedule: PeriodicAction::each_epoch(period)?,
            scale_factor: check_factor(scale_factor)?,
            subscribed: false,
        })
    }

    pub fn disabled() -> Self {
        Self {
            schedule: PeriodicAction::disabled(),
            scale_factor: 1.0,
            subscribed: false,
        }
    }

    pub fn each_epoch(&mut self, period: u32, scale_factor: f64) -> Result<()> {
        let factor = check_factor(scale_factor)?;
        self.schedule.set_epoch(period)?;
        self.scale_factor = factor;
        Ok(())
    }

    pub fn each_iteration(&mut self, period: u32, scale_factor: f64) -> Result<()> {
        let factor = check_factor(scale_factor)?;
        self.schedule.set_iteration(period)?;
        self.scale_factor = factor;
        Ok(())
    }

    pub fn never(&mut self) {
        self.schedule.never();
    }

    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }
}

impl Periodic for LearningRateScalingAction {
    fn schedule(&self) -> &PeriodicAction {
        &self.schedule
    }
}

impl<M: TrainableModel> ScheduledAction<M> for LearningRateScalingAction {
    fn name(&self) -> &str {
        "learning_rate_scaling"
    }

    fn schedule(&self) -> &PeriodicAction {
        &self.schedule
    }

    fn subscribe(&mut self) {
        self.subscribed = true;
        debug!(
            "Learning rate scaling subscribed: x{} {}",
            self.scale_factor, self.schedule
        );
    }

    fn unsubscribe(&mut self) {
        self.subscribed = false;
    }

    fn execute(&mut self, model: &mut M, session: &SessionSnapshot) -> Result<()> {
        info!(
            "Scaling learning rate by {} at epoch {} iteration {}",
            self.scale_factor, session.epoch, session.iteration
        );
        model.scale_learning_rate(self.scale_factor)
    }
}

type Callback<M> = Box<dyn FnMut(&mut M, &SessionSnapshot) -> Result<()> + Send>;

/// Closure-backed scheduled action
pub struct PeriodicCallback<M> {
    name: String,
    schedule: PeriodicAction,
    callback: Callback<M>,
}

impl<M> PeriodicCallback<M> {
    pub fn new<F>(name: impl Into<String>, schedule: impl Into<PeriodicAction>, callback: F) -> Self
    where
        F: FnMut(&mut M, &SessionSnapshot) -> Result<()> + Send + 'static,
    {
        Self {
            name: name.into(),
            schedule: schedule.into(),
            callback: Box::new(callback),
        }
    }
}

impl<M> ScheduledAction<M> for PeriodicCallback<M> {
    fn name(&self) -> &str {
        &self.name
    }

    fn schedule(&self) -> &PeriodicAction {
        &self.schedule
    }

    fn execute(&mut self, model: &mut M, session: &SessionSnapshot) -> Result<()> {
        (self.callback)(model, session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::periodic::PeriodType;

    #[test]
    fn test_scaling_defaults_to_epoch_cadence() {
        let action = LearningRateScalingAction::new(2, 0.5).unwrap();
        assert_eq!(action.period_type(), PeriodType::Epoch);
        assert!(action.should_do_on_epoch(4));
        assert!(!action.should_do_on_iteration(4));
        assert_eq!(action.scale_factor(), 0.5);
    }

    #[test]
    fn test_scaling_rejects_bad_factor() {
        assert!(LearningRateScalingAction::new(1, 0.0).is_err());
        assert!(LearningRateScalingAction::new(1, f64::NAN).is_err());
        assert!(LearningRateScalingAction::new(0, 0.5).is_err());

        let mut action = LearningRateScalingAction::new(3, 0.9).unwrap();
        assert!(action.each_iteration(5, -1.0).is_err());
        // Unchanged after a rejected reconfiguration
        assert_eq!(action.period_type(), PeriodType::Epoch);
        assert_eq!(action.scale_factor(), 0.9);
    }

    #[test]
    fn test_scaling_reconfigure_to_iterations() {
        let mut action = LearningRateScalingAction::disabled();
        assert!(!action.is_enabled());
        action.each_iteration(100, 0.95).unwrap();
        assert!(action.should_do_on_iteration(200));
        action.never();
        assert!(!action.should_do_on_iteration(200));
    }

    #[test]
    fn test_callback_action_runs_closure() {
        let mut action = PeriodicCallback::new(
            "double",
            PeriodicAction::each_iteration(1).unwrap(),
            |value: &mut u32, _: &SessionSnapshot| {
                *value *= 2;
                Ok(())
            },
        );
        let snapshot = SessionSnapshot {
            run_id: uuid::Uuid::new_v4(),
            iteration: 1,
            epoch: 0,
        };

        let mut value = 3;
        action.execute(&mut value, &snapshot).unwrap();
        action.execute(&mut value, &snapshot).unwrap();
        assert_eq!(value, 12);
        assert_eq!(ScheduledAction::<u32>::name(&action), "double");
    }
}
