//! Immutable run configuration

use std::sync::Arc;

use tracing::warn;

use crate::config::TrainerConfig;
use crate::error::{Result, TrainerError};
use crate::schedule::PeriodicAction;
use crate::training::progress::ProgressSink;

/// Options fixed for the lifetime of a trainer
#[derive(Clone)]
pub struct TrainerOptions {
    /// The run stops once the epoch counter exceeds this value
    pub max_epoch: u64,
    /// When to call the model's `reset_memory` hook
    pub reset_memory: PeriodicAction,
    /// When to pull a report from the model
    pub report_progress: PeriodicAction,
    /// Forward a formatted progress line to the sink on each report
    pub report_messages: bool,
    /// Optional consumer of progress messages
    pub progress_sink: Option<Arc<dyn ProgressSink>>,
}

impl TrainerOptions {
    pub fn new(max_epoch: u64) -> Self {
        Self {
            max_epoch,
            reset_memory: PeriodicAction::disabled(),
            report_progress: PeriodicAction::disabled(),
            report_messages: false,
            progress_sink: None,
        }
    }

    /// Build options from the `[trainer]` configuration section
    pub fn from_config(config: &TrainerConfig) -> Result<Self> {
        Ok(Self {
            max_epoch: config.max_epoch,
            reset_memory: PeriodicAction::try_from(config.reset_memory)?,
            report_progress: PeriodicAction::try_from(config.report_progress)?,
            report_messages: config.report_messages,
            progress_sink: None,
        })
    }

    pub fn with_reset_memory(mut self, policy: impl Into<PeriodicAction>) -> Self {
        self.reset_memory = policy.into();
        self
    }

    pub fn with_report_progress(mut self, policy: impl Into<PeriodicAction>) -> Self {
        self.report_progress = policy.into();
        self
    }

    pub fn with_report_messages(mut self, enabled: bool) -> Self {
        self.report_messages = enabled;
        self
    }

    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress_sink = Some(sink);
        self
    }

    /// Forward to the sink if one is attached
    pub(crate) fn sink(&self) -> Option<&dyn ProgressSink> {
        self.progress_sink.as_deref()
    }

    /// Validate option combinations
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.report_messages && !self.report_progress.is_enabled() {
            errors.push(
                "report_messages requires an enabled report_progress schedule".to_string(),
            );
        }

        if self.report_messages && self.progress_sink.is_none() {
            warn!("report_messages is set but no progress sink is attached");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(TrainerError::InvalidOptions(errors.join("; ")))
        }
    }
}

impl std::fmt::Debug for TrainerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainerOptions")
            .field("max_epoch", &self.max_epoch)
            .field("reset_memory", &self.reset_memory)
            .field("report_progress", &self.report_progress)
            .field("report_messages", &self.report_messages)
            .field("progress_sink", &self.progress_sink.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{PeriodType, ScheduleConfig};
    use crate::training::progress::TracingProgressSink;

    #[test]
    fn test_report_messages_needs_report_schedule() {
        let options = TrainerOptions::new(3).with_report_messages(true);
        assert!(matches!(options.validate(), Err(TrainerError::InvalidOptions(_))));

        let options = options
            .with_report_progress(PeriodicAction::each_iteration(10).unwrap())
            .with_progress_sink(Arc::new(TracingProgressSink));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_from_config() {
        let config = TrainerConfig {
            max_epoch: 7,
            reset_memory: ScheduleConfig {
                every: PeriodType::Epoch,
                period: 1,
            },
            report_progress: ScheduleConfig {
                every: PeriodType::Iteration,
                period: 50,
            },
            report_messages: true,
            learning_rate_scaling: None,
        };

        let options = TrainerOptions::from_config(&config).unwrap();
        assert_eq!(options.max_epoch, 7);
        assert!(options.reset_memory.should_do_on_epoch(3));
        assert!(options.report_progress.should_do_on_iteration(100));
        assert!(options.progress_sink.is_none());
    }

    #[test]
    fn test_from_config_rejects_zero_period() {
        let config = TrainerConfig {
            report_progress: ScheduleConfig {
                every: PeriodType::Iteration,
                period: 0,
            },
            ..TrainerConfig::default()
        };
        let err = TrainerOptions::from_config(&config).unwrap_err();
        assert!(err.is_configuration());
    }
}
