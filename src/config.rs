use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::schedule::{PeriodType, ScheduleConfig};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub trainer: TrainerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub demo: DemoConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Stop once the epoch counter exceeds this value
    #[serde(default = "default_max_epoch")]
    pub max_epoch: u64,
    /// When to clear the model's accumulated state
    #[serde(default)]
    pub reset_memory: ScheduleConfig,
    /// When to pull and broadcast a training report
    #[serde(default)]
    pub report_progress: ScheduleConfig,
    /// Forward a formatted progress line on each report
    #[serde(default)]
    pub report_messages: bool,
    /// Optional learning-rate decay schedule
    #[serde(default)]
    pub learning_rate_scaling: Option<LearningRateScalingConfig>,
}

fn default_max_epoch() -> u64 {
    10
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            max_epoch: default_max_epoch(),
            reset_memory: ScheduleConfig::default(),
            report_progress: ScheduleConfig::default(),
            report_messages: false,
            learning_rate_scaling: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LearningRateScalingConfig {
    /// Cadence unit (default: epoch)
    #[serde(default = "default_scaling_every")]
    pub every: PeriodType,
    pub period: u32,
    /// Multiplier applied to the learning rate each time the schedule fires
    pub scale_factor: f64,
}

fn default_scaling_every() -> PeriodType {
    PeriodType::Epoch
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for daily rolling log files (stdout only when unset)
    #[serde(default)]
    pub dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

/// Parameters of the bundled linear-regression model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    /// Number of synthetic samples per epoch
    #[serde(default = "default_samples")]
    pub samples: usize,
    /// Samples per optimization step
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Initial SGD learning rate
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Momentum coefficient; the momentum buffer is the model's "memory"
    #[serde(default = "default_momentum")]
    pub momentum: f64,
    /// RNG seed for the synthetic data
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Artificial delay per step so the loop can be driven interactively
    #[serde(default)]
    pub step_delay_ms: u64,
}

fn default_samples() -> usize {
    1024
}

fn default_batch_size() -> usize {
    32
}

fn default_learning_rate() -> f64 {
    0.05
}

fn default_momentum() -> f64 {
    0.9
}

fn default_seed() -> u64 {
    42
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            samples: default_samples(),
            batch_size: default_batch_size(),
            learning_rate: default_learning_rate(),
            momentum: default_momentum(),
            seed: default_seed(),
            step_delay_ms: 0,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("trainer.max_epoch", default_max_epoch())?
            .set_default("trainer.report_messages", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("TRAINCTL_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (TRAINCTL__TRAINER__MAX_EPOCH, etc.)
            .add_source(
                Environment::with_prefix("TRAINCTL")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        // Validate schedules
        for (name, schedule) in [
            ("reset_memory", &self.trainer.reset_memory),
            ("report_progress", &self.trainer.report_progress),
        ] {
            if schedule.every != PeriodType::None && schedule.period == 0 {
                errors.push(format!("trainer.{name}.period must be positive"));
            }
        }

        if self.trainer.report_messages && self.trainer.report_progress.every == PeriodType::None {
            errors.push(
                "trainer.report_messages requires an enabled report_progress schedule".to_string(),
            );
        }

        if let Some(scaling) = &self.trainer.learning_rate_scaling {
            if scaling.period == 0 {
                errors.push("trainer.learning_rate_scaling.period must be positive".to_string());
            }
            if !(scaling.scale_factor.is_finite() && scaling.scale_factor > 0.0) {
                errors.push(format!(
                    "trainer.learning_rate_scaling.scale_factor must be positive, got {}",
                    scaling.scale_factor
                ));
            }
        }

        // Validate demo model params
        if self.demo.batch_size == 0 {
            errors.push("demo.batch_size must be positive".to_string());
        }

        if self.demo.samples < self.demo.batch_size {
            errors.push("demo.samples must be at least demo.batch_size".to_string());
        }

        if !(self.demo.learning_rate.is_finite() && self.demo.learning_rate > 0.0) {
            errors.push("demo.learning_rate must be positive".to_string());
        }

        if !(0.0..1.0).contains(&self.demo.momentum) {
            errors.push("demo.momentum must be in [0, 1)".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
