use thiserror::Error;

/// Main error type for the training orchestrator
#[derive(Error, Debug)]
pub enum TrainerError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid trainer options: {0}")]
    InvalidOptions(String),

    #[error("Invalid period {0}: periods must be positive")]
    InvalidPeriod(u32),

    // Lifecycle errors
    #[error("Already training")]
    AlreadyTraining,

    #[error("No async runtime available to host the training loop")]
    NoRuntime,

    #[error("Training worker lost: {0}")]
    WorkerLost(String),

    // Model hook errors
    #[error("Model error: {0}")]
    Model(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for TrainerError
pub type Result<T> = std::result::Result<T, TrainerError>;

impl TrainerError {
    /// Whether the error was raised while validating configuration
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            TrainerError::Config(_) | TrainerError::InvalidOptions(_) | TrainerError::InvalidPeriod(_)
        )
    }
}
