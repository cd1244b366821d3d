pub mod cli;
pub mod config;
pub mod coordination;
pub mod demo;
pub mod error;
pub mod runner;
pub mod schedule;
pub mod training;

pub use config::AppConfig;
pub use coordination::{CancellationToken, TrainerState};
pub use error::{Result, TrainerError};
pub use runner::{ConsoleRunner, ControlCommand};
pub use schedule::{
    EpochAction, IterationAction, LearningRateScalingAction, MultiPeriodAction, PeriodType,
    Periodic, PeriodicAction, PeriodicCallback, ScheduledAction,
};
pub use training::{
    ProgressSink, RunOutcome, SessionSnapshot, StopReason, TrainReport, TrainableModel,
    TrainerControl, TrainerEvent, TrainerObserver, TrainerOptions, TrainerOrchestrator,
    TrainingHandle, TrainingSession,
};
