//! Scheduling: when periodic side effects fire, and what they carry

pub mod action;
pub mod periodic;

pub use action::{LearningRateScalingAction, PeriodicCallback, ScheduledAction};
pub use periodic::{
    EpochAction, IterationAction, MultiPeriodAction, PeriodType, Periodic, PeriodicAction,
    ScheduleConfig,
};
