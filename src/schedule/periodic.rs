//! Periodic trigger policies
//!
//! A [`PeriodicAction`] answers one question: given the current iteration or
//! epoch counter, should the associated side effect run now? The payload of
//! the side effect lives elsewhere, so the trainer can evaluate any policy
//! without knowing what it guards.

use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainerError};

/// Unit in which a period is measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    /// The action is never performed
    #[default]
    None,
    /// The period counts completed iterations
    Iteration,
    /// The period counts epochs
    Epoch,
}

impl std::fmt::Display for PeriodType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeriodType::None => write!(f, "none"),
            PeriodType::Iteration => write!(f, "iteration"),
            PeriodType::Epoch => write!(f, "epoch"),
        }
    }
}

fn non_zero(period: u32) -> Result<NonZeroU32> {
    NonZeroU32::new(period).ok_or(TrainerError::InvalidPeriod(period))
}

/// Cadence policy shared by every scheduled side effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ScheduleConfig", into = "ScheduleConfig")]
pub struct PeriodicAction {
    period_type: PeriodType,
    period: NonZeroU32,
}

impl Default for PeriodicAction {
    fn default() -> Self {
        Self::disabled()
    }
}

impl PeriodicAction {
    /// A policy that never fires
    pub fn disabled() -> Self {
        Self {
            period_type: PeriodType::None,
            period: NonZeroU32::MIN,
        }
    }

    /// Fire every `period` iterations
    pub fn each_iteration(period: u32) -> Result<Self> {
        Ok(Self {
            period_type: PeriodType::Iteration,
            period: non_zero(period)?,
        })
    }

    /// Fire every `period` epochs
    pub fn each_epoch(period: u32) -> Result<Self> {
        Ok(Self {
            period_type: PeriodType::Epoch,
            period: non_zero(period)?,
        })
    }

    /// Build a policy of the given cadence. `PeriodType::None` ignores the period.
    pub fn with_type(period: u32, period_type: PeriodType) -> Result<Self> {
        match period_type {
            PeriodType::None => Ok(Self::disabled()),
            PeriodType::Iteration => Self::each_iteration(period),
            PeriodType::Epoch => Self::each_epoch(period),
        }
    }

    pub fn period_type(&self) -> PeriodType {
        self.period_type
    }

    pub fn period(&self) -> u32 {
        self.period.get()
    }

    /// Enabled exactly when a cadence is set
    pub fn is_enabled(&self) -> bool {
        self.period_type != PeriodType::None
    }

    /// Disable all triggers, keeping the last period around for display
    pub fn never(&mut self) {
        self.period_type = PeriodType::None;
    }

    pub fn should_do_on_iteration(&self, iteration: u64) -> bool {
        self.period_type == PeriodType::Iteration && iteration % u64::from(self.period.get()) == 0
    }

    pub fn should_do_on_epoch(&self, epoch: u64) -> bool {
        self.period_type == PeriodType::Epoch && epoch % u64::from(self.period.get()) == 0
    }

    pub(crate) fn set_iteration(&mut self, period: u32) -> Result<()> {
        *self = Self::each_iteration(period)?;
        Ok(())
    }

    pub(crate) fn set_epoch(&mut self, period: u32) -> Result<()> {
        *self = Self::each_epoch(period)?;
        Ok(())
    }
}

impl std::fmt::Display for PeriodicAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.period_type {
            PeriodType::None => write!(f, "never"),
            kind => write!(f, "every {} {}(s)", self.period, kind),
        }
    }
}

/// Serialized form of a schedule: `{ every = "iteration", period = 10 }`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub every: PeriodType,
    #[serde(default = "default_period")]
    pub period: u32,
}

fn default_period() -> u32 {
    1
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            every: PeriodType::None,
            period: default_period(),
        }
    }
}

impl TryFrom<ScheduleConfig> for PeriodicAction {
    type Error = TrainerError;

    fn try_from(config: ScheduleConfig) -> Result<Self> {
        PeriodicAction::with_type(config.period, config.every)
    }
}

impl From<PeriodicAction> for ScheduleConfig {
    fn from(action: PeriodicAction) -> Self {
        Self {
            every: action.period_type,
            period: action.period.get(),
        }
    }
}

/// Anything carrying a cadence policy
pub trait Periodic {
    fn schedule(&self) -> &PeriodicAction;

    fn is_enabled(&self) -> bool {
        self.schedule().is_enabled()
    }

    fn period_type(&self) -> PeriodType {
        self.schedule().period_type()
    }

    fn should_do_on_iteration(&self, iteration: u64) -> bool {
        self.schedule().should_do_on_iteration(iteration)
    }

    fn should_do_on_epoch(&self, epoch: u64) -> bool {
        self.schedule().should_do_on_epoch(epoch)
    }
}

impl Periodic for PeriodicAction {
    fn schedule(&self) -> &PeriodicAction {
        self
    }
}

/// Policy locked to an iteration cadence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterationAction(PeriodicAction);

impl IterationAction {
    pub fn new(period: u32) -> Result<Self> {
        PeriodicAction::each_iteration(period).map(Self)
    }

    pub fn each_iteration(&mut self, period: u32) -> Result<()> {
        self.0.set_iteration(period)
    }

    pub fn never(&mut self) {
        self.0.never();
    }
}

/// Policy locked to an epoch cadence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EpochAction(PeriodicAction);

impl EpochAction {
    pub fn new(period: u32) -> Result<Self> {
        PeriodicAction::each_epoch(period).map(Self)
    }

    pub fn each_epoch(&mut self, period: u32) -> Result<()> {
        self.0.set_epoch(period)
    }

    pub fn never(&mut self) {
        self.0.never();
    }
}

/// Policy that can be switched between iteration and epoch cadence after creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MultiPeriodAction(PeriodicAction);

impl MultiPeriodAction {
    pub fn new(period: u32, period_type: PeriodType) -> Result<Self> {
        PeriodicAction::with_type(period, period_type).map(Self)
    }

    pub fn each_iteration(&mut self, period: u32) -> Result<()> {
        self.0.set_iteration(period)
    }

    pub fn each_epoch(&mut self, period: u32) -> Result<()> {
        self.0.set_epoch(period)
    }

    pub fn never(&mut self) {
        self.0.never();
    }
}

macro_rules! impl_policy_wrapper {
    ($($wrapper:ty),*) => {
        $(
            impl Periodic for $wrapper {
                fn schedule(&self) -> &PeriodicAction {
                    &self.0
                }
            }

            impl From<$wrapper> for PeriodicAction {
                fn from(wrapper: $wrapper) -> Self {
                    wrapper.0
                }
            }
        )*
    };
}

impl_policy_wrapper!(IterationAction, EpochAction, MultiPeriodAction);
