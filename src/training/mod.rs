//! Training orchestration
//!
//! - `session`: run-scoped counters and resources
//! - `options`: validated run configuration
//! - `model`: the capability contract the trainer drives
//! - `progress`: best-effort progress sinks
//! - `events`: observer and broadcast fan-out
//! - `trainer`: the state machine and loop driver

pub mod events;
pub mod model;
pub mod options;
pub mod progress;
pub mod session;
pub mod trainer;

pub use events::{EventHub, TrainReport, TrainerEvent, TrainerObserver};
pub use model::TrainableModel;
pub use options::TrainerOptions;
pub use progress::{ConsoleProgressSink, ProgressSink, TracingProgressSink};
pub use session::{RunResource, SessionSnapshot, TrainingSession};
pub use trainer::{
    RunOutcome, StopReason, TrainerControl, TrainerOrchestrator, TrainerProgress, TrainingHandle,
};
