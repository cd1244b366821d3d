//! Trainer events
//!
//! Events are delivered synchronously, in order, to registered observers and
//! then published on a broadcast channel for async subscribers. Loop events
//! arrive on the training thread. State changes arrive in the order they were
//! made, on whichever thread is delivering them at the time. Observers must
//! return quickly.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::coordination::TrainerState;
use crate::training::session::SessionSnapshot;

/// Report snapshot pulled from the model when the report schedule fires
#[derive(Debug, Clone)]
pub struct TrainReport<R> {
    pub session: SessionSnapshot,
    /// Wall time of the step that triggered the report
    pub step_elapsed: Duration,
    pub payload: R,
    pub created_at: DateTime<Utc>,
}

/// Events broadcast by a trainer
#[derive(Debug, Clone)]
pub enum TrainerEvent<R> {
    /// Fired on start, pause, resume and when a run ends
    StateChanged(TrainerState),
    /// Fired after every completed iteration
    SequenceTrained(SessionSnapshot),
    /// Fired when the model reports an epoch boundary
    EpochReached(SessionSnapshot),
    /// Fired when the report schedule triggers
    TrainReport(TrainReport<R>),
}

/// Synchronous event observer. All methods default to no-ops.
pub trait TrainerObserver<R>: Send + Sync {
    fn on_state_changed(&self, state: TrainerState) {
        let _ = state;
    }

    fn on_sequence_trained(&self, session: &SessionSnapshot) {
        let _ = session;
    }

    fn on_epoch_reached(&self, session: &SessionSnapshot) {
        let _ = session;
    }

    fn on_train_report(&self, report: &TrainReport<R>) {
        let _ = report;
    }
}

/// Fan-out point for trainer events
pub struct EventHub<R> {
    observers: RwLock<Vec<Arc<dyn TrainerObserver<R>>>>,
    tx: broadcast::Sender<TrainerEvent<R>>,
}

impl<R: Clone + Send + 'static> EventHub<R> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            observers: RwLock::new(Vec::new()),
            tx,
        }
    }

    pub fn add_observer(&self, observer: Arc<dyn TrainerObserver<R>>) {
        self.observers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(observer);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrainerEvent<R>> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: TrainerEvent<R>) {
        // Observers may register further observers, so call them without the lock held
        let observers: Vec<_> = self
            .observers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();

        for observer in &observers {
            match &event {
                TrainerEvent::StateChanged(state) => observer.on_state_changed(*state),
                TrainerEvent::SequenceTrained(session) => observer.on_sequence_trained(session),
                TrainerEvent::EpochReached(session) => observer.on_epoch_reached(session),
                TrainerEvent::TrainReport(report) => observer.on_train_report(report),
            }
        }

        // No receivers is fine
        let _ = self.tx.send(event);
    }
}
