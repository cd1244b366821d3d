//! Run-scoped training state
//!
//! A [`TrainingSession`] lives for exactly one run. The trainer advances the
//! iteration counter; the model advances the epoch counter from inside its
//! step hook. Resources registered on the session are released once when the
//! run ends, whatever the reason.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

/// A resource that must be released deterministically when a run ends
pub trait RunResource: Send {
    /// Human readable name for logs
    fn name(&self) -> &str;

    /// Release the resource. Called at most once.
    fn release(&mut self);
}

/// Immutable view of session counters handed to observers and actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub run_id: Uuid,
    pub iteration: u64,
    pub epoch: u64,
}

/// Mutable state of a single training run
pub struct TrainingSession {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    iteration: u64,
    epoch: u64,
    resources: Vec<Box<dyn RunResource>>,
    released: bool,
}

impl TrainingSession {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            iteration: 0,
            epoch: 0,
            resources: Vec::new(),
            released: false,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Mark an epoch boundary. Called by the model when it finishes a pass over its data.
    pub fn advance_epoch(&mut self) {
        self.epoch += 1;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            run_id: self.run_id,
            iteration: self.iteration,
            epoch: self.epoch,
        }
    }

    /// Attach a resource released when the run ends
    pub fn register_resource(&mut self, resource: Box<dyn RunResource>) {
        debug!("Registered run resource: {}", resource.name());
        if self.released {
            warn!(
                "Session {} already released, releasing {} immediately",
                self.run_id,
                resource.name()
            );
            let mut resource = resource;
            resource.release();
            return;
        }
        self.resources.push(resource);
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Release every registered resource, newest first. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        while let Some(mut resource) = self.resources.pop() {
            debug!("Releasing run resource: {}", resource.name());
            resource.release();
        }
    }

    pub(crate) fn reset_iteration(&mut self) {
        self.iteration = 0;
    }

    pub(crate) fn advance_iteration(&mut self) {
        self.iteration += 1;
    }
}

impl Drop for TrainingSession {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for TrainingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainingSession")
            .field("run_id", &self.run_id)
            .field("iteration", &self.iteration)
            .field("epoch", &self.epoch)
            .field("resources", &self.resources.len())
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct Tracked {
        name: String,
        releases: Arc<AtomicUsize>,
        order: Arc<Mutex<Vec<String>>>,
    }

    impl RunResource for Tracked {
        fn name(&self) -> &str {
            &self.name
        }

        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
            self.order.lock().unwrap().push(self.name.clone());
        }
    }

    fn tracked(name: &str, releases: &Arc<AtomicUsize>, order: &Arc<Mutex<Vec<String>>>) -> Box<Tracked> {
        Box::new(Tracked {
            name: name.to_string(),
            releases: releases.clone(),
            order: order.clone(),
        })
    }

    #[test]
    fn test_release_runs_once_in_reverse_order() {
        let releases = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut session = TrainingSession::new(Uuid::new_v4());
        session.register_resource(tracked("first", &releases, &order));
        session.register_resource(tracked("second", &releases, &order));

        session.release();
        session.release();
        drop(session);

        assert_eq!(releases.load(Ordering::SeqCst), 2);
        assert_eq!(*order.lock().unwrap(), vec!["second", "first"]);
    }

    #[test]
    fn test_drop_releases() {
        let releases = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));
        {
            let mut session = TrainingSession::new(Uuid::new_v4());
            session.register_resource(tracked("scratch", &releases, &order));
        }
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_counters() {
        let mut session = TrainingSession::new(Uuid::new_v4());
        session.advance_iteration();
        session.advance_iteration();
        session.advance_epoch();
        assert_eq!(session.iteration(), 2);
        assert_eq!(session.epoch(), 1);

        session.reset_iteration();
        let snapshot = session.snapshot();
        assert_eq!(snapshot.iteration, 0);
        assert_eq!(snapshot.epoch, 1);
        assert_eq!(snapshot.run_id, session.run_id());
    }
}
