//! Training orchestrator
//!
//! Drives a [`TrainableModel`] through a pausable, cancellable loop on a
//! blocking worker thread:
//! - `Idle -> Training -> {Paused <-> Training} -> Stopped`
//! - at most one run per trainer at a time
//! - periodic memory resets, reports and scheduled actions
//! - faults from model hooks end the run without escaping to the caller

use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::coordination::{CancellationToken, GateWait, PauseGate, StopFlag, TrainerState};
use crate::error::{Result, TrainerError};
use crate::schedule::{PeriodicAction, ScheduledAction};
use crate::training::events::{EventHub, TrainReport, TrainerEvent, TrainerObserver};
use crate::training::model::TrainableModel;
use crate::training::options::TrainerOptions;
use crate::training::session::{SessionSnapshot, TrainingSession};

const EVENT_CAPACITY: usize = 256;

/// Why a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// `stop()` was observed
    Stopped,
    /// The cancellation token fired
    Cancelled,
    /// The epoch counter exceeded `max_epoch`
    EpochLimit,
    /// A model hook failed or panicked
    Faulted { message: String },
}

impl StopReason {
    pub fn is_fault(&self) -> bool {
        matches!(self, StopReason::Faulted { .. })
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Stopped => write!(f, "stopped"),
            StopReason::Cancelled => write!(f, "cancelled"),
            StopReason::EpochLimit => write!(f, "epoch limit reached"),
            StopReason::Faulted { message } => write!(f, "faulted: {}", message),
        }
    }
}

/// Summary of a finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub reason: StopReason,
    pub iterations: u64,
    pub epoch: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Live counters of the current (or last) run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainerProgress {
    pub iteration: u64,
    pub epoch: u64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        warn!("Recovering poisoned lock after a panic in the training loop");
        poisoned.into_inner()
    })
}

/// State shared between the trainer, its control handles and the worker
struct Shared<R> {
    is_training: AtomicBool,
    is_paused: AtomicBool,
    stop: StopFlag,
    gate: PauseGate,
    state_tx: watch::Sender<TrainerState>,
    transition: Mutex<()>,
    /// State changes waiting for delivery, queued in transition order
    pending_states: Mutex<VecDeque<TrainerState>>,
    delivering_states: AtomicBool,
    iteration: AtomicU64,
    epoch: AtomicU64,
    events: EventHub<R>,
}

impl<R: Clone + Send + 'static> Shared<R> {
    fn new() -> Self {
        let (state_tx, _) = watch::channel(TrainerState::Idle);
        Self {
            is_training: AtomicBool::new(false),
            is_paused: AtomicBool::new(false),
            stop: StopFlag::new(),
            gate: PauseGate::new(),
            state_tx,
            transition: Mutex::new(()),
            pending_states: Mutex::new(VecDeque::new()),
            delivering_states: AtomicBool::new(false),
            iteration: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            events: EventHub::new(EVENT_CAPACITY),
        }
    }

    fn state(&self) -> TrainerState {
        *self.state_tx.borrow()
    }

    /// Must be called with the transition lock held
    fn set_state(&self, state: TrainerState) {
        let from = self.state_tx.send_replace(state);
        debug!("Trainer state: {} -> {}", from, state);
        lock(&self.pending_states).push_back(state);
    }

    /// Deliver queued state changes in the order they were made.
    ///
    /// Only one thread delivers at a time and no lock is held while observers
    /// run, so an observer may itself pause or resume: its change is queued and
    /// delivered by the current deliverer once the observer returns.
    fn deliver_states(&self) {
        loop {
            if self
                .delivering_states
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return;
            }

            loop {
                let next = lock(&self.pending_states).pop_front();
                match next {
                    Some(state) => self.events.emit(TrainerEvent::StateChanged(state)),
                    None => break,
                }
            }

            self.delivering_states.store(false, Ordering::SeqCst);
            if lock(&self.pending_states).is_empty() {
                return;
            }
        }
    }

    fn begin_run(&self) {
        {
            let _guard = lock(&self.transition);
            self.is_paused.store(false, Ordering::SeqCst);
            self.gate.open();
            self.stop.reset();
            self.iteration.store(0, Ordering::SeqCst);
            self.epoch.store(0, Ordering::SeqCst);
            self.set_state(TrainerState::Training);
        }
        self.deliver_states();
    }

    fn finish_run(&self) {
        {
            let _guard = lock(&self.transition);
            self.is_paused.store(false, Ordering::SeqCst);
            self.gate.open();
            self.is_training.store(false, Ordering::SeqCst);
            self.set_state(TrainerState::Stopped);
        }
        self.deliver_states();
    }

    fn pause(&self) {
        {
            let _guard = lock(&self.transition);
            if !self.is_training.load(Ordering::SeqCst) {
                debug!("Pause ignored, no run in progress");
                return;
            }
            self.is_paused.store(true, Ordering::SeqCst);
            self.gate.close();
            self.set_state(TrainerState::Paused);
        }
        info!("Training pause requested");
        self.deliver_states();
    }

    fn resume(&self) {
        {
            let _guard = lock(&self.transition);
            if !self.is_training.load(Ordering::SeqCst) {
                debug!("Resume ignored, no run in progress");
                return;
            }
            self.is_paused.store(false, Ordering::SeqCst);
            self.gate.open();
            self.set_state(TrainerState::Training);
        }
        info!("Training resume requested");
        self.deliver_states();
    }

    fn stop(&self) {
        info!("Training stop requested");
        self.stop.request();
    }

    fn publish(&self, session: &TrainingSession) {
        self.iteration.store(session.iteration(), Ordering::SeqCst);
        self.epoch.store(session.epoch(), Ordering::SeqCst);
    }

    fn progress(&self) -> TrainerProgress {
        TrainerProgress {
            iteration: self.iteration.load(Ordering::SeqCst),
            epoch: self.epoch.load(Ordering::SeqCst),
        }
    }
}

/// Cloneable handle for controlling a trainer from other threads or observers
pub struct TrainerControl<R> {
    shared: Arc<Shared<R>>,
}

impl<R> Clone for TrainerControl<R> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<R: Clone + Send + 'static> TrainerControl<R> {
    pub fn pause(&self) {
        self.shared.pause();
    }

    pub fn resume(&self) {
        self.shared.resume();
    }

    pub fn stop(&self) {
        self.shared.stop();
    }

    pub fn state(&self) -> TrainerState {
        self.shared.state()
    }

    pub fn is_training(&self) -> bool {
        self.shared.is_training.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.shared.is_paused.load(Ordering::SeqCst)
    }

    pub fn progress(&self) -> TrainerProgress {
        self.shared.progress()
    }

    /// Receiver that observes every state transition
    pub fn state_changes(&self) -> watch::Receiver<TrainerState> {
        self.shared.state_tx.subscribe()
    }
}

/// Resolves when a run ends, with the reason it ended
#[derive(Debug)]
pub struct TrainingHandle {
    run_id: Uuid,
    join: JoinHandle<RunOutcome>,
}

impl TrainingHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl Future for TrainingHandle {
    type Output = Result<RunOutcome>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.join)
            .poll(cx)
            .map(|joined| joined.map_err(|e| TrainerError::WorkerLost(e.to_string())))
    }
}

type ActionList<M> = Vec<Box<dyn ScheduledAction<M>>>;

/// Orchestrates training runs of a single model
pub struct TrainerOrchestrator<M: TrainableModel> {
    model: Arc<Mutex<M>>,
    options: Arc<TrainerOptions>,
    actions: Arc<Mutex<ActionList<M>>>,
    shared: Arc<Shared<M::Report>>,
}

impl<M: TrainableModel> TrainerOrchestrator<M> {
    /// Create a trainer, validating the options against the model
    pub fn new(model: M, options: TrainerOptions) -> Result<Self> {
        options.validate()?;
        model.validate_options(&options)?;

        info!(
            "Trainer configured: max_epoch={}, reset_memory={}, report_progress={}",
            options.max_epoch, options.reset_memory, options.report_progress
        );

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            options: Arc::new(options),
            actions: Arc::new(Mutex::new(Vec::new())),
            shared: Arc::new(Shared::new()),
        })
    }

    pub fn options(&self) -> &TrainerOptions {
        &self.options
    }

    /// Handle for pausing, resuming and stopping from elsewhere
    pub fn control(&self) -> TrainerControl<M::Report> {
        TrainerControl {
            shared: self.shared.clone(),
        }
    }

    /// Register an action, subscribed at the start of every run
    pub fn add_action(&self, action: impl ScheduledAction<M> + 'static) {
        lock(&self.actions).push(Box::new(action));
    }

    pub fn action_count(&self) -> usize {
        lock(&self.actions).len()
    }

    pub fn add_observer(&self, observer: Arc<dyn TrainerObserver<M::Report>>) {
        self.shared.events.add_observer(observer);
    }

    /// Subscribe to the event broadcast
    pub fn subscribe(&self) -> broadcast::Receiver<TrainerEvent<M::Report>> {
        self.shared.events.subscribe()
    }

    /// Lock the model and run `f` on it. Blocks while a step is in flight.
    pub fn with_model<T>(&self, f: impl FnOnce(&mut M) -> T) -> T {
        let mut model = lock(&self.model);
        f(&mut model)
    }

    pub fn state(&self) -> TrainerState {
        self.shared.state()
    }

    pub fn is_training(&self) -> bool {
        self.shared.is_training.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.shared.is_paused.load(Ordering::SeqCst)
    }

    pub fn progress(&self) -> TrainerProgress {
        self.shared.progress()
    }

    pub fn pause(&self) {
        self.shared.pause();
    }

    pub fn resume(&self) {
        self.shared.resume();
    }

    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Start a run on a blocking worker thread.
    ///
    /// Fails without touching any state if a run is already active or if no
    /// tokio runtime is available.
    pub fn train(&self, cancel: CancellationToken) -> Result<TrainingHandle> {
        let runtime = Handle::try_current().map_err(|_| TrainerError::NoRuntime)?;

        if self
            .shared
            .is_training
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Training start rejected: a run is already in progress");
            return Err(TrainerError::AlreadyTraining);
        }

        let run_id = Uuid::new_v4();
        self.shared.begin_run();

        let worker = RunWorker {
            run_id,
            model: self.model.clone(),
            options: self.options.clone(),
            actions: self.actions.clone(),
            shared: self.shared.clone(),
            cancel,
            runtime: runtime.clone(),
        };

        let join = runtime.spawn_blocking(move || worker.run());
        Ok(TrainingHandle { run_id, join })
    }
}

/// Everything one run needs, moved onto the worker thread
struct RunWorker<M: TrainableModel> {
    run_id: Uuid,
    model: Arc<Mutex<M>>,
    options: Arc<TrainerOptions>,
    actions: Arc<Mutex<ActionList<M>>>,
    shared: Arc<Shared<M::Report>>,
    cancel: CancellationToken,
    runtime: Handle,
}

impl<M: TrainableModel> RunWorker<M> {
    fn run(self) -> RunOutcome {
        let started_at = Utc::now();
        info!(run_id = %self.run_id, "Training run started");

        let mut session = TrainingSession::new(self.run_id);
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.drive(&mut session)));

        let reason = match result {
            Ok(Ok(reason)) => reason,
            Ok(Err(e)) => self.fault(e.to_string()),
            Err(payload) => self.fault(format!("training loop panicked: {}", panic_message(&payload))),
        };

        self.unsubscribe_actions();

        let outcome = RunOutcome {
            run_id: self.run_id,
            reason,
            iterations: session.iteration(),
            epoch: session.epoch(),
            started_at,
            finished_at: Utc::now(),
        };

        // Tear down before announcing the end, so a new run never overlaps this one
        if let Some(sink) = self.options.sink() {
            sink.complete();
        }
        session.release();
        self.shared.finish_run();

        info!(
            run_id = %self.run_id,
            "Training run ended ({}) after {} iterations at epoch {}",
            outcome.reason,
            outcome.iterations,
            outcome.epoch
        );
        outcome
    }

    fn drive(&self, session: &mut TrainingSession) -> Result<StopReason> {
        session.reset_iteration();
        self.shared.publish(session);

        lock(&self.model).init_training(session)?;
        self.subscribe_actions();

        loop {
            if self.cancel.is_cancelled() || self.shared.stop.is_requested() {
                self.message("Training stopped");
                return Ok(if self.cancel.is_cancelled() {
                    StopReason::Cancelled
                } else {
                    StopReason::Stopped
                });
            }

            if !self.shared.gate.is_open() {
                self.message("Training paused");
                let waited = self
                    .runtime
                    .block_on(self.shared.gate.wait(&self.cancel, &self.shared.stop));
                match waited {
                    GateWait::Opened => self.message("Training resumed"),
                    GateWait::Cancelled => {
                        info!("Training cancelled while paused");
                        return Ok(StopReason::Cancelled);
                    }
                    GateWait::Stopped => {
                        self.message("Training stopped");
                        return Ok(StopReason::Stopped);
                    }
                }
            }

            let epoch_before = session.epoch();
            let watch = Instant::now();
            lock(&self.model).train_iteration(session)?;
            let elapsed = watch.elapsed();

            session.advance_iteration();
            self.shared.publish(session);
            let iteration = session.iteration();

            for epoch in epoch_before + 1..=session.epoch() {
                self.on_epoch_reached(SessionSnapshot { epoch, ..session.snapshot() }, elapsed)?;
            }

            if self.options.reset_memory.should_do_on_iteration(iteration) {
                debug!("Resetting model memory at iteration {}", iteration);
                lock(&self.model).reset_memory()?;
            }

            let snapshot = session.snapshot();
            self.shared.events.emit(TrainerEvent::SequenceTrained(snapshot));
            self.run_actions(&snapshot, |schedule, s| schedule.should_do_on_iteration(s.iteration))?;

            if self.options.report_progress.should_do_on_iteration(iteration) {
                self.report(&snapshot, elapsed)?;
            }

            if session.epoch() > self.options.max_epoch {
                self.message(&format!(
                    "{} reached, stopped training.",
                    self.options.max_epoch
                ));
                return Ok(StopReason::EpochLimit);
            }
        }
    }

    fn on_epoch_reached(&self, snapshot: SessionSnapshot, elapsed: Duration) -> Result<()> {
        debug!("Epoch {} reached at iteration {}", snapshot.epoch, snapshot.iteration);
        self.shared.events.emit(TrainerEvent::EpochReached(snapshot));

        if let Some(sink) = self.options.sink() {
            sink.set_progress(snapshot.epoch, self.options.max_epoch, "epoch");
        }

        if self.options.reset_memory.should_do_on_epoch(snapshot.epoch) {
            debug!("Resetting model memory at epoch {}", snapshot.epoch);
            lock(&self.model).reset_memory()?;
        }

        self.run_actions(&snapshot, |schedule, s| schedule.should_do_on_epoch(s.epoch))?;

        if self.options.report_progress.should_do_on_epoch(snapshot.epoch) {
            self.report(&snapshot, elapsed)?;
        }
        Ok(())
    }

    fn report(&self, snapshot: &SessionSnapshot, elapsed: Duration) -> Result<()> {
        let (payload, line) = {
            let mut model = lock(&self.model);
            let payload = model.get_and_flush_training_report(snapshot)?;
            let line = if self.options.report_messages && self.options.sink().is_some() {
                Some(format_progress_line(&*model, snapshot, elapsed))
            } else {
                None
            };
            (payload, line)
        };

        self.shared.events.emit(TrainerEvent::TrainReport(TrainReport {
            session: *snapshot,
            step_elapsed: elapsed,
            payload,
            created_at: Utc::now(),
        }));

        if let (Some(line), Some(sink)) = (line, self.options.sink()) {
            sink.set_item_progress(&line);
        }
        Ok(())
    }

    fn run_actions(
        &self,
        snapshot: &SessionSnapshot,
        due: impl Fn(&PeriodicAction, &SessionSnapshot) -> bool,
    ) -> Result<()> {
        let mut actions = lock(&self.actions);
        for action in actions.iter_mut() {
            if due(action.schedule(), snapshot) {
                debug!("Running scheduled action {}", action.name());
                let mut model = lock(&self.model);
                action.execute(&mut *model, snapshot)?;
            }
        }
        Ok(())
    }

    fn subscribe_actions(&self) {
        let mut actions = lock(&self.actions);
        for action in actions.iter_mut() {
            action.subscribe();
        }
        debug!("Subscribed {} scheduled action(s)", actions.len());
    }

    fn unsubscribe_actions(&self) {
        let mut actions = lock(&self.actions);
        for action in actions.iter_mut() {
            action.unsubscribe();
        }
    }

    fn message(&self, text: &str) {
        info!(run_id = %self.run_id, "{}", text);
        if let Some(sink) = self.options.sink() {
            sink.message(text);
        }
    }

    fn fault(&self, message: String) -> StopReason {
        error!(run_id = %self.run_id, "Training run failed: {}", message);
        if let Some(sink) = self.options.sink() {
            sink.message(&message);
        }
        StopReason::Faulted { message }
    }
}

/// `#<epoch>[<iteration progress> <seconds>s] <model message>`
fn format_progress_line<M: TrainableModel>(
    model: &M,
    snapshot: &SessionSnapshot,
    elapsed: Duration,
) -> String {
    let pre = format!("#{}[", snapshot.epoch);
    let post = format!(
        " {:.4}s] {}",
        elapsed.as_secs_f64(),
        model.training_report_message().unwrap_or_default()
    );
    let progress = model.iteration_progress(snapshot, pre.len() + post.len());
    format!("{}{}{}", pre, progress, post)
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
