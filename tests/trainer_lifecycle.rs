mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{wait_for_state, OnIteration, RecordingSink, ScriptedModel};
use trainctl::coordination::{CancellationToken, TrainerState};
use trainctl::error::TrainerError;
use trainctl::schedule::{LearningRateScalingAction, PeriodicAction, PeriodicCallback};
use trainctl::training::{
    StopReason, TrainerEvent, TrainerObserver, TrainerOptions, TrainerOrchestrator,
};

fn trainer(model: ScriptedModel, options: TrainerOptions) -> TrainerOrchestrator<ScriptedModel> {
    TrainerOrchestrator::new(model, options).expect("valid options")
}

#[tokio::test]
async fn iteration_reports_fire_on_period_and_epoch_limit_ends_run() {
    let sink = Arc::new(RecordingSink::default());
    let options = TrainerOptions::new(0)
        .with_report_progress(PeriodicAction::each_iteration(3).unwrap())
        .with_report_messages(true)
        .with_progress_sink(sink.clone());
    let trainer = trainer(ScriptedModel::new(7), options);

    let outcome = trainer.train(CancellationToken::new()).unwrap().await.unwrap();

    assert_eq!(outcome.reason, StopReason::EpochLimit);
    assert_eq!(outcome.iterations, 7);
    assert_eq!(outcome.epoch, 1);
    assert_eq!(trainer.with_model(|m| m.reports.clone()), vec![3, 6]);

    let lines = sink.lines();
    assert_eq!(lines.len(), 5, "{lines:?}");
    assert!(lines[0].starts_with("item:#0[I:3 ") && lines[0].ends_with("s] lr=1"));
    assert!(lines[1].starts_with("item:#0[I:6 "));
    assert_eq!(lines[2], "progress:epoch 1/0");
    assert_eq!(lines[3], "message:0 reached, stopped training.");
    assert_eq!(lines[4], "complete");
}

#[tokio::test]
async fn memory_resets_follow_epoch_and_iteration_cadence() {
    let options =
        TrainerOptions::new(2).with_reset_memory(PeriodicAction::each_epoch(1).unwrap());
    let by_epoch = trainer(ScriptedModel::new(2), options);
    let outcome = by_epoch.train(CancellationToken::new()).unwrap().await.unwrap();

    assert_eq!(outcome.reason, StopReason::EpochLimit);
    assert_eq!(outcome.iterations, 6);
    assert_eq!(outcome.epoch, 3);
    assert_eq!(by_epoch.with_model(|m| m.resets_at.clone()), vec![2, 4, 6]);

    let options =
        TrainerOptions::new(0).with_reset_memory(PeriodicAction::each_iteration(2).unwrap());
    let by_iteration = trainer(ScriptedModel::new(5), options);
    by_iteration.train(CancellationToken::new()).unwrap().await.unwrap();

    assert_eq!(by_iteration.with_model(|m| m.resets_at.clone()), vec![2, 4]);
}

#[tokio::test]
async fn epoch_reports_fire_at_epoch_boundaries() {
    let options =
        TrainerOptions::new(1).with_report_progress(PeriodicAction::each_epoch(1).unwrap());
    let trainer = trainer(ScriptedModel::new(3), options);

    let outcome = trainer.train(CancellationToken::new()).unwrap().await.unwrap();

    assert_eq!(outcome.iterations, 6);
    assert_eq!(trainer.with_model(|m| m.reports.clone()), vec![3, 6]);
}

#[tokio::test]
async fn events_are_broadcast_in_order() {
    let trainer = trainer(ScriptedModel::new(2), TrainerOptions::new(0));
    let mut events = trainer.subscribe();

    trainer.train(CancellationToken::new()).unwrap().await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(match event {
            TrainerEvent::StateChanged(state) => format!("state:{state}"),
            TrainerEvent::SequenceTrained(s) => format!("seq:{}", s.iteration),
            TrainerEvent::EpochReached(s) => format!("epoch:{}", s.epoch),
            TrainerEvent::TrainReport(r) => format!("report:{}", r.payload),
        });
    }

    assert_eq!(
        seen,
        vec!["state:training", "seq:1", "epoch:1", "seq:2", "state:stopped"]
    );
}

#[tokio::test]
async fn model_error_ends_run_as_fault_and_trainer_can_restart() {
    let sink = Arc::new(RecordingSink::default());
    let options = TrainerOptions::new(1).with_progress_sink(sink.clone());
    let model = ScriptedModel::new(3).failing_at(5);
    let released = model.released.clone();
    let trainer = trainer(model, options);

    let outcome = trainer.train(CancellationToken::new()).unwrap().await.unwrap();

    match &outcome.reason {
        StopReason::Faulted { message } => assert!(message.contains("scripted failure at step 5")),
        other => panic!("expected fault, got {other:?}"),
    }
    assert_eq!(outcome.iterations, 4);
    assert_eq!(trainer.state(), TrainerState::Stopped);
    assert!(!trainer.is_training());
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert!(sink
        .lines()
        .iter()
        .any(|l| l.starts_with("message:") && l.contains("scripted failure")));

    // Fresh session: counters restart, resources registered again
    let second = trainer.train(CancellationToken::new()).unwrap().await.unwrap();
    assert_eq!(second.reason, StopReason::EpochLimit);
    assert_eq!(second.iterations, 4);
    assert_ne!(second.run_id, outcome.run_id);
    assert_eq!(trainer.with_model(|m| m.inits), 2);
    assert_eq!(released.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn panic_in_model_is_contained() {
    let trainer = trainer(ScriptedModel::new(0).panicking_at(3), TrainerOptions::new(1));

    let outcome = trainer.train(CancellationToken::new()).unwrap().await.unwrap();

    match &outcome.reason {
        StopReason::Faulted { message } => assert!(message.contains("scripted panic at step 3")),
        other => panic!("expected fault, got {other:?}"),
    }
    assert_eq!(outcome.iterations, 2);
    assert!(!trainer.is_training());
    assert_eq!(trainer.with_model(|m| m.steps), 3);
}

#[tokio::test]
async fn stop_requested_from_observer_ends_after_current_iteration() {
    let trainer = trainer(ScriptedModel::new(0), TrainerOptions::new(1));
    let control = trainer.control();
    trainer.add_observer(Arc::new(OnIteration(move |iteration| {
        if iteration == 5 {
            control.stop();
        }
    })));

    let outcome = trainer.train(CancellationToken::new()).unwrap().await.unwrap();

    assert_eq!(outcome.reason, StopReason::Stopped);
    assert_eq!(outcome.iterations, 5);
    assert_eq!(trainer.with_model(|m| m.steps), 5);
}

#[tokio::test]
async fn pause_holds_the_loop_until_resumed() {
    let sink = Arc::new(RecordingSink::default());
    let options = TrainerOptions::new(0).with_progress_sink(sink.clone());
    let trainer = trainer(ScriptedModel::new(10), options);
    let control = trainer.control();
    let pauser = control.clone();
    trainer.add_observer(Arc::new(OnIteration(move |iteration| {
        if iteration == 3 {
            pauser.pause();
        }
    })));

    let handle = trainer.train(CancellationToken::new()).unwrap();
    wait_for_state(&control, TrainerState::Paused).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(trainer.is_paused());
    assert_eq!(trainer.progress().iteration, 3);
    assert_eq!(trainer.with_model(|m| m.steps), 3);

    trainer.resume();
    let outcome = handle.await.unwrap();

    assert_eq!(outcome.reason, StopReason::EpochLimit);
    assert_eq!(outcome.iterations, 10);
    assert!(!trainer.is_paused());
    let lines = sink.lines();
    assert!(lines.contains(&"message:Training paused".to_string()));
    assert!(lines.contains(&"message:Training resumed".to_string()));
}

#[tokio::test]
async fn cancel_while_paused_wakes_the_loop() {
    let trainer = trainer(ScriptedModel::new(0), TrainerOptions::new(1));
    let control = trainer.control();
    let pauser = control.clone();
    trainer.add_observer(Arc::new(OnIteration(move |iteration| {
        if iteration == 2 {
            pauser.pause();
        }
    })));

    let cancel = CancellationToken::new();
    let handle = trainer.train(cancel.clone()).unwrap();
    wait_for_state(&control, TrainerState::Paused).await;
    cancel.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("cancelled run should finish")
        .unwrap();
    assert_eq!(outcome.reason, StopReason::Cancelled);
    assert!(!outcome.reason.is_fault());
    assert_eq!(outcome.iterations, 2);
    assert_eq!(trainer.state(), TrainerState::Stopped);
}

#[tokio::test]
async fn second_train_is_rejected_while_running_and_stop_wakes_paused_loop() {
    let trainer = trainer(ScriptedModel::new(0), TrainerOptions::new(1));
    let control = trainer.control();
    let pauser = control.clone();
    trainer.add_observer(Arc::new(OnIteration(move |iteration| {
        if iteration == 1 {
            pauser.pause();
        }
    })));

    let handle = trainer.train(CancellationToken::new()).unwrap();
    wait_for_state(&control, TrainerState::Paused).await;

    let err = trainer.train(CancellationToken::new()).unwrap_err();
    assert!(matches!(err, TrainerError::AlreadyTraining));
    assert!(trainer.is_training());

    trainer.stop();
    let outcome = handle.await.unwrap();
    assert_eq!(outcome.reason, StopReason::Stopped);
    assert_eq!(outcome.iterations, 1);
    assert!(!trainer.is_training());
}

#[tokio::test]
async fn pre_cancelled_token_ends_run_before_first_step() {
    let model = ScriptedModel::new(0);
    let released = model.released.clone();
    let trainer = trainer(model, TrainerOptions::new(1));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = trainer.train(cancel).unwrap().await.unwrap();

    assert_eq!(outcome.reason, StopReason::Cancelled);
    assert_eq!(outcome.iterations, 0);
    assert_eq!(trainer.with_model(|m| m.steps), 0);
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn scheduled_actions_run_on_their_cadence() {
    let trainer = trainer(ScriptedModel::new(2), TrainerOptions::new(2));
    trainer.add_action(LearningRateScalingAction::new(1, 0.5).unwrap());

    let fired = Arc::new(Mutex::new(Vec::new()));
    let record = fired.clone();
    trainer.add_action(PeriodicCallback::new(
        "record",
        PeriodicAction::each_iteration(4).unwrap(),
        move |_model: &mut ScriptedModel, session| {
            record.lock().unwrap().push(session.iteration);
            Ok(())
        },
    ));
    assert_eq!(trainer.action_count(), 2);

    let outcome = trainer.train(CancellationToken::new()).unwrap().await.unwrap();

    assert_eq!(outcome.iterations, 6);
    assert_eq!(trainer.with_model(|m| m.learning_rate), 0.125);
    assert_eq!(*fired.lock().unwrap(), vec![4]);
}

#[tokio::test]
async fn failing_action_faults_the_run() {
    let trainer = trainer(ScriptedModel::new(0), TrainerOptions::new(1));
    trainer.add_action(PeriodicCallback::new(
        "explode",
        PeriodicAction::each_iteration(2).unwrap(),
        |_model: &mut ScriptedModel, _session| Err(TrainerError::Model("action failed".into())),
    ));

    let outcome = trainer.train(CancellationToken::new()).unwrap().await.unwrap();

    assert!(outcome.reason.is_fault());
    assert_eq!(outcome.iterations, 2);
}

#[test]
fn report_messages_require_a_report_schedule() {
    let options = TrainerOptions::new(1).with_report_messages(true);
    let err = TrainerOrchestrator::new(ScriptedModel::new(1), options)
        .err()
        .expect("options should be rejected");
    assert!(err.is_configuration());
}

/// Records what had been torn down at the moment `Stopped` was announced
struct TeardownRecorder {
    released: Arc<AtomicUsize>,
    sink: Arc<RecordingSink>,
    seen: Mutex<Vec<(usize, usize)>>,
}

impl TrainerObserver<u64> for TeardownRecorder {
    fn on_state_changed(&self, state: TrainerState) {
        if state == TrainerState::Stopped {
            let completes = self.sink.lines().iter().filter(|l| *l == "complete").count();
            self.seen
                .lock()
                .unwrap()
                .push((self.released.load(Ordering::SeqCst), completes));
        }
    }
}

#[tokio::test]
async fn run_is_torn_down_before_stopped_is_announced() {
    let sink = Arc::new(RecordingSink::default());
    let model = ScriptedModel::new(1);
    let released = model.released.clone();
    let trainer = trainer(model, TrainerOptions::new(0).with_progress_sink(sink.clone()));
    let teardown = Arc::new(TeardownRecorder {
        released: released.clone(),
        sink: sink.clone(),
        seen: Mutex::new(Vec::new()),
    });
    trainer.add_observer(teardown.clone());

    trainer.train(CancellationToken::new()).unwrap().await.unwrap();

    // A controller reacting to Stopped may start the next run straight away
    wait_for_state(&trainer.control(), TrainerState::Stopped).await;
    assert_eq!(released.load(Ordering::SeqCst), 1);
    let second = trainer.train(CancellationToken::new()).unwrap().await.unwrap();
    assert_eq!(second.reason, StopReason::EpochLimit);

    assert_eq!(*teardown.seen.lock().unwrap(), vec![(1, 1), (2, 2)]);
    assert_eq!(trainer.with_model(|m| m.inits), 2);
}

#[derive(Default)]
struct LastState(Mutex<Option<TrainerState>>);

impl TrainerObserver<u64> for LastState {
    fn on_state_changed(&self, state: TrainerState) {
        *self.0.lock().unwrap() = Some(state);
    }
}

#[tokio::test]
async fn racing_pause_and_resume_deliver_state_changes_in_order() {
    let model = ScriptedModel::new(0).with_step_delay(Duration::from_millis(1));
    let trainer = trainer(model, TrainerOptions::new(1));
    let last = Arc::new(LastState::default());
    trainer.add_observer(last.clone());

    let cancel = CancellationToken::new();
    let handle = trainer.train(cancel.clone()).unwrap();

    for round in 0..500 {
        std::thread::scope(|scope| {
            scope.spawn(|| trainer.pause());
            scope.spawn(|| trainer.resume());
        });
        assert_eq!(
            *last.0.lock().unwrap(),
            Some(trainer.state()),
            "observer out of step with trainer in round {round}"
        );
    }

    cancel.cancel();
    let outcome = handle.await.unwrap();
    assert_eq!(outcome.reason, StopReason::Cancelled);
    assert_eq!(*last.0.lock().unwrap(), Some(TrainerState::Stopped));
}
