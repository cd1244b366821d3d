use clap::Parser;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Duration;
use tracing::{debug, info, warn};
use trainctl::cli::{Cli, Commands};
use trainctl::config::AppConfig;
use trainctl::coordination::{cancel_on_shutdown_signal, CancellationToken};
use trainctl::demo::{LinearRegressionModel, RegressionReport};
use trainctl::error::{Result, TrainerError};
use trainctl::runner::ConsoleRunner;
use trainctl::schedule::{LearningRateScalingAction, PeriodType};
use trainctl::training::{
    ConsoleProgressSink, ProgressSink, StopReason, TracingProgressSink, TrainerEvent,
    TrainerOptions, TrainerOrchestrator,
};

mod main_runtime;

use main_runtime::{init_logging, init_logging_simple};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(dispatch(cli));

    // A blocked stdin read would otherwise hold the runtime open after the run ends
    runtime.shutdown_timeout(Duration::from_millis(250));
    result
}

async fn dispatch(cli: Cli) -> Result<()> {
    let mut config = AppConfig::load_from(&cli.config)?;

    match cli.command {
        Commands::CheckConfig => {
            init_logging_simple();
            check_config(&config)
        }
        Commands::Train {
            max_epoch,
            seed,
            step_delay_ms,
            quiet,
        } => {
            if let Some(max_epoch) = max_epoch {
                config.trainer.max_epoch = max_epoch;
            }
            if let Some(seed) = seed {
                config.demo.seed = seed;
            }
            if let Some(delay) = step_delay_ms {
                config.demo.step_delay_ms = delay;
            }
            config
                .validate()
                .map_err(|errors| TrainerError::InvalidOptions(errors.join("; ")))?;

            let _guard = init_logging(&config.logging);
            run_train(config, quiet).await
        }
    }
}

fn check_config(config: &AppConfig) -> Result<()> {
    match config.validate() {
        Ok(()) => {
            println!("{}", serde_json::to_string_pretty(config)?);
            println!("\x1b[32m✓ Configuration is valid\x1b[0m");
            Ok(())
        }
        Err(errors) => {
            for e in &errors {
                println!("\x1b[31m✗ {}\x1b[0m", e);
            }
            Err(TrainerError::InvalidOptions(format!(
                "{} configuration error(s)",
                errors.len()
            )))
        }
    }
}

async fn run_train(config: AppConfig, quiet: bool) -> Result<()> {
    let sink: Arc<dyn ProgressSink> = if quiet {
        Arc::new(TracingProgressSink)
    } else {
        Arc::new(ConsoleProgressSink::new())
    };

    let options = TrainerOptions::from_config(&config.trainer)?.with_progress_sink(sink);
    let model = LinearRegressionModel::new(&config.demo);
    let trainer = Arc::new(TrainerOrchestrator::new(model, options)?);

    if let Some(scaling) = config.trainer.learning_rate_scaling {
        let mut action = LearningRateScalingAction::disabled();
        match scaling.every {
            PeriodType::Iteration => action.each_iteration(scaling.period, scaling.scale_factor)?,
            PeriodType::Epoch => action.each_epoch(scaling.period, scaling.scale_factor)?,
            PeriodType::None => {}
        }
        trainer.add_action(action);
    }

    spawn_report_logger(&trainer);

    let cancel = CancellationToken::new();
    cancel_on_shutdown_signal(cancel.clone());

    println!("Commands: stop | quit | reset | pause | resume | status");
    let outcome = ConsoleRunner::new(trainer.clone())
        .with_cancellation(cancel)
        .on_reset(|model: &mut LinearRegressionModel| model.reset_optimizer())
        .run(BufReader::new(tokio::io::stdin()))
        .await?;

    let (weight, bias) = trainer.with_model(|m| m.parameters());
    info!(
        "Run {} finished: {} after {} iterations (w={:.4}, b={:.4})",
        outcome.run_id, outcome.reason, outcome.iterations, weight, bias
    );
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    match outcome.reason {
        StopReason::Faulted { message } => Err(TrainerError::Model(message)),
        _ => Ok(()),
    }
}

/// Log every report published on the event broadcast
fn spawn_report_logger(trainer: &TrainerOrchestrator<LinearRegressionModel>) {
    let mut events = trainer.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(TrainerEvent::TrainReport(report)) => log_report(&report.payload, report.session.epoch),
                Ok(TrainerEvent::StateChanged(state)) => debug!("Trainer is now {}", state),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!("Report logger lagged, skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn log_report(report: &RegressionReport, epoch: u64) {
    match serde_json::to_string(report) {
        Ok(json) => info!(target: "trainctl::report", epoch, "{}", json),
        Err(e) => warn!("Failed to serialize report: {}", e),
    }
}
