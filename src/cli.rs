use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "trainctl")]
#[command(version = "0.1.0")]
#[command(about = "Pausable, cancellable training loop driver", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration directory (default.toml, then $TRAINCTL_ENV)
    #[arg(short, long, default_value = "config", global = true)]
    pub config: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train the demo model; reads stop|quit|reset|pause|resume|status from stdin
    Train {
        /// Override trainer.max_epoch
        #[arg(long)]
        max_epoch: Option<u64>,
        /// Override demo.seed
        #[arg(long)]
        seed: Option<u64>,
        /// Override demo.step_delay_ms
        #[arg(long)]
        step_delay_ms: Option<u64>,
        /// Send progress to the log instead of the terminal
        #[arg(short, long)]
        quiet: bool,
    },
    /// Validate the configuration and print the resolved values
    CheckConfig,
}
