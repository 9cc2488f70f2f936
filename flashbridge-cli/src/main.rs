//! flashbridge CLI - command-line interface to the device coordinator.

mod commands;
mod error;
mod runner;

use clap::{Parser, Subcommand};
use error::CliError;
use runner::CliRunner;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "flashbridge")]
#[command(about = "Coordinate firmware flashing on connected devices", version)]
struct Cli {
    /// Path to the config file (defaults next to the working directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List devices visible to the flashing tool and the device bridge
    Devices,
    /// Probe the configured external tools for presence and version
    Tools,
    /// Flash partitions on a device, streaming progress until it finishes
    Flash(commands::flash::FlashArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        e.exit();
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let runner = CliRunner::new(cli.config.as_deref())?;

    match &cli.command {
        Command::Devices => {
            runner.log_startup("devices");
            commands::devices::run(&runner).await
        }
        Command::Tools => {
            runner.log_startup("tools");
            commands::tools::run(&runner).await
        }
        Command::Flash(args) => {
            runner.log_startup("flash");
            commands::flash::run(&runner, args).await
        }
    }
}
