//! Flash command - runs a flash job and streams its progress.

use crate::error::CliError;
use crate::runner::CliRunner;
use clap::Args;
use flashbridge::flash::{FlashJobConfig, FlashMethod, PartitionImage};
use serde_json::Value;
use tracing::warn;

/// Client id charged against the flash rate class.
const CLI_CLIENT: &str = "cli";

#[derive(Debug, Args)]
pub struct FlashArgs {
    /// Device serial to flash
    #[arg(long)]
    pub serial: String,

    /// Partition to flash, as NAME=IMAGE_PATH. Repeatable; partitions are
    /// flashed in the order given.
    #[arg(long = "partition", value_name = "NAME=IMAGE_PATH", required = true)]
    pub partitions: Vec<String>,

    /// Wipe user data after flashing
    #[arg(long)]
    pub wipe: bool,

    /// Reboot to system when the job finishes
    #[arg(long)]
    pub reboot: bool,
}

pub async fn run(runner: &CliRunner, args: &FlashArgs) -> Result<(), CliError> {
    let config = FlashJobConfig {
        device_serial: args.serial.clone(),
        method: FlashMethod::Fastboot,
        partitions: parse_partitions(&args.partitions)?,
        wipe_data: args.wipe,
        reboot_after: args.reboot,
    };

    let coordinator = runner.coordinator();

    // Subscribe before starting so no event is missed.
    let (monitor_id, mut events) = coordinator.subscribe_monitor();
    let job_id = coordinator.start_flash(CLI_CLIENT, config)?;
    println!("Started flash job {}", job_id);

    let result = stream_events(runner, &job_id, &mut events).await;
    coordinator.unsubscribe_monitor(monitor_id);
    result
}

/// Prints events for `job_id` until it reaches a terminal status.
///
/// Ctrl-C requests cancellation of the job rather than abandoning it.
async fn stream_events(
    runner: &CliRunner,
    job_id: &flashbridge::flash::JobId,
    events: &mut tokio::sync::mpsc::Receiver<String>,
) -> Result<(), CliError> {
    loop {
        let payload = tokio::select! {
            payload = events.recv() => match payload {
                Some(payload) => payload,
                None => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => {
                println!("Cancelling flash job {}...", job_id);
                runner.coordinator().cancel_flash(job_id)?;
                continue;
            }
        };

        let event: Value = match serde_json::from_str(&payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Skipping malformed event");
                continue;
            }
        };
        if event["jobId"].as_str() != Some(job_id.as_str()) {
            continue;
        }

        match event["type"].as_str() {
            Some("log") => {
                if let Some(line) = event["data"]["line"].as_str() {
                    println!("  {}", line);
                }
            }
            Some("progress") => {
                let percent = event["data"]["progress"].as_u64().unwrap_or(0);
                match event["data"]["currentPartition"].as_str() {
                    Some(partition) => println!("  {}% ({})", percent, partition),
                    None => println!("  {}%", percent),
                }
            }
            Some("status") => {
                let status = event["data"]["status"].as_str().unwrap_or("unknown");
                println!("Status: {}", status);
                match status {
                    "completed" => return Ok(()),
                    "failed" => {
                        let reason = event["data"]["error"]
                            .as_str()
                            .unwrap_or("unknown failure")
                            .to_string();
                        return Err(CliError::JobFailed {
                            job_id: job_id.to_string(),
                            reason,
                        });
                    }
                    "cancelled" => {
                        return Err(CliError::JobCancelled {
                            job_id: job_id.to_string(),
                        })
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }
}

fn parse_partitions(raw: &[String]) -> Result<Vec<PartitionImage>, CliError> {
    raw.iter()
        .map(|entry| {
            entry
                .split_once('=')
                .filter(|(name, path)| !name.is_empty() && !path.is_empty())
                .map(|(name, path)| PartitionImage::new(name, path))
                .ok_or_else(|| CliError::InvalidPartition(entry.clone()))
        })
        .collect()
}
