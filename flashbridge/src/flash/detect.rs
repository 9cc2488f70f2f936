//! Device enumeration via the external tools.
//!
//! Parses `fastboot devices` / `adb devices` output into serial lists.
//! Runs through the reliability layer so a wedged tool trips its own
//! circuit instead of hanging every preflight check.

use crate::command::{circuit_for, CommandRunner, RunOptions};
use crate::reliability::{Reliability, ReliabilityError};
use std::time::Duration;
use thiserror::Error;

/// Timeout for device enumeration probes; listing devices is fast when
/// the tool is healthy.
const DETECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Errors from device enumeration.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error(transparent)]
    Rejected(#[from] ReliabilityError),

    #[error("{tool} failed to list devices: {message}")]
    ToolFailed { tool: String, message: String },
}

/// Lists device serials currently enumerated by the flashing tool.
pub async fn list_flash_devices(
    runner: &CommandRunner,
    reliability: &Reliability,
    tool: &str,
) -> Result<Vec<String>, DetectError> {
    let opts = RunOptions::with_timeout(DETECT_TIMEOUT);
    let args = ["devices"];
    let outcome = reliability
        .call(circuit_for(tool), || runner.run(tool, &args, &opts))
        .await?;

    if !outcome.success {
        return Err(DetectError::ToolFailed {
            tool: tool.to_string(),
            message: outcome.failure_message(),
        });
    }
    Ok(parse_fastboot_devices(&outcome.stdout))
}

/// Lists device serials currently enumerated by the device bridge.
pub async fn list_bridge_devices(
    runner: &CommandRunner,
    reliability: &Reliability,
    tool: &str,
) -> Result<Vec<String>, DetectError> {
    let opts = RunOptions::with_timeout(DETECT_TIMEOUT);
    let args = ["devices"];
    let outcome = reliability
        .call(circuit_for(tool), || runner.run(tool, &args, &opts))
        .await?;

    if !outcome.success {
        return Err(DetectError::ToolFailed {
            tool: tool.to_string(),
            message: outcome.failure_message(),
        });
    }
    Ok(parse_adb_devices(&outcome.stdout))
}

/// `fastboot devices` prints one `SERIAL\tfastboot` line per device.
fn parse_fastboot_devices(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// `adb devices` prints a header line, then `SERIAL\tstate` lines; only
/// devices in the `device` state are usable.
fn parse_adb_devices(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let serial = parts.next()?;
            let state = parts.next()?;
            (state == "device").then(|| serial.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fastboot_devices() {
        let stdout = "R58M123\tfastboot\nR58M456\tfastboot\n";
        assert_eq!(
            parse_fastboot_devices(stdout),
            vec!["R58M123".to_string(), "R58M456".to_string()]
        );
    }

    #[test]
    fn test_parse_fastboot_devices_empty_output() {
        assert!(parse_fastboot_devices("").is_empty());
        assert!(parse_fastboot_devices("\n\n").is_empty());
    }

    #[test]
    fn test_parse_adb_devices_skips_header_and_offline() {
        let stdout = "List of devices attached\nR58M123\tdevice\nR58M456\toffline\n";
        assert_eq!(parse_adb_devices(stdout), vec!["R58M123".to_string()]);
    }
}
