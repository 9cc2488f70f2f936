//! External tool discovery.
//!
//! Version-probes the configured flashing tool and device bridge so
//! callers can report missing tooling before any job is attempted.

use crate::command::{CommandRunner, RunOptions};
use crate::config::FlashSettings;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Probe result for one external tool.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolVersion {
    pub tool: String,
    pub available: bool,
    /// First line of the tool's version output, when available.
    pub version: Option<String>,
}

/// Probes both configured tools (`fastboot --version`, `adb version`).
pub async fn probe_tools(runner: &CommandRunner, settings: &FlashSettings) -> Vec<ToolVersion> {
    vec![
        probe(runner, &settings.flash_tool, &["--version"]).await,
        probe(runner, &settings.bridge_tool, &["version"]).await,
    ]
}

async fn probe(runner: &CommandRunner, tool: &str, args: &[&str]) -> ToolVersion {
    let opts = RunOptions::with_timeout(PROBE_TIMEOUT);
    let outcome = runner.run(tool, args, &opts).await;
    if outcome.success {
        let version = outcome
            .stdout
            .lines()
            .next()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from);
        ToolVersion {
            tool: tool.to_string(),
            available: true,
            version,
        }
    } else {
        debug!(tool, reason = %outcome.failure_message(), "Tool probe failed");
        ToolVersion {
            tool: tool.to_string(),
            available: false,
            version: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_probe_reports_version_line() {
        let runner = CommandRunner::new();
        let result = probe(&runner, "echo", &["fastboot version 35.0.1"]).await;

        assert!(result.available);
        assert_eq!(result.version.as_deref(), Some("fastboot version 35.0.1"));
    }

    #[tokio::test]
    async fn test_probe_missing_tool_is_unavailable() {
        let runner = CommandRunner::new();
        let result = probe(&runner, "definitely-not-installed-tool", &["--version"]).await;

        assert!(!result.available);
        assert!(result.version.is_none());
    }
}
