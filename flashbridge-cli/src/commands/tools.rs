//! Tools command - probes the configured external tools.

use crate::error::CliError;
use crate::runner::CliRunner;

pub async fn run(runner: &CliRunner) -> Result<(), CliError> {
    let versions = runner.coordinator().tool_versions().await;

    for tool in versions {
        if tool.available {
            let version = tool.version.as_deref().unwrap_or("version unknown");
            println!("{}: {}", tool.tool, version);
        } else {
            println!("{}: not found", tool.tool);
        }
    }

    Ok(())
}
