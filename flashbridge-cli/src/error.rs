//! CLI error handling with user-friendly messages.

use flashbridge::service::CoordinatorError;
use std::process;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid partition argument {0:?}, expected NAME=IMAGE_PATH")]
    InvalidPartition(String),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error("flash job {job_id} failed: {reason}")]
    JobFailed { job_id: String, reason: String },

    #[error("flash job {job_id} was cancelled")]
    JobCancelled { job_id: String },
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        if let CliError::Coordinator(CoordinatorError::Detect(_)) = self {
            eprintln!();
            eprintln!("Make sure the flashing tools are installed and on PATH:");
            eprintln!("  fastboot (android-platform-tools)");
            eprintln!("  adb (android-platform-tools)");
        }

        process::exit(1)
    }
}
