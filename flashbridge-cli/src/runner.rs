//! CLI runner for common setup.
//!
//! Encapsulates config loading, logging initialization and coordinator
//! construction so the command handlers stay small.

use crate::error::CliError;
use flashbridge::config::{load_settings, Settings};
use flashbridge::logging::{init_logging, LoggingGuard};
use flashbridge::service::Coordinator;
use std::path::Path;
use tracing::info;

/// Default config file path, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "flashbridge.ini";

/// Manages the CLI lifecycle: settings, logging and the coordinator.
pub struct CliRunner {
    // Keeps the non-blocking file writer alive for the process lifetime.
    #[allow(dead_code)]
    logging_guard: LoggingGuard,
    coordinator: Coordinator,
}

impl CliRunner {
    /// Loads settings (defaults when the file is absent), initializes
    /// logging and builds the coordinator.
    pub fn new(config_path: Option<&Path>) -> Result<Self, CliError> {
        let path = config_path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        let settings: Settings =
            load_settings(path).map_err(|e| CliError::Config(e.to_string()))?;

        let logging_guard =
            init_logging(&settings.logging).map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self {
            logging_guard,
            coordinator: Coordinator::new(settings),
        })
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn log_startup(&self, command: &str) {
        info!("flashbridge v{}", flashbridge::VERSION);
        info!("flashbridge CLI: {} command", command);
    }
}
