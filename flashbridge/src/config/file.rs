//! INI config file loading.
//!
//! Every section and key is optional; anything missing falls back to its
//! default. Unknown sections and keys are ignored so config files survive
//! version skew in both directions.

use super::settings::Settings;
use ini::Ini;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Errors while loading a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(String),
}

/// Loads settings from an INI file, falling back to defaults for any
/// missing key. A missing file is not an error: defaults apply.
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    if !path.exists() {
        debug!(path = %path.display(), "No config file, using defaults");
        return Ok(Settings::default());
    }

    let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let mut settings = Settings::default();

    if let Some(section) = ini.section(Some("locks")) {
        read(section, "hold_timeout_secs", &mut settings.locks.hold_timeout_secs);
        read(section, "acquire_wait_secs", &mut settings.locks.acquire_wait_secs);
        read(section, "poll_interval_ms", &mut settings.locks.poll_interval_ms);
    }

    if let Some(section) = ini.section(Some("limits")) {
        read(section, "flash_ceiling", &mut settings.limits.flash_ceiling);
        read(section, "download_ceiling", &mut settings.limits.download_ceiling);
        read(section, "default_ceiling", &mut settings.limits.default_ceiling);
    }

    if let Some(section) = ini.section(Some("rate")) {
        read(section, "flash_max", &mut settings.rate.flash_max);
        read(section, "flash_window_secs", &mut settings.rate.flash_window_secs);
        read(section, "trigger_max", &mut settings.rate.trigger_max);
        read(section, "trigger_window_secs", &mut settings.rate.trigger_window_secs);
        read(section, "default_max", &mut settings.rate.default_max);
        read(section, "default_window_secs", &mut settings.rate.default_window_secs);
    }

    if let Some(section) = ini.section(Some("retry")) {
        read(section, "max_attempts", &mut settings.retry.max_attempts);
        read(section, "initial_backoff_ms", &mut settings.retry.initial_backoff_ms);
        read(section, "backoff_multiplier", &mut settings.retry.backoff_multiplier);
    }

    if let Some(section) = ini.section(Some("breaker")) {
        read(section, "failure_threshold", &mut settings.breaker.failure_threshold);
        read(section, "cooldown_secs", &mut settings.breaker.cooldown_secs);
    }

    if let Some(section) = ini.section(Some("flash")) {
        read_string(section, "flash_tool", &mut settings.flash.flash_tool);
        read_string(section, "bridge_tool", &mut settings.flash.bridge_tool);
        read(section, "flash_timeout_secs", &mut settings.flash.flash_timeout_secs);
        read(section, "command_timeout_secs", &mut settings.flash.command_timeout_secs);
        read(section, "history_cap", &mut settings.flash.history_cap);
    }

    if let Some(section) = ini.section(Some("logging")) {
        read_string(section, "directory", &mut settings.logging.directory);
        read_string(section, "file", &mut settings.logging.file);
    }

    Ok(settings)
}

/// Overwrites `target` when the key parses; malformed values keep the
/// default.
fn read<T: FromStr>(section: &ini::Properties, key: &str, target: &mut T) {
    if let Some(value) = section.get(key) {
        if let Ok(parsed) = value.trim().parse() {
            *target = parsed;
        }
    }
}

fn read_string(section: &ini::Properties, key: &str, target: &mut String) {
    if let Some(value) = section.get(key) {
        let value = value.trim();
        if !value.is_empty() {
            *target = value.to_string();
        }
    }
}
