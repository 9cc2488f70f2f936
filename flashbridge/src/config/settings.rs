//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file. These
//! are pure data types with no parsing logic.

use super::defaults;

/// Complete coordinator configuration.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    /// Device lock settings
    pub locks: LockSettings,
    /// Resource slot ceilings
    pub limits: LimitSettings,
    /// Rate limit classes
    pub rate: RateSettings,
    /// Retry policy for transient tool failures
    pub retry: RetrySettings,
    /// Circuit breaker thresholds
    pub breaker: BreakerSettings,
    /// Flashing tool settings
    pub flash: FlashSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

/// Device lock configuration.
#[derive(Debug, Clone)]
pub struct LockSettings {
    /// Lock hold timeout in seconds; a lock older than this is stale.
    pub hold_timeout_secs: u64,
    /// Total budget for acquire-with-wait, in seconds.
    pub acquire_wait_secs: u64,
    /// Poll interval while waiting for a lock, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            hold_timeout_secs: defaults::LOCK_HOLD_TIMEOUT_SECS,
            acquire_wait_secs: defaults::LOCK_ACQUIRE_WAIT_SECS,
            poll_interval_ms: defaults::LOCK_POLL_INTERVAL_MS,
        }
    }
}

/// Resource slot ceilings per category.
#[derive(Debug, Clone)]
pub struct LimitSettings {
    /// Concurrent flash operations.
    pub flash_ceiling: usize,
    /// Concurrent downloads.
    pub download_ceiling: usize,
    /// Ceiling for categories without an explicit limit.
    pub default_ceiling: usize,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            flash_ceiling: defaults::FLASH_CEILING,
            download_ceiling: defaults::DOWNLOAD_CEILING,
            default_ceiling: defaults::DEFAULT_CEILING,
        }
    }
}

/// Fixed-window rate limit classes.
#[derive(Debug, Clone)]
pub struct RateSettings {
    /// Destructive flashing requests per window.
    pub flash_max: u32,
    pub flash_window_secs: u64,
    /// High-risk trigger requests per window.
    pub trigger_max: u32,
    pub trigger_window_secs: u64,
    /// Everything else.
    pub default_max: u32,
    pub default_window_secs: u64,
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            flash_max: defaults::RATE_FLASH_MAX,
            flash_window_secs: defaults::RATE_FLASH_WINDOW_SECS,
            trigger_max: defaults::RATE_TRIGGER_MAX,
            trigger_window_secs: defaults::RATE_TRIGGER_WINDOW_SECS,
            default_max: defaults::RATE_DEFAULT_MAX,
            default_window_secs: defaults::RATE_DEFAULT_WINDOW_SECS,
        }
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: defaults::RETRY_MAX_ATTEMPTS,
            initial_backoff_ms: defaults::RETRY_INITIAL_BACKOFF_MS,
            backoff_multiplier: defaults::RETRY_BACKOFF_MULTIPLIER,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct BreakerSettings {
    /// Consecutive failures before a circuit opens.
    pub failure_threshold: u32,
    /// Cooldown before a half-open trial call, in seconds.
    pub cooldown_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: defaults::BREAKER_FAILURE_THRESHOLD,
            cooldown_secs: defaults::BREAKER_COOLDOWN_SECS,
        }
    }
}

/// Flashing tool configuration.
#[derive(Debug, Clone)]
pub struct FlashSettings {
    /// Flashing tool binary (name or path).
    pub flash_tool: String,
    /// Device bridge binary (name or path).
    pub bridge_tool: String,
    /// Timeout for one partition write, in seconds.
    pub flash_timeout_secs: u64,
    /// Timeout for short commands (wipe, reboot), in seconds.
    pub command_timeout_secs: u64,
    /// Retired jobs kept in the history ring.
    pub history_cap: usize,
}

impl Default for FlashSettings {
    fn default() -> Self {
        Self {
            flash_tool: defaults::FLASH_TOOL.to_string(),
            bridge_tool: defaults::BRIDGE_TOOL.to_string(),
            flash_timeout_secs: defaults::FLASH_TIMEOUT_SECS,
            command_timeout_secs: defaults::COMMAND_TIMEOUT_SECS,
            history_cap: defaults::HISTORY_CAP,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingSettings {
    /// Directory for log files.
    pub directory: String,
    /// Log filename.
    pub file: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: defaults::LOG_DIRECTORY.to_string(),
            file: defaults::LOG_FILE.to_string(),
        }
    }
}
