//! Default values for every configuration key.

/// Lock hold timeout: a lock older than this is stale (seconds).
pub const LOCK_HOLD_TIMEOUT_SECS: u64 = 300;

/// Acquire-with-wait budget (seconds).
pub const LOCK_ACQUIRE_WAIT_SECS: u64 = 10;

/// Lock wait poll interval (milliseconds).
pub const LOCK_POLL_INTERVAL_MS: u64 = 100;

/// Concurrent flash operations.
pub const FLASH_CEILING: usize = 2;

/// Concurrent downloads.
pub const DOWNLOAD_CEILING: usize = 4;

/// Ceiling for categories without an explicit limit.
pub const DEFAULT_CEILING: usize = 8;

/// Destructive flashing requests per window.
pub const RATE_FLASH_MAX: u32 = 5;
pub const RATE_FLASH_WINDOW_SECS: u64 = 300;

/// High-risk trigger requests per window.
pub const RATE_TRIGGER_MAX: u32 = 10;
pub const RATE_TRIGGER_WINDOW_SECS: u64 = 60;

/// Default request class per window.
pub const RATE_DEFAULT_MAX: u32 = 60;
pub const RATE_DEFAULT_WINDOW_SECS: u64 = 60;

/// Retry attempts for transient tool failures (including the first call).
pub const RETRY_MAX_ATTEMPTS: u32 = 3;
pub const RETRY_INITIAL_BACKOFF_MS: u64 = 500;
pub const RETRY_BACKOFF_MULTIPLIER: u32 = 2;

/// Consecutive failures before a circuit opens.
pub const BREAKER_FAILURE_THRESHOLD: u32 = 5;

/// Circuit cooldown before a half-open trial (seconds).
pub const BREAKER_COOLDOWN_SECS: u64 = 30;

/// Flashing tool binary.
pub const FLASH_TOOL: &str = "fastboot";

/// Device bridge binary.
pub const BRIDGE_TOOL: &str = "adb";

/// Timeout for one partition write (seconds). Large system images over
/// USB 2.0 can legitimately take minutes.
pub const FLASH_TIMEOUT_SECS: u64 = 600;

/// Timeout for short commands: wipe, reboot, enumeration (seconds).
pub const COMMAND_TIMEOUT_SECS: u64 = 120;

/// Retired jobs kept in the history ring.
pub const HISTORY_CAP: usize = 50;

/// Log directory and filename.
pub const LOG_DIRECTORY: &str = "logs";
pub const LOG_FILE: &str = "flashbridge.log";
