//! Configuration for the coordinator.
//!
//! Settings are plain data structs with one section per concern, loadable
//! from an INI file (`flashbridge.ini`) with every key optional - missing
//! keys fall back to the defaults in [`defaults`].

mod defaults;
mod file;
mod settings;

pub use file::{load_settings, ConfigError};
pub use settings::{
    BreakerSettings, FlashSettings, LimitSettings, LockSettings, LoggingSettings, RateSettings,
    RetrySettings, Settings,
};
