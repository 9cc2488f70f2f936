//! CLI command implementations.
//!
//! Each subcommand has its own module with argument definitions and handlers.
//!
//! - [`devices`] - List devices visible to the flashing tools
//! - [`flash`] - Run a flash job and stream its progress
//! - [`tools`] - Probe the external tools

pub mod devices;
pub mod flash;
pub mod tools;
