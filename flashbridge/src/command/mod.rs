//! Safe external command execution.
//!
//! Every external tool invocation in this crate goes through
//! [`CommandRunner`]: arguments are passed as an argv array (never a shell
//! string), execution has a hard timeout with graceful-then-forceful
//! termination, and the result is always a structured [`CommandOutcome`] -
//! a failed command is ordinary data, not an error that crosses the async
//! boundary.
//!
//! Each invocation is tagged with a circuit name derived from the target
//! tool (see [`circuit_for`]) so that failures are isolated per external
//! dependency by the reliability layer.

mod circuit;
mod runner;

pub use circuit::circuit_for;
pub use runner::{
    ActiveChild, CommandOutcome, CommandRunner, OutputLine, RunOptions, StreamSource,
    DEFAULT_COMMAND_TIMEOUT, KILL_GRACE_WINDOW,
};
