//! Flash job orchestration.
//!
//! A flash job walks the state machine
//! `preparing → flashing → (wiping)? → (rebooting)? → {completed, failed,
//! cancelled}`. Partitions are written strictly in caller-supplied order
//! (bootloader before system, for example) and the whole job aborts on the
//! first nonzero exit - there is no automatic retry of a partially
//! completed sequence.
//!
//! Cancellation is cooperative: it is observed before each partition and
//! before each optional post-step, never by killing a write mid-flight, so
//! a partition is never left half-written by the coordinator itself.

mod detect;
mod job;
mod orchestrator;
mod registry;
mod validate;

pub use detect::{list_bridge_devices, list_flash_devices, DetectError};
pub use job::{FlashJobConfig, FlashMethod, JobId, JobSnapshot, JobStatus, PartitionImage};
pub use orchestrator::{FlashOrchestrator, StartError, FLASH_OPERATION};
pub use registry::JobRegistry;
pub use validate::{validate_config, ValidationError, MAX_PARTITION_NAME_LEN};
