//! FlashBridge - Device operation coordination for firmware flashing
//!
//! This library lets a technician safely run long-running, destructive,
//! hardware-touching operations (flashing firmware images onto physical
//! devices via external CLI tools) from a single server process. It
//! guarantees exclusive per-device access, bounds system-wide concurrent
//! tool invocations, tolerates flaky external tools, and streams live
//! progress to observers.
//!
//! # High-Level API
//!
//! For most use cases, the [`service`] module provides a facade that wires
//! all coordination components together:
//!
//! ```ignore
//! use flashbridge::config::Settings;
//! use flashbridge::flash::{FlashJobConfig, FlashMethod, PartitionImage};
//! use flashbridge::service::Coordinator;
//!
//! let coordinator = Coordinator::new(Settings::default());
//! coordinator.spawn_maintenance();
//!
//! let job_id = coordinator.start_flash("workstation-1", FlashJobConfig {
//!     device_serial: "R58M123".into(),
//!     method: FlashMethod::Fastboot,
//!     partitions: vec![PartitionImage::new("boot", "/images/boot.img")],
//!     wipe_data: false,
//!     reboot_after: true,
//! })?;
//!
//! // Observe progress via the broadcast hub or poll the job snapshot.
//! let snapshot = coordinator.job_status(&job_id);
//! ```

pub mod command;
pub mod config;
pub mod flash;
pub mod limiter;
pub mod lock;
pub mod logging;
pub mod progress;
pub mod reliability;
pub mod service;
pub mod tooling;

/// Version of the FlashBridge library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
