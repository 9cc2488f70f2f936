//! Flash job configuration validation.
//!
//! All checks run before any device communication: an invalid config is
//! rejected synchronously with zero side effects.

use super::job::FlashJobConfig;
use std::path::PathBuf;
use thiserror::Error;

/// Maximum length of a partition name.
pub const MAX_PARTITION_NAME_LEN: usize = 32;

/// Validation failures for a flash job configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("device serial must not be empty")]
    MissingSerial,

    #[error("device serial {serial:?} contains invalid characters")]
    InvalidSerial { serial: String },

    #[error("at least one partition is required")]
    NoPartitions,

    #[error(
        "invalid partition name {name:?}: must be 1-{MAX_PARTITION_NAME_LEN} \
         alphanumeric, dot, dash or underscore characters"
    )]
    InvalidPartitionName { name: String },

    #[error("image for partition {name:?} not found: {path}")]
    ImageNotFound { name: String, path: PathBuf },
}

/// Validates a flash job configuration.
pub fn validate_config(config: &FlashJobConfig) -> Result<(), ValidationError> {
    let serial = config.device_serial.trim();
    if serial.is_empty() {
        return Err(ValidationError::MissingSerial);
    }
    if !serial
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':'))
    {
        return Err(ValidationError::InvalidSerial {
            serial: config.device_serial.clone(),
        });
    }

    if config.partitions.is_empty() {
        return Err(ValidationError::NoPartitions);
    }

    for partition in &config.partitions {
        if !valid_partition_name(&partition.name) {
            return Err(ValidationError::InvalidPartitionName {
                name: partition.name.clone(),
            });
        }
        let exists = partition
            .image_path
            .metadata()
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !exists {
            return Err(ValidationError::ImageNotFound {
                name: partition.name.clone(),
                path: partition.image_path.clone(),
            });
        }
    }

    Ok(())
}

/// Partition names are restricted because they end up on a tool command
/// line addressing on-device storage: alphanumeric plus `._-`, at most
/// [`MAX_PARTITION_NAME_LEN`] characters.
fn valid_partition_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_PARTITION_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::{FlashMethod, PartitionImage};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn image_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp image");
        file.write_all(b"not a real image").unwrap();
        file
    }

    fn config_with(serial: &str, partitions: Vec<PartitionImage>) -> FlashJobConfig {
        FlashJobConfig {
            device_serial: serial.to_string(),
            method: FlashMethod::Fastboot,
            partitions,
            wipe_data: false,
            reboot_after: false,
        }
    }

    #[test]
    fn test_valid_config_passes() {
        let image = image_file();
        let config = config_with(
            "R58M123",
            vec![PartitionImage::new("boot", image.path())],
        );
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_empty_serial_is_rejected() {
        let image = image_file();
        let config = config_with("  ", vec![PartitionImage::new("boot", image.path())]);
        assert!(matches!(
            validate_config(&config),
            Err(ValidationError::MissingSerial)
        ));
    }

    #[test]
    fn test_serial_with_shell_metacharacters_is_rejected() {
        let image = image_file();
        let config = config_with(
            "R58M123; rm -rf /",
            vec![PartitionImage::new("boot", image.path())],
        );
        assert!(matches!(
            validate_config(&config),
            Err(ValidationError::InvalidSerial { .. })
        ));
    }

    #[test]
    fn test_empty_partition_list_is_rejected() {
        let config = config_with("R58M123", vec![]);
        assert!(matches!(
            validate_config(&config),
            Err(ValidationError::NoPartitions)
        ));
    }

    #[test]
    fn test_partition_name_pattern() {
        assert!(valid_partition_name("boot"));
        assert!(valid_partition_name("system_a"));
        assert!(valid_partition_name("vendor.img-slot_b"));
        assert!(!valid_partition_name(""));
        assert!(!valid_partition_name("boot partition"));
        assert!(!valid_partition_name("boot;reboot"));
        assert!(!valid_partition_name(&"x".repeat(MAX_PARTITION_NAME_LEN + 1)));
    }

    #[test]
    fn test_invalid_partition_name_is_rejected() {
        let image = image_file();
        let config = config_with(
            "R58M123",
            vec![PartitionImage::new("boot; reboot", image.path())],
        );
        assert!(matches!(
            validate_config(&config),
            Err(ValidationError::InvalidPartitionName { .. })
        ));
    }

    #[test]
    fn test_missing_image_is_rejected() {
        let config = config_with(
            "R58M123",
            vec![PartitionImage::new("boot", "/nonexistent/boot.img")],
        );
        assert!(matches!(
            validate_config(&config),
            Err(ValidationError::ImageNotFound { .. })
        ));
    }

    #[test]
    fn test_all_partitions_are_checked() {
        let image = image_file();
        let config = config_with(
            "R58M123",
            vec![
                PartitionImage::new("boot", image.path()),
                PartitionImage::new("system", "/nonexistent/system.img"),
            ],
        );
        match validate_config(&config) {
            Err(ValidationError::ImageNotFound { name, .. }) => assert_eq!(name, "system"),
            other => panic!("expected ImageNotFound, got {:?}", other),
        }
    }
}
