//! Circuit name derivation for external tools.

use std::path::Path;

/// Circuit name for the device bridge tool (adb).
pub const CIRCUIT_DEVICE_BRIDGE: &str = "device-bridge";

/// Circuit name for the flashing tool (fastboot).
pub const CIRCUIT_FLASH_TOOL: &str = "flash-tool";

/// Circuit name for the download subsystem.
pub const CIRCUIT_DOWNLOAD: &str = "download";

/// Fallback circuit name for unrecognized tools.
pub const CIRCUIT_EXTERNAL: &str = "external";

/// Derives the circuit name for a program.
///
/// The circuit name groups failures by external dependency so that a
/// misbehaving flashing tool does not open the circuit for the device
/// bridge, and vice versa. The program may be a bare name or a full path.
pub fn circuit_for(program: &str) -> &'static str {
    let name = Path::new(program)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(program);

    match name {
        "adb" => CIRCUIT_DEVICE_BRIDGE,
        "fastboot" => CIRCUIT_FLASH_TOOL,
        "curl" | "wget" => CIRCUIT_DOWNLOAD,
        _ => CIRCUIT_EXTERNAL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_tools_map_to_their_circuits() {
        assert_eq!(circuit_for("adb"), CIRCUIT_DEVICE_BRIDGE);
        assert_eq!(circuit_for("fastboot"), CIRCUIT_FLASH_TOOL);
        assert_eq!(circuit_for("curl"), CIRCUIT_DOWNLOAD);
    }

    #[test]
    fn test_full_paths_are_reduced_to_the_tool_name() {
        assert_eq!(circuit_for("/usr/local/bin/fastboot"), CIRCUIT_FLASH_TOOL);
        assert_eq!(circuit_for("/opt/platform-tools/adb"), CIRCUIT_DEVICE_BRIDGE);
    }

    #[test]
    fn test_unknown_tools_use_the_fallback_circuit() {
        assert_eq!(circuit_for("heimdall"), CIRCUIT_EXTERNAL);
        assert_eq!(circuit_for("/usr/bin/dd"), CIRCUIT_EXTERNAL);
    }
}
