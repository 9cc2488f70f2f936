//! Devices command - lists serials visible to the flashing tools.

use crate::error::CliError;
use crate::runner::CliRunner;

pub async fn run(runner: &CliRunner) -> Result<(), CliError> {
    let coordinator = runner.coordinator();

    let flash = coordinator.flash_devices().await?;
    println!(
        "Flash mode ({}):",
        coordinator.settings().flash.flash_tool
    );
    print_serials(&flash);

    let bridge = coordinator.bridge_devices().await?;
    println!(
        "Bridge mode ({}):",
        coordinator.settings().flash.bridge_tool
    );
    print_serials(&bridge);

    Ok(())
}

fn print_serials(serials: &[String]) {
    if serials.is_empty() {
        println!("  (no devices)");
    }
    for serial in serials {
        println!("  {}", serial);
    }
}
