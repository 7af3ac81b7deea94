//! Flash command implementation: single-device, synchronous mode.

use anyhow::Result;

use crate::backends::FlashOptions;
use crate::cli::args::Cli;
use crate::cli::commands::{build_coordinator, load_profile, print_events};

pub async fn execute_flash_command(
    cli: &Cli,
    profile: Option<&str>,
    port: String,
    erase_flash: bool,
) -> Result<()> {
    let (_manifest, profile) = load_profile(cli, profile)?;
    let (coordinator, rx) = build_coordinator(profile).await?;
    if erase_flash {
        coordinator.set_options(FlashOptions { erase_flash: true }).await;
    }

    let printer = print_events(rx);
    let result = coordinator.flash_once(port).await;
    // Dropping the coordinator closes the event stream; the printer drains
    // what is left and exits.
    drop(coordinator);
    let _ = printer.await;

    let ctx = result?;
    if let Some(mac) = &ctx.mac {
        println!("MAC: {}", mac);
    }
    if ctx.ok != Some(true) {
        std::process::exit(1);
    }
    Ok(())
}
