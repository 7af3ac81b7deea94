//! Batch command implementation: continuous multi-device flashing.

use std::time::Duration;

use anyhow::Result;

use crate::backends::FlashOptions;
use crate::cli::args::Cli;
use crate::cli::commands::{build_coordinator, load_profile, print_events};

pub async fn execute_batch_command(
    cli: &Cli,
    profile: Option<&str>,
    erase_flash: bool,
) -> Result<()> {
    let (_manifest, profile) = load_profile(cli, profile)?;
    let (coordinator, rx) = build_coordinator(profile).await?;
    if erase_flash {
        coordinator.set_options(FlashOptions { erase_flash: true }).await;
    }
    let printer = print_events(rx);

    // Seed the live port list so already connected devices land in the
    // batch-start snapshot instead of being flashed.
    coordinator.poll_once().await;
    coordinator.start_batch().await;
    let poller = coordinator.spawn_polling();
    println!("Batch mode: plug in devices to flash them. Ctrl-C to stop.");

    tokio::signal::ctrl_c().await?;
    coordinator.stop_batch().await;

    while coordinator.sessions_running().await > 0 {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    poller.abort();

    let records = coordinator.records().await;
    if !records.is_empty() {
        println!("Batch summary:");
        for (port, ctx) in records {
            let outcome = if ctx.ok == Some(true) { "Done" } else { "Error" };
            println!("  {}: {} ({}%)", port, outcome, ctx.progress);
        }
    }
    drop(coordinator);
    let _ = printer.await;
    Ok(())
}
