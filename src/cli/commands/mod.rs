//! CLI command implementations

pub mod batch;
pub mod flash;
pub mod ports;
pub mod profiles;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cli::args::{Cli, Commands};
use crate::coordinator::Coordinator;
use crate::manifest::Manifest;
use crate::models::{AppEvent, Profile};
use crate::tools::Tools;

pub async fn execute_command(command: Commands, cli: &Cli) -> Result<()> {
    match command {
        Commands::Profiles => profiles::execute_profiles_command(cli).await,
        Commands::Ports { profile } => ports::execute_ports_command(cli, profile.as_deref()).await,
        Commands::Flash {
            profile,
            port,
            erase_flash,
        } => flash::execute_flash_command(cli, profile.as_deref(), port, erase_flash).await,
        Commands::Batch {
            profile,
            erase_flash,
        } => batch::execute_batch_command(cli, profile.as_deref(), erase_flash).await,
    }
}

pub(crate) fn manifest_path(cli: &Cli) -> PathBuf {
    cli.manifest
        .clone()
        .unwrap_or_else(|| PathBuf::from("manifest/manifest.json"))
}

/// Load the manifest and pick the requested (or default) profile.
pub(crate) fn load_profile(cli: &Cli, name: Option<&str>) -> Result<(Manifest, Arc<Profile>)> {
    let manifest = Manifest::load(&manifest_path(cli))?;
    for line in &manifest.logs {
        log::warn!("{}", line);
    }
    let profile = match name {
        Some(name) => manifest
            .get(name)
            .with_context(|| format!("Profile \"{}\" not found in manifest", name))?,
        None => manifest
            .default_profile()
            .context("Manifest contains no profiles")?,
    };
    Ok((manifest, profile))
}

/// Coordinator wired to discovered tools and bound to `profile`, plus the
/// event stream a command prints from.
pub(crate) async fn build_coordinator(
    profile: Arc<Profile>,
) -> Result<(Coordinator, mpsc::UnboundedReceiver<AppEvent>)> {
    let tools = Arc::new(Tools::discover());
    let (tx, rx) = mpsc::unbounded_channel();
    let coordinator = Coordinator::new(tools, tx);
    coordinator.select_profile(profile).await?;
    Ok((coordinator, rx))
}

/// Print session/coordinator events as they arrive. Ends when every sender
/// is dropped.
pub(crate) fn print_events(mut rx: mpsc::UnboundedReceiver<AppEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                AppEvent::FlashOutput(port, line) => println!("[{}] {}", port, line),
                AppEvent::FlashProgress(port, percent) => println!("[{}] {}%", port, percent),
                AppEvent::FlashMac(port, mac) => println!("[{}] MAC: {}", port, mac),
                AppEvent::SessionStarted(port) => println!("[{}] Flashing...", port),
                AppEvent::SessionFinished(port, ok) => {
                    println!("[{}] {}", port, if ok { "Done" } else { "Error" })
                }
                AppEvent::PortsUpdated(ports) => log::debug!("Live ports: {:?}", ports),
                AppEvent::PortsRemoved(ports) => println!("Removed: {}", ports.join(", ")),
                AppEvent::BatchStarted(existing) => println!(
                    "Batch started; ignoring {} already connected port(s)",
                    existing
                ),
                AppEvent::BatchStopped => println!("Batch stopped; no new devices will be flashed"),
            }
        }
    })
}
