//! Profiles command implementation

use anyhow::Result;

use crate::cli::args::Cli;
use crate::cli::commands::manifest_path;
use crate::manifest::Manifest;

pub async fn execute_profiles_command(cli: &Cli) -> Result<()> {
    let manifest = Manifest::load(&manifest_path(cli))?;
    for line in &manifest.logs {
        println!("{}", line);
    }
    if manifest.profiles.is_empty() {
        println!("Manifest contains no profiles.");
        return Ok(());
    }
    for profile in &manifest.profiles {
        let marker = if profile.is_supported() { " " } else { "!" };
        println!(
            "{} {} [{}] {}",
            marker, profile.name, profile.chip_type, profile.description
        );
    }
    Ok(())
}
