//! Command line argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "flashbrew")]
#[command(about = "Multi-backend firmware flasher driven by per-device profile manifests")]
pub struct Cli {
    /// Path to the profile manifest JSON (defaults to manifest/manifest.json)
    #[arg(global = true, value_name = "MANIFEST")]
    pub manifest: Option<PathBuf>,

    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Decrease logging verbosity (only errors)
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// List manifest profiles (default behavior)
    Profiles,
    /// List candidate ports for a profile's backend
    Ports {
        /// Profile name (defaults to the first profile in the manifest)
        #[arg(short, long)]
        profile: Option<String>,
    },
    /// Flash a single device
    Flash {
        /// Profile name (defaults to the first profile in the manifest)
        #[arg(short, long)]
        profile: Option<String>,

        /// Port identifier, or "Auto" for the first enumerated port
        #[arg(short = 'P', long, default_value = "Auto")]
        port: String,

        /// Erase the whole flash before writing (backends that support it)
        #[arg(long)]
        erase_flash: bool,
    },
    /// Continuously flash devices as they are plugged in
    Batch {
        /// Profile name (defaults to the first profile in the manifest)
        #[arg(short, long)]
        profile: Option<String>,

        /// Erase the whole flash before writing (backends that support it)
        #[arg(long)]
        erase_flash: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
