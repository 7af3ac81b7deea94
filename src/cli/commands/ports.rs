//! Ports command implementation

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Result, bail};

use crate::backends::Backend;
use crate::cli::args::Cli;
use crate::cli::commands::load_profile;
use crate::models::SharedContext;
use crate::tools::Tools;

pub async fn execute_ports_command(cli: &Cli, profile: Option<&str>) -> Result<()> {
    let (_manifest, profile) = load_profile(cli, profile)?;
    let Some(backend) = Backend::for_profile(&profile) else {
        bail!(
            "Unsupported chip type \"{}\" in profile \"{}\"",
            profile.chip_type,
            profile.name
        );
    };

    let tools = Arc::new(Tools::discover());
    let ctx = SharedContext::new("");
    backend.precheck(&tools, &ctx).await;
    for line in ctx.snapshot().await.logs {
        println!("{}", line);
    }

    let ports = backend.list_ports(&tools, &profile, &HashSet::new()).await;
    if ports.is_empty() {
        println!("No ports found for profile \"{}\".", profile.name);
    } else {
        for port in ports {
            println!("{}", port);
        }
    }
    Ok(())
}
