//! Flashing backends.
//!
//! One variant per device-protocol family, dispatched through a closed enum
//! rather than open-ended trait objects: the capability set and the
//! operation contract are uniform, the procedures behind them are not. Each
//! backend module owns its enumeration strategy, its command construction
//! and its output-line parsers; the parsers are the only place that knows
//! the wrapped tool's textual output format.

pub mod bmp;
pub mod dfu;
pub mod esp;
pub mod openocd;
pub mod pyocd;

use std::collections::HashSet;

use crate::models::{Profile, ProfileConfig, SharedContext};
use crate::tools::Tools;

/// Port selection sentinel resolved to the first enumerated port.
pub const AUTO_PORT: &str = "Auto";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Esp,
    Bmp,
    Dfu,
    OpenOcd,
    PyOcd,
}

/// Uniform capability flags a front end keys its controls on.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    pub show_mac: bool,
    pub show_progress: bool,
    pub erase_flash: bool,
    pub port_listing: bool,
}

/// Operator toggles applied to a single flash attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlashOptions {
    pub erase_flash: bool,
}

impl Backend {
    /// Registry lookup: `esp*` prefixed types share the ESP backend, the
    /// rest match exactly. `None` marks an unsupported chip type.
    pub fn for_type(chip_type: &str) -> Option<Backend> {
        if chip_type.starts_with("esp") {
            return Some(Backend::Esp);
        }
        match chip_type {
            "bmp" => Some(Backend::Bmp),
            "dfu" => Some(Backend::Dfu),
            "openocd" => Some(Backend::OpenOcd),
            "pyocd" => Some(Backend::PyOcd),
            _ => None,
        }
    }

    pub fn for_profile(profile: &Profile) -> Option<Backend> {
        match profile.config {
            ProfileConfig::Esp(_) => Some(Backend::Esp),
            ProfileConfig::Bmp(_) => Some(Backend::Bmp),
            ProfileConfig::Dfu(_) => Some(Backend::Dfu),
            ProfileConfig::OpenOcd(_) => Some(Backend::OpenOcd),
            ProfileConfig::PyOcd(_) => Some(Backend::PyOcd),
            ProfileConfig::Unsupported => None,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        match self {
            Backend::Esp => Capabilities {
                show_mac: true,
                show_progress: true,
                erase_flash: true,
                port_listing: true,
            },
            Backend::Bmp => Capabilities {
                show_mac: false,
                show_progress: true,
                erase_flash: false,
                port_listing: true,
            },
            Backend::Dfu => Capabilities {
                show_mac: false,
                show_progress: true,
                erase_flash: false,
                port_listing: true,
            },
            Backend::OpenOcd => Capabilities {
                show_mac: false,
                show_progress: false,
                erase_flash: true,
                port_listing: true,
            },
            Backend::PyOcd => Capabilities {
                show_mac: false,
                show_progress: true,
                erase_flash: true,
                port_listing: true,
            },
        }
    }

    /// Verify the backend's external tool is resolvable; appends an error
    /// log entry when it is not.
    pub async fn precheck(&self, tools: &Tools, ctx: &SharedContext) {
        match self {
            Backend::Esp => esp::precheck(tools, ctx).await,
            Backend::Bmp => bmp::precheck(tools, ctx).await,
            Backend::Dfu => dfu::precheck(tools, ctx).await,
            Backend::OpenOcd => openocd::precheck(tools, ctx).await,
            Backend::PyOcd => pyocd::precheck(tools, ctx).await,
        }
    }

    /// Enumerate candidate port identifiers for this backend. Ports in
    /// `working` belong to in-flight sessions: they are reported as present
    /// without being probed, so a busy device does not appear to vanish.
    pub async fn list_ports(
        &self,
        tools: &Tools,
        profile: &Profile,
        working: &HashSet<String>,
    ) -> Vec<String> {
        match self {
            Backend::Esp => esp::list_ports(working).await,
            Backend::Bmp => bmp::list_ports().await,
            Backend::Dfu => dfu::list_ports(tools).await,
            Backend::OpenOcd => openocd::list_ports(tools, profile).await,
            Backend::PyOcd => pyocd::list_ports(tools).await,
        }
    }

    /// Resolve the "Auto" sentinel to the first enumerated port. Concrete
    /// requests pass through; an empty request or empty enumeration yields
    /// `None`.
    pub async fn determine_port(
        &self,
        tools: &Tools,
        profile: &Profile,
        requested: &str,
    ) -> Option<String> {
        if requested == AUTO_PORT {
            self.list_ports(tools, profile, &HashSet::new())
                .await
                .into_iter()
                .next()
        } else if requested.is_empty() {
            None
        } else {
            Some(requested.to_string())
        }
    }

    /// Execute the backend-specific flash procedure, driving `ctx` to a
    /// deterministic outcome. Errors are recorded in the context, never
    /// returned.
    pub async fn flash(
        &self,
        tools: &Tools,
        ctx: &SharedContext,
        port: Option<&str>,
        profile: &Profile,
        options: FlashOptions,
    ) {
        match self {
            Backend::Esp => esp::flash(tools, ctx, port, profile, options).await,
            Backend::Bmp => bmp::flash(tools, ctx, port, profile).await,
            Backend::Dfu => dfu::flash(tools, ctx, port, profile).await,
            Backend::OpenOcd => openocd::flash(tools, ctx, port, profile, options).await,
            Backend::PyOcd => pyocd::flash(tools, ctx, port, profile, options).await,
        }
    }
}

/// Serial device enumeration shared by the serial-based backends. Candidate
/// ports are confirmed with a non-destructive open unless a working session
/// already holds them.
pub(crate) async fn serial_ports(working: &HashSet<String>) -> Vec<String> {
    let working = working.clone();
    tokio::task::spawn_blocking(move || serial_ports_blocking(&working))
        .await
        .unwrap_or_default()
}

fn serial_ports_blocking(working: &HashSet<String>) -> Vec<String> {
    let Ok(infos) = serialport::available_ports() else {
        return Vec::new();
    };
    let mut result = Vec::new();
    for info in infos {
        let name = info.port_name;
        if cfg!(target_os = "macos") && (name.contains("Bluetooth") || name.contains("debug")) {
            continue;
        }
        // Windows lists legacy COM devices without USB descriptors; skip them.
        if cfg!(target_os = "windows")
            && !matches!(info.port_type, serialport::SerialPortType::UsbPort(_))
        {
            continue;
        }
        if working.contains(&name) {
            result.push(name);
            continue;
        }
        if serialport::new(&name, 115_200).open().is_ok() {
            result.push(name);
        }
    }
    result
}
