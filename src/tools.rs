//! External tool discovery.
//!
//! All tool paths are resolved once at startup into a [`Tools`] value that
//! is passed down through session construction. Bundled tool trees shipped
//! next to the executable win over `$PATH` lookups.

use std::path::{Path, PathBuf};

use glob::glob;

/// OpenOCD installation: the binary plus its scripts root, which relative
/// interface/target references resolve against.
#[derive(Debug, Clone)]
pub struct OpenOcdInstall {
    pub binary: PathBuf,
    pub scripts: PathBuf,
}

/// Resolved locations of every external tool the backends drive. `None`
/// means the tool was not found; the owning backend reports that at
/// precheck or first use.
#[derive(Debug, Clone, Default)]
pub struct Tools {
    pub esptool: Option<PathBuf>,
    pub espefuse: Option<PathBuf>,
    pub espsecure: Option<PathBuf>,
    pub gdb: Option<PathBuf>,
    pub dfu_util: Option<PathBuf>,
    pub openocd: Option<OpenOcdInstall>,
    pub pyocd: Option<PathBuf>,
}

impl Tools {
    pub fn discover() -> Tools {
        let tools = Tools {
            esptool: which("esptool").or_else(|| which("esptool.py")),
            espefuse: which("espefuse").or_else(|| which("espefuse.py")),
            espsecure: which("espsecure").or_else(|| which("espsecure.py")),
            gdb: find_gdb(),
            dfu_util: find_dfu_util(),
            openocd: find_openocd(),
            pyocd: which("pyocd"),
        };
        log::debug!("Resolved tools: {:?}", tools);
        tools
    }
}

fn which(name: &str) -> Option<PathBuf> {
    ::which::which(name).ok()
}

fn exe_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// First match of a glob pattern relative to the executable directory.
fn find_bundled(pattern: &str) -> Option<PathBuf> {
    let pattern = exe_dir().join(pattern);
    glob(&pattern.to_string_lossy())
        .ok()?
        .flatten()
        .find(|path| path.is_file())
}

fn find_gdb() -> Option<PathBuf> {
    if let Some(gdb) = find_bundled("gcc-arm-none-eabi-*/bin/arm-none-eabi-gdb*") {
        // skip arm-none-eabi-gdb-py and friends
        let name = gdb.file_name()?.to_string_lossy().into_owned();
        if !name.contains("gdb-") {
            return Some(gdb);
        }
    }
    which("arm-none-eabi-gdb")
}

fn find_dfu_util() -> Option<PathBuf> {
    let osname = if cfg!(target_os = "windows") {
        Some("win64")
    } else if cfg!(target_os = "linux") {
        Some("linux-amd64")
    } else if cfg!(target_os = "macos") {
        Some("darwin-x86_64")
    } else {
        None
    };
    if let Some(osname) = osname {
        if let Some(dfu_util) = find_bundled(&format!("dfu-util-*/{}/dfu-util*", osname)) {
            return Some(dfu_util);
        }
    }
    which("dfu-util")
}

fn find_openocd() -> Option<OpenOcdInstall> {
    if let Some(binary) = find_bundled("*openocd-*/bin/openocd*") {
        let scripts = binary.parent()?.parent()?.join("openocd");
        return Some(OpenOcdInstall { binary, scripts });
    }
    let binary = which("openocd")?;
    let scripts = binary
        .parent()?
        .parent()?
        .join("share")
        .join("openocd");
    Some(OpenOcdInstall { binary, scripts })
}
