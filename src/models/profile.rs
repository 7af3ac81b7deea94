//! Profile data model: one immutable configuration per device type.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Named configuration describing how to flash one device type. Loaded once
/// from the manifest and never mutated afterwards; sessions hold a shared
/// read-only reference.
#[derive(Debug, Clone)]
pub struct Profile {
    pub name: String,
    /// Backend discriminator string from the manifest (`esp32`, `bmp`, ...).
    pub chip_type: String,
    pub description: String,
    /// Manifest directory; relative file references resolve against it.
    pub root: PathBuf,
    pub config: ProfileConfig,
}

impl Profile {
    /// Resolve a profile-relative file reference. Absolute paths pass
    /// through untouched.
    pub fn resolve(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self.config, ProfileConfig::Unsupported)
    }

    /// Default state of the erase toggle when this profile is selected.
    /// `None` when the profile carries no erase policy.
    pub fn erase_default(&self) -> Option<bool> {
        match &self.config {
            ProfileConfig::Esp(cfg) => cfg.erase_flash.as_ref().map(ErasePolicy::default_on),
            _ => None,
        }
    }
}

/// Per-backend configuration, a closed union keyed by the profile `type`.
#[derive(Debug, Clone)]
pub enum ProfileConfig {
    Esp(EspConfig),
    Bmp(BmpConfig),
    Dfu(DfuConfig),
    OpenOcd(OpenOcdConfig),
    PyOcd(PyOcdConfig),
    Unsupported,
}

/// A manifest value that may be written as a number or a string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NumOrString {
    Num(i64),
    Str(String),
}

impl std::fmt::Display for NumOrString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NumOrString::Num(n) => write!(f, "{}", n),
            NumOrString::Str(s) => write!(f, "{}", s),
        }
    }
}

/// `erase-flash` profile field: either the default state of the erase
/// toggle, or the mode string `"disabled"` which removes the choice.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ErasePolicy {
    Enabled(bool),
    Mode(String),
}

impl ErasePolicy {
    /// Default state of the erase toggle when this profile is selected.
    pub fn default_on(&self) -> bool {
        match self {
            ErasePolicy::Enabled(on) => *on,
            ErasePolicy::Mode(_) => false,
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, ErasePolicy::Mode(mode) if mode == "disabled")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EspConfig {
    /// `(offset, file)` pairs handed to the write-flash operation, in order.
    #[serde(rename = "write-flash")]
    pub write_flash: Vec<(String, String)>,
    pub baudrate: Option<NumOrString>,
    /// esptool `--before` reset strategy.
    pub before: Option<String>,
    /// esptool `--after` reset strategy.
    pub after: Option<String>,
    #[serde(rename = "no-stub")]
    pub no_stub: bool,
    #[serde(rename = "flash-mode")]
    pub flash_mode: Option<String>,
    #[serde(rename = "flash-freq")]
    pub flash_freq: Option<String>,
    #[serde(rename = "flash-size")]
    pub flash_size: Option<String>,
    #[serde(rename = "erase-flash")]
    pub erase_flash: Option<ErasePolicy>,
    pub security: EspSecurity,
    /// `(name, value)` pairs burned after the write sequence.
    pub efuse: Vec<(String, String)>,
    #[serde(rename = "write-protect-efuse")]
    pub write_protect_efuse: Vec<String>,
}

/// Secure-boot / flash-encryption provisioning settings. Empty strings mean
/// "not set"; an empty `flash_encryption_key` with block and purpose set
/// asks for a generated key.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EspSecurity {
    pub secure_boot_digest: String,
    pub secure_boot_digest_block: String,
    pub secure_boot_digest_purpose: String,
    pub secure_boot_overwrite_bootloader: bool,
    pub flash_encryption_key: String,
    pub flash_encryption_key_block: String,
    pub flash_encryption_key_purpose: String,
}

impl EspSecurity {
    pub fn secure_boot_requested(&self) -> bool {
        !self.secure_boot_digest.is_empty()
            || !self.secure_boot_digest_block.is_empty()
            || !self.secure_boot_digest_purpose.is_empty()
    }

    pub fn secure_boot_complete(&self) -> bool {
        !self.secure_boot_digest.is_empty()
            && !self.secure_boot_digest_block.is_empty()
            && !self.secure_boot_digest_purpose.is_empty()
    }

    pub fn encryption_requested(&self) -> bool {
        !self.flash_encryption_key.is_empty()
            || !self.flash_encryption_key_block.is_empty()
            || !self.flash_encryption_key_purpose.is_empty()
    }

    pub fn encryption_complete(&self) -> bool {
        !self.flash_encryption_key_block.is_empty()
            && !self.flash_encryption_key_purpose.is_empty()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BmpConfig {
    /// Firmware image handed to the GDB `load` command.
    pub load: String,
    /// Power-cycle target power before attaching. Defaults to on.
    pub tpwr: Option<bool>,
    pub connect_rst: bool,
    /// GDB attach target, defaults to "1".
    pub attach: Option<NumOrString>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DfuConfig {
    pub downloads: Vec<DfuDownload>,
    #[serde(rename = "dfuse-address")]
    pub dfuse_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DfuDownload {
    pub download: String,
    #[serde(default)]
    pub alt: Option<NumOrString>,
    #[serde(default)]
    pub reset: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OpenOcdConfig {
    /// Interface script, resolved against the OpenOCD scripts root when
    /// relative.
    pub interface: String,
    /// Target script, resolved the same way.
    pub target: String,
    pub transport: Option<String>,
    /// Image for the program/verify/reset invocation.
    pub program: String,
    #[serde(rename = "program-offset")]
    pub program_offset: Option<String>,
    /// Tcl commands run in a separate invocation before flashing.
    pub before: Vec<String>,
    /// Tcl commands run in a separate invocation after flashing.
    pub after: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PyOcdConfig {
    pub target: Option<String>,
    pub frequency: Option<NumOrString>,
    /// Ordered command lists, e.g. `["load", "app.hex"]`.
    pub commands: Vec<Vec<String>>,
}
