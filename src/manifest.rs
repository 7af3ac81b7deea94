//! Profile manifest loading.
//!
//! A manifest is an ordered JSON mapping from profile name to profile
//! object. Profiles are parsed once into their backend-specific config and
//! never mutated afterwards. An unrecognized `type` is reported and leaves
//! the profile unselectable, not fatal; the rest of the manifest loads
//! normally.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::backends::Backend;
use crate::models::{
    BmpConfig, DfuConfig, EspConfig, OpenOcdConfig, Profile, ProfileConfig, PyOcdConfig,
};

pub struct Manifest {
    /// Profiles in manifest order.
    pub profiles: Vec<Arc<Profile>>,
    /// Diagnostics collected during the load (unsupported types).
    pub logs: Vec<String>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Manifest> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        let root = std::path::absolute(path.parent().unwrap_or(Path::new(".")))
            .with_context(|| format!("Failed to resolve manifest directory of {}", path.display()))?;

        // serde_json preserves member order, so profile order follows the
        // manifest file.
        let entries: serde_json::Map<String, Value> = serde_json::from_str(&text)
            .with_context(|| format!("Invalid manifest {}", path.display()))?;

        let mut profiles = Vec::new();
        let mut logs = Vec::new();
        for (name, value) in entries {
            let chip_type = value
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let description = value
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();

            let config = match Backend::for_type(&chip_type) {
                Some(backend) => parse_config(backend, &value)
                    .with_context(|| format!("Invalid profile \"{}\"", name))?,
                None => {
                    logs.push(format!(
                        "Unsupported chip type \"{}\" in profile \"{}\"",
                        chip_type, name
                    ));
                    ProfileConfig::Unsupported
                }
            };

            profiles.push(Arc::new(Profile {
                name,
                chip_type,
                description,
                root: root.clone(),
                config,
            }));
        }

        Ok(Manifest { profiles, logs })
    }

    /// First profile in manifest order, the selection default.
    pub fn default_profile(&self) -> Option<Arc<Profile>> {
        self.profiles.first().cloned()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Profile>> {
        self.profiles.iter().find(|p| p.name == name).cloned()
    }
}

fn parse_config(backend: Backend, value: &Value) -> Result<ProfileConfig> {
    let value = value.clone();
    Ok(match backend {
        Backend::Esp => ProfileConfig::Esp(serde_json::from_value::<EspConfig>(value)?),
        Backend::Bmp => ProfileConfig::Bmp(serde_json::from_value::<BmpConfig>(value)?),
        Backend::Dfu => ProfileConfig::Dfu(serde_json::from_value::<DfuConfig>(value)?),
        Backend::OpenOcd => ProfileConfig::OpenOcd(serde_json::from_value::<OpenOcdConfig>(value)?),
        Backend::PyOcd => ProfileConfig::PyOcd(serde_json::from_value::<PyOcdConfig>(value)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_manifest(dir: &Path, json: &str) -> std::path::PathBuf {
        let path = dir.join("manifest.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(json.as_bytes()).unwrap();
        path
    }

    #[test]
    fn profiles_load_in_manifest_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            dir.path(),
            r#"{
                "Sensor v2": {"type": "esp32", "description": "Sensor board",
                              "write-flash": [["0x1000", "boot.bin"]]},
                "Gateway": {"type": "bmp", "description": "Gateway board", "load": "gw.elf"}
            }"#,
        );
        let manifest = Manifest::load(&path).unwrap();
        assert_eq!(manifest.profiles.len(), 2);
        assert_eq!(manifest.profiles[0].name, "Sensor v2");
        assert_eq!(manifest.profiles[1].name, "Gateway");
        assert!(manifest.logs.is_empty());

        let profile = manifest.default_profile().unwrap();
        assert_eq!(profile.name, "Sensor v2");
        assert_eq!(profile.description, "Sensor board");
        let ProfileConfig::Esp(cfg) = &profile.config else {
            panic!("expected esp config");
        };
        assert_eq!(cfg.write_flash, vec![("0x1000".to_string(), "boot.bin".to_string())]);
    }

    #[test]
    fn unsupported_type_is_reported_and_unselectable() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            dir.path(),
            r#"{
                "Custom": {"type": "bogus", "description": "???"},
                "Real": {"type": "dfu", "downloads": []}
            }"#,
        );
        let manifest = Manifest::load(&path).unwrap();
        assert_eq!(
            manifest.logs,
            vec!["Unsupported chip type \"bogus\" in profile \"Custom\""]
        );
        let custom = manifest.get("Custom").unwrap();
        assert!(!custom.is_supported());
        assert_eq!(Backend::for_profile(&custom), None);
        assert!(manifest.get("Real").unwrap().is_supported());
    }

    #[test]
    fn profile_root_is_the_manifest_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(dir.path(), r#"{"P": {"type": "esp32"}}"#);
        let manifest = Manifest::load(&path).unwrap();
        let profile = manifest.get("P").unwrap();
        assert!(profile.root.is_absolute());
        assert_eq!(
            profile.resolve("app.bin"),
            profile.root.join("app.bin")
        );
    }

    #[test]
    fn missing_manifest_is_an_error() {
        assert!(Manifest::load(Path::new("/nonexistent/manifest.json")).is_err());
    }
}
