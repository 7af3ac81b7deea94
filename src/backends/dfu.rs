//! DFU backend, driving dfu-util.
//!
//! dfu-util reports an erase phase and a download phase per file, each on
//! its own 0-100 scale. [`DfuProgress`] folds those onto one overall scale:
//! every file owns an equal share, and inside a share an erase phase takes
//! the first half. Success requires at least one observed progress line; a
//! run that never progressed is a failure regardless of exit code.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

use crate::models::{Profile, ProfileConfig, SharedContext};
use crate::process::{self, LineStream, strip_ansi};
use crate::tools::Tools;

static PHASE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*(\S*)\s*\[[ =]*\] *(\d+)%").unwrap());
static DEVICE_PATH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"path="([^"]+)""#).unwrap());

const DEFAULT_DFUSE_ADDRESS: &str = "0x08002000:leave";

pub(crate) async fn precheck(tools: &Tools, ctx: &SharedContext) {
    match &tools.dfu_util {
        Some(dfu_util) => log::info!("Found {}", dfu_util.display()),
        None => ctx.log("Error: dfu-util not found").await,
    }
}

pub(crate) async fn list_ports(tools: &Tools) -> Vec<String> {
    let Some(dfu_util) = &tools.dfu_util else {
        return Vec::new();
    };
    let args = vec!["-l".to_string()];
    let Ok(cap) = process::run_capture(dfu_util, &args, process::LIST_TIMEOUT).await else {
        return Vec::new();
    };
    let mut ports = Vec::new();
    for raw in cap.stdout.lines().chain(cap.stderr.lines()) {
        let line = strip_ansi(raw);
        if line.starts_with("Found") {
            if let Some((_, ident)) = line.split_once(": ") {
                ports.push(ident.to_string());
            }
        }
    }
    ports
}

/// USB device path embedded in a dfu-util port identifier, handed back to
/// dfu-util as its `-p` argument.
pub(crate) fn device_path(port: &str) -> Option<String> {
    DEVICE_PATH_RE
        .captures(port)
        .map(|caps| caps[1].to_string())
}

/// Folds per-phase dfu-util percentages onto one overall 0-100 scale across
/// a multi-file download sequence.
pub(crate) struct DfuProgress {
    files: usize,
    current: usize,
    has_erase_phase: bool,
    observed: bool,
}

impl DfuProgress {
    pub(crate) fn new(files: usize) -> Self {
        DfuProgress {
            files,
            current: 0,
            has_erase_phase: false,
            observed: false,
        }
    }

    /// Move on to the next file's share of the scale.
    pub(crate) fn next_file(&mut self) {
        self.current += 1;
        self.has_erase_phase = false;
    }

    pub(crate) fn observed_progress(&self) -> bool {
        self.observed
    }

    /// Overall percentage for a progress line, `None` for ordinary output.
    pub(crate) fn observe(&mut self, line: &str) -> Option<u8> {
        let caps = PHASE_RE.captures(line)?;
        let phase = &caps[1];
        let mut percent: f64 = caps[2].parse().ok()?;
        match phase {
            "Erase" => {
                self.has_erase_phase = true;
                percent *= 0.5;
            }
            "Download" => {
                if self.has_erase_phase {
                    percent = percent * 0.5 + 50.0;
                }
            }
            _ => {}
        }
        self.observed = true;
        if self.files == 0 {
            return Some(percent.clamp(0.0, 100.0) as u8);
        }
        let overall = (self.current as f64 * 100.0 + percent) / self.files as f64;
        Some(overall.clamp(0.0, 100.0) as u8)
    }
}

pub(crate) async fn flash(tools: &Tools, ctx: &SharedContext, port: Option<&str>, profile: &Profile) {
    let ProfileConfig::Dfu(cfg) = &profile.config else {
        return;
    };
    let Some(dfu_util) = &tools.dfu_util else {
        ctx.log("Error: dfu-util not found").await;
        return;
    };

    let mut files: Vec<PathBuf> = Vec::new();
    for download in &cfg.downloads {
        let path = profile.resolve(&download.download);
        if !path.exists() {
            ctx.log(format!("Error: File not found: {}", path.display()))
                .await;
            return;
        }
        files.push(path);
    }

    let Some(port) = port.filter(|p| !p.is_empty()) else {
        ctx.log("Error: DFU port not found").await;
        return;
    };
    let Some(device) = device_path(port) else {
        log::debug!("No device path in port identifier: {}", port);
        return;
    };

    let mut progress = DfuProgress::new(cfg.downloads.len());
    for (download, path) in cfg.downloads.iter().zip(&files) {
        let mut args: Vec<String> = vec!["-p".into(), device.clone()];
        let dfuse_address = cfg
            .dfuse_address
            .clone()
            .unwrap_or_else(|| DEFAULT_DFUSE_ADDRESS.into());
        if !dfuse_address.is_empty() {
            args.push("--dfuse-address".into());
            args.push(dfuse_address);
        }
        args.push("--download".into());
        args.push(path.display().to_string());
        if let Some(alt) = &download.alt {
            args.push("--alt".into());
            args.push(alt.to_string());
        }
        if download.reset {
            args.push("--reset".into());
        }

        ctx.log(process::render_command(dfu_util, &args)).await;
        let mut stream = match LineStream::spawn(dfu_util, &args, process::FLASH_TIMEOUT) {
            Ok(stream) => stream,
            Err(err) => {
                ctx.log(format!("Error: {:#}", err)).await;
                ctx.fail().await;
                return;
            }
        };
        while let Some(raw) = stream.next_line().await {
            let line = strip_ansi(&raw);
            if line.is_empty() {
                continue;
            }
            if let Some(percent) = progress.observe(&line) {
                ctx.set_progress(percent).await;
                continue;
            }
            ctx.log(line).await;
        }
        stream.finish().await;
        progress.next_file();
    }

    if progress.observed_progress() {
        ctx.set_ok(true).await;
    }
}
