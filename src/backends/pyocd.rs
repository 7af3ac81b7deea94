//! PyOCD backend, driving the pyocd CLI.
//!
//! The profile carries an ordered command list; every command is validated
//! (known verb, file argument, file exists) before the first probe contact,
//! then each maps onto one pyocd subcommand invocation. Per-command
//! bracketed-percent progress is folded into an overall fraction the same
//! way the ESP backend weights write-flash segments.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::backends::FlashOptions;
use crate::models::{Profile, ProfileConfig, PyOcdConfig, SharedContext};
use crate::process::{self, LineStream, strip_ansi};
use crate::tools::Tools;

static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[=\-# ]*\]\s*(\d+)%").unwrap());

const KNOWN_VERBS: [&str; 2] = ["load", "nrf91-update-modem-fw"];

pub(crate) async fn precheck(tools: &Tools, ctx: &SharedContext) {
    match &tools.pyocd {
        Some(pyocd) => log::info!("Found {}", pyocd.display()),
        None => ctx.log("Error: pyocd not found").await,
    }
}

pub(crate) async fn list_ports(tools: &Tools) -> Vec<String> {
    let Some(pyocd) = &tools.pyocd else {
        return Vec::new();
    };
    let args: Vec<String> = vec!["json".into(), "--probes".into()];
    let Ok(cap) = process::run_capture(pyocd, &args, process::LIST_TIMEOUT).await else {
        return Vec::new();
    };
    parse_probe_list(&cap.stdout)
}

/// Probe unique ids out of `pyocd json --probes` output.
pub(crate) fn parse_probe_list(json: &str) -> Vec<String> {
    let Ok(value) = serde_json::from_str::<Value>(json) else {
        return Vec::new();
    };
    let Some(probes) = value.get("boards").or_else(|| value.get("probes")) else {
        return Vec::new();
    };
    probes
        .as_array()
        .map(|probes| {
            probes
                .iter()
                .filter_map(|p| p.get("unique_id").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// A validated profile command: the pyocd subcommand plus its resolved file.
#[derive(Debug)]
pub(crate) struct PyOcdCommand {
    pub verb: String,
    pub file: PathBuf,
}

/// Validate the profile's command list before any device contact. Returns
/// the error log line on the first invalid command.
pub(crate) fn validate_commands(
    profile: &Profile,
    cfg: &PyOcdConfig,
) -> Result<Vec<PyOcdCommand>, String> {
    let mut commands = Vec::new();
    for cmd in &cfg.commands {
        let Some(verb) = cmd.first() else {
            return Err("Error: command is empty".into());
        };
        if !KNOWN_VERBS.contains(&verb.as_str()) {
            return Err(format!("Error: unknown command: {}", verb));
        }
        let Some(file) = cmd.get(1) else {
            return Err("Error: command is missing file".into());
        };
        let path = profile.resolve(file);
        if !path.exists() {
            return Err(format!("Error: File not found: {}", path.display()));
        }
        commands.push(PyOcdCommand {
            verb: verb.clone(),
            file: path,
        });
    }
    Ok(commands)
}

/// Folds per-command progress bars into one overall fraction.
pub(crate) struct PyOcdProgress {
    commands: usize,
    done: usize,
}

impl PyOcdProgress {
    pub(crate) fn new(commands: usize) -> Self {
        PyOcdProgress { commands, done: 0 }
    }

    pub(crate) fn advance(&mut self) {
        self.done += 1;
    }

    pub(crate) fn base(&self) -> u8 {
        if self.commands == 0 {
            return 0;
        }
        (self.done * 100 / self.commands).min(100) as u8
    }

    pub(crate) fn observe(&self, line: &str) -> Option<u8> {
        let caps = PERCENT_RE.captures(line)?;
        let percent: f64 = caps[1].parse().ok()?;
        if self.commands == 0 {
            return Some(percent.clamp(0.0, 100.0) as u8);
        }
        let overall = (self.done as f64 * 100.0 + percent) / self.commands as f64;
        Some(overall.clamp(0.0, 100.0) as u8)
    }
}

fn session_args(cfg: &PyOcdConfig, target: &str, port: Option<&str>) -> Vec<String> {
    let mut args: Vec<String> = vec!["--target".into(), target.into()];
    if let Some(frequency) = &cfg.frequency {
        args.push("--frequency".into());
        args.push(frequency.to_string());
    }
    if let Some(port) = port {
        args.push("--probe".into());
        args.push(port.into());
    }
    args
}

pub(crate) async fn flash(
    tools: &Tools,
    ctx: &SharedContext,
    port: Option<&str>,
    profile: &Profile,
    options: FlashOptions,
) {
    let ProfileConfig::PyOcd(cfg) = &profile.config else {
        return;
    };
    let Some(target) = cfg.target.as_deref().filter(|t| !t.is_empty()) else {
        ctx.log("Error: target not set").await;
        return;
    };
    let commands = match validate_commands(profile, cfg) {
        Ok(commands) => commands,
        Err(msg) => {
            ctx.log(msg).await;
            return;
        }
    };
    let Some(pyocd) = &tools.pyocd else {
        ctx.log("Error: pyocd not found").await;
        return;
    };

    if let Some(frequency) = &cfg.frequency {
        ctx.log(format!("Frequency: {}", frequency)).await;
    }

    ctx.set_ok(true).await;

    if options.erase_flash {
        ctx.log("Erasing flash...").await;
        let mut args: Vec<String> = vec!["erase".into(), "--chip".into()];
        args.extend(session_args(cfg, target, port));
        if !run_pyocd(ctx, pyocd, &args, None).await {
            ctx.fail().await;
            return;
        }
        ctx.log("Flash erased").await;
    }

    let mut progress = PyOcdProgress::new(commands.len());
    for command in &commands {
        ctx.set_progress(progress.base()).await;
        match command.verb.as_str() {
            "load" => ctx.log(format!("Loading {}...", command.file.display())).await,
            verb => ctx.log(format!("{} {}...", verb, command.file.display())).await,
        }
        let mut args: Vec<String> = vec![command.verb.clone()];
        args.extend(session_args(cfg, target, port));
        args.push(command.file.display().to_string());
        if !run_pyocd(ctx, pyocd, &args, Some(&progress)).await {
            ctx.fail().await;
            return;
        }
        progress.advance();
    }
    ctx.set_progress(100).await;
}

/// Stream one pyocd invocation; `true` only on a clean zero exit. Errors go
/// to the transcript with full detail instead of propagating.
async fn run_pyocd(
    ctx: &SharedContext,
    pyocd: &std::path::Path,
    args: &[String],
    progress: Option<&PyOcdProgress>,
) -> bool {
    log::debug!("{}", process::render_command(pyocd, args));
    let mut stream = match LineStream::spawn(pyocd, args, process::FLASH_TIMEOUT) {
        Ok(stream) => stream,
        Err(err) => {
            ctx.log(format!("Error: {:#}", err)).await;
            return false;
        }
    };
    while let Some(raw) = stream.next_line().await {
        let line = strip_ansi(&raw);
        if let Some(progress) = progress {
            if let Some(percent) = progress.observe(&line) {
                ctx.set_progress(percent).await;
                continue;
            }
        }
        ctx.log(line).await;
    }
    if stream.finish().await {
        true
    } else {
        ctx.log("Error: pyocd failed").await;
        false
    }
}
