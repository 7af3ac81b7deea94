//! OpenOCD backend.
//!
//! A flash run is up to four discrete invocations: optional pre-commands,
//! erase when requested, the program/verify/reset sequence, and optional
//! post-commands. OpenOCD's exit code is unreliable across adapters, so
//! success is gated on the literal `Programming Finished` marker in the main
//! invocation's output.

use std::path::{Path, PathBuf};

use crate::backends::FlashOptions;
use crate::models::{OpenOcdConfig, Profile, ProfileConfig, SharedContext};
use crate::process::{self, LineStream, strip_ansi};
use crate::tools::{OpenOcdInstall, Tools};

const FINISHED_MARKER: &str = "Programming Finished";
const SERIAL_MARKERS: [&str; 2] = ["CMSIS-DAP: Serial# =", "Device: Serial number ="];

pub(crate) async fn precheck(tools: &Tools, ctx: &SharedContext) {
    match &tools.openocd {
        Some(install) => log::info!("Found {}", install.binary.display()),
        None => ctx.log("Error: OpenOCD not found").await,
    }
}

/// Interface script path: relative references resolve against the install's
/// scripts tree.
pub(crate) fn interface_path(install: &OpenOcdInstall, cfg: &OpenOcdConfig) -> PathBuf {
    resolve_script(install, "interface", &cfg.interface)
}

pub(crate) fn target_path(install: &OpenOcdInstall, cfg: &OpenOcdConfig) -> PathBuf {
    resolve_script(install, "target", &cfg.target)
}

fn resolve_script(install: &OpenOcdInstall, kind: &str, file: &str) -> PathBuf {
    let path = Path::new(file);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        install.scripts.join("scripts").join(kind).join(path)
    }
}

pub(crate) async fn list_ports(tools: &Tools, profile: &Profile) -> Vec<String> {
    let Some(install) = &tools.openocd else {
        return Vec::new();
    };
    let ProfileConfig::OpenOcd(cfg) = &profile.config else {
        return Vec::new();
    };
    let interface = interface_path(install, cfg);
    let args: Vec<String> = vec![
        "-d3".into(),
        "-f".into(),
        interface.display().to_string(),
        "-c".into(),
        "interface".into(),
    ];
    let Ok(cap) = process::run_capture(&install.binary, &args, process::LIST_TIMEOUT).await else {
        return Vec::new();
    };
    let mut ports = Vec::new();
    for raw in cap.stdout.lines().chain(cap.stderr.lines()) {
        let line = strip_ansi(raw);
        for marker in SERIAL_MARKERS {
            if let Some((_, serial)) = line.split_once(marker) {
                ports.push(serial.trim().to_string());
                break;
            }
        }
    }
    ports
}

/// Tcl escaping for a path inside a `program` expression.
pub(crate) fn escape_tcl_path(path: &str) -> String {
    path.replace('\\', "/").replace('"', "\\\"")
}

/// Arguments for a standalone command invocation (pre/post hooks, erase):
/// interface, transport, target, init, the commands, exit.
pub(crate) fn command_args(
    interface: &Path,
    target: &Path,
    transport: Option<&str>,
    commands: &[String],
) -> Vec<String> {
    let mut args: Vec<String> = vec!["-f".into(), interface.display().to_string()];
    if let Some(transport) = transport {
        args.push("-c".into());
        args.push(format!("transport select {}", transport));
    }
    args.push("-f".into());
    args.push(target.display().to_string());
    args.push("-c".into());
    args.push("init".into());
    for command in commands {
        args.push("-c".into());
        args.push(command.clone());
    }
    args.push("-c".into());
    args.push("exit".into());
    args
}

/// Arguments for the main program/verify/reset invocation.
pub(crate) fn program_args(
    interface: &Path,
    target: &Path,
    cfg: &OpenOcdConfig,
    port: Option<&str>,
    file: &str,
) -> Vec<String> {
    let mut args: Vec<String> = vec!["-f".into(), interface.display().to_string()];
    if let Some(port) = port {
        args.push("-c".into());
        args.push(format!("adapter serial \"{}\"", port));
    }
    if let Some(transport) = &cfg.transport {
        args.push("-c".into());
        args.push(format!("transport select {}", transport));
    }
    let offset = cfg
        .program_offset
        .as_ref()
        .map(|o| format!(" {}", o))
        .unwrap_or_default();
    args.push("-f".into());
    args.push(target.display().to_string());
    args.push("-c".into());
    args.push(format!("program \"{}\" verify reset exit{}", file, offset));
    args
}

/// Stream one invocation into the transcript; reports whether the finished
/// marker was observed.
async fn run_openocd(ctx: &SharedContext, binary: &Path, args: &[String]) -> bool {
    ctx.log(process::render_command(binary, args)).await;
    let mut stream = match LineStream::spawn(binary, args, process::FLASH_TIMEOUT) {
        Ok(stream) => stream,
        Err(err) => {
            ctx.log(format!("Error: {:#}", err)).await;
            return false;
        }
    };
    let mut finished = false;
    while let Some(raw) = stream.next_line().await {
        let line = strip_ansi(&raw);
        if line.contains(FINISHED_MARKER) {
            finished = true;
        }
        ctx.log(line).await;
    }
    stream.finish().await;
    finished
}

pub(crate) async fn flash(
    tools: &Tools,
    ctx: &SharedContext,
    port: Option<&str>,
    profile: &Profile,
    options: FlashOptions,
) {
    let ProfileConfig::OpenOcd(cfg) = &profile.config else {
        return;
    };
    let Some(install) = &tools.openocd else {
        ctx.log("Error: OpenOCD not found").await;
        return;
    };

    let file = profile.resolve(&cfg.program);
    if !file.exists() {
        ctx.log(format!("Error: File not found: {}", file.display()))
            .await;
        return;
    }
    let file = escape_tcl_path(&file.to_string_lossy());

    let interface = interface_path(install, cfg);
    let target = target_path(install, cfg);
    let mut scripts_ok = true;
    if !interface.exists() {
        ctx.log(format!(
            "Error: Interface file not found: {}",
            interface.display()
        ))
        .await;
        scripts_ok = false;
    }
    if !target.exists() {
        ctx.log(format!("Error: Target file not found: {}", target.display()))
            .await;
        scripts_ok = false;
    }
    if !scripts_ok {
        return;
    }

    if !cfg.before.is_empty() {
        let args = command_args(&interface, &target, cfg.transport.as_deref(), &cfg.before);
        run_openocd(ctx, &install.binary, &args).await;
    }

    if options.erase_flash {
        let erase = vec![
            "reset halt".to_string(),
            "flash erase_sector 0 0 last".to_string(),
        ];
        let args = command_args(&interface, &target, cfg.transport.as_deref(), &erase);
        run_openocd(ctx, &install.binary, &args).await;
    }

    let args = program_args(&interface, &target, cfg, port, &file);
    if run_openocd(ctx, &install.binary, &args).await {
        ctx.set_ok(true).await;
    }

    if !cfg.after.is_empty() {
        let args = command_args(&interface, &target, cfg.transport.as_deref(), &cfg.after);
        run_openocd(ctx, &install.binary, &args).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn install(root: &Path) -> OpenOcdInstall {
        OpenOcdInstall {
            binary: root.join("bin/openocd"),
            scripts: root.join("share/openocd"),
        }
    }

    #[test]
    fn relative_scripts_resolve_against_the_install() {
        let install = install(Path::new("/opt/openocd"));
        let cfg = OpenOcdConfig {
            interface: "stlink.cfg".into(),
            target: "stm32f4x.cfg".into(),
            ..Default::default()
        };
        assert_eq!(
            interface_path(&install, &cfg),
            Path::new("/opt/openocd/share/openocd/scripts/interface/stlink.cfg")
        );
        assert_eq!(
            target_path(&install, &cfg),
            Path::new("/opt/openocd/share/openocd/scripts/target/stm32f4x.cfg")
        );
    }

    #[test]
    fn absolute_scripts_pass_through() {
        let install = install(Path::new("/opt/openocd"));
        let cfg = OpenOcdConfig {
            interface: "/etc/openocd/custom.cfg".into(),
            ..Default::default()
        };
        assert_eq!(
            interface_path(&install, &cfg),
            Path::new("/etc/openocd/custom.cfg")
        );
    }

    #[test]
    fn program_invocation_carries_port_transport_and_offset() {
        let cfg = OpenOcdConfig {
            transport: Some("swd".into()),
            program_offset: Some("0x08000000".into()),
            ..Default::default()
        };
        let args = program_args(
            Path::new("/s/interface/stlink.cfg"),
            Path::new("/s/target/stm32f4x.cfg"),
            &cfg,
            Some("066EFF3"),
            "/fw/app.elf",
        );
        assert_eq!(
            args,
            vec![
                "-f",
                "/s/interface/stlink.cfg",
                "-c",
                "adapter serial \"066EFF3\"",
                "-c",
                "transport select swd",
                "-f",
                "/s/target/stm32f4x.cfg",
                "-c",
                "program \"/fw/app.elf\" verify reset exit 0x08000000",
            ]
        );
    }

    #[test]
    fn command_invocation_wraps_commands_in_init_and_exit() {
        let args = command_args(
            Path::new("i.cfg"),
            Path::new("t.cfg"),
            None,
            &["reset halt".to_string(), "flash erase_sector 0 0 last".to_string()],
        );
        assert_eq!(
            args,
            vec![
                "-f",
                "i.cfg",
                "-f",
                "t.cfg",
                "-c",
                "init",
                "-c",
                "reset halt",
                "-c",
                "flash erase_sector 0 0 last",
                "-c",
                "exit",
            ]
        );
    }

    #[test]
    fn tcl_paths_use_forward_slashes() {
        assert_eq!(
            escape_tcl_path("C:\\fw\\app \"v2\".elf"),
            "C:/fw/app \\\"v2\\\".elf"
        );
    }

    #[tokio::test]
    async fn missing_scripts_are_both_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.elf"), b"elf").unwrap();
        let profile = Profile {
            name: "ocd".into(),
            chip_type: "openocd".into(),
            description: String::new(),
            root: dir.path().to_path_buf(),
            config: ProfileConfig::OpenOcd(OpenOcdConfig {
                interface: "missing-interface.cfg".into(),
                target: "missing-target.cfg".into(),
                program: "app.elf".into(),
                ..Default::default()
            }),
        };
        let tools = Tools {
            openocd: Some(install(dir.path())),
            ..Default::default()
        };
        let ctx = SharedContext::new("Auto");
        flash(&tools, &ctx, None, &profile, FlashOptions::default()).await;
        let snap = ctx.snapshot().await;
        assert_eq!(snap.logs.len(), 2);
        assert!(snap.logs[0].starts_with("Error: Interface file not found:"));
        assert!(snap.logs[1].starts_with("Error: Target file not found:"));
        assert_ne!(snap.ok, Some(true));
    }
}
