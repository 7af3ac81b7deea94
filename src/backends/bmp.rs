//! Black Magic Probe backend, driving arm-none-eabi-gdb in MI mode.
//!
//! A BMP enumerates as two serial interfaces sharing one hardware serial
//! number; only the lower-numbered interface speaks GDB. Progress comes from
//! the MI `+download` records, success from the absence of an `Error` line
//! in the decoded transcript.

use std::time::Duration;

use serialport::SerialPortType;

use crate::models::{Profile, ProfileConfig, SharedContext};
use crate::process::{self, LineStream, gdbmi_line, strip_ansi};
use crate::tools::Tools;

pub(crate) async fn precheck(tools: &Tools, ctx: &SharedContext) {
    match &tools.gdb {
        Some(gdb) => log::info!("Found {}", gdb.display()),
        None => ctx.log("Error: arm-none-eabi-gdb not found").await,
    }
}

/// Sort key that orders `ttyACM2` before `ttyACM10`.
pub(crate) fn natural_key(name: &str) -> Vec<(u64, String)> {
    let mut key = Vec::new();
    let mut chars = name.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            let mut n: u64 = 0;
            while let Some(&d) = chars.peek() {
                let Some(digit) = d.to_digit(10) else { break };
                n = n.saturating_mul(10).saturating_add(digit as u64);
                chars.next();
            }
            key.push((n, String::new()));
        } else {
            let mut text = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() {
                    break;
                }
                text.push(d.to_ascii_lowercase());
                chars.next();
            }
            key.push((u64::MAX, text));
        }
    }
    key
}

/// Pick the canonical GDB interface per probe: entries are paired by USB
/// serial number, pairs with other than two interfaces are dropped, and the
/// lower-numbered interface of each pair wins.
pub(crate) fn pair_probe_ports(entries: &[(String, Option<String>)]) -> Vec<String> {
    let mut paired: Vec<&(String, Option<String>)> = entries
        .iter()
        .filter(|(_, sn)| {
            sn.as_ref().is_some_and(|sn| {
                entries
                    .iter()
                    .filter(|(_, other)| other.as_deref() == Some(sn))
                    .count()
                    == 2
            })
        })
        .collect();
    paired.sort_by_key(|(name, _)| natural_key(name));

    let mut seen = std::collections::HashSet::new();
    let mut result = Vec::new();
    for (name, sn) in paired {
        if seen.insert(sn.clone()) {
            result.push(name.clone());
        }
    }
    result
}

pub(crate) async fn list_ports() -> Vec<String> {
    tokio::task::spawn_blocking(|| {
        let Ok(infos) = serialport::available_ports() else {
            return Vec::new();
        };
        let entries: Vec<(String, Option<String>)> = infos
            .into_iter()
            .map(|info| {
                let serial = match info.port_type {
                    SerialPortType::UsbPort(usb) => usb.serial_number,
                    _ => None,
                };
                (info.port_name, serial)
            })
            .collect();
        pair_probe_ports(&entries)
    })
    .await
    .unwrap_or_default()
}

/// Progress fraction out of an MI `+download,{...}` record.
pub(crate) fn parse_download_record(line: &str) -> Option<u8> {
    let body = line.strip_prefix("+download,{")?.strip_suffix('}')?;
    let mut total_sent: Option<u64> = None;
    let mut total_size: Option<u64> = None;
    for kv in body.split(',') {
        let (key, value) = kv.split_once('=')?;
        let value = value.trim_matches('"');
        match key {
            "total-sent" => total_sent = value.parse().ok(),
            "total-size" => total_size = value.parse().ok(),
            _ => {}
        }
    }
    match (total_sent, total_size) {
        (Some(sent), Some(size)) if size > 0 => Some((sent * 100 / size).min(100) as u8),
        _ => None,
    }
}

/// Escape a firmware path for use inside a GDB `load` expression.
pub(crate) fn escape_gdb_path(path: &str) -> String {
    path.replace('\\', "\\\\").replace(' ', "\\ ")
}

fn monitor_args(port: &str, monitor_cmds: &[String]) -> Vec<String> {
    let mut args = vec![
        "--interpreter=mi".to_string(),
        "-ex".to_string(),
        format!("target extended-remote {}", port),
    ];
    for cmd in monitor_cmds {
        args.push("-ex".to_string());
        args.push(cmd.clone());
    }
    args.push("-ex".to_string());
    args.push("quit".to_string());
    args
}

pub(crate) async fn flash(tools: &Tools, ctx: &SharedContext, port: Option<&str>, profile: &Profile) {
    let ProfileConfig::Bmp(cfg) = &profile.config else {
        return;
    };
    let Some(gdb) = &tools.gdb else {
        ctx.log("Error: arm-none-eabi-gdb not found").await;
        return;
    };

    let file = profile.resolve(&cfg.load);
    if !file.exists() {
        ctx.log(format!("Error: File not found: {}", file.display()))
            .await;
        return;
    }

    let Some(port) = port.filter(|p| !p.is_empty()) else {
        ctx.log("Error: BMP port not found").await;
        return;
    };

    if cfg.tpwr.unwrap_or(true) {
        ctx.log("TPWR power cycle").await;
        let args = monitor_args(
            port,
            &["monitor tpwr disable".to_string(), "monitor tpwr enable".to_string()],
        );
        ctx.log(process::render_command(gdb, &args)).await;
        let mut stream = match LineStream::spawn(gdb, &args, process::FLASH_TIMEOUT) {
            Ok(stream) => stream,
            Err(err) => {
                ctx.log(format!("Error: {:#}", err)).await;
                return;
            }
        };
        while let Some(raw) = stream.next_line().await {
            if let Some(decoded) = gdbmi_line(&raw) {
                ctx.log(strip_ansi(&decoded)).await;
            }
        }
        stream.finish().await;
        // Let the target power rail settle before the real attach.
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    let mut args = vec![
        "--interpreter=mi".to_string(),
        "-ex".to_string(),
        format!("target extended-remote {}", port),
        "-ex".to_string(),
        "monitor tpwr enable".to_string(),
    ];
    if cfg.connect_rst {
        args.push("-ex".to_string());
        args.push("monitor connect_rst enable".to_string());
    }
    args.extend([
        "-ex".to_string(),
        "monitor swd_scan".to_string(),
        "-ex".to_string(),
        "set confirm off".to_string(),
        "-ex".to_string(),
        format!(
            "attach {}",
            cfg.attach.as_ref().map(|a| a.to_string()).unwrap_or_else(|| "1".into())
        ),
        "-ex".to_string(),
        format!("load {}", escape_gdb_path(&file.to_string_lossy())),
        "-ex".to_string(),
        "quit".to_string(),
    ]);

    ctx.set_ok(true).await;
    ctx.log(process::render_command(gdb, &args)).await;
    let mut stream = match LineStream::spawn(gdb, &args, process::FLASH_TIMEOUT) {
        Ok(stream) => stream,
        Err(err) => {
            ctx.log(format!("Error: {:#}", err)).await;
            ctx.fail().await;
            return;
        }
    };
    while let Some(raw) = stream.next_line().await {
        let Some(decoded) = gdbmi_line(&raw) else {
            continue;
        };
        let line = strip_ansi(&decoded);
        if let Some(percent) = parse_download_record(&line) {
            ctx.set_progress(percent).await;
            continue;
        }
        if line.contains("Error") {
            ctx.set_ok(false).await;
        }
        ctx.log(line).await;
    }
    stream.finish().await;

    if ctx.ok().await == Some(true) {
        ctx.set_progress(100).await;
    } else {
        ctx.fail().await;
    }
}
