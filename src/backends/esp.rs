//! ESP serial bootloader backend, driving esptool/espefuse/espsecure.
//!
//! Besides the plain write-flash sequence this backend owns the secure-boot
//! and flash-encryption provisioning flow. Fuse burns are one-way, so the
//! ordering is rigid: the chip's current security state is queried first,
//! every referenced file is validated before the first burn, and a detected
//! `Error` in tool output stops the run with no further steps.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

use crate::backends::{FlashOptions, serial_ports};
use crate::models::{EspConfig, Profile, ProfileConfig, SharedContext};
use crate::process::{self, LineStream, run_capture, strip_ansi};
use crate::tools::Tools;

static WRITE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Writing at (0x[0-9a-fA-F]+)\s*\[.*?\].*?%\s*(\d+)/(\d+)\s*bytes").unwrap()
});
static MAC_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"MAC:\s*([0-9a-fA-F:]+)").unwrap());

pub(crate) async fn precheck(tools: &Tools, ctx: &SharedContext) {
    match &tools.esptool {
        Some(esptool) => log::info!("Found {}", esptool.display()),
        None => ctx.log("Error: esptool not found").await,
    }
}

pub(crate) async fn list_ports(working: &HashSet<String>) -> Vec<String> {
    serial_ports(working).await
}

/// Security state reported by the chip before any action is taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SecurityState {
    pub flash_encryption_enabled: bool,
    pub secure_boot_enabled: bool,
}

pub(crate) fn parse_security_info(text: &str) -> SecurityState {
    let mut state = SecurityState::default();
    for raw in text.lines() {
        let line = strip_ansi(raw);
        if line.contains("Flash Encryption:") {
            state.flash_encryption_enabled = line.contains("Enabled");
        } else if line.contains("Secure Boot:") {
            state.secure_boot_enabled = line.contains("Enabled");
        }
    }
    state
}

/// Parse a flash offset the way the tools accept it: hex, octal, binary or
/// decimal.
pub(crate) fn parse_offset(s: &str) -> Option<u32> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else if let Some(oct) = s.strip_prefix("0o") {
        u32::from_str_radix(oct, 8).ok()
    } else if let Some(bin) = s.strip_prefix("0b") {
        u32::from_str_radix(bin, 2).ok()
    } else {
        s.parse().ok()
    }
}

pub(crate) enum EspEvent {
    Progress(u8),
    Mac(String),
    Fatal,
}

/// Translates esptool output lines into progress/mac/error events. Progress
/// is weighted across write-flash segments so the bar climbs smoothly from
/// 0 to 100 over the whole sequence instead of resetting per segment.
pub(crate) struct EspOutput {
    progress_map: HashMap<u32, usize>,
    parts: usize,
    current: usize,
}

impl EspOutput {
    pub(crate) fn new(progress_map: HashMap<u32, usize>, parts: usize) -> Self {
        EspOutput {
            progress_map,
            parts,
            current: 0,
        }
    }

    pub(crate) fn observe(&mut self, line: &str) -> Option<EspEvent> {
        if let Some(caps) = WRITE_RE.captures(line) {
            if self.parts > 0 {
                if let Some(offset) = parse_offset(&caps[1]) {
                    if let Some(&part) = self.progress_map.get(&offset) {
                        self.current = part;
                    }
                }
                let sent: f64 = caps[2].parse().unwrap_or(0.0);
                let total: f64 = caps[3].parse().unwrap_or(0.0);
                if total > 0.0 {
                    let parts = self.parts as f64;
                    let percent = (self.current as f64 * 100.0 / parts).floor()
                        + (sent / total * 100.0) / parts;
                    return Some(EspEvent::Progress(percent.clamp(0.0, 100.0) as u8));
                }
            }
            return None;
        }
        if let Some(caps) = MAC_RE.captures(line) {
            return Some(EspEvent::Mac(caps[1].to_string()));
        }
        if line.contains("Error") {
            return Some(EspEvent::Fatal);
        }
        None
    }
}

#[derive(Debug)]
pub(crate) struct WritePlan {
    pub args: Vec<String>,
    pub progress_map: HashMap<u32, usize>,
    pub parts: usize,
}

pub(crate) struct WriteRequest<'a> {
    pub cfg: &'a EspConfig,
    pub chip_type: &'a str,
    pub port: &'a str,
    pub erase_requested: bool,
    pub secure_boot_enabled: bool,
    pub flash_erased: bool,
    pub auto_encryption: bool,
    /// `(offset, file)` pairs, already resolved and (when manually
    /// encrypting) already substituted with the encrypted images.
    pub segments: &'a [(String, PathBuf)],
}

/// Assemble the esptool write-flash invocation and the segment weighting
/// used for progress.
pub(crate) fn build_write_flash(req: &WriteRequest) -> Result<WritePlan, String> {
    let cfg = req.cfg;
    let overwrite_bootloader = cfg.security.secure_boot_overwrite_bootloader;

    let mut args: Vec<String> = vec![
        "--port".into(),
        req.port.into(),
        "--chip".into(),
        req.chip_type.into(),
        "-b".into(),
        cfg.baudrate
            .as_ref()
            .map(|b| b.to_string())
            .unwrap_or_else(|| "460800".into()),
        format!("--before={}", cfg.before.as_deref().unwrap_or("default_reset")),
        format!("--after={}", cfg.after.as_deref().unwrap_or("hard_reset")),
    ];
    if cfg.no_stub || req.auto_encryption {
        args.push("--no-stub".into());
    }
    args.push("write-flash".into());

    let erase_disabled = cfg.erase_flash.as_ref().is_some_and(|p| p.is_disabled());
    if req.erase_requested
        && !erase_disabled
        && !req.flash_erased
        && !(req.secure_boot_enabled && !overwrite_bootloader)
    {
        args.push("--erase-all".into());
        if req.auto_encryption {
            args.push("--force".into());
        }
    }

    args.push("--flash-mode".into());
    args.push(cfg.flash_mode.clone().unwrap_or_else(|| "dio".into()));
    args.push("--flash-freq".into());
    args.push(cfg.flash_freq.clone().unwrap_or_else(|| "80m".into()));
    args.push("--flash-size".into());
    args.push(cfg.flash_size.clone().unwrap_or_else(|| "4MB".into()));
    if req.auto_encryption {
        args.push("--encrypt".into());
        args.push("--force".into());
    }

    let mut progress_map = HashMap::new();
    let mut parts = 0;
    for (offset, path) in req.segments {
        let Some(numeric) = parse_offset(offset) else {
            return Err(format!("Error: Invalid flash offset: {}", offset));
        };
        // Under auto encryption the bootloader region stays untouched
        // unless the profile explicitly allows overwriting it.
        if req.auto_encryption && numeric < 0x8000 && !overwrite_bootloader {
            continue;
        }
        args.push(offset.clone());
        args.push(path.display().to_string());
        progress_map.insert(numeric, parts);
        parts += 1;
    }

    Ok(WritePlan {
        args,
        progress_map,
        parts,
    })
}

/// Temp files created during one attempt, removed on every exit path.
struct TempFiles(Vec<PathBuf>);

impl TempFiles {
    fn new() -> Self {
        TempFiles(Vec::new())
    }

    fn create(&mut self) -> PathBuf {
        let path = std::env::temp_dir().join(format!("flashbrew-{}", Uuid::new_v4().simple()));
        self.0.push(path.clone());
        path
    }
}

impl Drop for TempFiles {
    fn drop(&mut self) {
        for path in &self.0 {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Stream one tool invocation into the context, reporting success only on
/// a clean zero exit.
async fn run_tool(ctx: &SharedContext, label: &str, program: &Path, args: &[String]) -> bool {
    log::debug!("{}", process::render_command(program, args));
    let mut stream = match LineStream::spawn(program, args, process::FLASH_TIMEOUT) {
        Ok(stream) => stream,
        Err(err) => {
            ctx.log(format!("Error: {:#}", err)).await;
            return false;
        }
    };
    while let Some(line) = stream.next_line().await {
        ctx.echo(strip_ansi(&line)).await;
    }
    if stream.finish().await {
        true
    } else {
        ctx.log(format!("Error: {} failed", label)).await;
        false
    }
}

async fn query_security_info(
    ctx: &SharedContext,
    esptool: &Path,
    port: &str,
) -> Option<SecurityState> {
    let args: Vec<String> = vec!["--port".into(), port.into(), "get-security-info".into()];
    match run_capture(esptool, &args, process::LIST_TIMEOUT).await {
        Ok(cap) if cap.success => Some(parse_security_info(&cap.stdout)),
        Ok(_) => {
            ctx.log("Error: get-security-info failed").await;
            None
        }
        Err(err) => {
            ctx.log(format!("Error: {:#}", err)).await;
            None
        }
    }
}

pub(crate) async fn flash(
    tools: &Tools,
    ctx: &SharedContext,
    port: Option<&str>,
    profile: &Profile,
    options: FlashOptions,
) {
    let ProfileConfig::Esp(cfg) = &profile.config else {
        return;
    };
    let Some(port) = port.filter(|p| !p.is_empty()) else {
        ctx.log("Error: Port not found").await;
        return;
    };

    // Every referenced image must exist before anything irreversible runs.
    let mut segments: Vec<(String, PathBuf)> = Vec::new();
    for (offset, file) in &cfg.write_flash {
        let path = profile.resolve(file);
        if !path.exists() {
            ctx.log(format!("Error: File not found: {}", path.display()))
                .await;
            return;
        }
        segments.push((offset.clone(), path));
    }

    let sec = &cfg.security;
    let mut secure_boot_digest = None;
    if sec.secure_boot_requested() {
        if sec.secure_boot_digest.is_empty() {
            ctx.log("Error: Secure boot digest is not set").await;
            return;
        }
        let path = profile.resolve(&sec.secure_boot_digest);
        if !path.exists() {
            ctx.log(format!(
                "Error: Secure boot digest file not found: {}",
                path.display()
            ))
            .await;
            return;
        }
        secure_boot_digest = Some(path);
    }

    let Some(esptool) = &tools.esptool else {
        ctx.log("Error: esptool not found").await;
        return;
    };

    let Some(state) = query_security_info(ctx, esptool, port).await else {
        ctx.fail().await;
        return;
    };
    ctx.log("Security status:").await;
    ctx.log(format!("Flash encryption: {}", state.flash_encryption_enabled))
        .await;
    ctx.log(format!("Secure Boot: {}", state.secure_boot_enabled))
        .await;

    let mut temp = TempFiles::new();
    let mut key_path: Option<PathBuf> = None;
    if sec.encryption_requested() {
        if !sec.flash_encryption_key.is_empty() {
            let path = profile.resolve(&sec.flash_encryption_key);
            if !path.exists() {
                ctx.log(format!(
                    "Error: Flash encryption key file not found: {}",
                    path.display()
                ))
                .await;
                return;
            }
            key_path = Some(path);
        } else if !state.flash_encryption_enabled {
            let Some(espsecure) = &tools.espsecure else {
                ctx.log("Error: espsecure not found").await;
                return;
            };
            let path = temp.create();
            let args: Vec<String> = vec![
                "generate-flash-encryption-key".into(),
                path.display().to_string(),
            ];
            ctx.log(format!("espsecure {}", args.join(" "))).await;
            if !run_tool(ctx, "espsecure generate-flash-encryption-key", espsecure, &args).await {
                ctx.fail().await;
                return;
            }
            ctx.log("espsecure generate-flash-encryption-key done").await;
            key_path = Some(path);
        }
    }

    if profile.chip_type == "esp32c2" {
        ctx.log("Error: eFuse combination for ESP32-C2 is not implemented")
            .await;
        return;
    }

    let manual_encryption =
        key_path.is_some() && sec.encryption_complete() && !state.flash_encryption_enabled;
    let auto_encryption = sec.encryption_requested() && state.flash_encryption_enabled;
    let mut flash_erased = false;

    if manual_encryption {
        let Some(espefuse) = &tools.espefuse else {
            ctx.log("Error: espefuse not found").await;
            return;
        };
        let key = key_path.clone().unwrap_or_default();

        // One full erase before the key burn; from here on the chip only
        // ever sees encrypted images.
        let erase_args: Vec<String> = vec!["--port".into(), port.into(), "erase-flash".into()];
        if let Ok(cap) = run_capture(esptool, &erase_args, process::FLASH_TIMEOUT).await {
            if cap.success {
                flash_erased = true;
                ctx.log("esptool erase-flash done").await;
            }
        }

        let args: Vec<String> = vec![
            "--port".into(),
            port.into(),
            "--do-not-confirm".into(),
            "burn-key".into(),
            sec.flash_encryption_key_block.clone(),
            key.display().to_string(),
            sec.flash_encryption_key_purpose.clone(),
        ];
        ctx.log(format!("espefuse {}", args.join(" "))).await;
        ctx.set_ok(true).await;
        if !run_tool(ctx, "espefuse burn-key", espefuse, &args).await {
            ctx.fail().await;
            return;
        }
        ctx.log("espefuse burn-key for flash_encryption_key done").await;

        let args: Vec<String> = vec![
            "--port".into(),
            port.into(),
            "--do-not-confirm".into(),
            "burn-efuse".into(),
            "SPI_BOOT_CRYPT_CNT".into(),
            "7".into(),
        ];
        ctx.log(format!("espefuse {}", args.join(" "))).await;
        ctx.set_ok(true).await;
        if !run_tool(ctx, "espefuse burn-efuse", espefuse, &args).await {
            ctx.fail().await;
            return;
        }
        ctx.log("espefuse burn-efuse for flash_encryption_key done").await;
    }

    if sec.secure_boot_complete() && !state.secure_boot_enabled {
        let Some(espefuse) = &tools.espefuse else {
            ctx.log("Error: espefuse not found").await;
            return;
        };
        let digest = secure_boot_digest.clone().unwrap_or_default();
        let args: Vec<String> = vec![
            "--port".into(),
            port.into(),
            "--do-not-confirm".into(),
            "burn-key".into(),
            sec.secure_boot_digest_block.clone(),
            digest.display().to_string(),
            sec.secure_boot_digest_purpose.clone(),
        ];
        ctx.log(format!("espefuse {}", args.join(" "))).await;
        ctx.set_ok(true).await;
        if !run_tool(ctx, "espefuse burn-key", espefuse, &args).await {
            ctx.fail().await;
            return;
        }
        ctx.log("espefuse burn-key for secure_boot_digest done").await;
    }

    ctx.log("Download encryption status:").await;
    ctx.log(format!("Auto encryption: {}", auto_encryption)).await;
    ctx.log(format!("Manual encryption: {}", manual_encryption))
        .await;

    if manual_encryption {
        let Some(espsecure) = &tools.espsecure else {
            ctx.log("Error: espsecure not found").await;
            return;
        };
        let key = key_path.clone().unwrap_or_default();
        for (offset, path) in &mut segments {
            let encrypted = temp.create();
            let args: Vec<String> = vec![
                "encrypt-flash-data".into(),
                "--aes_xts".into(),
                "--keyfile".into(),
                key.display().to_string(),
                "--address".into(),
                offset.clone(),
                "--output".into(),
                encrypted.display().to_string(),
                path.display().to_string(),
            ];
            if !run_tool(ctx, "espsecure encrypt-flash-data", espsecure, &args).await {
                ctx.fail().await;
                return;
            }
            *path = encrypted;
        }
    }

    let plan = match build_write_flash(&WriteRequest {
        cfg,
        chip_type: &profile.chip_type,
        port,
        erase_requested: options.erase_flash,
        secure_boot_enabled: state.secure_boot_enabled,
        flash_erased,
        auto_encryption,
        segments: &segments,
    }) {
        Ok(plan) => plan,
        Err(msg) => {
            ctx.log(msg).await;
            return;
        }
    };

    log::debug!("{}", process::render_command(esptool, &plan.args));
    ctx.set_ok(true).await;
    let mut parser = EspOutput::new(plan.progress_map, plan.parts);
    let mut stream = match LineStream::spawn(esptool, &plan.args, process::FLASH_TIMEOUT) {
        Ok(stream) => stream,
        Err(err) => {
            ctx.log(format!("Error: {:#}", err)).await;
            ctx.fail().await;
            return;
        }
    };
    while let Some(raw) = stream.next_line().await {
        let line = strip_ansi(&raw);
        ctx.echo(line.clone()).await;
        match parser.observe(&line) {
            Some(EspEvent::Progress(percent)) => ctx.set_progress(percent).await,
            Some(EspEvent::Mac(mac)) => ctx.set_mac(&mac).await,
            Some(EspEvent::Fatal) => {
                ctx.fail().await;
                ctx.log(line).await;
                stream.kill().await;
                return;
            }
            None => {}
        }
    }
    stream.finish().await;
    if ctx.ok().await == Some(true) {
        ctx.set_progress(100).await;
    }

    if !cfg.efuse.is_empty() {
        let Some(espefuse) = &tools.espefuse else {
            ctx.log("Error: espefuse not found").await;
            return;
        };
        let mut args: Vec<String> = vec![
            "--port".into(),
            port.into(),
            "--do-not-confirm".into(),
            "burn-efuse".into(),
        ];
        for (key, value) in &cfg.efuse {
            args.push(key.clone());
            args.push(value.clone());
        }
        ctx.log(format!("EFUSE: {:?}", cfg.efuse)).await;
        ctx.log(format!("espefuse {}", args.join(" "))).await;
        ctx.set_ok(true).await;
        if !run_tool(ctx, "espefuse burn-efuse", espefuse, &args).await {
            ctx.fail().await;
            return;
        }
        ctx.log("espefuse burn-efuse done").await;
    }

    if !cfg.write_protect_efuse.is_empty() {
        let Some(espefuse) = &tools.espefuse else {
            ctx.log("Error: espefuse not found").await;
            return;
        };
        let mut args: Vec<String> = vec![
            "--port".into(),
            port.into(),
            "--do-not-confirm".into(),
            "write-protect-efuse".into(),
        ];
        args.extend(cfg.write_protect_efuse.iter().cloned());
        ctx.log(format!("espefuse {}", args.join(" "))).await;
        if !run_tool(ctx, "espefuse write-protect-efuse", espefuse, &args).await {
            ctx.fail().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ErasePolicy;

    fn esp_profile(root: &Path, cfg: EspConfig) -> Profile {
        Profile {
            name: "test".into(),
            chip_type: "esp32".into(),
            description: String::new(),
            root: root.to_path_buf(),
            config: ProfileConfig::Esp(cfg),
        }
    }

    #[tokio::test]
    async fn missing_segment_file_aborts_before_any_tool_runs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.bin"), b"app").unwrap();
        let cfg = EspConfig {
            write_flash: vec![
                ("0x1000".into(), "boot.bin".into()),
                ("0x8000".into(), "app.bin".into()),
            ],
            ..Default::default()
        };
        let profile = esp_profile(dir.path(), cfg);
        let ctx = SharedContext::new("ttyUSB0");

        // No tools resolved: reaching any tool lookup would log a different
        // error, so the transcript proves the file check came first.
        flash(
            &Tools::default(),
            &ctx,
            Some("ttyUSB0"),
            &profile,
            FlashOptions::default(),
        )
        .await;

        let snap = ctx.snapshot().await;
        let expected = format!(
            "Error: File not found: {}",
            dir.path().join("boot.bin").display()
        );
        assert_eq!(snap.logs, vec![expected]);
        assert_ne!(snap.ok, Some(true));
        assert_eq!(snap.progress, 0);
    }

    #[tokio::test]
    async fn missing_port_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let profile = esp_profile(dir.path(), EspConfig::default());
        let ctx = SharedContext::new("Auto");
        flash(&Tools::default(), &ctx, None, &profile, FlashOptions::default()).await;
        assert_eq!(ctx.snapshot().await.logs, vec!["Error: Port not found"]);
    }

    #[test]
    fn progress_is_weighted_across_segments() {
        let mut map = HashMap::new();
        map.insert(0x1000, 0);
        map.insert(0x8000, 1);
        let mut parser = EspOutput::new(map, 2);

        let event = parser.observe("Writing at 0x00001000 [====      ] 50% 512/1024 bytes");
        match event {
            Some(EspEvent::Progress(p)) => assert_eq!(p, 25),
            _ => panic!("expected progress event"),
        }
        let event = parser.observe("Writing at 0x00008000 [====      ] 50% 512/1024 bytes");
        match event {
            Some(EspEvent::Progress(p)) => assert_eq!(p, 75),
            _ => panic!("expected progress event"),
        }
        let event = parser.observe("Writing at 0x00008000 [==========] 100% 1024/1024 bytes");
        match event {
            Some(EspEvent::Progress(p)) => assert_eq!(p, 100),
            _ => panic!("expected progress event"),
        }
    }

    #[test]
    fn mac_and_error_lines_are_recognized() {
        let mut parser = EspOutput::new(HashMap::new(), 0);
        match parser.observe("MAC: aa:bb:cc:dd:ee:ff") {
            Some(EspEvent::Mac(mac)) => assert_eq!(mac, "aa:bb:cc:dd:ee:ff"),
            _ => panic!("expected mac event"),
        }
        assert!(matches!(
            parser.observe("A fatal error occurred: Error: Invalid head of packet"),
            Some(EspEvent::Fatal)
        ));
        assert!(parser.observe("Hash of data verified.").is_none());
    }

    #[test]
    fn parse_offset_accepts_tool_notations() {
        assert_eq!(parse_offset("0x1000"), Some(0x1000));
        assert_eq!(parse_offset("4096"), Some(4096));
        assert_eq!(parse_offset("0o17"), Some(15));
        assert_eq!(parse_offset("0b101"), Some(5));
        assert_eq!(parse_offset("zzz"), None);
    }

    #[test]
    fn parse_security_info_reads_both_flags() {
        let text = "Security Information:\nSecure Boot: Enabled\nFlash Encryption: Disabled\n";
        let state = parse_security_info(text);
        assert!(state.secure_boot_enabled);
        assert!(!state.flash_encryption_enabled);
    }

    #[test]
    fn erase_all_is_gated_on_request_policy_and_secure_boot() {
        let segments = vec![("0x1000".to_string(), PathBuf::from("/tmp/boot.bin"))];
        let cfg = EspConfig::default();
        let base = WriteRequest {
            cfg: &cfg,
            chip_type: "esp32",
            port: "ttyUSB0",
            erase_requested: true,
            secure_boot_enabled: false,
            flash_erased: false,
            auto_encryption: false,
            segments: &segments,
        };
        let plan = build_write_flash(&base).unwrap();
        assert!(plan.args.contains(&"--erase-all".to_string()));

        let plan = build_write_flash(&WriteRequest {
            erase_requested: false,
            ..base
        })
        .unwrap();
        assert!(!plan.args.contains(&"--erase-all".to_string()));

        // secure boot already enabled and bootloader overwrite not allowed
        let plan = build_write_flash(&WriteRequest {
            secure_boot_enabled: true,
            ..base
        })
        .unwrap();
        assert!(!plan.args.contains(&"--erase-all".to_string()));

        let disabled = EspConfig {
            erase_flash: Some(ErasePolicy::Mode("disabled".into())),
            ..Default::default()
        };
        let plan = build_write_flash(&WriteRequest {
            cfg: &disabled,
            ..base
        })
        .unwrap();
        assert!(!plan.args.contains(&"--erase-all".to_string()));
    }

    #[test]
    fn auto_encryption_skips_bootloader_and_forces_encrypt() {
        let segments = vec![
            ("0x1000".to_string(), PathBuf::from("/tmp/boot.bin")),
            ("0x10000".to_string(), PathBuf::from("/tmp/app.bin")),
        ];
        let cfg = EspConfig::default();
        let plan = build_write_flash(&WriteRequest {
            cfg: &cfg,
            chip_type: "esp32",
            port: "ttyUSB0",
            erase_requested: false,
            secure_boot_enabled: false,
            flash_erased: false,
            auto_encryption: true,
            segments: &segments,
        })
        .unwrap();
        assert!(plan.args.contains(&"--encrypt".to_string()));
        assert!(plan.args.contains(&"--no-stub".to_string()));
        assert_eq!(plan.parts, 1);
        assert!(!plan.args.contains(&"0x1000".to_string()));
        assert!(plan.args.contains(&"0x10000".to_string()));
    }

    #[test]
    fn invalid_offset_is_rejected() {
        let segments = vec![("bogus".to_string(), PathBuf::from("/tmp/a.bin"))];
        let cfg = EspConfig::default();
        let err = build_write_flash(&WriteRequest {
            cfg: &cfg,
            chip_type: "esp32",
            port: "ttyUSB0",
            erase_requested: false,
            secure_boot_enabled: false,
            flash_erased: false,
            auto_encryption: false,
            segments: &segments,
        })
        .unwrap_err();
        assert_eq!(err, "Error: Invalid flash offset: bogus");
    }
}
