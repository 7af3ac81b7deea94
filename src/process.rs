//! Shared subprocess streaming for the external flashing tools.
//!
//! Every backend drives its tool the same way: spawn with piped
//! stdout/stderr, read the combined output line by line, and hand each line
//! to a backend-specific parser. The stream is bounded by a fixed timeout so
//! an unresponsive device cannot hang a session forever; hitting the
//! deadline kills the child and is reported as end-of-stream.

use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Upper bound for one flash-tool invocation.
pub const FLASH_TIMEOUT: Duration = Duration::from_secs(600);

/// Upper bound for one-shot enumeration/query commands.
pub const LIST_TIMEOUT: Duration = Duration::from_secs(30);

static ANSI_ESCAPES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").unwrap());

/// Remove ANSI color/cursor escape sequences before a line is stored or
/// pattern-matched.
pub fn strip_ansi(s: &str) -> String {
    ANSI_ESCAPES.replace_all(s, "").into_owned()
}

/// Translate one GDB machine-interface line into its displayable payload.
///
/// `@`/`~`/`&` prefixed lines carry a JSON-escaped string; `=` notification
/// lines are dropped (`None`); everything else passes through unchanged.
pub fn gdbmi_line(line: &str) -> Option<String> {
    match line.chars().next() {
        None => Some(String::new()),
        Some('@' | '~' | '&') => match serde_json::from_str::<String>(&line[1..]) {
            Ok(payload) => Some(payload.trim_end_matches(['\r', '\n']).to_string()),
            Err(_) => Some(line.to_string()),
        },
        Some('=') => None,
        Some(_) => Some(line.to_string()),
    }
}

/// Render a command line the way it is echoed into session logs.
pub fn render_command(program: &Path, args: &[String]) -> String {
    let mut parts = vec![program.display().to_string()];
    parts.extend(args.iter().cloned());
    parts.join(" ")
}

/// A spawned tool whose stdout and stderr are streamed as lines through one
/// channel. Order is preserved per stream, matching how the tools emit their
/// progress on a single stream in practice.
pub struct LineStream {
    child: Child,
    rx: mpsc::UnboundedReceiver<String>,
    deadline: Instant,
    timed_out: bool,
}

impl LineStream {
    pub fn spawn(program: &Path, args: &[String], timeout: Duration) -> Result<LineStream> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn {}", program.display()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            read_lines(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            read_lines(stderr, tx);
        }

        Ok(LineStream {
            child,
            rx,
            deadline: Instant::now() + timeout,
            timed_out: false,
        })
    }

    /// Next output line, or `None` on end-of-stream. A timeout kills the
    /// child and reports end-of-stream.
    pub async fn next_line(&mut self) -> Option<String> {
        if self.timed_out {
            return None;
        }
        tokio::select! {
            line = self.rx.recv() => line,
            _ = tokio::time::sleep_until(self.deadline) => {
                self.timed_out = true;
                let _ = self.child.start_kill();
                None
            }
        }
    }

    /// Abort the child without waiting for remaining output.
    pub async fn kill(mut self) {
        let _ = self.child.kill().await;
    }

    /// Reap the child. Returns `true` only for a clean zero exit.
    pub async fn finish(mut self) -> bool {
        let timed_out = self.timed_out;
        match self.child.wait().await {
            Ok(status) => !timed_out && status.success(),
            Err(_) => false,
        }
    }
}

fn read_lines<R>(stream: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buffer = Vec::new();
        while reader.read_until(b'\n', &mut buffer).await.unwrap_or(0) > 0 {
            let line = String::from_utf8_lossy(&buffer);
            let _ = tx.send(line.trim_end_matches(['\r', '\n']).to_string());
            buffer.clear();
        }
    });
}

/// Captured output of a one-shot command.
pub struct Captured {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Run a command to completion and capture its output, bounded by `timeout`.
pub async fn run_capture(program: &Path, args: &[String], timeout: Duration) -> Result<Captured> {
    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null());
    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .with_context(|| format!("{} timed out", program.display()))?
        .with_context(|| format!("Failed to run {}", program.display()))?;
    Ok(Captured {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
