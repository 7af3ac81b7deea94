//! Per-attempt task state owned by one flash session.

use std::sync::Arc;

use chrono::{DateTime, Local};
use tokio::sync::{RwLock, mpsc};

use crate::models::AppEvent;

/// Mutable record of one flash attempt. Created fresh for every attempt,
/// mutated only by the owning session while it runs, immutable once `done`
/// is set.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Port identifier the attempt is bound to ("Auto" until resolved).
    pub port: String,
    /// Terminal marker, set exactly once by the session.
    pub done: bool,
    /// Tri-state outcome; `None` counts as failure at completion.
    pub ok: Option<bool>,
    /// Overall progress, 0-100.
    pub progress: u8,
    /// MAC address reported by the tool, when the backend exposes one.
    pub mac: Option<String>,
    /// Append-only session transcript.
    pub logs: Vec<String>,
    pub started_at: DateTime<Local>,
}

impl TaskContext {
    fn new(port: &str) -> Self {
        TaskContext {
            port: port.to_string(),
            done: false,
            ok: None,
            progress: 0,
            mac: None,
            logs: Vec::new(),
            started_at: Local::now(),
        }
    }
}

/// Handle to a [`TaskContext`] shared between the owning session (writer)
/// and the coordinator/CLI (readers). Progress is kept monotone here: a
/// value lower than the current one is ignored, and the single permitted
/// drop to zero happens through [`SharedContext::fail`].
#[derive(Clone)]
pub struct SharedContext {
    inner: Arc<RwLock<TaskContext>>,
    events: Option<mpsc::UnboundedSender<AppEvent>>,
}

impl SharedContext {
    pub fn new(port: &str) -> Self {
        SharedContext {
            inner: Arc::new(RwLock::new(TaskContext::new(port))),
            events: None,
        }
    }

    pub fn with_events(port: &str, events: mpsc::UnboundedSender<AppEvent>) -> Self {
        SharedContext {
            inner: Arc::new(RwLock::new(TaskContext::new(port))),
            events: Some(events),
        }
    }

    pub async fn port(&self) -> String {
        self.inner.read().await.port.clone()
    }

    /// Rebind to the concrete port once "Auto" has been resolved.
    pub async fn set_port(&self, port: &str) {
        self.inner.write().await.port = port.to_string();
    }

    /// Announce the session to the event stream.
    pub async fn mark_started(&self) {
        let port = self.inner.read().await.port.clone();
        self.send(AppEvent::SessionStarted(port));
    }

    /// Append a line to the transcript and publish it.
    pub async fn log(&self, line: impl Into<String>) {
        let line = line.into();
        let port = {
            let mut ctx = self.inner.write().await;
            ctx.logs.push(line.clone());
            ctx.port.clone()
        };
        self.send(AppEvent::FlashOutput(port, line));
    }

    /// Publish a line without storing it, for tool output that is shown but
    /// not part of the session transcript.
    pub async fn echo(&self, line: impl Into<String>) {
        let port = self.inner.read().await.port.clone();
        self.send(AppEvent::FlashOutput(port, line.into()));
    }

    /// Raise progress; values below the current one are ignored.
    pub async fn set_progress(&self, percent: u8) {
        let percent = percent.min(100);
        let update = {
            let mut ctx = self.inner.write().await;
            if percent > ctx.progress {
                ctx.progress = percent;
                Some(ctx.port.clone())
            } else {
                None
            }
        };
        if let Some(port) = update {
            self.send(AppEvent::FlashProgress(port, percent));
        }
    }

    pub async fn set_ok(&self, ok: bool) {
        self.inner.write().await.ok = Some(ok);
    }

    pub async fn ok(&self) -> Option<bool> {
        self.inner.read().await.ok
    }

    /// Record a fatal error: outcome false and the one permitted progress
    /// reset to zero.
    pub async fn fail(&self) {
        let port = {
            let mut ctx = self.inner.write().await;
            ctx.ok = Some(false);
            ctx.progress = 0;
            ctx.port.clone()
        };
        self.send(AppEvent::FlashProgress(port, 0));
    }

    pub async fn set_mac(&self, mac: &str) {
        let port = {
            let mut ctx = self.inner.write().await;
            ctx.mac = Some(mac.to_string());
            ctx.port.clone()
        };
        self.send(AppEvent::FlashMac(port, mac.to_string()));
    }

    /// Terminal transition, called exactly once by the owning session.
    pub async fn mark_done(&self, ok: bool) {
        let port = {
            let mut ctx = self.inner.write().await;
            ctx.done = true;
            if ctx.ok.is_none() {
                ctx.ok = Some(ok);
            }
            ctx.port.clone()
        };
        self.send(AppEvent::SessionFinished(port, ok));
    }

    pub async fn snapshot(&self) -> TaskContext {
        self.inner.read().await.clone()
    }

    fn send(&self, event: AppEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}
