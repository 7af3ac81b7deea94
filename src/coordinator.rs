//! Batch coordinator: reconciles live device presence against sessions.
//!
//! One polling loop enumerates ports for the selected profile every second
//! and diffs the result against the tracked port sets. Removals are fully
//! resolved before new ports are considered; each fresh port gets its own
//! session task bound to a fresh context. Stopping batch mode only
//! suppresses new spawns; in-flight sessions run to completion.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;

use crate::backends::{Backend, FlashOptions};
use crate::models::{AppEvent, PortSets, PortState, Profile, SharedContext, TaskContext};
use crate::session::Session;
use crate::tools::Tools;

pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Default)]
struct BatchState {
    profile: Option<Arc<Profile>>,
    backend: Option<Backend>,
    options: FlashOptions,
    /// Batch tracking is on from start until the next start; spawning stops
    /// as soon as the operator stops the batch.
    tracking: bool,
    spawning: bool,
    live: Vec<String>,
    /// Per-port display records in spawn order, one per session.
    records: Vec<(String, SharedContext)>,
}

#[derive(Clone)]
pub struct Coordinator {
    tools: Arc<Tools>,
    events: mpsc::UnboundedSender<AppEvent>,
    state: Arc<RwLock<BatchState>>,
    ports: Arc<RwLock<PortSets>>,
}

impl Coordinator {
    pub fn new(tools: Arc<Tools>, events: mpsc::UnboundedSender<AppEvent>) -> Self {
        Coordinator {
            tools,
            events,
            state: Arc::new(RwLock::new(BatchState::default())),
            ports: Arc::new(RwLock::new(PortSets::new())),
        }
    }

    /// Bind the coordinator to a profile; its backend drives enumeration
    /// and all spawned sessions from here on.
    pub async fn select_profile(&self, profile: Arc<Profile>) -> Result<()> {
        let Some(backend) = Backend::for_profile(&profile) else {
            bail!(
                "Unsupported chip type \"{}\" in profile \"{}\"",
                profile.chip_type,
                profile.name
            );
        };
        let mut state = self.state.write().await;
        state.backend = Some(backend);
        state.options = FlashOptions {
            erase_flash: profile
                .erase_default()
                .filter(|_| backend.capabilities().erase_flash)
                .unwrap_or(false),
        };
        state.profile = Some(profile);
        Ok(())
    }

    pub async fn set_options(&self, options: FlashOptions) {
        self.state.write().await.options = options;
    }

    /// Start batch mode: the current live ports become the pre-existing
    /// snapshot and are never auto-claimed.
    pub async fn start_batch(&self) {
        let mut state = self.state.write().await;
        let live = state.live.clone();
        state.records.clear();
        state.tracking = true;
        state.spawning = true;
        self.ports.write().await.snapshot_init(&live);
        let _ = self.events.send(AppEvent::BatchStarted(live.len()));
    }

    /// Stop spawning new sessions; in-flight sessions finish naturally.
    pub async fn stop_batch(&self) {
        self.state.write().await.spawning = false;
        let _ = self.events.send(AppEvent::BatchStopped);
    }

    /// Number of ports currently held by running sessions.
    pub async fn sessions_running(&self) -> usize {
        self.ports.read().await.working().len()
    }

    /// Which tracked set a port currently belongs to, if any.
    pub async fn port_state(&self, port: &str) -> Option<PortState> {
        self.ports.read().await.state_of(port)
    }

    pub async fn live_ports(&self) -> Vec<String> {
        self.state.read().await.live.clone()
    }

    /// Snapshot of every per-port display record, in spawn order.
    pub async fn records(&self) -> Vec<(String, TaskContext)> {
        let records = self.state.read().await.records.clone();
        let mut snapshots = Vec::with_capacity(records.len());
        for (port, ctx) in records {
            snapshots.push((port, ctx.snapshot().await));
        }
        snapshots
    }

    /// One enumeration + reconciliation cycle.
    pub async fn poll_once(&self) {
        let (profile, backend) = {
            let state = self.state.read().await;
            (state.profile.clone(), state.backend)
        };
        let (Some(profile), Some(backend)) = (profile, backend) else {
            return;
        };
        let working = self.ports.read().await.working();
        let live = backend.list_ports(&self.tools, &profile, &working).await;
        self.reconcile_with(live).await;
    }

    /// Reconcile tracked state against a live enumeration snapshot. The
    /// live list is published every cycle regardless of batch mode.
    pub async fn reconcile_with(&self, live: Vec<String>) {
        let _ = self.events.send(AppEvent::PortsUpdated(live.clone()));

        let mut state = self.state.write().await;
        state.live = live.clone();
        if !state.tracking {
            return;
        }

        let reconciliation = self.ports.write().await.reconcile(&live);
        if !reconciliation.removed.is_empty() {
            state
                .records
                .retain(|(port, _)| !reconciliation.removed.contains(port));
            let _ = self
                .events
                .send(AppEvent::PortsRemoved(reconciliation.removed));
        }

        if !state.spawning {
            return;
        }
        let (Some(backend), Some(profile)) = (state.backend, state.profile.clone()) else {
            return;
        };
        for port in reconciliation.fresh {
            self.ports.write().await.claim(&port);
            let ctx = SharedContext::with_events(&port, self.events.clone());
            state.records.push((port.clone(), ctx.clone()));

            let tools = self.tools.clone();
            let profile = profile.clone();
            let options = state.options;
            let ports = self.ports.clone();
            tokio::spawn(async move {
                Session::run(tools, backend, ctx, port, profile, options, ports).await;
            });
        }
    }

    /// Long-lived polling loop task.
    pub fn spawn_polling(&self) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            loop {
                coordinator.poll_once().await;
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        })
    }

    /// Single-device mode: run one session to completion and return its
    /// terminal context.
    pub async fn flash_once(&self, requested_port: String) -> Result<TaskContext> {
        let (profile, backend, options) = {
            let state = self.state.read().await;
            (state.profile.clone(), state.backend, state.options)
        };
        let (Some(profile), Some(backend)) = (profile, backend) else {
            bail!("No profile selected");
        };
        let ctx = SharedContext::with_events(&requested_port, self.events.clone());
        Session::run(
            self.tools.clone(),
            backend,
            ctx.clone(),
            requested_port,
            profile,
            options,
            self.ports.clone(),
        )
        .await;
        Ok(ctx.snapshot().await)
    }
}
