//! Flash session: one backend invocation bound to one task context.
//!
//! A session owns its context for the whole attempt. It resolves the "Auto"
//! port sentinel, marks the port working in the shared tracking sets, runs
//! the backend, and on return (success or failure) moves the port to idle
//! and appends the terminal `Done`/`Error` line. Nothing outside the
//! context and the port sets is touched, so a failing session cannot
//! disturb its neighbours.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::backends::{Backend, FlashOptions};
use crate::models::{PortSets, Profile, SharedContext};
use crate::tools::Tools;

pub struct Session;

impl Session {
    /// Run one flash attempt to completion. The context is left terminal:
    /// `done` set exactly once, `ok` deterministic.
    pub async fn run(
        tools: Arc<Tools>,
        backend: Backend,
        ctx: SharedContext,
        requested_port: String,
        profile: Arc<Profile>,
        options: FlashOptions,
        ports: Arc<RwLock<PortSets>>,
    ) {
        let resolved = backend
            .determine_port(&tools, &profile, &requested_port)
            .await;
        if let Some(port) = &resolved {
            ctx.set_port(port).await;
            ports.write().await.claim(port);
        }
        ctx.mark_started().await;

        backend
            .flash(&tools, &ctx, resolved.as_deref(), &profile, options)
            .await;

        let ok = ctx.ok().await == Some(true);
        if ok {
            ctx.log("Done").await;
        } else {
            ctx.log("Error").await;
        }
        ctx.mark_done(ok).await;

        if let Some(port) = &resolved {
            ports.write().await.release(port);
        }
    }
}
