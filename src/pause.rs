//! Pause state reconciliation.
//!
//! The host keeps two pause flags (engine loop and network layer) and an
//! autosave timer. On first boot with nobody connected it never enters
//! its idle-save state because that path only runs when the last client
//! leaves. [`PauseReconciler`] nudges the host-owned state toward the
//! idle invariant without holding its own copy:
//!
//! - zero clients and auto-pause enabled: both flags equal, autosave stopped;
//! - one or more clients: autosave running.
//!
//! Every handler reads the current host state before acting, so observing
//! the same event twice never toggles anything twice. Handlers run on the
//! host main thread via [`MainThread`].

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::gate::{FeatureGate, FeatureId};
use crate::host::{HostEvent, MainThread, PauseControls, PauseState};

/// A mutation the reconciler applied to host state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseAction {
    /// Invoked the host's "last client left" path at startup.
    InvokedIdleSave,
    /// Stopped the autosave timer.
    StoppedAutosave,
    /// Wrote the network-layer flag to match the engine flag.
    SyncedNetworkFlag,
    /// Restarted the autosave timer.
    StartedAutosave,
    /// Unpaused through the normal toggle path.
    Resumed,
}

/// Drives host pause state toward the idle invariant.
pub struct PauseReconciler {
    controls: Arc<dyn PauseControls>,
    gate: Arc<FeatureGate>,
    main: MainThread,
    runtime: Handle,
    settle_delay: Duration,
}

impl std::fmt::Debug for PauseReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PauseReconciler")
            .field("settle_delay", &self.settle_delay)
            .finish_non_exhaustive()
    }
}

impl PauseReconciler {
    /// Create a reconciler. `runtime` schedules the startup settle delay.
    pub fn new(
        controls: Arc<dyn PauseControls>,
        gate: Arc<FeatureGate>,
        main: MainThread,
        runtime: Handle,
        settle_delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            controls,
            gate,
            main,
            runtime,
            settle_delay,
        })
    }

    fn enabled(&self) -> bool {
        self.gate.is_enabled(FeatureId::AutoPause)
    }

    /// Current host pause state.
    pub fn state(&self) -> PauseState {
        PauseState::observe(self.controls.as_ref())
    }

    /// Route a host event to its handler on the main thread.
    pub fn observe(self: &Arc<Self>, event: HostEvent) {
        match event {
            HostEvent::SessionCreated => {
                self.schedule_startup();
            }
            HostEvent::EnginePauseChanged { paused } => {
                let this = Arc::clone(self);
                self.post(move || {
                    this.on_engine_pause_changed(paused);
                });
            }
            HostEvent::ClientConnected => {
                let this = Arc::clone(self);
                self.post(move || {
                    this.on_client_connected();
                });
            }
            HostEvent::ClientDisconnected => {
                debug!("client disconnect handled by host");
            }
        }
    }

    fn post(&self, job: impl FnOnce() + Send + 'static) {
        if !self.main.post(job) {
            warn!("main loop gone, dropping pause reconciliation");
        }
    }

    /// Wait the settle delay, then run [`Self::settle_startup`] on the main thread.
    ///
    /// The wait cannot be cancelled; the handler re-validates everything when it runs.
    pub fn schedule_startup(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if !self.enabled() {
            debug!("auto-pause disabled, skipping startup reconciliation");
            return None;
        }
        let this = Arc::clone(self);
        Some(self.runtime.spawn(async move {
            tokio::time::sleep(this.settle_delay).await;
            let job = Arc::clone(&this);
            this.post(move || {
                let actions = job.settle_startup();
                if actions.contains(&PauseAction::InvokedIdleSave) {
                    job.schedule_verify();
                }
            });
        }))
    }

    fn schedule_verify(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.runtime.spawn(async move {
            tokio::time::sleep(this.settle_delay).await;
            let job = Arc::clone(&this);
            this.post(move || job.verify_idle());
        });
    }

    fn verify_idle(&self) {
        let state = self.state();
        if state.connected_client_count == 0 && self.enabled() && !state.engine_loop_paused {
            warn!(?state, "host did not enter idle pause after startup reconciliation");
        } else {
            debug!(?state, "startup reconciliation verified");
        }
    }

    /// Startup handler. Must run on the main thread.
    ///
    /// Reuses the host's own "last client left" path rather than pausing directly.
    pub fn settle_startup(&self) -> Vec<PauseAction> {
        let mut actions = Vec::new();
        if !self.enabled() {
            debug!("auto-pause disabled after settle delay");
            return actions;
        }
        if !self.controls.is_server_mode() {
            debug!("not running as server, skipping startup pause");
            return actions;
        }
        let clients = self.controls.connected_clients();
        if clients > 0 {
            debug!(clients, "clients already connected, skipping startup pause");
            return actions;
        }

        if !self.controls.engine_paused() {
            match self.controls.handle_last_client_left() {
                Ok(()) => {
                    info!("no clients at startup, entering idle pause");
                    actions.push(PauseAction::InvokedIdleSave);
                }
                Err(e) => {
                    warn!(error = %e, "host idle-save path failed");
                    return actions;
                }
            }
        }
        if self.controls.engine_paused() {
            actions.extend(self.align_idle());
        }
        actions
    }

    /// Post-hook for the engine pause flag. Must run on the main thread.
    pub fn on_engine_pause_changed(&self, paused: bool) -> Vec<PauseAction> {
        let state = self.state();
        if state.engine_loop_paused != paused {
            debug!(event = paused, current = state.engine_loop_paused, "stale pause event");
            return Vec::new();
        }
        if paused {
            if self.controls.is_server_mode() && state.connected_client_count == 0 {
                return self.align_idle();
            }
            return Vec::new();
        }
        let mut actions = Vec::new();
        if state.connected_client_count > 0 && !state.autosave_timer_running {
            match self.controls.set_autosave_running(true) {
                Ok(()) => {
                    info!(clients = state.connected_client_count, "autosave resumed");
                    actions.push(PauseAction::StartedAutosave);
                }
                Err(e) => warn!(error = %e, "failed to restart autosave timer"),
            }
        }
        actions
    }

    /// Post-hook for client connection. Must run on the main thread.
    ///
    /// The only transition that goes through the host's normal toggle,
    /// because peers must be told the server resumed.
    pub fn on_client_connected(&self) -> Vec<PauseAction> {
        if !self.enabled() || !self.controls.is_server_mode() || !self.controls.engine_paused() {
            return Vec::new();
        }
        match self.controls.request_pause(false) {
            Ok(()) => {
                info!(clients = self.controls.connected_clients(), "client connected, resuming");
                vec![PauseAction::Resumed]
            }
            Err(e) => {
                warn!(error = %e, "failed to resume on client connect");
                Vec::new()
            }
        }
    }

    /// Stop autosave and copy the engine flag onto the network flag.
    fn align_idle(&self) -> Vec<PauseAction> {
        let mut actions = Vec::new();
        if self.controls.autosave_running() {
            match self.controls.set_autosave_running(false) {
                Ok(()) => actions.push(PauseAction::StoppedAutosave),
                Err(e) => warn!(error = %e, "failed to stop autosave timer"),
            }
        }
        if !self.controls.network_paused() {
            // Direct write: the toggle path would re-notify and loop back here.
            self.controls.set_network_paused(true);
            actions.push(PauseAction::SyncedNetworkFlag);
        }
        if !actions.is_empty() {
            info!(?actions, "server idle, pause state aligned");
        }
        actions
    }
}
