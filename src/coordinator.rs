//! Load-time installation of every intercept point.
//!
//! For each feature the [`Coordinator`] asks the [`FeatureGate`], resolves
//! the feature's targets, binds the host capability and wraps it with the
//! matching hook. The result is an [`InterceptTable`] the host dispatches
//! through, plus an [`InstallReport`] describing what went inert and why.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::gate::{FeatureGate, FeatureId};
use crate::host::{
    HostBindings, HostEvent, HostEventKind, MainThread, PauseControls, PauseMembers,
    SlotOperation, SpawnOperation,
};
use crate::pause::PauseReconciler;
use crate::remediation::{LeakStats, Remediator, ReplacementSite};
use crate::resolver::{Capability, InterceptTarget, Resolution, SymbolResolver};
use crate::spawn::SpawnBlocker;

/// Host members this crate binds against.
pub mod targets {
    use super::{InterceptTarget, ReplacementSite};

    /// Post-hook: server finished booting.
    pub const SESSION_CREATED: InterceptTarget =
        InterceptTarget::named("GameSession", "OnSessionCreated");
    /// Post-hook: engine pause flag set.
    pub const ENGINE_SET_PAUSED: InterceptTarget =
        InterceptTarget::with_signature("GameLoop", "SetPaused", &["bool"]);
    /// Post-hook: client connected.
    pub const CLIENT_CONNECTED: InterceptTarget =
        InterceptTarget::with_signature("ConnectionManager", "OnClientConnected", &["ClientInfo"]);

    /// Normal pause toggle entry point.
    pub const REQUEST_PAUSE: InterceptTarget =
        InterceptTarget::with_signature("GameLoop", "RequestPause", &["bool"]);
    /// Host "last client left" save-and-pause path.
    pub const LAST_CLIENT_LEFT: InterceptTarget =
        InterceptTarget::named("ConnectionManager", "OnLastClientLeft");
    /// Network-layer pause flag field.
    pub const NETWORK_PAUSED: InterceptTarget = InterceptTarget::named("NetworkLayer", "isPaused");
    /// Autosave timer.
    pub const AUTOSAVE_TIMER: InterceptTarget = InterceptTarget::named("AutosaveTimer", "running");

    /// Entity spawn operation.
    pub const ENTITY_SPAWN: InterceptTarget =
        InterceptTarget::with_signature("EntitySpawner", "Spawn", &["SpawnRequest"]);

    /// Event post-hooks the auto-pause feature needs.
    pub const PAUSE_EVENTS: [InterceptTarget; 3] =
        [SESSION_CREATED, ENGINE_SET_PAUSED, CLIENT_CONNECTED];

    /// Target for a mesh replacement site.
    pub const fn replacement(site: ReplacementSite) -> InterceptTarget {
        match site {
            ReplacementSite::ChunkMeshAssign => {
                InterceptTarget::with_signature("TerrainChunk", "ApplyGeneratedMesh", &["Mesh"])
            }
            ReplacementSite::ChunkPoolRelease => InterceptTarget::named("TerrainChunk", "ReturnToPool"),
            ReplacementSite::RendererAssign => {
                InterceptTarget::with_signature("ChunkRenderer", "SetMesh", &["Mesh"])
            }
            ReplacementSite::RendererClear => InterceptTarget::named("ChunkRenderer", "ClearMesh"),
            ReplacementSite::LavaRendererAssign => {
                InterceptTarget::with_signature("LavaChunkRenderer", "SetMesh", &["Mesh"])
            }
            ReplacementSite::LavaRendererClear => {
                InterceptTarget::named("LavaChunkRenderer", "ClearMesh")
            }
        }
    }
}

/// Installation outcome of a single target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetStatus {
    /// Hook installed.
    Installed,
    /// Resolution failed.
    Unresolved(String),
    /// Resolved but the host could not bind a capability.
    Unbound,
    /// Not attempted because the owning feature is off or another target failed.
    Skipped,
}

/// Summary of one feature after installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureStatus {
    /// The feature.
    pub feature: FeatureId,
    /// Whether at least one of its hooks is live.
    pub active: bool,
    /// Human-readable explanation.
    pub detail: String,
}

/// Everything the coordinator did at load time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    /// Per-feature summaries, in [`FeatureId::ALL`] order.
    pub features: Vec<FeatureStatus>,
    /// Per-target outcomes.
    pub targets: Vec<(InterceptTarget, TargetStatus)>,
}

impl InstallReport {
    /// Status of `feature`.
    pub fn feature(&self, feature: FeatureId) -> Option<&FeatureStatus> {
        self.features.iter().find(|s| s.feature == feature)
    }

    /// Status of `target`.
    pub fn target(&self, target: InterceptTarget) -> Option<&TargetStatus> {
        self.targets.iter().find(|(t, _)| *t == target).map(|(_, s)| s)
    }

    fn record(&mut self, target: InterceptTarget, status: TargetStatus) {
        self.targets.push((target, status));
    }
}

impl fmt::Display for InstallReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for status in &self.features {
            let state = if status.active { "active" } else { "inert" };
            writeln!(f, "{:<13} {state:<7} {}", status.feature, status.detail)?;
        }
        Ok(())
    }
}

/// Installed hooks the host dispatches through.
pub struct InterceptTable {
    slots: BTreeMap<ReplacementSite, Capability<Arc<dyn SlotOperation>>>,
    spawn: Capability<Arc<dyn SpawnOperation>>,
    reconciler: Option<Arc<PauseReconciler>>,
    events: HashSet<HostEventKind>,
}

impl fmt::Debug for InterceptTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptTable")
            .field("slots", &self.slots)
            .field("spawn", &self.spawn)
            .field("events", &self.events)
            .finish()
    }
}

impl InterceptTable {
    fn empty() -> Self {
        Self {
            slots: BTreeMap::new(),
            spawn: Capability::Unavailable {
                reason: "not installed".to_owned(),
            },
            reconciler: None,
            events: HashSet::new(),
        }
    }

    /// Wrapped operation for `site`, if its hook is installed.
    pub fn slot_operation(&self, site: ReplacementSite) -> Option<Arc<dyn SlotOperation>> {
        self.slots.get(&site).and_then(|c| c.get()).cloned()
    }

    /// Wrapped spawn operation, if installed.
    pub fn spawn_operation(&self) -> Option<Arc<dyn SpawnOperation>> {
        self.spawn.get().cloned()
    }

    /// The pause reconciler, if auto-pause is installed.
    pub fn reconciler(&self) -> Option<&Arc<PauseReconciler>> {
        self.reconciler.as_ref()
    }

    /// Whether a post-hook is installed for this event kind.
    pub fn hooks_event(&self, kind: HostEventKind) -> bool {
        self.events.contains(&kind)
    }

    /// Deliver a host event to its post-hook. Returns `false` when nothing is installed for it.
    pub fn dispatch(&self, event: HostEvent) -> bool {
        if !self.events.contains(&event.kind()) {
            return false;
        }
        match &self.reconciler {
            Some(reconciler) => {
                reconciler.observe(event);
                true
            }
            None => false,
        }
    }
}

/// Inputs the coordinator needs beyond the host itself.
#[derive(Debug, Clone)]
pub struct CoordinatorContext {
    /// Resolved feature enablement.
    pub gate: Arc<FeatureGate>,
    /// Shared remediation counters.
    pub stats: Arc<LeakStats>,
    /// Main-thread handle for reconciliation jobs.
    pub main: MainThread,
    /// Runtime used for the startup settle delay.
    pub runtime: Handle,
    /// Settle delay after session creation.
    pub settle_delay: Duration,
}

/// Installs hooks once at load time.
pub struct Coordinator<'a> {
    host: &'a dyn HostBindings,
    resolver: SymbolResolver,
    ctx: CoordinatorContext,
}

impl fmt::Debug for Coordinator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

impl<'a> Coordinator<'a> {
    /// Create a coordinator over `host`.
    pub fn new(host: &'a dyn HostBindings, ctx: CoordinatorContext) -> Self {
        Self {
            resolver: SymbolResolver::new(host.catalog()),
            host,
            ctx,
        }
    }

    /// Resolve, bind and wrap every enabled feature.
    pub fn install(self) -> (InterceptTable, InstallReport) {
        let mut table = InterceptTable::empty();
        let mut report = InstallReport::default();

        let terrain = self.install_terrain(&mut table, &mut report);
        let controls = self.bind_pause_controls(&mut report);
        let auto_pause = self.install_auto_pause(&controls, &mut table, &mut report);
        let spawn = self.install_spawn_blocker(&controls, &mut table, &mut report);

        report.features = vec![auto_pause, spawn, terrain];
        for status in &report.features {
            if status.active {
                info!(feature = %status.feature, detail = %status.detail, "feature installed");
            } else {
                warn!(feature = %status.feature, detail = %status.detail, "feature inert");
            }
        }
        (table, report)
    }

    fn gate_off(&self, feature: FeatureId) -> Option<FeatureStatus> {
        if self.ctx.gate.is_enabled(feature) {
            return None;
        }
        let detail = match self.ctx.gate.disabled_reason(feature) {
            Some(reason) => format!("disabled remotely: {reason}"),
            None => "disabled in local config".to_owned(),
        };
        Some(FeatureStatus {
            feature,
            active: false,
            detail,
        })
    }

    fn install_terrain(&self, table: &mut InterceptTable, report: &mut InstallReport) -> FeatureStatus {
        if let Some(off) = self.gate_off(FeatureId::TerrainLeak) {
            for site in ReplacementSite::ALL {
                report.record(targets::replacement(site), TargetStatus::Skipped);
            }
            return off;
        }

        let remediator = Remediator::new(self.host.mesh_store(), Arc::clone(&self.ctx.stats));
        let mut installed = 0_usize;
        for site in ReplacementSite::ALL {
            let target = targets::replacement(site);
            let capability = match self.resolver.resolve(target) {
                Resolution::Bound(handle) => match self.host.slot_operation(handle.token) {
                    Some(original) => {
                        report.record(target, TargetStatus::Installed);
                        installed = installed.saturating_add(1);
                        Capability::Available(remediator.guard(site, original))
                    }
                    None => {
                        warn!(target = %target, "host could not bind slot operation");
                        report.record(target, TargetStatus::Unbound);
                        Capability::Unavailable {
                            reason: "unbound".to_owned(),
                        }
                    }
                },
                Resolution::Unresolved { error, .. } => {
                    report.record(target, TargetStatus::Unresolved(error.to_string()));
                    Capability::Unavailable {
                        reason: error.to_string(),
                    }
                }
            };
            table.slots.insert(site, capability);
        }

        FeatureStatus {
            feature: FeatureId::TerrainLeak,
            active: installed > 0,
            detail: format!("{installed}/{} replacement sites hooked", ReplacementSite::COUNT),
        }
    }

    /// Pause controls are shared by auto-pause and the spawn blocker.
    fn bind_pause_controls(&self, report: &mut InstallReport) -> Capability<Arc<dyn PauseControls>> {
        let wanted = self.ctx.gate.is_enabled(FeatureId::AutoPause)
            || self.ctx.gate.is_enabled(FeatureId::SpawnBlocker);
        let control_targets = [
            targets::REQUEST_PAUSE,
            targets::LAST_CLIENT_LEFT,
            targets::NETWORK_PAUSED,
            targets::AUTOSAVE_TIMER,
        ];
        if !wanted {
            for target in control_targets {
                report.record(target, TargetStatus::Skipped);
            }
            return Capability::Unavailable {
                reason: "not requested".to_owned(),
            };
        }

        let resolutions = control_targets.map(|target| self.resolver.resolve(target));
        let failure = resolutions.iter().find_map(|resolution| match resolution {
            Resolution::Bound(_) => None,
            Resolution::Unresolved { target, error } => Some(format!("{target}: {error}")),
        });
        if let Some(reason) = failure {
            for resolution in &resolutions {
                match resolution {
                    Resolution::Bound(handle) => report.record(handle.target, TargetStatus::Skipped),
                    Resolution::Unresolved { target, error } => {
                        report.record(*target, TargetStatus::Unresolved(error.to_string()));
                    }
                }
            }
            return Capability::Unavailable { reason };
        }
        let tokens: Vec<_> = resolutions.iter().filter_map(|r| r.handle()).map(|h| h.token).collect();
        let [request_pause, last_client_left, network_paused, autosave_timer] = tokens.as_slice() else {
            return Capability::Unavailable {
                reason: "incomplete pause bindings".to_owned(),
            };
        };
        let members = PauseMembers {
            request_pause: *request_pause,
            last_client_left: *last_client_left,
            network_paused: *network_paused,
            autosave_timer: *autosave_timer,
        };
        match self.host.pause_controls(members) {
            Some(controls) => {
                for target in control_targets {
                    report.record(target, TargetStatus::Installed);
                }
                Capability::Available(controls)
            }
            None => {
                for target in control_targets {
                    report.record(target, TargetStatus::Unbound);
                }
                Capability::Unavailable {
                    reason: "host could not bind pause controls".to_owned(),
                }
            }
        }
    }

    fn install_auto_pause(
        &self,
        controls: &Capability<Arc<dyn PauseControls>>,
        table: &mut InterceptTable,
        report: &mut InstallReport,
    ) -> FeatureStatus {
        if let Some(off) = self.gate_off(FeatureId::AutoPause) {
            for target in targets::PAUSE_EVENTS {
                report.record(target, TargetStatus::Skipped);
            }
            return off;
        }
        let inert = |detail: String| FeatureStatus {
            feature: FeatureId::AutoPause,
            active: false,
            detail,
        };

        let controls = match controls {
            Capability::Available(controls) => Arc::clone(controls),
            Capability::Unavailable { reason } => {
                for target in targets::PAUSE_EVENTS {
                    report.record(target, TargetStatus::Skipped);
                }
                return inert(format!("pause controls unavailable: {reason}"));
            }
        };

        if let Err(error) = self.resolver.resolve_all(&targets::PAUSE_EVENTS) {
            for target in targets::PAUSE_EVENTS {
                let status = match self.resolver.resolve(target) {
                    Resolution::Bound(_) => TargetStatus::Skipped,
                    Resolution::Unresolved { error, .. } => TargetStatus::Unresolved(error.to_string()),
                };
                report.record(target, status);
            }
            return inert(format!("event hook unresolved: {error}"));
        }

        table.reconciler = Some(PauseReconciler::new(
            controls,
            Arc::clone(&self.ctx.gate),
            self.ctx.main.clone(),
            self.ctx.runtime.clone(),
            self.ctx.settle_delay,
        ));
        table.events.extend([
            HostEventKind::SessionCreated,
            HostEventKind::EnginePauseChanged,
            HostEventKind::ClientConnected,
        ]);
        for target in targets::PAUSE_EVENTS {
            report.record(target, TargetStatus::Installed);
        }
        FeatureStatus {
            feature: FeatureId::AutoPause,
            active: true,
            detail: format!(
                "session, pause and connect hooks installed (settle {}ms)",
                self.ctx.settle_delay.as_millis()
            ),
        }
    }

    fn install_spawn_blocker(
        &self,
        controls: &Capability<Arc<dyn PauseControls>>,
        table: &mut InterceptTable,
        report: &mut InstallReport,
    ) -> FeatureStatus {
        if let Some(off) = self.gate_off(FeatureId::SpawnBlocker) {
            report.record(targets::ENTITY_SPAWN, TargetStatus::Skipped);
            return off;
        }
        let inert = |detail: String| FeatureStatus {
            feature: FeatureId::SpawnBlocker,
            active: false,
            detail,
        };

        let controls = match controls {
            Capability::Available(controls) => Arc::clone(controls),
            Capability::Unavailable { reason } => {
                report.record(targets::ENTITY_SPAWN, TargetStatus::Skipped);
                return inert(format!("pause controls unavailable: {reason}"));
            }
        };
        let handle = match self.resolver.resolve(targets::ENTITY_SPAWN) {
            Resolution::Bound(handle) => handle,
            Resolution::Unresolved { error, .. } => {
                report.record(targets::ENTITY_SPAWN, TargetStatus::Unresolved(error.to_string()));
                return inert(format!("spawn target unresolved: {error}"));
            }
        };
        let Some(original) = self.host.spawn_operation(handle.token) else {
            report.record(targets::ENTITY_SPAWN, TargetStatus::Unbound);
            return inert("host could not bind spawn operation".to_owned());
        };

        table.spawn = Capability::Available(SpawnBlocker::wrap(
            original,
            controls,
            Arc::clone(&self.ctx.stats),
        ));
        report.record(targets::ENTITY_SPAWN, TargetStatus::Installed);
        FeatureStatus {
            feature: FeatureId::SpawnBlocker,
            active: true,
            detail: "spawn pre-hook installed".to_owned(),
        }
    }
}
