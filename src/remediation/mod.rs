//! Terrain mesh leak remediation.
//!
//! The host replaces chunk and renderer meshes without destroying the
//! previous instance. [`LeakGuard`] wraps each replacement or clear point
//! and destroys whatever live mesh the slot still reaches before the
//! original operation runs. Nothing here ever stops the original
//! operation: a failed destroy is logged and the host carries on.

pub mod stats;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{error, trace, warn};

use crate::host::{HostError, MeshHandle, MeshSlot, MeshStore, SlotOperation};

pub use stats::{LeakCounters, LeakStats};

/// Host call sites where a mesh slot is overwritten or cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReplacementSite {
    /// A chunk assigns a freshly generated mesh over its existing one.
    ChunkMeshAssign,
    /// A pooled chunk nulls its mesh on release.
    ChunkPoolRelease,
    /// A renderer assigns a new display mesh.
    RendererAssign,
    /// A renderer clears its display mesh.
    RendererClear,
    /// The lava renderer assigns a new mesh.
    LavaRendererAssign,
    /// The lava renderer clears its mesh.
    LavaRendererClear,
}

impl ReplacementSite {
    /// Number of sites.
    pub const COUNT: usize = 6;

    /// Every site, in report order.
    pub const ALL: [ReplacementSite; Self::COUNT] = [
        Self::ChunkMeshAssign,
        Self::ChunkPoolRelease,
        Self::RendererAssign,
        Self::RendererClear,
        Self::LavaRendererAssign,
        Self::LavaRendererClear,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            Self::ChunkMeshAssign => 0,
            Self::ChunkPoolRelease => 1,
            Self::RendererAssign => 2,
            Self::RendererClear => 3,
            Self::LavaRendererAssign => 4,
            Self::LavaRendererClear => 5,
        }
    }

    /// Short label for logs and the stats dump.
    pub fn label(self) -> &'static str {
        match self {
            Self::ChunkMeshAssign => "chunk.assign",
            Self::ChunkPoolRelease => "chunk.pool_release",
            Self::RendererAssign => "renderer.assign",
            Self::RendererClear => "renderer.clear",
            Self::LavaRendererAssign => "lava_renderer.assign",
            Self::LavaRendererClear => "lava_renderer.clear",
        }
    }
}

impl fmt::Display for ReplacementSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

/// What the pre-hook did with the slot's previous mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reclaim {
    /// The slot was empty.
    Empty,
    /// The slot already held the incoming mesh; nothing to destroy.
    SameInstance,
    /// The previous mesh was already dead.
    AlreadyDead,
    /// The previous mesh was destroyed.
    Destroyed {
        /// Elements freed.
        units: u64,
    },
}

/// Shared state for every installed [`LeakGuard`].
#[derive(Clone)]
pub struct Remediator {
    store: Arc<dyn MeshStore>,
    stats: Arc<LeakStats>,
}

impl fmt::Debug for Remediator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Remediator")
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

impl Remediator {
    /// Create a remediator over the host allocator and shared counters.
    pub fn new(store: Arc<dyn MeshStore>, stats: Arc<LeakStats>) -> Self {
        Self { store, stats }
    }

    /// Shared counters.
    pub fn stats(&self) -> &Arc<LeakStats> {
        &self.stats
    }

    /// Wrap an original host operation with the destroy-before-replace hook.
    pub fn guard(&self, site: ReplacementSite, original: Arc<dyn SlotOperation>) -> Arc<dyn SlotOperation> {
        Arc::new(LeakGuard {
            site,
            original,
            remediator: self.clone(),
        })
    }

    /// Destroy the slot's current mesh unless it is absent, dead, or being re-assigned.
    ///
    /// # Errors
    ///
    /// Returns the host error from the destroy call. An unreadable element
    /// count is logged and recorded as zero; the mesh is still destroyed.
    pub fn reclaim(
        &self,
        slot: &dyn MeshSlot,
        incoming: Option<MeshHandle>,
    ) -> Result<Reclaim, HostError> {
        let Some(current) = slot.current() else {
            return Ok(Reclaim::Empty);
        };
        if incoming == Some(current) {
            return Ok(Reclaim::SameInstance);
        }
        if self.store.is_destroyed(current) {
            return Ok(Reclaim::AlreadyDead);
        }
        let units = match self.store.element_count(current) {
            Ok(units) => units,
            Err(e) => {
                warn!(?current, error = %e, "mesh size unreadable, counting zero units");
                0
            }
        };
        self.store.destroy(current)?;
        self.stats.record_destroyed(units);
        Ok(Reclaim::Destroyed { units })
    }
}

/// Destroy-before-replace decorator around one host slot operation.
pub struct LeakGuard {
    site: ReplacementSite,
    original: Arc<dyn SlotOperation>,
    remediator: Remediator,
}

impl fmt::Debug for LeakGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeakGuard").field("site", &self.site).finish_non_exhaustive()
    }
}

impl LeakGuard {
    fn before(&self, slot: &dyn MeshSlot, incoming: Option<MeshHandle>) {
        self.remediator.stats.record_call(self.site);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.remediator.reclaim(slot, incoming)));
        match outcome {
            Ok(Ok(reclaim)) => trace!(site = %self.site, ?reclaim, "slot pre-hook"),
            Ok(Err(e)) => warn!(site = %self.site, error = %e, "failed to destroy replaced mesh"),
            Err(_) => error!(site = %self.site, "mesh pre-hook panicked"),
        }
    }
}

impl SlotOperation for LeakGuard {
    fn invoke(&self, slot: &dyn MeshSlot, incoming: Option<MeshHandle>) {
        self.before(slot, incoming);
        self.original.invoke(slot, incoming);
    }
}
