//! Spawn suppression while the server sits idle-paused.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error};

use crate::host::{PauseControls, SpawnOperation, SpawnRequest};
use crate::remediation::LeakStats;

/// Pre-hook around the host spawn operation.
///
/// A spawn is skipped only when the server is paused with nobody
/// connected. If the check itself fails the spawn goes ahead.
pub struct SpawnBlocker {
    original: Arc<dyn SpawnOperation>,
    controls: Arc<dyn PauseControls>,
    stats: Arc<LeakStats>,
}

impl std::fmt::Debug for SpawnBlocker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnBlocker").finish_non_exhaustive()
    }
}

impl SpawnBlocker {
    /// Wrap `original`.
    pub fn wrap(
        original: Arc<dyn SpawnOperation>,
        controls: Arc<dyn PauseControls>,
        stats: Arc<LeakStats>,
    ) -> Arc<dyn SpawnOperation> {
        Arc::new(Self {
            original,
            controls,
            stats,
        })
    }

    fn should_block(&self) -> bool {
        let check = panic::catch_unwind(AssertUnwindSafe(|| {
            self.controls.is_server_mode()
                && self.controls.engine_paused()
                && self.controls.connected_clients() == 0
        }));
        check.unwrap_or_else(|_| {
            error!("spawn pre-hook panicked");
            false
        })
    }
}

impl SpawnOperation for SpawnBlocker {
    fn spawn(&self, request: &SpawnRequest) -> bool {
        if self.should_block() {
            self.stats.record_spawn_blocked();
            debug!(entity = %request.entity, "spawn suppressed while idle-paused");
            return false;
        }
        self.original.spawn(request)
    }
}
