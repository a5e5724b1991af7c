//! Process-wide remediation counters.
//!
//! Counters live behind one mutex so a reset is atomic with respect to
//! the increment path: a dump never shows a half-reset state.

use std::fmt::Write as _;
use std::sync::{Mutex, PoisonError};

use super::ReplacementSite;

/// Plain copy of the counters at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeakCounters {
    /// Meshes destroyed before their slot was overwritten or cleared.
    pub resources_destroyed: u64,
    /// Vertex-equivalent elements freed by those destroys.
    pub units_freed: u64,
    /// Entity spawns suppressed while idle-paused.
    pub spawns_blocked: u64,
    calls: [u64; ReplacementSite::COUNT],
}

impl LeakCounters {
    /// Replacement calls observed at `site`.
    pub fn calls(&self, site: ReplacementSite) -> u64 {
        self.calls[site.index()]
    }

    /// Replacement calls observed across all sites.
    pub fn total_calls(&self) -> u64 {
        self.calls.iter().fold(0_u64, |acc, n| acc.saturating_add(*n))
    }

    /// Estimated native memory reclaimed.
    pub fn bytes_reclaimed(&self, bytes_per_element: u64) -> u64 {
        self.units_freed.saturating_mul(bytes_per_element)
    }

    /// Operator-facing dump.
    pub fn render(&self, bytes_per_element: u64) -> String {
        let mut out = format!(
            "leak remediation: {} meshes destroyed, {} vertices freed (~{} reclaimed)\n",
            self.resources_destroyed,
            self.units_freed,
            format_bytes(self.bytes_reclaimed(bytes_per_element)),
        );
        for site in ReplacementSite::ALL {
            let _ = writeln!(out, "  {:<22} {} calls", site.label(), self.calls(site));
        }
        let _ = write!(out, "spawns blocked: {}", self.spawns_blocked);
        out
    }
}

/// Shared counters mutated by the remediation hooks.
#[derive(Debug, Default)]
pub struct LeakStats {
    counters: Mutex<LeakCounters>,
}

impl LeakStats {
    /// Fresh zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut LeakCounters) -> R) -> R {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut counters)
    }

    /// Count one observed replacement call.
    pub fn record_call(&self, site: ReplacementSite) {
        self.with(|c| {
            let slot = &mut c.calls[site.index()];
            *slot = slot.saturating_add(1);
        });
    }

    /// Count one destroyed mesh of `units` elements.
    pub fn record_destroyed(&self, units: u64) {
        self.with(|c| {
            c.resources_destroyed = c.resources_destroyed.saturating_add(1);
            c.units_freed = c.units_freed.saturating_add(units);
        });
    }

    /// Count one suppressed spawn.
    pub fn record_spawn_blocked(&self) {
        self.with(|c| c.spawns_blocked = c.spawns_blocked.saturating_add(1));
    }

    /// Copy of the current counters.
    pub fn snapshot(&self) -> LeakCounters {
        self.with(|c| *c)
    }

    /// Zero every counter, returning the values that were cleared.
    pub fn reset(&self) -> LeakCounters {
        self.with(std::mem::take)
    }
}

/// Format a byte count with binary units, one decimal place.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut divisor: u64 = 1024;
    let mut unit = 0_usize;
    while unit < UNITS.len().saturating_sub(1) && bytes >= divisor.saturating_mul(1024) {
        divisor = divisor.saturating_mul(1024);
        unit = unit.saturating_add(1);
    }
    let whole = bytes.checked_div(divisor).unwrap_or(0);
    let frac = bytes
        .checked_rem(divisor)
        .and_then(|rest| rest.checked_mul(10))
        .and_then(|rest| rest.checked_div(divisor))
        .unwrap_or(0);
    format!("{whole}.{frac} {}", UNITS[unit])
}
