//! Tests for `src/remediation/mod.rs`: destroy-before-replace hooks.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use hostpatch::host::{HostError, MeshHandle, MeshSlot, MeshStore, SlotOperation};
use hostpatch::remediation::{LeakStats, Reclaim, Remediator, ReplacementSite};
use hostpatch::sim::SimHost;

fn remediator(sim: &SimHost) -> Remediator {
    Remediator::new(Arc::new(sim.clone()), Arc::new(LeakStats::new()))
}

/// Original operation that counts invocations and writes the slot.
struct CountingWrite {
    calls: AtomicUsize,
}

impl SlotOperation for CountingWrite {
    fn invoke(&self, slot: &dyn MeshSlot, incoming: Option<MeshHandle>) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        slot.store(incoming);
    }
}

#[test]
fn replacing_live_mesh_destroys_it() {
    let sim = SimHost::new();
    let remediator = remediator(&sim);
    let guarded = remediator.guard(ReplacementSite::RendererAssign, sim.original_slot_operation());
    let slot = sim.new_slot();

    let first = sim.alloc_mesh(300);
    let second = sim.alloc_mesh(300);
    guarded.invoke(slot.as_ref(), Some(first));
    guarded.invoke(slot.as_ref(), Some(second));

    assert!(sim.is_destroyed(first));
    assert!(!sim.is_destroyed(second));
    assert_eq!(slot.current(), Some(second));

    let counters = remediator.stats().snapshot();
    assert_eq!(counters.resources_destroyed, 1);
    assert_eq!(counters.units_freed, 300);
    assert_eq!(counters.calls(ReplacementSite::RendererAssign), 2);
}

#[test]
fn clearing_slot_destroys_mesh() {
    let sim = SimHost::new();
    let remediator = remediator(&sim);
    let assign = remediator.guard(ReplacementSite::ChunkMeshAssign, sim.original_slot_operation());
    let release = remediator.guard(ReplacementSite::ChunkPoolRelease, sim.original_slot_operation());
    let slot = sim.new_slot();

    let mesh = sim.alloc_mesh(64);
    assign.invoke(slot.as_ref(), Some(mesh));
    release.invoke(slot.as_ref(), None);

    assert!(sim.is_destroyed(mesh));
    assert_eq!(slot.current(), None);
    assert_eq!(sim.live_meshes(), 0);
}

#[test]
fn reassigning_same_mesh_is_not_destroyed() {
    let sim = SimHost::new();
    let remediator = remediator(&sim);
    let slot = sim.new_slot();
    let mesh = sim.alloc_mesh(10);
    slot.store(Some(mesh));

    let outcome = remediator.reclaim(slot.as_ref(), Some(mesh));
    assert!(matches!(outcome, Ok(Reclaim::SameInstance)));
    assert!(!sim.is_destroyed(mesh));
}

#[test]
fn dead_mesh_is_a_noop() {
    let sim = SimHost::new();
    let remediator = remediator(&sim);
    let slot = sim.new_slot();
    let mesh = sim.alloc_mesh(10);
    slot.store(Some(mesh));
    assert!(sim.destroy(mesh).is_ok());

    let outcome = remediator.reclaim(slot.as_ref(), None);
    assert!(matches!(outcome, Ok(Reclaim::AlreadyDead)));
    assert_eq!(sim.double_destroys(), 0);
    assert_eq!(remediator.stats().snapshot().resources_destroyed, 0);
}

#[test]
fn empty_slot_is_a_noop() {
    let sim = SimHost::new();
    let remediator = remediator(&sim);
    let slot = sim.new_slot();
    assert!(matches!(
        remediator.reclaim(slot.as_ref(), Some(sim.alloc_mesh(1))),
        Ok(Reclaim::Empty)
    ));
    assert_eq!(sim.destroy_calls(), 0);
}

#[test]
fn failed_destroy_still_runs_original() {
    let sim = SimHost::new();
    sim.fail_destroys(true);
    let remediator = remediator(&sim);
    let original = Arc::new(CountingWrite {
        calls: AtomicUsize::new(0),
    });
    let guarded = remediator.guard(ReplacementSite::LavaRendererAssign, Arc::clone(&original) as Arc<dyn SlotOperation>);
    let slot = sim.new_slot();

    let old = sim.alloc_mesh(5);
    let new = sim.alloc_mesh(5);
    slot.store(Some(old));
    guarded.invoke(slot.as_ref(), Some(new));

    assert_eq!(original.calls.load(Ordering::SeqCst), 1);
    assert_eq!(slot.current(), Some(new));
    assert_eq!(remediator.stats().snapshot().resources_destroyed, 0);
}

/// Store whose size reads fail while destroys still work.
struct UnsizedStore {
    inner: SimHost,
}

impl MeshStore for UnsizedStore {
    fn is_destroyed(&self, mesh: MeshHandle) -> bool {
        self.inner.is_destroyed(mesh)
    }

    fn element_count(&self, _mesh: MeshHandle) -> Result<u64, HostError> {
        Err(HostError::Operation("mesh not readable".to_owned()))
    }

    fn destroy(&self, mesh: MeshHandle) -> Result<(), HostError> {
        self.inner.destroy(mesh)
    }
}

#[test]
fn unreadable_size_still_destroys_replaced_mesh() {
    let sim = SimHost::new();
    let store = Arc::new(UnsizedStore { inner: sim.clone() });
    let remediator = Remediator::new(store, Arc::new(LeakStats::new()));
    let guarded = remediator.guard(ReplacementSite::ChunkMeshAssign, sim.original_slot_operation());
    let slot = sim.new_slot();

    for _ in 0..10 {
        let mesh = sim.alloc_mesh(300);
        guarded.invoke(slot.as_ref(), Some(mesh));
    }

    assert_eq!(sim.live_meshes(), 1);
    assert_eq!(sim.destroy_calls(), 9);
    let counters = remediator.stats().snapshot();
    assert_eq!(counters.resources_destroyed, 9);
    assert_eq!(counters.units_freed, 0);
}

/// Slot whose read panics, standing in for a host object in a bad state.
struct PoisonedSlot {
    stored: std::sync::Mutex<Option<MeshHandle>>,
}

impl MeshSlot for PoisonedSlot {
    fn current(&self) -> Option<MeshHandle> {
        panic!("slot read failed")
    }

    fn store(&self, mesh: Option<MeshHandle>) {
        if let Ok(mut stored) = self.stored.lock() {
            *stored = mesh;
        }
    }
}

#[test]
fn panicking_hook_body_still_runs_original() {
    let sim = SimHost::new();
    let remediator = remediator(&sim);
    let guarded = remediator.guard(ReplacementSite::RendererClear, sim.original_slot_operation());
    let slot = PoisonedSlot {
        stored: std::sync::Mutex::new(Some(MeshHandle(99))),
    };

    guarded.invoke(&slot, None);

    let stored = slot.stored.lock().map(|s| *s).ok().flatten();
    assert_eq!(stored, None);
    assert_eq!(remediator.stats().snapshot().calls(ReplacementSite::RendererClear), 1);
}

#[test]
fn thousand_replacements_of_three_hundred_units() {
    let sim = SimHost::new();
    let remediator = remediator(&sim);
    let guarded = remediator.guard(ReplacementSite::ChunkMeshAssign, sim.original_slot_operation());
    let slot = sim.new_slot();

    for _ in 0..1000 {
        slot.store(Some(sim.alloc_mesh(300)));
        guarded.invoke(slot.as_ref(), Some(sim.alloc_mesh(300)));
    }

    let counters = remediator.stats().snapshot();
    assert_eq!(counters.resources_destroyed, 1000);
    assert_eq!(counters.units_freed, 300_000);

    remediator.stats().reset();
    let counters = remediator.stats().snapshot();
    assert_eq!(counters.resources_destroyed, 0);
    assert_eq!(counters.units_freed, 0);
}

#[test]
fn destroys_never_exceed_distinct_live_meshes() {
    let sim = SimHost::new();
    let remediator = remediator(&sim);
    let ops: Vec<_> = ReplacementSite::ALL
        .into_iter()
        .map(|site| (site, remediator.guard(site, sim.original_slot_operation())))
        .collect();
    let slot = sim.new_slot();
    let mut rng = StdRng::seed_from_u64(7);
    let mut seen: HashSet<MeshHandle> = HashSet::new();

    for _ in 0..2000 {
        let (site, op) = &ops[rng.gen_range(0..ops.len())];
        let incoming = match site {
            ReplacementSite::ChunkPoolRelease
            | ReplacementSite::RendererClear
            | ReplacementSite::LavaRendererClear => None,
            _ if rng.gen_bool(0.2) => slot.current(),
            _ if rng.gen_bool(0.1) => {
                // Already-dead mesh coming back in.
                let dead = sim.alloc_mesh(1);
                assert!(sim.destroy(dead).is_ok());
                Some(dead)
            }
            _ => Some(sim.alloc_mesh(rng.gen_range(1..500))),
        };
        if let Some(mesh) = incoming {
            if !sim.is_destroyed(mesh) {
                seen.insert(mesh);
            }
        }
        op.invoke(slot.as_ref(), incoming);
    }

    let destroyed = remediator.stats().snapshot().resources_destroyed;
    assert!(destroyed <= u64::try_from(seen.len()).unwrap_or(u64::MAX));
    assert_eq!(sim.double_destroys(), 0);
    // At most the mesh still in the slot is live.
    assert!(sim.live_meshes() <= 1);
}

#[test]
fn fan_out_across_many_slots_is_independent() {
    let sim = SimHost::new();
    let remediator = remediator(&sim);
    let guarded = remediator.guard(ReplacementSite::ChunkMeshAssign, sim.original_slot_operation());
    let slots: Vec<_> = (0..24).map(|_| sim.new_slot()).collect();

    for round in 0..5 {
        for slot in &slots {
            guarded.invoke(slot.as_ref(), Some(sim.alloc_mesh(100)));
        }
        assert_eq!(sim.live_meshes(), slots.len(), "round {round}");
    }
    assert_eq!(remediator.stats().snapshot().resources_destroyed, 24 * 4);
}
