//! Tests for `src/coordinator.rs`: load-time installation and degradation.

use std::collections::HashMap;
use std::sync::Arc;

use hostpatch::commands::{OperatorCommand, RESET_COMMAND, STATS_COMMAND};
use hostpatch::config::{Config, FeatureToggles};
use hostpatch::coordinator::{targets, TargetStatus};
use hostpatch::gate::{FeatureGate, FeatureId, RemoteConfigSnapshot, RemoteOverride};
use hostpatch::host::{HostEvent, HostEventKind, MainLoop, SpawnRequest};
use hostpatch::remediation::ReplacementSite;
use hostpatch::runtime::Runtime;
use hostpatch::sim::SimHost;

fn install(sim: &SimHost, gate: FeatureGate) -> (Runtime, MainLoop) {
    let (main, main_loop) = MainLoop::channel();
    let runtime = Runtime::with_gate(
        &Config::default(),
        Arc::new(gate),
        sim,
        main,
        tokio::runtime::Handle::current(),
    );
    (runtime, main_loop)
}

fn all_on() -> FeatureGate {
    FeatureGate::local_only(FeatureToggles::default())
}

fn remote_off(feature: FeatureId, reason: &str) -> FeatureGate {
    let mut features = HashMap::new();
    features.insert(
        feature,
        RemoteOverride {
            enabled: false,
            reason: Some(reason.to_owned()),
        },
    );
    let snapshot = RemoteConfigSnapshot {
        fetched_at: None,
        message: Some("Scheduled maintenance".to_owned()),
        features,
    };
    FeatureGate::new(FeatureToggles::default(), true, Some(snapshot))
}

fn request() -> SpawnRequest {
    SpawnRequest {
        entity: "zombie".to_owned(),
        position: [10, 64, -3],
    }
}

#[tokio::test]
async fn everything_installs_on_a_matching_host() {
    let sim = SimHost::new();
    let (runtime, _main_loop) = install(&sim, all_on());
    let report = runtime.report();

    for feature in FeatureId::ALL {
        let status = report.feature(feature).expect("every feature should report a status");
        assert!(status.active, "{feature} inert: {}", status.detail);
    }
    assert!(report
        .targets
        .iter()
        .all(|(_, status)| *status == TargetStatus::Installed));

    let table = runtime.table();
    for site in ReplacementSite::ALL {
        assert!(table.slot_operation(site).is_some());
    }
    assert!(table.spawn_operation().is_some());
    assert!(table.reconciler().is_some());
    assert!(table.hooks_event(HostEventKind::SessionCreated));
    assert!(!table.hooks_event(HostEventKind::ClientDisconnected));
    assert!(report.to_string().contains("6/6 replacement sites hooked"));
}

#[tokio::test]
async fn missing_event_member_leaves_only_auto_pause_inert() {
    let sim = SimHost::new();
    sim.remove_member("ConnectionManager", "OnClientConnected");
    let (runtime, _main_loop) = install(&sim, all_on());
    let report = runtime.report();

    let auto_pause = report.feature(FeatureId::AutoPause).map(|s| s.active);
    assert_eq!(auto_pause, Some(false));
    assert_eq!(report.feature(FeatureId::TerrainLeak).map(|s| s.active), Some(true));
    assert_eq!(report.feature(FeatureId::SpawnBlocker).map(|s| s.active), Some(true));
    assert!(matches!(
        report.target(targets::CLIENT_CONNECTED),
        Some(TargetStatus::Unresolved(_))
    ));
    assert!(runtime.table().reconciler().is_none());

    // Events have nowhere to go; the host keeps running unmodified.
    assert!(!runtime.dispatch(HostEvent::SessionCreated));
}

#[tokio::test]
async fn missing_replacement_site_degrades_only_that_site() {
    let sim = SimHost::new();
    sim.remove_member("TerrainChunk", "ApplyGeneratedMesh");
    let (runtime, _main_loop) = install(&sim, all_on());

    let terrain = runtime
        .report()
        .feature(FeatureId::TerrainLeak)
        .expect("terrain status should be reported")
        .clone();
    assert!(terrain.active);
    assert_eq!(terrain.detail, "5/6 replacement sites hooked");
    assert!(runtime.table().slot_operation(ReplacementSite::ChunkMeshAssign).is_none());
    assert!(runtime.table().slot_operation(ReplacementSite::ChunkPoolRelease).is_some());

    // The unhooked site still leaks, the hooked ones do not.
    let slot = sim.new_slot();
    sim.apply(runtime.table(), ReplacementSite::ChunkMeshAssign, slot.as_ref(), Some(sim.alloc_mesh(10)));
    sim.apply(runtime.table(), ReplacementSite::ChunkMeshAssign, slot.as_ref(), Some(sim.alloc_mesh(10)));
    assert_eq!(sim.live_meshes(), 2);
    sim.apply(runtime.table(), ReplacementSite::ChunkPoolRelease, slot.as_ref(), None);
    assert_eq!(sim.live_meshes(), 1);
}

#[tokio::test]
async fn missing_pause_control_disables_both_dependent_features() {
    let sim = SimHost::new();
    sim.remove_member("NetworkLayer", "isPaused");
    let (runtime, _main_loop) = install(&sim, all_on());
    let report = runtime.report();

    assert_eq!(report.feature(FeatureId::AutoPause).map(|s| s.active), Some(false));
    assert_eq!(report.feature(FeatureId::SpawnBlocker).map(|s| s.active), Some(false));
    assert_eq!(report.feature(FeatureId::TerrainLeak).map(|s| s.active), Some(true));
    assert_eq!(report.target(targets::REQUEST_PAUSE), Some(&TargetStatus::Skipped));
    assert!(matches!(
        report.target(targets::NETWORK_PAUSED),
        Some(TargetStatus::Unresolved(_))
    ));
}

#[tokio::test]
async fn remotely_disabled_feature_is_skipped_with_reason() {
    let sim = SimHost::new();
    let (runtime, _main_loop) = install(&sim, remote_off(FeatureId::TerrainLeak, "crash on 1.2.3"));
    let report = runtime.report();

    let terrain = report.feature(FeatureId::TerrainLeak);
    assert_eq!(terrain.map(|s| s.active), Some(false));
    assert_eq!(
        terrain.map(|s| s.detail.as_str()),
        Some("disabled remotely: crash on 1.2.3")
    );
    for site in ReplacementSite::ALL {
        assert_eq!(
            report.target(targets::replacement(site)),
            Some(&TargetStatus::Skipped)
        );
        assert!(runtime.table().slot_operation(site).is_none());
    }
    assert_eq!(report.feature(FeatureId::AutoPause).map(|s| s.active), Some(true));
}

#[tokio::test]
async fn locally_disabled_feature_reports_local_config() {
    let sim = SimHost::new();
    let toggles = FeatureToggles {
        spawn_blocker: false,
        ..FeatureToggles::default()
    };
    let (runtime, _main_loop) = install(&sim, FeatureGate::local_only(toggles));

    let spawn = runtime.report().feature(FeatureId::SpawnBlocker);
    assert_eq!(spawn.map(|s| s.detail.as_str()), Some("disabled in local config"));
    assert!(runtime.table().spawn_operation().is_none());
}

#[tokio::test]
async fn spawn_blocker_suppresses_only_while_idle_paused() {
    let sim = SimHost::new();
    let (runtime, mut main_loop) = install(&sim, all_on());
    let spawn = runtime.table().spawn_operation().expect("spawn blocker should be installed");

    assert!(spawn.spawn(&request()));
    assert_eq!(sim.spawned(), 1);

    // Enter the idle pause the way the host would on last client leaving.
    sim.connect_client();
    while sim.pump(runtime.table()) > 0 || main_loop.drain() > 0 {}
    sim.disconnect_client();
    while sim.pump(runtime.table()) > 0 || main_loop.drain() > 0 {}
    assert!(sim.pause_state().engine_loop_paused);

    assert!(!spawn.spawn(&request()));
    assert_eq!(sim.spawned(), 1);
    assert_eq!(runtime.stats().snapshot().spawns_blocked, 1);

    sim.connect_client();
    while sim.pump(runtime.table()) > 0 || main_loop.drain() > 0 {}
    assert!(spawn.spawn(&request()));
    assert_eq!(sim.spawned(), 2);
}

#[tokio::test]
async fn stats_commands_report_and_reset() {
    let sim = SimHost::new();
    let (runtime, _main_loop) = install(&sim, all_on());
    let slot = sim.new_slot();

    for _ in 0..1000 {
        sim.apply(
            runtime.table(),
            ReplacementSite::ChunkMeshAssign,
            slot.as_ref(),
            Some(sim.alloc_mesh(300)),
        );
    }

    let dump = runtime
        .commands()
        .handle(STATS_COMMAND, &[])
        .expect("stats command should be handled");
    assert!(dump.contains("999 meshes destroyed"), "dump was: {dump}");
    assert!(dump.contains("299700 vertices freed"), "dump was: {dump}");

    assert!(runtime.commands().handle(RESET_COMMAND, &[]).is_some());
    let counters = runtime.stats().snapshot();
    assert_eq!(counters.resources_destroyed, 0);
    assert_eq!(counters.units_freed, 0);

    let empty = runtime.commands().execute(OperatorCommand::StatsDump);
    assert!(empty.contains("0 meshes destroyed"));
    assert!(runtime.commands().handle("kick", &["alice"]).is_none());
}
