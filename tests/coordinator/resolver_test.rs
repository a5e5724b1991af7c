//! Tests for `src/resolver.rs` against the in-memory host catalog.

use hostpatch::coordinator::targets;
use hostpatch::host::HostBindings;
use hostpatch::remediation::ReplacementSite;
use hostpatch::resolver::{InterceptTarget, Resolution, ResolveError, SymbolResolver};
use hostpatch::sim::SimHost;

#[test]
fn every_known_target_resolves() {
    let sim = SimHost::new();
    let resolver = SymbolResolver::new(sim.catalog());

    let mut all: Vec<InterceptTarget> = ReplacementSite::ALL.into_iter().map(targets::replacement).collect();
    all.extend(targets::PAUSE_EVENTS);
    all.extend([
        targets::REQUEST_PAUSE,
        targets::LAST_CLIENT_LEFT,
        targets::NETWORK_PAUSED,
        targets::AUTOSAVE_TIMER,
        targets::ENTITY_SPAWN,
    ]);

    let handles = resolver.resolve_all(&all).expect("all targets should resolve");
    assert_eq!(handles.len(), all.len());
    assert_eq!(resolver.resolutions().len(), all.len());
}

#[test]
fn overload_without_signature_is_ambiguous() {
    let sim = SimHost::new();
    let resolver = SymbolResolver::new(sim.catalog());

    match resolver.resolve(InterceptTarget::named("ChunkRenderer", "SetMesh")) {
        Resolution::Unresolved {
            error: ResolveError::Ambiguous { candidates, .. },
            ..
        } => assert_eq!(candidates, 2),
        other => panic!("expected ambiguity, got {other:?}"),
    }

    // The signature picks exactly one overload.
    let target = targets::replacement(ReplacementSite::RendererAssign);
    assert!(resolver.resolve(target).handle().is_some());
}

#[test]
fn missing_type_and_member_are_reported() {
    let sim = SimHost::new();
    let resolver = SymbolResolver::new(sim.catalog());

    let missing_type = resolver.resolve(InterceptTarget::named("WeatherSystem", "Tick"));
    assert!(matches!(
        missing_type,
        Resolution::Unresolved {
            error: ResolveError::TypeNotFound(_),
            ..
        }
    ));

    sim.remove_member("GameLoop", "RequestPause");
    let missing_member = resolver.resolve(targets::REQUEST_PAUSE);
    assert!(matches!(
        missing_member,
        Resolution::Unresolved {
            error: ResolveError::MemberNotFound { .. },
            ..
        }
    ));
}

#[test]
fn resolution_is_cached_for_the_session() {
    let sim = SimHost::new();
    let resolver = SymbolResolver::new(sim.catalog());

    let first = resolver.resolve(targets::ENTITY_SPAWN);
    assert!(first.handle().is_some());

    // Later catalog changes do not affect an already-resolved target.
    sim.remove_member("EntitySpawner", "Spawn");
    let second = resolver.resolve(targets::ENTITY_SPAWN);
    assert_eq!(first.handle(), second.handle());
}
