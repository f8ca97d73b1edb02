//! End-to-end lifecycle tests for the dual-state registry and the
//! invocation stack.
//!
//! These exercise the bridge the way an embedding does: records created
//! under a scope, enlisted, delisted or swept; frames pushed and popped
//! around crossings; fatal host errors translated and resolved.

use causeway::{
    Bridge, BridgeOptions, FatalSeverity, FixedScopeHost, FunctionRef, HostFatal,
    NoopProxyTracker, NoopSessionHooks, ProxyHandle, ScopeId, ScopeKey,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn bridge_at(scope: u64) -> Arc<Bridge> {
    Bridge::new(
        BridgeOptions::default(),
        Arc::new(FixedScopeHost(ScopeId::new(scope))),
        Arc::new(NoopProxyTracker),
    )
}

#[test]
fn test_sweep_releases_every_enlisted_record() {
    let bridge = bridge_at(1);
    let scope = ScopeId::new(1);
    let released = Arc::new(AtomicUsize::new(0));

    for i in 0..1000 {
        let released = Arc::clone(&released);
        let record = bridge.registry().create(
            ProxyHandle::new(i),
            move || {
                released.fetch_add(1, Ordering::SeqCst);
            },
            scope,
        );
        bridge.enlist_current(&record).unwrap();
    }

    // Guest strong references are gone, but no drain has run; the sweep is
    // the deterministic release point.
    assert_eq!(bridge.registry().sweep_scope(scope), 1000);
    assert_eq!(released.load(Ordering::SeqCst), 1000);

    let snap = bridge.stats();
    assert_eq!(snap.native_released, 1000);
    assert_eq!(snap.enlisted_scoped, 1000);
    assert_eq!(snap.delisted_scoped, 0);
}

#[test]
fn test_delisted_records_survive_the_sweep() {
    let bridge = bridge_at(1);
    let scope = ScopeId::new(1);

    let mut records = Vec::new();
    for i in 0..100 {
        let record = bridge.registry().create(ProxyHandle::new(i), || {}, scope);
        bridge.enlist_current(&record).unwrap();
        records.push(record);
    }
    for record in records.iter().take(30) {
        bridge.registry().delist(record).unwrap();
    }

    assert_eq!(bridge.registry().sweep_scope(scope), 70);

    let snap = bridge.stats();
    assert_eq!(snap.delisted_scoped, 30);
    assert_eq!(snap.native_released, 70);
    for record in records.iter().take(30) {
        assert!(!record.is_released(), "delisted record was swept");
    }
}

#[test]
fn test_sweep_touches_only_its_own_scope() {
    let bridge = bridge_at(1);
    let ending = ScopeId::new(1);
    let surviving = ScopeId::new(2);

    let doomed = bridge.registry().create(ProxyHandle::new(1), || {}, ending);
    bridge
        .registry()
        .enlist(&doomed, ScopeKey::Scoped(ending))
        .unwrap();
    let keeper = bridge
        .registry()
        .create(ProxyHandle::new(2), || {}, surviving);
    bridge
        .registry()
        .enlist(&keeper, ScopeKey::Scoped(surviving))
        .unwrap();
    let unscoped = bridge
        .registry()
        .create(ProxyHandle::new(3), || {}, ending);
    bridge
        .registry()
        .enlist(&unscoped, ScopeKey::Unscoped)
        .unwrap();

    assert_eq!(bridge.registry().sweep_scope(ending), 1);
    assert!(doomed.is_released());
    assert!(!keeper.is_released());
    assert!(!unscoped.is_released());
}

#[test]
fn test_unscoped_record_released_by_drain() {
    let bridge = bridge_at(1);
    let record = bridge
        .registry()
        .create(ProxyHandle::new(1), || {}, ScopeId::new(1));
    bridge
        .registry()
        .enlist(&record, ScopeKey::Unscoped)
        .unwrap();

    bridge.registry().report_unreachable(record.id());
    assert_eq!(bridge.registry().drain_unreachable(), 1);
    assert!(record.is_released());

    let snap = bridge.stats();
    assert_eq!(snap.enlisted_unscoped, 1);
    assert_eq!(snap.guest_unreachable, 1);
    assert_eq!(snap.native_released, 1);
}

#[test]
fn test_frame_pop_after_exception_restores_caller() {
    let bridge = bridge_at(1);
    let mut ctx = bridge.controller_context(Arc::new(NoopSessionHooks));

    ctx.push_frame(ScopeId::new(1), FunctionRef::new("a"), None);
    ctx.push_frame(ScopeId::new(1), FunctionRef::new("b"), None);
    ctx.translate_fatal(HostFatal::new(
        FatalSeverity::Error,
        "22012",
        "division by zero",
    ));
    ctx.pop_frame(true);

    let current = ctx.current().unwrap();
    assert_eq!(current.active_function().name(), "a");
    // A's flag reflects only what A itself encountered.
    assert!(!current.error_occurred());
    assert!(ctx.check_host_access().is_ok());
}

#[test]
fn test_poisoned_frame_blocks_host_operations_without_side_effects() {
    let bridge = bridge_at(1);
    let mut ctx = bridge.controller_context(Arc::new(NoopSessionHooks));

    ctx.push_frame(ScopeId::new(1), FunctionRef::new("outer"), None);
    let exc = ctx.translate_fatal(HostFatal::new(
        FatalSeverity::Error,
        "53200",
        "out of memory",
    ));
    assert_eq!(exc.code, "53200");

    // Refused from the poisoned frame itself.
    assert!(ctx.create_record(ProxyHandle::new(1), || {}).is_err());

    // Refused from a frame pushed while the poisoned frame is on the stack.
    ctx.push_frame(ScopeId::new(1), FunctionRef::new("inner"), None);
    assert!(ctx.create_record(ProxyHandle::new(2), || {}).is_err());
    assert_eq!(bridge.stats().constructed, 0, "refused operation had side effects");
    ctx.pop_frame(true);

    // Resolving the scope reopens host access.
    ctx.resolve_pending(ScopeId::new(1));
    assert!(ctx.create_record(ProxyHandle::new(3), || {}).is_ok());
    assert_eq!(bridge.stats().constructed, 1);
}

#[test]
fn test_repeated_fatal_carries_cause_chain() {
    let bridge = bridge_at(1);
    let mut ctx = bridge.controller_context(Arc::new(NoopSessionHooks));
    ctx.push_frame(ScopeId::new(1), FunctionRef::new("f"), None);

    ctx.translate_fatal(HostFatal::new(FatalSeverity::Error, "53200", "out of memory"));
    let second = ctx.translate_fatal(HostFatal::new(
        FatalSeverity::Error,
        "25P02",
        "current transaction is aborted",
    ));

    assert_eq!(second.chain_len(), 2);
    assert_eq!(second.cause.as_ref().unwrap().code, "53200");
}

#[test]
fn test_stats_snapshot_serializes_for_monitoring() {
    let bridge = bridge_at(1);
    let record = bridge
        .registry()
        .create(ProxyHandle::new(1), || {}, ScopeId::new(1));
    bridge.enlist_current(&record).unwrap();
    bridge.registry().sweep_scope(ScopeId::new(1));

    let json = serde_json::to_value(bridge.stats()).unwrap();
    assert_eq!(json["constructed"], 1);
    assert_eq!(json["enlisted_scoped"], 1);
    assert_eq!(json["native_released"], 1);
}

#[test]
fn test_explicit_release_then_sweep_is_counted_noop() {
    let bridge = bridge_at(1);
    let scope = ScopeId::new(1);
    let runs = Arc::new(AtomicUsize::new(0));
    let runs2 = Arc::clone(&runs);
    let record = bridge.registry().create(
        ProxyHandle::new(1),
        move || {
            runs2.fetch_add(1, Ordering::SeqCst);
        },
        scope,
    );
    bridge.enlist_current(&record).unwrap();

    assert!(bridge.registry().release_explicit(&record));
    assert_eq!(bridge.registry().sweep_scope(scope), 0);

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    let snap = bridge.stats();
    assert_eq!(snap.guest_released, 1);
    assert_eq!(snap.native_released, 1);
    assert_eq!(snap.release_release_races, 1);
}
