//! The dual-state registry: creation, enlistment, pinning, and the two
//! racing release triggers.
//!
//! The registry index is the only bridge structure mutated from more than
//! one thread (the controller during sweeps, the drain path during
//! unreachability processing). The record map is sharded and the per-scope
//! lists sit behind a short-held lock; per-record liveness is atomic, so
//! unrelated records never serialize against each other.

use crate::dual::record::{Binding, DualRecord, RecordId, ReleaseOutcome, ReleaseTrigger};
use crate::dual::watcher::ReachabilityWatcher;
use crate::error::{BridgeResult, GuestException};
use crate::guest::{ProxyHandle, ProxyTracker};
use crate::scope::{ScopeId, ScopeKey};
use crate::stats::BridgeStats;
use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Tracks and reconciles paired native-resource / managed-proxy records.
pub struct DualRegistry {
    records: DashMap<RecordId, Arc<DualRecord>>,
    scope_index: Mutex<FxHashMap<ScopeId, Vec<RecordId>>>,
    watcher: ReachabilityWatcher,
    tracker: Arc<dyn ProxyTracker>,
    stats: Arc<BridgeStats>,
    next_id: AtomicU64,
    /// Max notifications reconciled per drain call; 0 means unbounded.
    drain_limit: usize,
}

impl std::fmt::Debug for DualRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DualRegistry")
            .field("records", &self.records.len())
            .field("backlog", &self.watcher.backlog())
            .finish()
    }
}

impl DualRegistry {
    /// Create a registry.
    pub fn new(
        tracker: Arc<dyn ProxyTracker>,
        stats: Arc<BridgeStats>,
        drain_limit: usize,
    ) -> Self {
        DualRegistry {
            records: DashMap::new(),
            scope_index: Mutex::new(FxHashMap::default()),
            watcher: ReachabilityWatcher::new(),
            tracker,
            stats,
            next_id: AtomicU64::new(1),
            drain_limit,
        }
    }

    /// The shared counter set.
    pub fn stats(&self) -> &Arc<BridgeStats> {
        &self.stats
    }

    /// Records currently tracked (released records are dropped).
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no records are tracked.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Look up a record by id.
    pub fn get(&self, id: RecordId) -> Option<Arc<DualRecord>> {
        self.records.get(&id).map(|e| Arc::clone(e.value()))
    }

    /// Unreachability notifications not yet drained.
    pub fn backlog(&self) -> usize {
        self.watcher.backlog()
    }

    /// Create a `constructed` record pairing `proxy` with a native releaser,
    /// under the scope active at creation.
    pub fn create(
        &self,
        proxy: ProxyHandle,
        releaser: impl FnOnce() + Send + 'static,
        scope: ScopeId,
    ) -> Arc<DualRecord> {
        let id = RecordId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let record = Arc::new(DualRecord::new(id, proxy, scope, Box::new(releaser)));
        self.records.insert(id, Arc::clone(&record));
        BridgeStats::bump(&self.stats.constructed);
        tracing::trace!(%id, %proxy, %scope, "constructed dual-state record");
        record
    }

    /// Bind a record to a scope's end-of-life sweep, or register it
    /// unscoped for resources that must outlive any one scope. Downgrades
    /// the proxy to trackable-only.
    pub fn enlist(&self, record: &Arc<DualRecord>, key: ScopeKey) -> BridgeResult<()> {
        if record.is_released() {
            return Err(GuestException::usage("cannot enlist a released record").into());
        }
        record.update_binding(|binding| match *binding {
            Binding::Constructed { .. } | Binding::Delisted => {
                *binding = Binding::Enlisted(key);
                Ok(())
            }
            Binding::Enlisted(_) => Err(GuestException::usage("record is already enlisted")),
        })?;

        match key {
            ScopeKey::Scoped(scope) => {
                self.scope_index
                    .lock()
                    .entry(scope)
                    .or_default()
                    .push(record.id());
                BridgeStats::bump(&self.stats.enlisted_scoped);
            }
            ScopeKey::Unscoped => BridgeStats::bump(&self.stats.enlisted_unscoped),
        }
        self.tracker.downgrade(record.proxy());
        Ok(())
    }

    /// Unbind a record from its sweep early, returning lifetime
    /// responsibility to the caller. The record stays live; a later sweep of
    /// its former scope will not touch it.
    pub fn delist(&self, record: &Arc<DualRecord>) -> BridgeResult<()> {
        let key = record.update_binding(|binding| match *binding {
            Binding::Enlisted(key) => {
                *binding = Binding::Delisted;
                Ok(key)
            }
            _ => Err(GuestException::usage("record is not enlisted")),
        })?;

        match key {
            ScopeKey::Scoped(scope) => {
                let mut index = self.scope_index.lock();
                if let Some(ids) = index.get_mut(&scope) {
                    ids.retain(|id| *id != record.id());
                }
                BridgeStats::bump(&self.stats.delisted_scoped);
            }
            ScopeKey::Unscoped => BridgeStats::bump(&self.stats.delisted_unscoped),
        }
        Ok(())
    }

    /// Pin a record for the duration of a native dereference. Callers must
    /// unpin immediately after the access and never retain the raw native
    /// pointer past the unpin.
    pub fn pin(&self, record: &Arc<DualRecord>) -> BridgeResult<()> {
        if record.try_pin() {
            Ok(())
        } else {
            BridgeStats::bump(&self.stats.pin_contention);
            Err(GuestException::usage("native resource already released").into())
        }
    }

    /// Drop one pin; the last unpin re-attempts any deferred release.
    pub fn unpin(&self, record: &Arc<DualRecord>) {
        if record.unpin() {
            if let Some(trigger) = record.take_pending_trigger() {
                self.run_release(record, trigger);
            }
        }
    }

    /// Pin with a guard that unpins on drop, including on unwind.
    pub fn pin_guard<'a>(&'a self, record: &Arc<DualRecord>) -> BridgeResult<PinGuard<'a>> {
        self.pin(record)?;
        Ok(PinGuard {
            registry: self,
            record: Arc::clone(record),
        })
    }

    /// Scope-end sweep: synchronously release every record still enlisted to
    /// the ending scope. Returns how many releasers ran.
    pub fn sweep_scope(&self, scope: ScopeId) -> usize {
        let ids = self.scope_index.lock().remove(&scope).unwrap_or_default();
        let mut released = 0;
        for id in ids {
            let record = self.get(id);
            match record {
                Some(record) => {
                    if !record.is_enlisted_to(scope) {
                        // Re-enlisted elsewhere since the index entry was
                        // written; not ours to release.
                        continue;
                    }
                    if self.run_release(&record, ReleaseTrigger::ScopeSweep) {
                        released += 1;
                    }
                }
                // The drain got here first and the record is gone.
                None => BridgeStats::bump(&self.stats.release_release_races),
            }
        }
        tracing::debug!(%scope, released, "scope-end sweep complete");
        released
    }

    /// Report that a record's proxy lost its last strong reference.
    /// Callable from any guest thread.
    pub fn report_unreachable(&self, id: RecordId) {
        self.watcher.report_unreachable(id);
    }

    /// Drain queued unreachability notifications and release the records
    /// they name. Returns how many releasers ran.
    pub fn drain_unreachable(&self) -> usize {
        let mut released = 0;
        let mut drained = 0;
        while let Some(id) = self.watcher.pop() {
            BridgeStats::bump(&self.stats.guest_unreachable);
            match self.get(id) {
                Some(record) => {
                    if self.run_release(&record, ReleaseTrigger::UnreachableDrain) {
                        released += 1;
                    }
                }
                // Already released and dropped by the other trigger.
                None => BridgeStats::bump(&self.stats.release_release_races),
            }
            drained += 1;
            if self.drain_limit != 0 && drained >= self.drain_limit {
                break;
            }
        }
        if drained > 0 {
            tracing::debug!(drained, released, "unreachability drain complete");
        }
        released
    }

    /// Explicit release requested by guest code (a proxy's close method).
    /// Returns whether this call ran the releaser.
    pub fn release_explicit(&self, record: &Arc<DualRecord>) -> bool {
        BridgeStats::bump(&self.stats.guest_released);
        self.run_release(record, ReleaseTrigger::ExplicitGuest)
    }

    /// Run one release attempt and account for its outcome. Returns whether
    /// the releaser ran in this call.
    fn run_release(&self, record: &Arc<DualRecord>, trigger: ReleaseTrigger) -> bool {
        match record.release_once(trigger) {
            ReleaseOutcome::Released => {
                BridgeStats::bump(&self.stats.native_released);
                self.records.remove(&record.id());
                true
            }
            ReleaseOutcome::Deferred => {
                BridgeStats::bump(&self.stats.release_deferred);
                tracing::trace!(id = %record.id(), ?trigger, "release deferred: record is pinned");
                false
            }
            ReleaseOutcome::AlreadyInFlight => {
                BridgeStats::bump(&self.stats.gc_release_races);
                false
            }
            ReleaseOutcome::AlreadyReleased => {
                if record.released_by() != Some(trigger) {
                    BridgeStats::bump(&self.stats.release_release_races);
                }
                false
            }
        }
    }
}

/// Holds a pin for the duration of a native access; unpins on drop.
#[must_use = "dropping the guard unpins the record"]
pub struct PinGuard<'a> {
    registry: &'a DualRegistry,
    record: Arc<DualRecord>,
}

impl PinGuard<'_> {
    /// The pinned record.
    pub fn record(&self) -> &Arc<DualRecord> {
        &self.record
    }
}

impl Drop for PinGuard<'_> {
    fn drop(&mut self) {
        self.registry.unpin(&self.record);
    }
}
