//! Bridge-health counters.
//!
//! Every counter is monotonic and incremented at exactly one point in the
//! bridge; none is ever decremented. Snapshots are best-effort (Relaxed
//! loads, non-linearizable) and may be taken from any thread at any time.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters exposing bridge health for monitoring.
///
/// Fields are crate-internal; consumers read a [`StatsSnapshot`] via
/// [`BridgeStats::snapshot`].
#[derive(Debug, Default)]
pub struct BridgeStats {
    /// Dual-state records constructed.
    pub(crate) constructed: AtomicU64,
    /// Records enlisted to a specific scope.
    pub(crate) enlisted_scoped: AtomicU64,
    /// Records enlisted unscoped.
    pub(crate) enlisted_unscoped: AtomicU64,
    /// Scoped records delisted before their sweep.
    pub(crate) delisted_scoped: AtomicU64,
    /// Unscoped records delisted.
    pub(crate) delisted_unscoped: AtomicU64,
    /// Unreachability notifications drained from the guest collector.
    pub(crate) guest_unreachable: AtomicU64,
    /// Explicit releases requested by guest code.
    pub(crate) guest_released: AtomicU64,
    /// Native releasers actually executed.
    pub(crate) native_released: AtomicU64,
    /// Threads that blocked at the call fence.
    pub(crate) fence_contention: AtomicU64,
    /// Pins refused because a release was already in progress.
    pub(crate) pin_contention: AtomicU64,
    /// Release attempts deferred because the record was pinned.
    pub(crate) release_deferred: AtomicU64,
    /// A release trigger observed another trigger's release in flight.
    pub(crate) gc_release_races: AtomicU64,
    /// A release trigger arrived after the other trigger had already released.
    pub(crate) release_release_races: AtomicU64,
}

impl BridgeStats {
    /// Create a zeroed counter set.
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Best-effort snapshot of all counters.
    ///
    /// Individual loads are Relaxed; a snapshot taken while counters move is
    /// not a consistent cut, which is acceptable for monitoring.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            constructed: self.constructed.load(Ordering::Relaxed),
            enlisted_scoped: self.enlisted_scoped.load(Ordering::Relaxed),
            enlisted_unscoped: self.enlisted_unscoped.load(Ordering::Relaxed),
            delisted_scoped: self.delisted_scoped.load(Ordering::Relaxed),
            delisted_unscoped: self.delisted_unscoped.load(Ordering::Relaxed),
            guest_unreachable: self.guest_unreachable.load(Ordering::Relaxed),
            guest_released: self.guest_released.load(Ordering::Relaxed),
            native_released: self.native_released.load(Ordering::Relaxed),
            fence_contention: self.fence_contention.load(Ordering::Relaxed),
            pin_contention: self.pin_contention.load(Ordering::Relaxed),
            release_deferred: self.release_deferred.load(Ordering::Relaxed),
            gc_release_races: self.gc_release_races.load(Ordering::Relaxed),
            release_release_races: self.release_release_races.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of all [`BridgeStats`] counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Dual-state records constructed.
    pub constructed: u64,
    /// Records enlisted to a specific scope.
    pub enlisted_scoped: u64,
    /// Records enlisted unscoped.
    pub enlisted_unscoped: u64,
    /// Scoped records delisted before their sweep.
    pub delisted_scoped: u64,
    /// Unscoped records delisted.
    pub delisted_unscoped: u64,
    /// Unreachability notifications drained from the guest collector.
    pub guest_unreachable: u64,
    /// Explicit releases requested by guest code.
    pub guest_released: u64,
    /// Native releasers actually executed.
    pub native_released: u64,
    /// Threads that blocked at the call fence.
    pub fence_contention: u64,
    /// Pins refused because a release was already in progress.
    pub pin_contention: u64,
    /// Release attempts deferred because the record was pinned.
    pub release_deferred: u64,
    /// A release trigger observed another trigger's release in flight.
    pub gc_release_races: u64,
    /// A release trigger arrived after the other trigger had already released.
    pub release_release_races: u64,
}

impl StatsSnapshot {
    /// Total release-trigger races of both categories.
    pub fn total_races(&self) -> u64 {
        self.gc_release_races + self.release_release_races
    }
}
