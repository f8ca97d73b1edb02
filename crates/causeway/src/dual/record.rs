//! Dual-state records: one native resource paired with one managed proxy.
//!
//! Liveness is a per-record atomic state machine `{Live, Releasing,
//! Released}` driven by compare-and-set, so unrelated records never contend
//! and the releaser runs exactly once no matter how the two release triggers
//! interleave. Pinning is a separate counter axis: a pinned record defers
//! (never drops) a release until the last unpin.

use crate::guest::ProxyHandle;
use crate::scope::{ScopeId, ScopeKey};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

/// Identifier of a dual-state record within its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId(pub(crate) u64);

impl RecordId {
    /// The raw registry-assigned identifier.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "record#{}", self.0)
    }
}

/// Which path requested a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseTrigger {
    /// Synchronous scope-end sweep run by the host.
    ScopeSweep,
    /// Unreachability drain of guest-collector notifications.
    UnreachableDrain,
    /// Explicit release requested by guest code.
    ExplicitGuest,
}

impl ReleaseTrigger {
    fn as_u8(self) -> u8 {
        match self {
            ReleaseTrigger::ScopeSweep => 0,
            ReleaseTrigger::UnreachableDrain => 1,
            ReleaseTrigger::ExplicitGuest => 2,
        }
    }

    fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(ReleaseTrigger::ScopeSweep),
            1 => Some(ReleaseTrigger::UnreachableDrain),
            2 => Some(ReleaseTrigger::ExplicitGuest),
            _ => None,
        }
    }
}

/// Observable lifecycle phase of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordPhase {
    /// Created, not yet bound to any sweep.
    Constructed,
    /// Bound to a scope sweep (or registered unscoped).
    Enlisted,
    /// Actively dereferenced by guest code; `n` outstanding pins.
    Pinned(u32),
    /// Releaser has run (or is running); the record is inert.
    Released,
}

/// Sweep-binding of a record. Orthogonal to liveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Binding {
    /// Created under `scope`, not yet enlisted.
    Constructed {
        /// Scope active at construction.
        scope: ScopeId,
    },
    /// Bound to a scope sweep, or registered unscoped.
    Enlisted(ScopeKey),
    /// Unbound early; lifetime responsibility returned to the caller.
    Delisted,
}

/// Outcome of one release attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReleaseOutcome {
    /// This attempt ran the releaser.
    Released,
    /// The record is pinned; the release is recorded as pending.
    Deferred,
    /// Another trigger is releasing the record right now.
    AlreadyInFlight,
    /// The record was already released.
    AlreadyReleased,
}

const LIFE_LIVE: u8 = 0;
const LIFE_RELEASING: u8 = 1;
const LIFE_RELEASED: u8 = 2;

const TRIGGER_NONE: u8 = u8::MAX;

type Releaser = Box<dyn FnOnce() + Send>;

/// A paired native-resource / managed-proxy record.
pub struct DualRecord {
    id: RecordId,
    proxy: ProxyHandle,
    binding: Mutex<Binding>,
    life: AtomicU8,
    pin_count: AtomicU32,
    release_pending: AtomicBool,
    pending_trigger: AtomicU8,
    released_by: AtomicU8,
    releaser: Mutex<Option<Releaser>>,
}

impl fmt::Debug for DualRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DualRecord")
            .field("id", &self.id)
            .field("proxy", &self.proxy)
            .field("phase", &self.phase())
            .finish()
    }
}

impl DualRecord {
    pub(crate) fn new(
        id: RecordId,
        proxy: ProxyHandle,
        scope: ScopeId,
        releaser: Releaser,
    ) -> Self {
        DualRecord {
            id,
            proxy,
            binding: Mutex::new(Binding::Constructed { scope }),
            life: AtomicU8::new(LIFE_LIVE),
            pin_count: AtomicU32::new(0),
            release_pending: AtomicBool::new(false),
            pending_trigger: AtomicU8::new(TRIGGER_NONE),
            released_by: AtomicU8::new(TRIGGER_NONE),
            releaser: Mutex::new(Some(releaser)),
        }
    }

    /// Registry-assigned identifier.
    pub fn id(&self) -> RecordId {
        self.id
    }

    /// The managed proxy this record tracks.
    pub fn proxy(&self) -> ProxyHandle {
        self.proxy
    }

    /// Observable lifecycle phase.
    pub fn phase(&self) -> RecordPhase {
        if self.life.load(Ordering::Acquire) == LIFE_RELEASED {
            return RecordPhase::Released;
        }
        let pins = self.pin_count.load(Ordering::Acquire);
        if pins > 0 {
            return RecordPhase::Pinned(pins);
        }
        match *self.binding.lock() {
            Binding::Enlisted(_) => RecordPhase::Enlisted,
            Binding::Constructed { .. } | Binding::Delisted => RecordPhase::Constructed,
        }
    }

    /// Whether the releaser has run.
    pub fn is_released(&self) -> bool {
        self.life.load(Ordering::Acquire) == LIFE_RELEASED
    }

    /// Outstanding pins.
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Which trigger released the record, once released.
    pub(crate) fn released_by(&self) -> Option<ReleaseTrigger> {
        ReleaseTrigger::from_u8(self.released_by.load(Ordering::Acquire))
    }

    pub(crate) fn update_binding<R>(&self, f: impl FnOnce(&mut Binding) -> R) -> R {
        f(&mut self.binding.lock())
    }

    pub(crate) fn is_enlisted_to(&self, scope: ScopeId) -> bool {
        *self.binding.lock() == Binding::Enlisted(ScopeKey::Scoped(scope))
    }

    /// Attempt to pin. Fails when a release has begun; a successful pin
    /// guarantees the native side stays valid until the matching unpin.
    pub(crate) fn try_pin(&self) -> bool {
        self.pin_count.fetch_add(1, Ordering::AcqRel);
        if self.life.load(Ordering::Acquire) != LIFE_LIVE {
            self.pin_count.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }

    /// Drop one pin. Returns true when this was the last pin and a deferred
    /// release is pending, in which case the caller must retry the release.
    pub(crate) fn unpin(&self) -> bool {
        let prev = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unpin without matching pin");
        prev == 1 && self.release_pending.load(Ordering::Acquire)
    }

    /// Claim the pending deferred release, if any. At most one caller wins.
    pub(crate) fn take_pending_trigger(&self) -> Option<ReleaseTrigger> {
        if self.release_pending.swap(false, Ordering::AcqRel) {
            ReleaseTrigger::from_u8(self.pending_trigger.load(Ordering::Acquire))
        } else {
            None
        }
    }

    /// One release attempt. The CAS over `{Live, Releasing, Released}`
    /// guarantees the releaser runs at most once; a pinned record records
    /// the attempt as pending instead.
    pub(crate) fn release_once(&self, trigger: ReleaseTrigger) -> ReleaseOutcome {
        let mut trigger = trigger;
        loop {
            match self.life.compare_exchange(
                LIFE_LIVE,
                LIFE_RELEASING,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    if self.pin_count.load(Ordering::Acquire) > 0 {
                        self.pending_trigger.store(trigger.as_u8(), Ordering::Release);
                        self.release_pending.store(true, Ordering::Release);
                        self.life.store(LIFE_LIVE, Ordering::Release);
                        // The last unpin may have raced past before the
                        // deferral became visible; reclaim and retry so the
                        // release is deferred, never dropped.
                        if self.pin_count.load(Ordering::Acquire) == 0 {
                            if let Some(reclaimed) = self.take_pending_trigger() {
                                trigger = reclaimed;
                                continue;
                            }
                        }
                        return ReleaseOutcome::Deferred;
                    }
                    let releaser = self.releaser.lock().take();
                    if let Some(run) = releaser {
                        run();
                    }
                    self.released_by.store(trigger.as_u8(), Ordering::Release);
                    self.life.store(LIFE_RELEASED, Ordering::Release);
                    return ReleaseOutcome::Released;
                }
                Err(LIFE_RELEASING) => return ReleaseOutcome::AlreadyInFlight,
                Err(_) => return ReleaseOutcome::AlreadyReleased,
            }
        }
    }
}
