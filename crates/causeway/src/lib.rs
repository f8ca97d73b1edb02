//! Causeway: a resource-lifecycle bridge between a host server that manages
//! memory through transaction-scoped arenas and an embedded managed,
//! garbage-collected guest runtime.
//!
//! Guest code holds native, host-owned resources (cursors, buffers, open
//! streams) as ordinary managed objects, while the host reclaims those
//! resources deterministically at transaction/subtransaction boundaries,
//! independent of whether the guest collector has reclaimed the proxy.
//!
//! The crate provides:
//! - Dual-state records and their registry ([`dual`]): exactly-once native
//!   release under two independent, racing triggers — the host's scope-end
//!   sweep and the lazy drain of guest-collector unreachability reports.
//! - The invocation stack ([`invocation`]): per-controller call-frame
//!   bookkeeping for nested host↔guest crossings.
//! - The call fence ([`fence`]): the single-controller-thread gate every
//!   crossing from guest code into host operations must pass.
//! - The error translator ([`error`]): fatal host errors become ordinary
//!   guest exceptions, and an unresolved failure poisons its frame against
//!   further host access.
//! - Monotonic health counters ([`stats`]) with best-effort snapshots.
//!
//! Value marshaling, deployment generation, and the relational-access layer
//! are external consumers of these interfaces, not part of this crate.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod bridge;
pub mod dual;
pub mod error;
pub mod fence;
pub mod guest;
pub mod invocation;
pub mod options;
pub mod scope;
pub mod stats;

pub use bridge::{Bridge, ControllerContext, ScopeEndObserver};
pub use dual::{DualRecord, DualRegistry, PinGuard, ReachabilityWatcher, RecordId, RecordPhase, ReleaseTrigger};
pub use error::{
    resolve_pending, translate_fatal, BridgeError, BridgeResult, FatalSeverity, GuestException,
    HostFatal,
};
pub use fence::{CallFence, FenceError, FenceGuard, FencePolicy};
pub use guest::{GuestContext, NoopProxyTracker, ProxyHandle, ProxyTracker};
pub use invocation::{
    AmbientCallState, FunctionRef, Invocation, InvocationStack, NoopSessionHooks, SessionHooks,
    TriggerContext, TriggerEvent, TriggerTiming,
};
pub use options::BridgeOptions;
pub use scope::{FixedScopeHost, ScopeHost, ScopeId, ScopeKey};
pub use stats::{BridgeStats, StatsSnapshot};
