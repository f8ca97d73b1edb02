//! Scope identities and the host scope/transaction seam.
//!
//! A scope is a transaction- or subtransaction-bound resource lifetime on the
//! host side. The bridge never creates or destroys scopes; it only learns
//! which scope is active (via [`ScopeHost`]) and is told when one ends (via
//! the scope-end observer registered by the bridge facade).

use std::fmt;

/// Opaque identifier for a host transaction or subtransaction scope.
///
/// The embedding assigns these; the bridge only compares them for equality
/// and uses them as index keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u64);

impl ScopeId {
    /// Wrap a raw host scope identifier.
    pub const fn new(raw: u64) -> Self {
        ScopeId(raw)
    }

    /// The raw host identifier.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope#{}", self.0)
    }
}

/// Lifetime owner of a dual-state record.
///
/// Most records are bound to a specific scope and swept when it ends.
/// Resources that must outlive any one scope (session-lifetime cursors,
/// cached plans) are enlisted unscoped and released only by the
/// unreachability drain or an explicit guest release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKey {
    /// Bound to a specific scope's end-of-life sweep.
    Scoped(ScopeId),
    /// Not bound to any scope sweep.
    Unscoped,
}

impl ScopeKey {
    /// Whether this key names a specific scope.
    pub fn is_scoped(&self) -> bool {
        matches!(self, ScopeKey::Scoped(_))
    }

    /// The named scope, if any.
    pub fn scope(&self) -> Option<ScopeId> {
        match self {
            ScopeKey::Scoped(id) => Some(*id),
            ScopeKey::Unscoped => None,
        }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeKey::Scoped(id) => write!(f, "{}", id),
            ScopeKey::Unscoped => write!(f, "unscoped"),
        }
    }
}

/// Host-side scope oracle, supplied by the embedding.
///
/// Queried on enlistment when the caller does not name a scope explicitly.
pub trait ScopeHost: Send + Sync {
    /// The currently active transaction/subtransaction scope.
    fn current_scope(&self) -> ScopeId;
}

/// A [`ScopeHost`] pinned to one scope.
///
/// Used by embeddings without subtransactions, and by tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedScopeHost(pub ScopeId);

impl ScopeHost for FixedScopeHost {
    fn current_scope(&self) -> ScopeId {
        self.0
    }
}
