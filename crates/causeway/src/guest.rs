//! Guest-runtime seam: proxy handles and reference-strength control.
//!
//! The bridge never touches the guest heap directly. It holds opaque
//! [`ProxyHandle`]s and asks the embedding, through [`ProxyTracker`], to
//! adjust reference strength: a proxy stays strongly referenced while its
//! record is unenlisted, and is downgraded to trackable-only (weak plus a
//! cleanup reference) once enlisted, so the guest collector can report loss
//! of strong references without keeping the proxy alive itself.

use std::fmt;

/// Handle to a managed proxy object on the guest heap.
///
/// Opaque to the bridge; the embedding maps it to whatever its runtime uses
/// (a global reference, a handle-table slot, a pinned object id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProxyHandle(u64);

impl ProxyHandle {
    /// Wrap a raw guest-heap handle.
    pub const fn new(raw: u64) -> Self {
        ProxyHandle(raw)
    }

    /// The raw guest-heap handle.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProxyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proxy#{}", self.0)
    }
}

/// Opaque guest-runtime context token.
///
/// Saved on frame push and restored on pop, so nested crossings cannot leak
/// the callee's context into the caller. The bridge never interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GuestContext(u64);

impl GuestContext {
    /// Wrap a raw context token.
    pub const fn new(raw: u64) -> Self {
        GuestContext(raw)
    }

    /// The raw context token.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Reference-strength control over managed proxies, supplied by the embedding.
///
/// Implementations register a cleanup reference with the guest runtime when a
/// proxy is downgraded, and feed the resulting unreachability notifications
/// into [`crate::dual::DualRegistry::report_unreachable`].
pub trait ProxyTracker: Send + Sync {
    /// Downgrade the proxy's strong reference to trackable-only.
    ///
    /// Called once, at enlistment. After this the guest collector may
    /// reclaim the proxy whenever guest code drops its own references.
    fn downgrade(&self, proxy: ProxyHandle);
}

/// A [`ProxyTracker`] that does nothing.
///
/// Useful for embeddings that manage reference strength out of band, and for
/// tests.
#[derive(Debug, Default)]
pub struct NoopProxyTracker;

impl ProxyTracker for NoopProxyTracker {
    fn downgrade(&self, _proxy: ProxyHandle) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_handle_roundtrip() {
        let h = ProxyHandle::new(9);
        assert_eq!(h.raw(), 9);
        assert_eq!(h.to_string(), "proxy#9");
    }

    #[test]
    fn test_guest_context_default_is_zero() {
        assert_eq!(GuestContext::default().raw(), 0);
        assert_eq!(GuestContext::new(5).raw(), 5);
    }

    #[test]
    fn test_noop_tracker_accepts_any_handle() {
        let tracker = NoopProxyTracker;
        tracker.downgrade(ProxyHandle::new(1));
        tracker.downgrade(ProxyHandle::new(u64::MAX));
    }
}
