//! Bridge configuration.

use crate::fence::FencePolicy;

/// Configuration for a [`crate::bridge::Bridge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeOptions {
    /// Threading policy for the call fence.
    pub fence_policy: FencePolicy,
    /// Max unreachability notifications reconciled per drain call;
    /// 0 means unbounded.
    pub drain_limit: usize,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        BridgeOptions {
            fence_policy: FencePolicy::Cooperative,
            drain_limit: 0,
        }
    }
}

impl BridgeOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the fence policy.
    pub fn fence_policy(mut self, policy: FencePolicy) -> Self {
        self.fence_policy = policy;
        self
    }

    /// Bound the work done by one unreachability drain call.
    pub fn drain_limit(mut self, limit: usize) -> Self {
        self.drain_limit = limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = BridgeOptions::default();
        assert_eq!(opts.fence_policy, FencePolicy::Cooperative);
        assert_eq!(opts.drain_limit, 0);
    }

    #[test]
    fn test_builder_setters() {
        let opts = BridgeOptions::new()
            .fence_policy(FencePolicy::ExclusiveDiagnostic)
            .drain_limit(64);
        assert_eq!(opts.fence_policy, FencePolicy::ExclusiveDiagnostic);
        assert_eq!(opts.drain_limit, 64);
    }
}
