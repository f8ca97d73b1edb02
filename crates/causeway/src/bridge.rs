//! Bridge facade: wires the fence, registry, and statistics together and
//! owns the seams to the host scope subsystem and the guest runtime.

use crate::dual::{DualRecord, DualRegistry};
use crate::error::{BridgeResult, GuestException, HostFatal};
use crate::fence::CallFence;
use crate::guest::{ProxyHandle, ProxyTracker};
use crate::invocation::{FunctionRef, Invocation, InvocationStack, SessionHooks, TriggerContext};
use crate::options::BridgeOptions;
use crate::scope::{ScopeHost, ScopeId, ScopeKey};
use crate::stats::{BridgeStats, StatsSnapshot};
use once_cell::sync::OnceCell;
use std::sync::Arc;

/// The resource-lifecycle bridge for one embedded guest runtime.
///
/// Shared between the controller thread and any guest-spawned threads; all
/// host-state access still funnels through the [`CallFence`].
pub struct Bridge {
    options: BridgeOptions,
    stats: Arc<BridgeStats>,
    fence: CallFence,
    registry: DualRegistry,
    scope_host: Arc<dyn ScopeHost>,
    observer_attached: OnceCell<()>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("options", &self.options)
            .field("registry", &self.registry)
            .finish()
    }
}

impl Bridge {
    /// Build a bridge from options and the two external seams.
    pub fn new(
        options: BridgeOptions,
        scope_host: Arc<dyn ScopeHost>,
        tracker: Arc<dyn ProxyTracker>,
    ) -> Arc<Self> {
        let stats = Arc::new(BridgeStats::new());
        Arc::new(Bridge {
            fence: CallFence::new(options.fence_policy, Arc::clone(&stats)),
            registry: DualRegistry::new(tracker, Arc::clone(&stats), options.drain_limit),
            stats,
            options,
            scope_host,
            observer_attached: OnceCell::new(),
        })
    }

    /// The active configuration.
    pub fn options(&self) -> BridgeOptions {
        self.options
    }

    /// The call fence.
    pub fn fence(&self) -> &CallFence {
        &self.fence
    }

    /// The dual-state registry.
    pub fn registry(&self) -> &DualRegistry {
        &self.registry
    }

    /// Best-effort monitoring snapshot; callable from any thread.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// The host's currently active scope.
    pub fn current_scope(&self) -> ScopeId {
        self.scope_host.current_scope()
    }

    /// Enlist a record to the host's currently active scope.
    pub fn enlist_current(&self, record: &Arc<DualRecord>) -> BridgeResult<()> {
        self.registry
            .enlist(record, ScopeKey::Scoped(self.scope_host.current_scope()))
    }

    /// One-time subscription hand-off: the returned observer is registered
    /// with the host's scope/transaction subsystem, which calls
    /// [`ScopeEndObserver::scope_ending`] as each scope ends.
    pub fn attach_scope_observer(self: &Arc<Self>) -> BridgeResult<ScopeEndObserver> {
        self.observer_attached
            .set(())
            .map_err(|_| GuestException::usage("scope observer already attached"))?;
        Ok(ScopeEndObserver {
            bridge: Arc::clone(self),
        })
    }

    /// Create a controller context owning the invocation stack for one
    /// connection/worker.
    pub fn controller_context(self: &Arc<Self>, hooks: Arc<dyn SessionHooks>) -> ControllerContext {
        ControllerContext {
            bridge: Arc::clone(self),
            stack: InvocationStack::new(hooks),
        }
    }
}

/// Scope-end notification target handed to the host's scope subsystem.
#[derive(Debug)]
pub struct ScopeEndObserver {
    bridge: Arc<Bridge>,
}

impl ScopeEndObserver {
    /// Called by the host as `scope` ends; sweeps every record enlisted to
    /// it. Returns how many releasers ran.
    pub fn scope_ending(&self, scope: ScopeId) -> usize {
        self.bridge.registry.sweep_scope(scope)
    }
}

/// Per-connection controller state: the invocation stack plus its bridge.
///
/// The "current frame" lives here, owned and passed through explicitly,
/// never as process-global mutable state.
#[derive(Debug)]
pub struct ControllerContext {
    bridge: Arc<Bridge>,
    stack: InvocationStack,
}

impl ControllerContext {
    /// The owning bridge.
    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    /// The invocation stack.
    pub fn stack(&self) -> &InvocationStack {
        &self.stack
    }

    /// Mutable access to the invocation stack.
    pub fn stack_mut(&mut self) -> &mut InvocationStack {
        &mut self.stack
    }

    /// Push a frame for a host↔guest crossing.
    pub fn push_frame(
        &mut self,
        scope: ScopeId,
        function: FunctionRef,
        trigger: Option<TriggerContext>,
    ) {
        self.stack.push_frame(scope, function, trigger);
    }

    /// Pop the current frame; see [`InvocationStack::pop_frame`].
    pub fn pop_frame(&mut self, was_exception: bool) {
        self.stack.pop_frame(was_exception);
    }

    /// The current frame, if a crossing is in progress.
    pub fn current(&self) -> Option<&Invocation> {
        self.stack.current()
    }

    /// Circuit breaker; see [`InvocationStack::check_host_access`].
    pub fn check_host_access(&self) -> BridgeResult<()> {
        self.stack.check_host_access()
    }

    /// Create a dual-state record on behalf of the current crossing, under
    /// the host's currently active scope.
    ///
    /// Refused when the current frame is poisoned; notes on the frame that
    /// the crossing requested a dual-state record.
    pub fn create_record(
        &mut self,
        proxy: ProxyHandle,
        releaser: impl FnOnce() + Send + 'static,
    ) -> BridgeResult<Arc<DualRecord>> {
        self.stack.check_host_access()?;
        if let Some(frame) = self.stack.current_mut() {
            frame.set_dual_requested();
        }
        let scope = self.bridge.current_scope();
        Ok(self.bridge.registry.create(proxy, releaser, scope))
    }

    /// One complete host→guest crossing: pass the call fence, push a frame,
    /// run the guest body (releasing the fence for its duration under the
    /// cooperative policy), and pop the frame whether the body returned or
    /// failed.
    pub fn invoke_guest<R>(
        &mut self,
        scope: ScopeId,
        function: FunctionRef,
        trigger: Option<TriggerContext>,
        guest_body: impl FnOnce() -> Result<R, GuestException>,
    ) -> BridgeResult<R> {
        let _fence = self.bridge.fence().enter()?;
        self.stack.push_frame(scope, function, trigger);
        match self.bridge.fence().call_into_guest(guest_body) {
            Ok(value) => {
                self.stack.pop_frame(false);
                Ok(value)
            }
            Err(exception) => {
                self.stack.pop_frame(true);
                Err(exception.into())
            }
        }
    }

    /// Translate a fatal host condition into a guest-visible exception and
    /// poison the current frame; see [`crate::error::translate_fatal`].
    pub fn translate_fatal(&mut self, fatal: HostFatal) -> GuestException {
        crate::error::translate_fatal(&mut self.stack, fatal)
    }

    /// Resolve a rolled-back scope, clearing poison for frames at or above
    /// it; see [`crate::error::resolve_pending`].
    pub fn resolve_pending(&mut self, scope: ScopeId) {
        crate::error::resolve_pending(&mut self.stack, scope);
    }
}
