//! The per-controller invocation stack.
//!
//! One stack exists per controller context (connection, worker); it is
//! explicit owned state, never a process-wide global. Exactly one frame is
//! current at a time. Push and pop bracket every host↔guest crossing, and
//! pop behaves identically whether reached by ordinary return or by
//! unwinding after a fatal host error.

use crate::error::{BridgeError, BridgeResult, GuestException};
use crate::guest::GuestContext;
use crate::invocation::frame::{AmbientCallState, FunctionRef, Invocation, TriggerContext};
use crate::scope::ScopeId;
use std::sync::Arc;

/// Teardown hooks for the transactional data-access session a crossing may
/// engage, supplied by the relational-access layer.
pub trait SessionHooks: Send + Sync {
    /// Close the data-access session engaged by the crossing being popped.
    fn disconnect(&self);
}

/// [`SessionHooks`] that do nothing. For embeddings without a data-access
/// layer, and for tests.
#[derive(Debug, Default)]
pub struct NoopSessionHooks;

impl SessionHooks for NoopSessionHooks {
    fn disconnect(&self) {}
}

/// Per-controller stack of call frames, one per nested host↔guest crossing.
pub struct InvocationStack {
    top: Option<Box<Invocation>>,
    depth: u32,
    ambient: AmbientCallState,
    guest_context: GuestContext,
    pending: Option<Box<GuestException>>,
    hooks: Arc<dyn SessionHooks>,
}

impl std::fmt::Debug for InvocationStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationStack")
            .field("depth", &self.depth)
            .field("ambient", &self.ambient)
            .field("pending", &self.pending.is_some())
            .finish()
    }
}

impl InvocationStack {
    /// Create an empty stack with the given session-teardown hooks.
    pub fn new(hooks: Arc<dyn SessionHooks>) -> Self {
        InvocationStack {
            top: None,
            depth: 0,
            ambient: AmbientCallState::default(),
            guest_context: GuestContext::default(),
            pending: None,
            hooks,
        }
    }

    /// Number of frames currently pushed.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Whether no crossing is in progress.
    pub fn is_empty(&self) -> bool {
        self.top.is_none()
    }

    /// The current frame, if a crossing is in progress.
    pub fn current(&self) -> Option<&Invocation> {
        self.top.as_deref()
    }

    /// Mutable access to the current frame.
    pub fn current_mut(&mut self) -> Option<&mut Invocation> {
        self.top.as_deref_mut()
    }

    /// The controller's ambient call-state outside any specific frame.
    pub fn ambient(&self) -> AmbientCallState {
        self.ambient
    }

    /// The guest-runtime context token currently installed.
    pub fn guest_context(&self) -> GuestContext {
        self.guest_context
    }

    /// Install a guest-runtime context token for the current crossing.
    /// The previous token is restored when the frame pops.
    pub fn set_guest_context(&mut self, ctx: GuestContext) {
        self.guest_context = ctx;
    }

    /// Push a frame for a new host↔guest crossing and make it current.
    ///
    /// Saves the ambient call-state and the installed guest context into the
    /// frame; both are restored on pop. A frame pushed while the current
    /// frame is poisoned inherits the poison, so nested host access stays
    /// refused until the scope is resolved.
    pub fn push_frame(
        &mut self,
        scope_context: ScopeId,
        active_function: FunctionRef,
        trigger_context: Option<TriggerContext>,
    ) {
        self.depth += 1;
        let inherited_poison = self.top.as_ref().is_some_and(|f| f.error_occurred);
        let frame = Box::new(Invocation {
            nest_level: self.depth,
            dual_requested: false,
            error_occurred: inherited_poison,
            connected_data_access: false,
            in_callback_context: false,
            non_atomic_allowed: self.ambient.non_atomic_allowed,
            scope_context,
            saved_guest_context: self.guest_context,
            active_function,
            trigger_context,
            saved_state: self.ambient,
            previous: self.top.take(),
        });
        self.ambient.scope = scope_context;
        self.top = Some(frame);
        tracing::trace!(depth = self.depth, "pushed invocation frame");
    }

    /// Pop the current frame, restoring the saved call-state and making the
    /// predecessor current.
    ///
    /// Behaves identically for ordinary returns and for unwinds
    /// (`was_exception`); cleanup is never fallible. An unclosed data-access
    /// session is closed here, unless the frame runs in a callback context,
    /// in which case the open session propagates to the enclosing frame and
    /// is closed when that frame pops.
    ///
    /// # Panics
    ///
    /// Panics if the stack is empty; an unmatched pop is a programming
    /// error, never a recoverable condition.
    pub fn pop_frame(&mut self, was_exception: bool) {
        let mut frame = self
            .top
            .take()
            .expect("invocation stack underflow: pop_frame without matching push_frame");
        self.depth -= 1;
        self.ambient = frame.saved_state;
        self.guest_context = frame.saved_guest_context;
        self.top = frame.previous.take();

        if frame.connected_data_access {
            if frame.in_callback_context {
                match self.top.as_deref_mut() {
                    // Defer teardown to the enclosing frame the callback
                    // interrupted.
                    Some(outer) => outer.connected_data_access = true,
                    None => self.hooks.disconnect(),
                }
            } else {
                self.hooks.disconnect();
            }
        }

        tracing::trace!(
            depth = self.depth,
            was_exception,
            "popped invocation frame"
        );
    }

    /// Circuit breaker checked before any host operation: refuse immediately
    /// if the current frame carries an unresolved translated fatal.
    pub fn check_host_access(&self) -> BridgeResult<()> {
        match self.top.as_deref() {
            Some(frame) if frame.error_occurred => Err(BridgeError::UnhandledHostPoison {
                function: frame.active_function.name().to_string(),
                nest_level: frame.nest_level,
            }),
            _ => Ok(()),
        }
    }

    /// Poison the current frame. No-op when no crossing is in progress.
    pub(crate) fn mark_error(&mut self) {
        if let Some(frame) = self.top.as_deref_mut() {
            frame.error_occurred = true;
        }
    }

    /// Clear poison for frames at or above the given rolled-back scope:
    /// from the top of the stack down to and including the deepest frame
    /// running under `scope`. When no frame names the scope, the rollback
    /// encloses every pushed frame and all of them are cleared.
    pub(crate) fn clear_error_through_scope(&mut self, scope: ScopeId) {
        let mut boundary = None;
        let mut cur = self.top.as_deref();
        while let Some(frame) = cur {
            if frame.scope_context == scope {
                boundary = Some(frame.nest_level);
            }
            cur = frame.previous.as_deref();
        }

        let boundary = boundary.unwrap_or(1);
        let mut cur = self.top.as_deref_mut();
        while let Some(frame) = cur {
            if frame.nest_level < boundary {
                break;
            }
            frame.error_occurred = false;
            cur = frame.previous.as_deref_mut();
        }
        self.pending = None;
    }

    /// Take the unresolved prior exception, if one is pending.
    pub(crate) fn take_pending(&mut self) -> Option<Box<GuestException>> {
        self.pending.take()
    }

    /// Record the most recent translated exception as pending.
    pub(crate) fn set_pending(&mut self, exception: GuestException) {
        self.pending = Some(Box::new(exception));
    }
}

impl Drop for InvocationStack {
    fn drop(&mut self) {
        // Unlink iteratively so deep stacks cannot overflow on drop.
        let mut cur = self.top.take();
        while let Some(mut frame) = cur {
            cur = frame.previous.take();
        }
    }
}
