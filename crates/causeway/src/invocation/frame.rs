//! Invocation frames: one per nested host↔guest crossing.

use crate::guest::GuestContext;
use crate::scope::ScopeId;
use std::fmt;
use std::sync::Arc;

/// Reference to the guest function a crossing is executing.
///
/// Cheap to clone; frames and error diagnostics share the underlying name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionRef(Arc<str>);

impl FunctionRef {
    /// Reference a guest function by qualified name.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        FunctionRef(name.into())
    }

    /// The qualified function name.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of data-change event that fired a trigger crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEvent {
    /// Row insertion.
    Insert,
    /// Row update.
    Update,
    /// Row deletion.
    Delete,
    /// Relation truncation.
    Truncate,
}

/// When the trigger fired relative to the data change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerTiming {
    /// Before the change was applied.
    Before,
    /// After the change was applied.
    After,
}

/// Context for a crossing initiated by a data-change trigger rather than a
/// direct call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerContext {
    /// Name of the relation the event occurred on.
    pub relation: String,
    /// The firing event.
    pub event: TriggerEvent,
    /// Firing time relative to the change.
    pub timing: TriggerTiming,
}

/// Ambient controller call-state, saved on push and restored on pop.
///
/// Fixed-size copy; per-frame preservation is unconditional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmbientCallState {
    /// Scope the controller considers active.
    pub scope: ScopeId,
    /// Whether non-atomic (transaction-controlling) execution is permitted.
    pub non_atomic_allowed: bool,
}

impl Default for AmbientCallState {
    fn default() -> Self {
        AmbientCallState {
            scope: ScopeId::new(0),
            non_atomic_allowed: false,
        }
    }
}

/// A call frame for one host↔guest crossing.
///
/// Frames are exclusively owned by the stack: allocated on push, dropped on
/// pop. The `previous` link forms the stack itself; it exactly matches push
/// order.
#[derive(Debug)]
pub struct Invocation {
    pub(crate) nest_level: u32,
    pub(crate) dual_requested: bool,
    pub(crate) error_occurred: bool,
    pub(crate) connected_data_access: bool,
    pub(crate) in_callback_context: bool,
    pub(crate) non_atomic_allowed: bool,
    pub(crate) scope_context: ScopeId,
    pub(crate) saved_guest_context: GuestContext,
    pub(crate) active_function: FunctionRef,
    pub(crate) trigger_context: Option<TriggerContext>,
    pub(crate) saved_state: AmbientCallState,
    pub(crate) previous: Option<Box<Invocation>>,
}

impl Invocation {
    /// Nesting level, 1 for the outermost crossing.
    pub fn nest_level(&self) -> u32 {
        self.nest_level
    }

    /// Whether this crossing has created a dual-state record.
    pub fn dual_requested(&self) -> bool {
        self.dual_requested
    }

    /// Note that this crossing created a dual-state record.
    pub fn set_dual_requested(&mut self) {
        self.dual_requested = true;
    }

    /// Whether a fatal host error was translated in (or inherited by) this
    /// frame and its scope is still unresolved.
    pub fn error_occurred(&self) -> bool {
        self.error_occurred
    }

    /// Whether this crossing engaged a transactional data-access session
    /// that is still open.
    pub fn connected_data_access(&self) -> bool {
        self.connected_data_access
    }

    /// Note that this crossing engaged a transactional data-access session.
    pub fn set_connected_data_access(&mut self) {
        self.connected_data_access = true;
    }

    /// Whether this crossing runs inside a host callback, where session
    /// teardown must be deferred to the caller.
    pub fn in_callback_context(&self) -> bool {
        self.in_callback_context
    }

    /// Mark this crossing as running inside a host callback.
    pub fn set_in_callback_context(&mut self) {
        self.in_callback_context = true;
    }

    /// Whether non-atomic execution is permitted in this crossing.
    pub fn non_atomic_allowed(&self) -> bool {
        self.non_atomic_allowed
    }

    /// Permit or forbid non-atomic execution in this crossing.
    pub fn set_non_atomic_allowed(&mut self, allowed: bool) {
        self.non_atomic_allowed = allowed;
    }

    /// The memory scope this crossing runs under.
    pub fn scope_context(&self) -> ScopeId {
        self.scope_context
    }

    /// The guest function this crossing is executing.
    pub fn active_function(&self) -> &FunctionRef {
        &self.active_function
    }

    /// Trigger context, when the crossing was fired by a data-change event.
    pub fn trigger_context(&self) -> Option<&TriggerContext> {
        self.trigger_context.as_ref()
    }

    /// The guest-runtime context token saved at push.
    pub fn saved_guest_context(&self) -> GuestContext {
        self.saved_guest_context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_ref_name() {
        let f = FunctionRef::new("pkg.do_work");
        assert_eq!(f.name(), "pkg.do_work");
        assert_eq!(f.to_string(), "pkg.do_work");
        assert_eq!(f.clone(), f);
    }

    #[test]
    fn test_ambient_state_default() {
        let state = AmbientCallState::default();
        assert_eq!(state.scope, ScopeId::new(0));
        assert!(!state.non_atomic_allowed);
    }

    #[test]
    fn test_trigger_context_fields() {
        let t = TriggerContext {
            relation: "accounts".to_string(),
            event: TriggerEvent::Update,
            timing: TriggerTiming::After,
        };
        assert_eq!(t.event, TriggerEvent::Update);
        assert_eq!(t.timing, TriggerTiming::After);
    }
}
