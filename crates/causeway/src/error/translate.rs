//! Translation of fatal host conditions into guest-visible exceptions.

use crate::error::{GuestException, HostFatal};
use crate::invocation::InvocationStack;
use crate::scope::ScopeId;

/// Package a fatal host condition into a guest-visible exception and poison
/// the current frame.
///
/// If a prior fatal from the same controller context is still unresolved, it
/// becomes the new exception's cause, so repeated failures in an unresolved
/// scope keep their full diagnostic chain. The returned exception is what
/// the call-dispatch layer throws into guest code; from this point on, host
/// operations from the poisoned frame fail with `UnhandledHostPoison` until
/// the scope is resolved.
pub fn translate_fatal(stack: &mut InvocationStack, fatal: HostFatal) -> GuestException {
    let cause = stack.take_pending();
    let exception = GuestException {
        severity: fatal.severity,
        code: fatal.code,
        message: fatal.message,
        detail: fatal.detail,
        cause,
    };
    stack.set_pending(exception.clone());
    stack.mark_error();

    tracing::warn!(
        severity = %exception.severity,
        code = %exception.code,
        depth = stack.depth(),
        "translated fatal host error into guest exception"
    );
    exception
}

/// Resolve a rolled-back scope: clear poison for frames at or above it,
/// allowing host operations from those frames to resume.
pub fn resolve_pending(stack: &mut InvocationStack, scope: ScopeId) {
    stack.clear_error_through_scope(scope);
    tracing::debug!(%scope, "resolved pending host failure");
}
