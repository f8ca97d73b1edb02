//! Error taxonomy and fatal-error translation.
//!
//! Four categories exist inside the bridge; only two ever reach a caller:
//!
//! - [`HostFatal`] — a fatal host condition that would otherwise unwind
//!   non-locally. Never crosses into guest frames directly; always captured
//!   and translated by [`translate_fatal`].
//! - [`GuestException`] — the translated, guest-visible form of a
//!   `HostFatal`, or any exception raised natively in guest code.
//!   Propagates normally.
//! - [`BridgeError::UnhandledHostPoison`] — produced by the circuit breaker
//!   after a `HostFatal` has been translated but its scope is unresolved;
//!   further host operations from that frame fail immediately with this
//!   error rather than being attempted.
//! - Resource races — internal only, never surfaced, only counted
//!   (`gc_release_races`, `release_release_races`, `release_deferred`).

mod translate;

pub use translate::{resolve_pending, translate_fatal};

use crate::fence::FenceError;
use std::fmt;

/// Severity of a fatal host condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FatalSeverity {
    /// The current operation failed; the transaction scope must be resolved.
    Error,
    /// The host session is terminating.
    Fatal,
    /// The host process is in an unrecoverable state.
    Panic,
}

impl fmt::Display for FatalSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FatalSeverity::Error => "ERROR",
            FatalSeverity::Fatal => "FATAL",
            FatalSeverity::Panic => "PANIC",
        })
    }
}

/// A fatal host condition, captured before it unwinds across guest frames.
#[derive(Debug, Clone)]
pub struct HostFatal {
    /// Host severity class.
    pub severity: FatalSeverity,
    /// Host diagnostic code (five-character class code or similar).
    pub code: String,
    /// Primary diagnostic message.
    pub message: String,
    /// Optional secondary detail.
    pub detail: Option<String>,
}

impl HostFatal {
    /// Capture a fatal host condition.
    pub fn new(
        severity: FatalSeverity,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        HostFatal {
            severity,
            code: code.into(),
            message: message.into(),
            detail: None,
        }
    }

    /// Attach secondary detail.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// The guest-visible form of a failure: a translated [`HostFatal`] or an
/// exception raised natively in guest code.
///
/// Carries the original diagnostic and, for repeated failures in the same
/// unresolved scope, the prior exception as its cause chain.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{severity} {code}: {message}")]
pub struct GuestException {
    /// Severity inherited from the host condition.
    pub severity: FatalSeverity,
    /// Diagnostic code.
    pub code: String,
    /// Primary message.
    pub message: String,
    /// Optional secondary detail.
    pub detail: Option<String>,
    /// Prior unresolved exception from the same frame, if any.
    #[source]
    pub cause: Option<Box<GuestException>>,
}

impl GuestException {
    /// An exception raised natively in guest code.
    pub fn raised(code: impl Into<String>, message: impl Into<String>) -> Self {
        GuestException {
            severity: FatalSeverity::Error,
            code: code.into(),
            message: message.into(),
            detail: None,
            cause: None,
        }
    }

    /// A bridge usage error (misuse of the lifecycle protocol).
    pub(crate) fn usage(message: impl Into<String>) -> Self {
        GuestException {
            severity: FatalSeverity::Error,
            code: "XX000".to_string(),
            message: message.into(),
            detail: None,
            cause: None,
        }
    }

    /// Depth of the cause chain, the newest exception counting as one.
    pub fn chain_len(&self) -> usize {
        let mut len = 1;
        let mut cur = self.cause.as_deref();
        while let Some(e) = cur {
            len += 1;
            cur = e.cause.as_deref();
        }
        len
    }
}

/// Errors observable by callers of the bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// An exception propagating out of guest code, translated or native.
    #[error(transparent)]
    Guest(#[from] GuestException),

    /// Host access refused: the current frame carries a translated fatal
    /// whose scope has not been resolved.
    #[error("host operation refused: unresolved failure in frame {nest_level} (`{function}`)")]
    UnhandledHostPoison {
        /// Active guest function of the poisoned frame.
        function: String,
        /// Nesting level of the poisoned frame.
        nest_level: u32,
    },

    /// Call fence refusal.
    #[error(transparent)]
    Fence(#[from] FenceError),
}

impl BridgeError {
    /// Whether this is the poison circuit-breaker error.
    pub fn is_poison(&self) -> bool {
        matches!(self, BridgeError::UnhandledHostPoison { .. })
    }
}

/// Bridge operation result.
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_display() {
        assert_eq!(FatalSeverity::Error.to_string(), "ERROR");
        assert_eq!(FatalSeverity::Fatal.to_string(), "FATAL");
        assert_eq!(FatalSeverity::Panic.to_string(), "PANIC");
    }

    #[test]
    fn test_host_fatal_builder() {
        let fatal = HostFatal::new(FatalSeverity::Error, "57014", "canceling statement")
            .with_detail("due to user request");
        assert_eq!(fatal.code, "57014");
        assert_eq!(fatal.detail.as_deref(), Some("due to user request"));
    }

    #[test]
    fn test_guest_exception_display_carries_diagnostic() {
        let exc = GuestException::raised("22012", "division by zero");
        assert_eq!(exc.to_string(), "ERROR 22012: division by zero");
    }

    #[test]
    fn test_chain_len() {
        let inner = GuestException::raised("42P01", "relation does not exist");
        let mut outer = GuestException::raised("25P02", "transaction aborted");
        outer.cause = Some(Box::new(inner));
        assert_eq!(outer.chain_len(), 2);
    }

    #[test]
    fn test_bridge_error_classification() {
        let poison = BridgeError::UnhandledHostPoison {
            function: "fn".to_string(),
            nest_level: 1,
        };
        assert!(poison.is_poison());
        let guest: BridgeError = GuestException::raised("P0001", "raise").into();
        assert!(!guest.is_poison());
    }
}
