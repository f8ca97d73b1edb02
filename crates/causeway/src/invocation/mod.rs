//! Invocation stack: call-frame bookkeeping for host↔guest crossings.
//!
//! The call-dispatch layer brackets every crossing with
//! [`InvocationStack::push_frame`] / [`InvocationStack::pop_frame`], and the
//! bridge checks [`InvocationStack::check_host_access`] before attempting
//! any host operation on behalf of guest code.

mod frame;
mod stack;

pub use frame::{
    AmbientCallState, FunctionRef, Invocation, TriggerContext, TriggerEvent, TriggerTiming,
};
pub use stack::{InvocationStack, NoopSessionHooks, SessionHooks};
