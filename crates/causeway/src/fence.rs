//! Call fence: the single-controller-thread gate on host state.
//!
//! Every crossing from guest code into host operations passes the fence.
//! Host state (memory scopes, data-access sessions, the invocation stack) is
//! touched by exactly one thread at a time, enforced here rather than by
//! fine-grained locks on the host state itself.
//!
//! Two policies are selectable:
//!
//! - **Cooperative** — while the controller thread is itself inside guest
//!   code, the fence is released so guest-spawned threads waiting on it may
//!   proceed, then reacquired on return ([`CallFence::call_into_guest`]).
//! - **ExclusiveDiagnostic** — any thread other than the original controller
//!   is refused and reported as a usage error, for detecting accidental
//!   concurrent host access.
//!
//! A locked-calling mode ([`CallFence::call_into_guest_leaf`]) exists for
//! guest-runtime-internal leaf operations (encoding conversions and the like)
//! guaranteed never to re-enter host logic or block; these skip the
//! release/reacquire step.

use crate::stats::BridgeStats;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Threading policy for the fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FencePolicy {
    /// Release the fence while the controller runs guest code, so
    /// guest-spawned threads may enter host operations one at a time.
    #[default]
    Cooperative,
    /// Refuse every thread except the original controller. Diagnostic mode
    /// for flushing out accidental concurrent host access.
    ExclusiveDiagnostic,
}

/// Fence refusal, observable by callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FenceError {
    /// A thread other than the controller attempted host access while the
    /// fence runs in exclusive-diagnostic mode.
    #[error("concurrent host access from {thread} refused; controller thread is {controller}")]
    ConcurrentHostAccess {
        /// The refused thread, formatted for diagnostics.
        thread: String,
        /// The controller thread, formatted for diagnostics.
        controller: String,
    },
}

#[derive(Debug)]
struct FenceState {
    /// Thread currently holding the fence, if any.
    holder: Option<ThreadId>,
    /// Reentrant hold depth for `holder`.
    depth: u32,
    /// First thread ever to enter; the controller in exclusive mode.
    controller: Option<ThreadId>,
}

/// The single-controller-thread gate guarding host operations.
pub struct CallFence {
    policy: FencePolicy,
    state: Mutex<FenceState>,
    available: Condvar,
    stats: Arc<BridgeStats>,
}

impl std::fmt::Debug for CallFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallFence")
            .field("policy", &self.policy)
            .finish()
    }
}

impl CallFence {
    /// Create a fence with the given policy.
    pub fn new(policy: FencePolicy, stats: Arc<BridgeStats>) -> Self {
        CallFence {
            policy,
            state: Mutex::new(FenceState {
                holder: None,
                depth: 0,
                controller: None,
            }),
            available: Condvar::new(),
            stats,
        }
    }

    /// The active policy.
    pub fn policy(&self) -> FencePolicy {
        self.policy
    }

    /// Acquire the fence for the calling thread.
    ///
    /// Reentrant: a thread already holding the fence nests. Under the
    /// cooperative policy other threads block until the fence is free; under
    /// exclusive-diagnostic, non-controller threads are refused outright.
    pub fn enter(&self) -> Result<FenceGuard<'_>, FenceError> {
        let me = thread::current().id();
        let mut st = self.state.lock();

        let controller = *st.controller.get_or_insert(me);
        if self.policy == FencePolicy::ExclusiveDiagnostic && controller != me {
            tracing::error!(
                thread = ?me,
                controller = ?controller,
                "call fence refused non-controller thread"
            );
            return Err(FenceError::ConcurrentHostAccess {
                thread: format!("{me:?}"),
                controller: format!("{controller:?}"),
            });
        }

        if st.holder == Some(me) {
            st.depth += 1;
        } else {
            if st.holder.is_some() {
                BridgeStats::bump(&self.stats.fence_contention);
                while st.holder.is_some() {
                    self.available.wait(&mut st);
                }
            }
            st.holder = Some(me);
            st.depth = 1;
        }
        Ok(FenceGuard { fence: self })
    }

    /// Whether the calling thread currently holds the fence.
    pub fn held_by_current_thread(&self) -> bool {
        self.state.lock().holder == Some(thread::current().id())
    }

    /// Run guest code from the controller while handling the fence per
    /// policy: cooperative releases the fence for the duration of `f` and
    /// reacquires on return (or unwind); exclusive-diagnostic keeps holding,
    /// since no other thread may enter anyway.
    ///
    /// The caller must hold the fence.
    pub fn call_into_guest<R>(&self, f: impl FnOnce() -> R) -> R {
        debug_assert!(self.held_by_current_thread());
        match self.policy {
            FencePolicy::Cooperative => {
                let _reacquire = self.yield_to_guest();
                f()
            }
            FencePolicy::ExclusiveDiagnostic => f(),
        }
    }

    /// Run a guest-runtime-internal leaf operation without releasing the
    /// fence. Only valid for operations guaranteed never to re-enter host
    /// logic or block; the caller must hold the fence.
    pub fn call_into_guest_leaf<R>(&self, f: impl FnOnce() -> R) -> R {
        debug_assert!(self.held_by_current_thread());
        f()
    }

    /// Release the fully-nested hold so waiting guest threads can proceed.
    /// The returned guard reacquires the saved depth when dropped.
    fn yield_to_guest(&self) -> ReacquireOnDrop<'_> {
        let me = thread::current().id();
        let saved_depth;
        {
            let mut st = self.state.lock();
            assert_eq!(st.holder, Some(me), "fence yielded by a non-holder");
            saved_depth = st.depth;
            st.holder = None;
            st.depth = 0;
        }
        self.available.notify_one();
        ReacquireOnDrop {
            fence: self,
            depth: saved_depth,
        }
    }

    fn resume_holding(&self, depth: u32) {
        let me = thread::current().id();
        let mut st = self.state.lock();
        if st.holder.is_some() {
            BridgeStats::bump(&self.stats.fence_contention);
            while st.holder.is_some() {
                self.available.wait(&mut st);
            }
        }
        st.holder = Some(me);
        st.depth = depth;
    }

    fn exit(&self) {
        let mut st = self.state.lock();
        debug_assert_eq!(
            st.holder,
            Some(thread::current().id()),
            "fence exited by a non-holder"
        );
        st.depth -= 1;
        if st.depth == 0 {
            st.holder = None;
            drop(st);
            self.available.notify_one();
        }
    }
}

/// Holds the fence for the scope of a crossing; releases on drop.
#[must_use = "dropping the guard releases the fence"]
pub struct FenceGuard<'a> {
    fence: &'a CallFence,
}

impl Drop for FenceGuard<'_> {
    fn drop(&mut self) {
        self.fence.exit();
    }
}

/// Reacquires the fence at the saved depth when dropped, including on unwind
/// out of guest code.
struct ReacquireOnDrop<'a> {
    fence: &'a CallFence,
    depth: u32,
}

impl Drop for ReacquireOnDrop<'_> {
    fn drop(&mut self) {
        self.fence.resume_holding(self.depth);
    }
}
