//! Serialized authorization queue.
//!
//! At most one check is outstanding with the `Authority` at any time.
//! Requests are answered in FIFO order; when a decision arrives the next
//! request is dispatched before the finished one's continuation runs.
//!
//! Bypasses, answered synchronously without touching the queue:
//! - no caller context, or a call that did not arrive through the remote
//!   channel: `No`
//! - a caller whose uid resolves to 0: `Yes`
//!
//! Continuations receive the caller-supplied target `&mut C` so they can
//! mutate service state without capturing it.

use std::collections::VecDeque;

use rtkit_core::authority::{Authority, AuthorizationFlags, Decision, Details, Subject};
use rtkit_core::constants::ROOT_UID;
use rtkit_core::transport::{CallContext, SavedContext};

/// Result handler for one request; invoked at most once
pub type Continuation<C> = Box<dyn FnOnce(&mut C, Decision, SavedContext)>;

/// Evaluated when the decision is delivered; false drops the continuation
pub type Guard = Box<dyn Fn() -> bool>;

struct Pending<C> {
    action_id: String,
    details: Option<Details>,
    context: SavedContext,
    guard: Option<Guard>,
    continuation: Continuation<C>,
}

impl<C> Pending<C> {
    fn finish(self, target: &mut C, decision: Decision) {
        if let Some(guard) = &self.guard {
            if !guard() {
                tracing::debug!(action = %self.action_id, ?decision, "dropping stale authorization result");
                return;
            }
        }
        (self.continuation)(target, decision, self.context);
    }
}

pub struct AuthQueue<C, A> {
    authority: A,
    pending: VecDeque<Pending<C>>,
    dispatched: u64,
}

impl<C, A: Authority> AuthQueue<C, A> {
    pub fn new(authority: A) -> Self {
        Self {
            authority,
            pending: VecDeque::new(),
            dispatched: 0,
        }
    }

    pub fn authority(&self) -> &A {
        &self.authority
    }

    /// Requests waiting, including the one being checked
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Whether a check is outstanding with the authority
    pub fn in_flight(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Checks issued to the authority so far
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    /// Queue an authorization request for `action_id`.
    pub fn enqueue(
        &mut self,
        action_id: &str,
        details: Option<Details>,
        context: Option<CallContext>,
        guard: Option<Guard>,
        continuation: Continuation<C>,
        target: &mut C,
    ) {
        let item = |context| Pending {
            action_id: action_id.to_string(),
            details,
            context,
            guard,
            continuation,
        };

        let call = match context {
            Some(call) if call.peer().is_remote() => call,
            Some(call) => {
                tracing::debug!(action = action_id, "refusing non-remote call");
                item(call.into_saved()).finish(target, Decision::No);
                return;
            }
            None => {
                tracing::debug!(action = action_id, "refusing call without context");
                item(SavedContext::detached()).finish(target, Decision::No);
                return;
            }
        };

        if call.peer().uid() == Ok(ROOT_UID) {
            tracing::debug!(action = action_id, sender = call.peer().sender(), "superuser bypass");
            let bypass = item(call.into_saved());
            (bypass.continuation)(target, Decision::Yes, bypass.context);
            return;
        }

        self.pending.push_back(item(call.into_saved()));
        if self.pending.len() == 1 {
            self.dispatch_head();
        }
    }

    /// Deliver the authority's decision for the oldest outstanding check.
    pub fn on_check_finished(&mut self, decision: Decision, target: &mut C) {
        let Some(done) = self.pending.pop_front() else {
            tracing::warn!(?decision, "authorization result with no pending request");
            return;
        };
        if !self.pending.is_empty() {
            self.dispatch_head();
        }
        done.finish(target, decision);
    }

    /// Answer every waiting request with `No`, oldest first, without
    /// dispatching. A decision for the check already issued arrives later
    /// with nothing to deliver to, so this is for shutdown only.
    pub fn cancel_all(&mut self, target: &mut C) -> usize {
        let mut cancelled = 0;
        while let Some(item) = self.pending.pop_front() {
            item.finish(target, Decision::No);
            cancelled += 1;
        }
        cancelled
    }

    fn dispatch_head(&mut self) {
        let Some(head) = self.pending.front() else {
            return;
        };
        let Some(peer) = head.context.peer() else {
            return;
        };

        let mut subject = Subject::new(peer.sender());
        subject.pid = peer.pid().ok();
        subject.uid = peer.uid().ok();

        let mut flags = AuthorizationFlags::empty();
        if peer.allows_interactive_authorization() {
            flags |= AuthorizationFlags::ALLOW_USER_INTERACTION;
        }

        tracing::debug!(
            action = %head.action_id,
            sender = %subject.sender,
            queued = self.pending.len(),
            "dispatching authorization check"
        );
        self.dispatched += 1;
        self.authority
            .check_authorization(&head.action_id, &subject, flags, head.details.as_ref());
    }
}

impl<C, A> std::fmt::Debug for AuthQueue<C, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthQueue")
            .field("pending", &self.pending.len())
            .field("dispatched", &self.dispatched)
            .finish()
    }
}
