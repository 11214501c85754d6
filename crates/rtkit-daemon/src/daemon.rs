//! The privilege grant service.
//!
//! `Daemon` owns every piece of mutable service state and is driven from
//! a single thread (see `event_loop`). Request flow:
//!
//! ```text
//! target pid 0?            -> InvalidArgs
//! caller uid               -> transport error forwarded as-is
//! burst limiter            -> AccessDenied
//! collect known processes
//! snapshot target identity
//! AuthQueue::enqueue ......(async)...... decision
//!                                           not Yes -> AccessDenied
//!                                           Yes     -> set_priority_authorized
//! ```

use std::sync::Arc;

use rtkit_core::authority::{Authority, Decision};
use rtkit_core::constants::ROOT_UID;
use rtkit_core::error::{GrantError, GrantResult};
use rtkit_core::identity::{Pid, Tid, Uid};
use rtkit_core::priority::{Priority, PriorityClass, PriorityLimits, RT_TIME_USEC_MAX};
use rtkit_core::process::{Process, ProcessTable};
use rtkit_core::transport::{CallContext, ReplyValue, SavedContext};

use crate::auth_queue::AuthQueue;
use crate::burst::BurstLimiter;
use crate::config::DaemonConfig;
use crate::registry::KnownProcessRegistry;

const MSG_PROCESS_NOT_FOUND: &str = "The requested process was not found";
const MSG_NOT_OWNER: &str = "The requested process does not belong to you";
const MSG_THREAD_NOT_IN_PROCESS: &str = "The specified thread does not belong to this process";
const MSG_SET_FAILED: &str = "Failed to set priority";
const MSG_BURST: &str = "You are calling too often";
const MSG_UNKNOWN_CLASS: &str = "Unknown priority type";

/// State the authorization continuations operate on.
pub struct GrantCore {
    table: Arc<ProcessTable>,
    registry: KnownProcessRegistry,
    daemon_pid: Pid,
    limits: PriorityLimits,
}

impl GrantCore {
    pub fn registry(&self) -> &KnownProcessRegistry {
        &self.registry
    }

    pub fn limits(&self) -> PriorityLimits {
        self.limits
    }

    /// Apply an authorized request to `process`.
    ///
    /// Ownership is checked here as well: authorization covers the action,
    /// not the particular target.
    pub fn set_priority_authorized(
        &mut self,
        process: &Process,
        thread: Tid,
        priority: Priority,
        caller_uid: Uid,
    ) -> GrantResult<()> {
        self.check_target(process, thread, caller_uid)?;
        self.limits.check(priority)?;
        self.apply(process, thread, priority)
    }

    /// As `set_priority_authorized`, with the class given as its wire code.
    pub fn set_priority_authorized_raw(
        &mut self,
        process: &Process,
        thread: Tid,
        class: u8,
        value: i64,
        caller_uid: Uid,
    ) -> GrantResult<()> {
        self.check_target(process, thread, caller_uid)?;
        let priority = Priority::from_class(PriorityClass::try_from(class)?, value)?;
        self.limits.check(priority)?;
        self.apply(process, thread, priority)
    }

    fn check_target(&self, process: &Process, thread: Tid, caller_uid: Uid) -> GrantResult<()> {
        if !process.is_valid() {
            return Err(GrantError::invalid_args(MSG_PROCESS_NOT_FOUND));
        }
        if process.uid() != Some(caller_uid) {
            tracing::info!(process = %process, caller_uid, "target owned by another user");
            return Err(GrantError::access_denied(MSG_NOT_OWNER));
        }
        if !process.contains_thread(thread) {
            return Err(GrantError::invalid_args(MSG_THREAD_NOT_IN_PROCESS));
        }
        Ok(())
    }

    fn apply(&mut self, process: &Process, thread: Tid, priority: Priority) -> GrantResult<()> {
        if !process.set_priority(thread, priority) {
            return Err(GrantError::failed(MSG_SET_FAILED));
        }

        // The process may have exited (and its pid been reused) while we
        // were changing it.
        if !process.is_valid() {
            tracing::warn!(process = %process, thread, "process vanished during grant, rolling back");
            process.reset_all_priorities(Some(thread));
            return Err(GrantError::invalid_args(MSG_PROCESS_NOT_FOUND));
        }

        tracing::info!(process = %process, thread, ?priority, "granted");
        self.registry.push(process.clone());
        Ok(())
    }

    fn reset_all(&mut self) -> usize {
        let daemon_pid = self.daemon_pid;
        let mut reset = 0;
        let res = self.table.for_each(|p| {
            if p.pid() == daemon_pid || p.uid() == Some(ROOT_UID) {
                return;
            }
            if p.has_non_standard_scheduling_policy() {
                tracing::info!(process = %p, "resetting");
                if p.reset_all_priorities(None) {
                    reset += 1;
                }
            }
        });
        if let Err(e) = res {
            tracing::error!(error = %e, "process enumeration failed");
        }
        self.registry.garbage_collect();
        reset
    }
}

pub struct Daemon<A> {
    queue: AuthQueue<GrantCore, A>,
    core: GrantCore,
    burst: BurstLimiter,
    reset_known_on_exit: bool,
    exiting: bool,
}

impl<A: Authority> Daemon<A> {
    pub fn new(table: Arc<ProcessTable>, authority: A, config: &DaemonConfig) -> Self {
        let limits = config.limits(table.max_realtime_priority());
        Self {
            queue: AuthQueue::new(authority),
            core: GrantCore {
                table,
                registry: KnownProcessRegistry::new(),
                daemon_pid: std::process::id() as Pid,
                limits,
            },
            burst: BurstLimiter::new(),
            reset_known_on_exit: config.reset_known_on_exit,
            exiting: false,
        }
    }

    /// Replace the burst limiter (e.g. one with an injected clock).
    pub fn with_burst_limiter(mut self, burst: BurstLimiter) -> Self {
        self.burst = burst;
        self
    }

    /// Treat `pid` as the service's own process in sweeps.
    pub fn with_daemon_pid(mut self, pid: Pid) -> Self {
        self.core.daemon_pid = pid;
        self
    }

    pub fn core(&self) -> &GrantCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut GrantCore {
        &mut self.core
    }

    pub fn queue(&self) -> &AuthQueue<GrantCore, A> {
        &self.queue
    }

    pub fn table(&self) -> &Arc<ProcessTable> {
        &self.core.table
    }

    pub fn is_exiting(&self) -> bool {
        self.exiting
    }

    // ── Properties ──

    pub fn max_realtime_priority(&self) -> i32 {
        self.core.limits.max_realtime_priority
    }

    pub fn min_nice_level(&self) -> i32 {
        self.core.limits.min_nice_level
    }

    pub fn rt_time_usec_max(&self) -> i64 {
        RT_TIME_USEC_MAX
    }

    // ── Methods ──

    /// Elevate `thread` of the calling process to nice level `priority`.
    pub fn make_thread_high_priority(&mut self, thread: Tid, priority: i32, ctx: CallContext) {
        match ctx.peer().pid() {
            Ok(pid) => self.make_thread_high_priority_with_pid(pid, thread, priority, ctx),
            Err(e) => ctx.send_error(e),
        }
    }

    pub fn make_thread_high_priority_with_pid(
        &mut self,
        process: Pid,
        thread: Tid,
        priority: i32,
        ctx: CallContext,
    ) {
        self.request(process, thread, Priority::High(priority), ctx);
    }

    /// Elevate `thread` of the calling process to realtime `priority`.
    pub fn make_thread_realtime(&mut self, thread: Tid, priority: u32, ctx: CallContext) {
        match ctx.peer().pid() {
            Ok(pid) => self.make_thread_realtime_with_pid(pid, thread, priority, ctx),
            Err(e) => ctx.send_error(e),
        }
    }

    pub fn make_thread_realtime_with_pid(
        &mut self,
        process: Pid,
        thread: Tid,
        priority: u32,
        ctx: CallContext,
    ) {
        self.request(process, thread, Priority::Realtime(priority), ctx);
    }

    /// Reset every non-root process with elevated scheduling, except our own.
    /// Returns the number of processes reset.
    pub fn reset_all(&mut self) -> usize {
        let n = self.core.reset_all();
        tracing::info!(reset = n, "reset all processes");
        n
    }

    /// Reset the processes this service elevated.
    pub fn reset_known(&mut self) -> usize {
        let n = self.core.registry.reset_known();
        tracing::info!(reset = n, "reset known processes");
        n
    }

    /// Begin shutdown. Requests still waiting for authorization are
    /// answered as denied.
    pub fn exit(&mut self) {
        if self.exiting {
            return;
        }
        let cancelled = self.queue.cancel_all(&mut self.core);
        if cancelled > 0 {
            tracing::info!(cancelled, "denied pending requests on exit");
        }
        if self.reset_known_on_exit {
            self.reset_known();
        }
        self.exiting = true;
        tracing::info!("exiting");
    }

    /// Feed the authority's decision for the oldest outstanding check.
    pub fn on_authorization_finished(&mut self, decision: Decision) {
        self.queue.on_check_finished(decision, &mut self.core);
    }

    fn request(&mut self, process: Pid, thread: Tid, priority: Priority, ctx: CallContext) {
        if process == 0 {
            ctx.send_error(GrantError::invalid_args(MSG_PROCESS_NOT_FOUND));
            return;
        }

        // Only classes with an authorization action can be requested remotely
        let Some(action_id) = priority.class().action_id() else {
            ctx.send_error(GrantError::failed(MSG_UNKNOWN_CLASS));
            return;
        };

        let caller_uid = match ctx.peer().uid() {
            Ok(uid) => uid,
            Err(e) => {
                ctx.send_error(e);
                return;
            }
        };

        if !self.burst.allow(caller_uid) {
            tracing::warn!(caller_uid, "caller is bursting");
            ctx.send_error(GrantError::access_denied(MSG_BURST));
            return;
        }

        self.core.registry.garbage_collect();

        let target = Process::resolve(&self.core.table, process);
        let denied = match priority.class() {
            PriorityClass::Realtime => "You are not allowed to set realtime priority",
            _ => "You are not allowed to set high priority",
        };

        tracing::debug!(process = %target, thread, ?priority, caller_uid, "grant requested");

        self.queue.enqueue(
            action_id,
            None,
            Some(ctx),
            None,
            Box::new(move |core: &mut GrantCore, decision: Decision, saved: SavedContext| {
                if !decision.is_yes() {
                    tracing::info!(process = %target, caller_uid, ?decision, "not authorized");
                    saved.send_error(GrantError::access_denied(denied));
                    return;
                }
                match core.set_priority_authorized(&target, thread, priority, caller_uid) {
                    Ok(()) => saved.send_reply(ReplyValue::Unit),
                    Err(e) => saved.send_error(e),
                }
            }),
            &mut self.core,
        );
    }
}

impl<A> std::fmt::Debug for Daemon<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("queue", &self.queue)
            .field("known", &self.core.registry.len())
            .field("limits", &self.core.limits)
            .field("exiting", &self.exiting)
            .finish()
    }
}
