//! Service event loop.
//!
//! ```text
//! loop {
//!     1. Drain the event queue:
//!          Call(method, ctx)           → Daemon
//!          AuthorizationFinished(d)    → Daemon → AuthQueue
//!          Shutdown                    → Daemon::exit
//!     2. If exiting → return
//!     3. Wait on the eventfd (bounded by idle_wait)
//! }
//! ```
//!
//! Producers on other threads post through a `LoopHandle`; the `Daemon`
//! itself never leaves the loop thread.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_queue::SegQueue;
use rtkit_core::authority::{Authority, Decision, DecisionSink};
use rtkit_core::identity::{Pid, Tid};
use rtkit_core::transport::{CallContext, ReplyValue};
use rtkit_module::EventFdWaker;

use crate::config::DaemonConfig;
use crate::daemon::Daemon;

/// Every member of the remote surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    MaxRealtimePriority,
    MinNiceLevel,
    RTTimeUSecMax,
    Exit,
    MakeThreadHighPriority { thread: Tid, priority: i32 },
    MakeThreadHighPriorityWithPid { process: Pid, thread: Tid, priority: i32 },
    MakeThreadRealtime { thread: Tid, priority: u32 },
    MakeThreadRealtimeWithPid { process: Pid, thread: Tid, priority: u32 },
    ResetAll,
    ResetKnown,
}

impl Method {
    /// Member name on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Method::MaxRealtimePriority => "MaxRealtimePriority",
            Method::MinNiceLevel => "MinNiceLevel",
            Method::RTTimeUSecMax => "RTTimeUSecMax",
            Method::Exit => "Exit",
            Method::MakeThreadHighPriority { .. } => "MakeThreadHighPriority",
            Method::MakeThreadHighPriorityWithPid { .. } => "MakeThreadHighPriorityWithPID",
            Method::MakeThreadRealtime { .. } => "MakeThreadRealtime",
            Method::MakeThreadRealtimeWithPid { .. } => "MakeThreadRealtimeWithPID",
            Method::ResetAll => "ResetAll",
            Method::ResetKnown => "ResetKnown",
        }
    }

    pub fn is_property(&self) -> bool {
        matches!(
            self,
            Method::MaxRealtimePriority | Method::MinNiceLevel | Method::RTTimeUSecMax
        )
    }
}

pub enum Event {
    Call(Method, CallContext),
    AuthorizationFinished(Decision),
    Shutdown,
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Call(m, _) => write!(f, "Call({})", m.name()),
            Event::AuthorizationFinished(d) => write!(f, "AuthorizationFinished({:?})", d),
            Event::Shutdown => f.write_str("Shutdown"),
        }
    }
}

struct Shared {
    events: SegQueue<Event>,
    waker: EventFdWaker,
}

/// Posts events to the loop from any thread.
#[derive(Clone)]
pub struct LoopHandle {
    shared: Arc<Shared>,
}

impl LoopHandle {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            shared: Arc::new(Shared {
                events: SegQueue::new(),
                waker: EventFdWaker::create()?,
            }),
        })
    }

    pub fn post(&self, event: Event) {
        self.shared.events.push(event);
        if let Err(e) = self.shared.waker.wake() {
            tracing::error!(error = %e, "failed to wake event loop");
        }
    }

    pub fn call(&self, method: Method, ctx: CallContext) {
        self.post(Event::Call(method, ctx));
    }

    pub fn shutdown(&self) {
        self.post(Event::Shutdown);
    }

    /// Events posted but not yet handled
    pub fn pending(&self) -> usize {
        self.shared.events.len()
    }
}

impl DecisionSink for LoopHandle {
    fn deliver(&self, decision: Decision) {
        self.post(Event::AuthorizationFinished(decision));
    }
}

impl std::fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopHandle").field("pending", &self.pending()).finish()
    }
}

pub struct EventLoop<A> {
    daemon: Daemon<A>,
    handle: LoopHandle,
    idle_wait: Duration,
}

impl<A: Authority> EventLoop<A> {
    pub fn new(daemon: Daemon<A>, handle: LoopHandle, config: &DaemonConfig) -> Self {
        Self {
            daemon,
            handle,
            idle_wait: config.idle_wait,
        }
    }

    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    pub fn daemon(&self) -> &Daemon<A> {
        &self.daemon
    }

    pub fn daemon_mut(&mut self) -> &mut Daemon<A> {
        &mut self.daemon
    }

    /// Run until `Exit` or `Shutdown`.
    pub fn run(&mut self) -> io::Result<()> {
        tracing::info!("event loop started");
        loop {
            self.turn();
            if self.daemon.is_exiting() {
                break;
            }
            self.handle.shared.waker.wait(self.idle_wait)?;
        }
        let dropped = self.handle.pending();
        if dropped > 0 {
            tracing::debug!(dropped, "events left unhandled at exit");
        }
        tracing::info!("event loop stopped");
        Ok(())
    }

    /// Handle queued events until the queue is empty or the service exits.
    /// Returns the number handled.
    pub fn turn(&mut self) -> usize {
        let mut handled = 0;
        while !self.daemon.is_exiting() {
            let Some(event) = self.handle.shared.events.pop() else {
                break;
            };
            self.dispatch(event);
            handled += 1;
        }
        handled
    }

    fn dispatch(&mut self, event: Event) {
        tracing::trace!(?event, "event");
        match event {
            Event::Call(method, ctx) => self.call(method, ctx),
            Event::AuthorizationFinished(decision) => self.daemon.on_authorization_finished(decision),
            Event::Shutdown => self.daemon.exit(),
        }
    }

    fn call(&mut self, method: Method, ctx: CallContext) {
        let d = &mut self.daemon;
        match method {
            Method::MaxRealtimePriority => ctx.send_reply(ReplyValue::Int(d.max_realtime_priority().into())),
            Method::MinNiceLevel => ctx.send_reply(ReplyValue::Int(d.min_nice_level().into())),
            Method::RTTimeUSecMax => ctx.send_reply(ReplyValue::Int(d.rt_time_usec_max())),
            Method::Exit => {
                d.exit();
                ctx.send_reply(ReplyValue::Unit);
            }
            Method::MakeThreadHighPriority { thread, priority } => {
                d.make_thread_high_priority(thread, priority, ctx)
            }
            Method::MakeThreadHighPriorityWithPid { process, thread, priority } => {
                d.make_thread_high_priority_with_pid(process, thread, priority, ctx)
            }
            Method::MakeThreadRealtime { thread, priority } => {
                d.make_thread_realtime(thread, priority, ctx)
            }
            Method::MakeThreadRealtimeWithPid { process, thread, priority } => {
                d.make_thread_realtime_with_pid(process, thread, priority, ctx)
            }
            Method::ResetAll => {
                d.reset_all();
                ctx.send_reply(ReplyValue::Unit);
            }
            Method::ResetKnown => {
                d.reset_known();
                ctx.send_reply(ReplyValue::Unit);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtkit_core::error::GrantError;
    use rtkit_core::process::ProcessTable;
    use rtkit_module::sim::{ReplyLog, Sched, ScriptedAuthority, SimBackend, SimPeer};

    fn setup() -> (EventLoop<ScriptedAuthority>, SimBackend, ScriptedAuthority, ReplyLog) {
        let sim = SimBackend::new();
        let auth = ScriptedAuthority::new();
        let config = DaemonConfig::new().idle_wait(Duration::from_millis(10));
        let daemon = Daemon::new(ProcessTable::new(sim.clone()), auth.clone(), &config).with_daemon_pid(1);
        let handle = LoopHandle::new().unwrap();
        (EventLoop::new(daemon, handle, &config), sim, auth, ReplyLog::new())
    }

    #[test]
    fn test_properties() {
        let (mut el, _sim, _auth, log) = setup();
        let h = el.handle();
        let peer = || SimPeer::new(100, 1000);
        h.call(Method::MaxRealtimePriority, log.call(peer()));
        h.call(Method::MinNiceLevel, log.call(peer()));
        h.call(Method::RTTimeUSecMax, log.call(peer()));
        assert_eq!(el.turn(), 3);
        assert_eq!(
            log.replies(),
            vec![Ok(ReplyValue::Int(99)), Ok(ReplyValue::Int(-15)), Ok(ReplyValue::Int(0))]
        );
    }

    #[test]
    fn test_grant_through_handle() {
        let (mut el, sim, auth, log) = setup();
        sim.spawn(100, 1000, &[100, 101]);
        let h = el.handle();

        h.call(
            Method::MakeThreadRealtimeWithPid { process: 100, thread: 101, priority: 7 },
            log.call(SimPeer::new(100, 1000)),
        );
        el.turn();
        assert_eq!(auth.count(), 1);
        assert!(log.is_empty());

        // The authority reports from its own thread
        let sink = h.clone();
        std::thread::spawn(move || sink.deliver(Decision::Yes)).join().unwrap();
        el.turn();
        assert_eq!(log.last(), Some(Ok(ReplyValue::Unit)));
        assert_eq!(sim.sched(100, 101), Some(Sched::Realtime(7)));
    }

    #[test]
    fn test_reset_methods() {
        let (mut el, sim, _auth, log) = setup();
        sim.spawn(300, 1000, &[300]);
        sim.set_sched(300, 300, Sched::Idle(0));
        let h = el.handle();
        h.call(Method::ResetKnown, log.call(SimPeer::new(5, 1000)));
        h.call(Method::ResetAll, log.call(SimPeer::new(5, 1000)));
        el.turn();
        assert_eq!(log.replies(), vec![Ok(ReplyValue::Unit), Ok(ReplyValue::Unit)]);
        assert_eq!(sim.sched(300, 300), Some(Sched::Default));
    }

    #[test]
    fn test_exit_stops_loop() {
        let (mut el, sim, _auth, log) = setup();
        sim.spawn(2, 0, &[2]);
        let h = el.handle();

        // Root grant goes through immediately, then Exit resets it
        h.call(
            Method::MakeThreadHighPriorityWithPid { process: 2, thread: 2, priority: -5 },
            log.call(SimPeer::new(2, 0)),
        );
        h.call(Method::Exit, log.call(SimPeer::new(2, 0)));
        h.call(Method::ResetAll, log.call(SimPeer::new(2, 0)));

        el.run().unwrap();
        assert!(el.daemon().is_exiting());
        assert_eq!(sim.sched(2, 2), Some(Sched::Default));
        // ResetAll was never handled
        assert_eq!(log.len(), 2);
        assert_eq!(h.pending(), 1);
    }

    #[test]
    fn test_shutdown_from_other_thread() {
        let (mut el, _sim, _auth, log) = setup();
        let h = el.handle();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            h.shutdown();
        });
        el.run().unwrap();
        t.join().unwrap();
        assert!(el.daemon().is_exiting());
        assert!(log.is_empty());
    }

    #[test]
    fn test_errors_reach_caller() {
        let (mut el, _sim, _auth, log) = setup();
        el.handle().call(
            Method::MakeThreadHighPriorityWithPid { process: 0, thread: 1, priority: -1 },
            log.call(SimPeer::new(100, 1000)),
        );
        el.turn();
        assert!(matches!(log.last(), Some(Err(GrantError::InvalidArgs(_)))));
    }

    #[test]
    fn test_method_names() {
        assert_eq!(
            Method::MakeThreadRealtimeWithPid { process: 1, thread: 1, priority: 1 }.name(),
            "MakeThreadRealtimeWithPID"
        );
        assert!(Method::RTTimeUSecMax.is_property());
        assert!(!Method::Exit.is_property());
    }
}
