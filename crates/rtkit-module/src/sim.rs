//! In-memory doubles for every rtkit-core seam.
//!
//! `SimBackend` models a process table with spawn, exit, pid reuse and
//! failure injection. `ScriptedAuthority` records checks and leaves the
//! decision to the test. `SimPeer` and `ReplyLog` stand in for a transport.
//!
//! All doubles are `Clone` and share state, so a test keeps one handle while
//! the service owns another.

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use rtkit_core::authority::{Authority, AuthorizationFlags, Details, Subject};
use rtkit_core::backend::PrivilegeBackend;
use rtkit_core::error::{BackendResult, GrantError};
use rtkit_core::identity::{Pid, ProcessStamp, Tid, Uid};
use rtkit_core::transport::{CallContext, Peer, Reply, ReplyChannel, ReplyResult};

/// Maximum realtime priority reported by `SimBackend`
pub const SIM_MAX_REALTIME_PRIORITY: i32 = 99;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// SimBackend
// ============================================================================

/// Scheduling state of one simulated thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sched {
    Default,
    High(i32),
    Realtime(u32),
    Idle(u32),
}

#[derive(Debug)]
struct SimProc {
    stamp: ProcessStamp,
    threads: BTreeMap<Tid, Sched>,
}

#[derive(Debug, Default)]
struct SimState {
    clock: u64,
    procs: BTreeMap<Pid, SimProc>,
    fail_mutations: bool,
    exit_on_mutation: Option<Pid>,
    resets: Vec<(Pid, Option<Tid>)>,
}

#[derive(Debug, Clone, Default)]
pub struct SimBackend {
    state: Arc<Mutex<SimState>>,
}

impl SimBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a process. An existing process with the same pid is replaced,
    /// which is how pid reuse is modelled. Every spawn gets a fresh start
    /// time.
    pub fn spawn(&self, pid: Pid, uid: Uid, threads: &[Tid]) -> ProcessStamp {
        let mut st = lock(&self.state);
        st.clock += 1;
        let stamp = ProcessStamp::new(uid, st.clock);
        let threads = threads.iter().map(|&t| (t, Sched::Default)).collect();
        st.procs.insert(pid, SimProc { stamp, threads });
        stamp
    }

    pub fn exit(&self, pid: Pid) {
        lock(&self.state).procs.remove(&pid);
    }

    /// Exit `pid` and start an unrelated process under the same pid.
    pub fn reuse(&self, pid: Pid, uid: Uid, threads: &[Tid]) -> ProcessStamp {
        self.exit(pid);
        self.spawn(pid, uid, threads)
    }

    pub fn sched(&self, pid: Pid, thread: Tid) -> Option<Sched> {
        lock(&self.state).procs.get(&pid)?.threads.get(&thread).copied()
    }

    /// Force a thread's scheduling state, bypassing the mutation hooks.
    pub fn set_sched(&self, pid: Pid, thread: Tid, sched: Sched) {
        if let Some(p) = lock(&self.state).procs.get_mut(&pid) {
            p.threads.insert(thread, sched);
        }
    }

    /// Make every subsequent set-priority call fail.
    pub fn fail_mutations(&self, fail: bool) {
        lock(&self.state).fail_mutations = fail;
    }

    /// Let the next set-priority call on `pid` succeed, then exit the
    /// process before the caller can re-validate.
    pub fn exit_on_next_mutation(&self, pid: Pid) {
        lock(&self.state).exit_on_mutation = Some(pid);
    }

    /// Every reset issued so far, in order
    pub fn resets(&self) -> Vec<(Pid, Option<Tid>)> {
        lock(&self.state).resets.clone()
    }

    pub fn is_alive(&self, pid: Pid) -> bool {
        lock(&self.state).procs.contains_key(&pid)
    }

    fn mutate(&self, pid: Pid, thread: Tid, sched: Sched) -> io::Result<()> {
        let mut st = lock(&self.state);
        if st.fail_mutations {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "simulated failure"));
        }
        let slot = st
            .procs
            .get_mut(&pid)
            .and_then(|p| p.threads.get_mut(&thread))
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such thread"))?;
        *slot = sched;
        if st.exit_on_mutation == Some(pid) {
            st.exit_on_mutation = None;
            st.procs.remove(&pid);
        }
        Ok(())
    }
}

impl PrivilegeBackend for SimBackend {
    fn name(&self) -> &'static str {
        "sim"
    }

    fn for_each_process(&self, visit: &mut dyn FnMut(Pid, ProcessStamp)) -> BackendResult<()> {
        // Snapshot first: visitors call back into the backend.
        let snapshot: Vec<(Pid, ProcessStamp)> =
            lock(&self.state).procs.iter().map(|(&pid, p)| (pid, p.stamp)).collect();
        for (pid, stamp) in snapshot {
            visit(pid, stamp);
        }
        Ok(())
    }

    fn resolve(&self, pid: Pid) -> Option<ProcessStamp> {
        lock(&self.state).procs.get(&pid).map(|p| p.stamp)
    }

    fn contains_thread(&self, pid: Pid, thread: Tid) -> bool {
        lock(&self.state)
            .procs
            .get(&pid)
            .is_some_and(|p| p.threads.contains_key(&thread))
    }

    fn has_non_standard_scheduling_policy(&self, pid: Pid) -> bool {
        lock(&self.state)
            .procs
            .get(&pid)
            .is_some_and(|p| p.threads.values().any(|s| *s != Sched::Default))
    }

    fn set_high_priority(&self, pid: Pid, thread: Tid, nice: i32) -> io::Result<()> {
        self.mutate(pid, thread, Sched::High(nice))
    }

    fn set_realtime_priority(&self, pid: Pid, thread: Tid, priority: u32) -> io::Result<()> {
        self.mutate(pid, thread, Sched::Realtime(priority))
    }

    fn set_idle_priority(&self, pid: Pid, thread: Tid, priority: u32) -> io::Result<()> {
        self.mutate(pid, thread, Sched::Idle(priority))
    }

    fn reset_all_priorities(&self, pid: Pid, thread: Option<Tid>) -> io::Result<()> {
        let mut st = lock(&self.state);
        st.resets.push((pid, thread));
        let entry = st
            .procs
            .get_mut(&pid)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such process"))?;
        match thread {
            Some(t) => {
                let slot = entry
                    .threads
                    .get_mut(&t)
                    .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such thread"))?;
                *slot = Sched::Default;
            }
            None => entry.threads.values_mut().for_each(|s| *s = Sched::Default),
        }
        Ok(())
    }

    fn max_realtime_priority(&self) -> i32 {
        SIM_MAX_REALTIME_PRIORITY
    }
}

// ============================================================================
// ScriptedAuthority
// ============================================================================

/// One check issued to `ScriptedAuthority`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRecord {
    pub action_id: String,
    pub subject: Subject,
    pub flags: AuthorizationFlags,
    pub details: Option<Details>,
}

/// Records checks; the test delivers decisions to the queue itself.
#[derive(Debug, Clone, Default)]
pub struct ScriptedAuthority {
    checks: Arc<Mutex<Vec<CheckRecord>>>,
}

impl ScriptedAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn checks(&self) -> Vec<CheckRecord> {
        lock(&self.checks).clone()
    }

    pub fn count(&self) -> usize {
        lock(&self.checks).len()
    }
}

impl Authority for ScriptedAuthority {
    fn check_authorization(
        &mut self,
        action_id: &str,
        subject: &Subject,
        flags: AuthorizationFlags,
        details: Option<&Details>,
    ) {
        lock(&self.checks).push(CheckRecord {
            action_id: action_id.to_string(),
            subject: subject.clone(),
            flags,
            details: details.cloned(),
        });
    }
}

// ============================================================================
// SimPeer / ReplyLog
// ============================================================================

/// Scripted caller credentials
#[derive(Debug, Clone)]
pub struct SimPeer {
    sender: String,
    pid: Result<Pid, GrantError>,
    uid: Result<Uid, GrantError>,
    remote: bool,
    interactive: bool,
}

impl SimPeer {
    /// A remote caller with resolvable credentials
    pub fn new(pid: Pid, uid: Uid) -> Self {
        Self {
            sender: format!(":1.{}", pid),
            pid: Ok(pid),
            uid: Ok(uid),
            remote: true,
            interactive: false,
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    pub fn with_pid_error(mut self, err: GrantError) -> Self {
        self.pid = Err(err);
        self
    }

    pub fn with_uid_error(mut self, err: GrantError) -> Self {
        self.uid = Err(err);
        self
    }

    /// Mark the call as not having arrived through the remote channel.
    pub fn local(mut self) -> Self {
        self.remote = false;
        self
    }

    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }
}

impl Peer for SimPeer {
    fn sender(&self) -> &str {
        &self.sender
    }

    fn is_remote(&self) -> bool {
        self.remote
    }

    fn pid(&self) -> Result<Pid, GrantError> {
        self.pid.clone()
    }

    fn uid(&self) -> Result<Uid, GrantError> {
        self.uid.clone()
    }

    fn allows_interactive_authorization(&self) -> bool {
        self.interactive
    }
}

/// Collects every reply sent through the contexts it hands out.
#[derive(Debug, Clone)]
pub struct ReplyLog {
    replies: Arc<Mutex<Vec<ReplyResult>>>,
    open: Arc<AtomicBool>,
}

struct LogChannel {
    replies: Arc<Mutex<Vec<ReplyResult>>>,
    open: Arc<AtomicBool>,
}

impl ReplyChannel for LogChannel {
    fn deliver(self: Box<Self>, reply: ReplyResult) {
        lock(&self.replies).push(reply);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

impl Default for ReplyLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplyLog {
    pub fn new() -> Self {
        Self {
            replies: Arc::default(),
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn reply(&self) -> Reply {
        Reply::new(LogChannel {
            replies: Arc::clone(&self.replies),
            open: Arc::clone(&self.open),
        })
    }

    /// A call from `peer` whose reply lands in this log
    pub fn call(&self, peer: SimPeer) -> CallContext {
        CallContext::new(peer, self.reply())
    }

    /// Mark every channel handed out so far as gone.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    pub fn replies(&self) -> Vec<ReplyResult> {
        lock(&self.replies).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.replies).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last(&self) -> Option<ReplyResult> {
        lock(&self.replies).last().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtkit_core::process::{Process, ProcessTable};
    use rtkit_core::transport::ReplyValue;

    #[test]
    fn test_spawn_and_reuse() {
        let sim = SimBackend::new();
        let a = sim.spawn(100, 1000, &[100, 101]);
        assert_eq!(sim.resolve(100), Some(a));
        assert!(sim.contains_thread(100, 101));
        assert!(!sim.contains_thread(100, 102));

        let b = sim.reuse(100, 1001, &[100]);
        assert_ne!(a, b);
        assert_eq!(sim.resolve(100), Some(b));
        assert!(!sim.contains_thread(100, 101));
    }

    #[test]
    fn test_mutations() {
        let sim = SimBackend::new();
        sim.spawn(7, 1000, &[7, 8]);
        assert!(!sim.has_non_standard_scheduling_policy(7));

        sim.set_realtime_priority(7, 8, 10).unwrap();
        assert_eq!(sim.sched(7, 8), Some(Sched::Realtime(10)));
        assert!(sim.has_non_standard_scheduling_policy(7));
        assert!(sim.set_high_priority(7, 99, -5).is_err());

        sim.reset_all_priorities(7, None).unwrap();
        assert_eq!(sim.sched(7, 8), Some(Sched::Default));
        assert_eq!(sim.resets(), vec![(7, None)]);

        sim.fail_mutations(true);
        assert!(sim.set_idle_priority(7, 7, 0).is_err());
    }

    #[test]
    fn test_exit_on_next_mutation() {
        let sim = SimBackend::new();
        sim.spawn(7, 1000, &[7]);
        sim.exit_on_next_mutation(7);
        sim.set_high_priority(7, 7, -1).unwrap();
        assert!(!sim.is_alive(7));
    }

    #[test]
    fn test_identity_tracks_sim_process() {
        let sim = SimBackend::new();
        sim.spawn(50, 1000, &[50]);
        let table = ProcessTable::new(sim.clone());
        let p = Process::resolve(&table, 50);
        assert!(p.is_valid());

        sim.reuse(50, 1000, &[50]);
        assert!(!p.is_valid());
    }

    #[test]
    fn test_scripted_authority_records() {
        let mut auth = ScriptedAuthority::new();
        let handle = auth.clone();
        auth.check_authorization("x", &Subject::new(":1.1"), AuthorizationFlags::empty(), None);
        assert_eq!(handle.count(), 1);
        assert_eq!(handle.checks()[0].action_id, "x");
        assert!(handle.checks()[0].details.is_none());
    }

    #[test]
    fn test_reply_log() {
        let log = ReplyLog::new();
        let ctx = log.call(SimPeer::new(1, 1000));
        assert!(ctx.peer().is_remote());
        ctx.send_reply(ReplyValue::Int(3));
        assert_eq!(log.last(), Some(Ok(ReplyValue::Int(3))));

        let saved = log.call(SimPeer::new(1, 1000).local()).into_saved();
        assert!(saved.reply_open());
        log.close();
        assert!(!saved.reply_open());
        assert_eq!(log.len(), 1);
    }
}
