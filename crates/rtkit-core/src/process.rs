//! Process handles and the guarded process table.
//!
//! `ProcessTable` wraps the OS backend and owns the enumeration guard:
//! the underlying enumeration primitive is a critical section, so a nested
//! enumeration (or a single-pid resolution from inside a visitor) fails
//! fast instead of corrupting backend state.
//!
//! `Process` pairs a `ProcessIdentity` snapshot with the table it was
//! resolved from. It is the mutable handle the known-process registry
//! tracks.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::backend::PrivilegeBackend;
use crate::error::{BackendError, BackendResult};
use crate::identity::{Pid, ProcessIdentity, Tid, Uid};
use crate::priority::Priority;

/// OS backend plus the enumeration guard
pub struct ProcessTable {
    backend: Box<dyn PrivilegeBackend>,
    entered: AtomicBool,
}

/// Releases the enumeration guard on drop (including unwinding visitors)
struct EnterGuard<'a>(&'a AtomicBool);

impl<'a> EnterGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> BackendResult<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| BackendError::ReentrantEnumeration)?;
        Ok(EnterGuard(flag))
    }
}

impl Drop for EnterGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ProcessTable {
    pub fn new<B: PrivilegeBackend + 'static>(backend: B) -> Arc<Self> {
        Arc::new(Self {
            backend: Box::new(backend),
            entered: AtomicBool::new(false),
        })
    }

    pub fn backend(&self) -> &dyn PrivilegeBackend {
        self.backend.as_ref()
    }

    /// Whether an enumeration is currently in progress
    pub fn enumerating(&self) -> bool {
        self.entered.load(Ordering::Acquire)
    }

    /// Resolve `pid` against the live OS.
    ///
    /// Inside an enumeration this reports the pid as unresolved.
    pub fn resolve(&self, pid: Pid) -> ProcessIdentity {
        if self.enumerating() {
            tracing::error!(pid, "process resolution attempted during enumeration");
            return ProcessIdentity::unresolved(pid);
        }
        ProcessIdentity::new(pid, self.backend.resolve(pid))
    }

    /// Visit every live process.
    pub fn for_each(self: &Arc<Self>, mut visit: impl FnMut(Process)) -> BackendResult<()> {
        let _guard = EnterGuard::acquire(&self.entered)?;
        let table = Arc::clone(self);
        self.backend.for_each_process(&mut |pid, stamp| {
            visit(Process::from_identity(&table, ProcessIdentity::resolved(pid, stamp)));
        })
    }

    pub fn max_realtime_priority(&self) -> i32 {
        self.backend.max_realtime_priority()
    }
}

impl fmt::Debug for ProcessTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessTable")
            .field("backend", &self.backend.name())
            .field("enumerating", &self.enumerating())
            .finish()
    }
}

/// A process snapshot bound to the table it came from
#[derive(Clone)]
pub struct Process {
    identity: ProcessIdentity,
    table: Arc<ProcessTable>,
}

impl Process {
    /// Resolve a raw pid immediately.
    pub fn resolve(table: &Arc<ProcessTable>, pid: Pid) -> Self {
        Self {
            identity: table.resolve(pid),
            table: Arc::clone(table),
        }
    }

    /// Wrap an already-resolved identity (enumeration path)
    pub fn from_identity(table: &Arc<ProcessTable>, identity: ProcessIdentity) -> Self {
        Self {
            identity,
            table: Arc::clone(table),
        }
    }

    #[inline]
    pub fn identity(&self) -> ProcessIdentity {
        self.identity
    }

    #[inline]
    pub fn pid(&self) -> Pid {
        self.identity.pid()
    }

    #[inline]
    pub fn uid(&self) -> Option<Uid> {
        self.identity.uid()
    }

    /// Re-resolve the pid and compare against the snapshot.
    ///
    /// False when the snapshot was never resolved, when no live process has
    /// this pid, or when the live process is a different one (pid reuse).
    pub fn is_valid(&self) -> bool {
        if !self.identity.is_resolved() {
            return false;
        }
        self.table.resolve(self.identity.pid()) == self.identity
    }

    pub fn contains_thread(&self, thread: Tid) -> bool {
        self.table.backend().contains_thread(self.pid(), thread)
    }

    pub fn has_non_standard_scheduling_policy(&self) -> bool {
        self.table.backend().has_non_standard_scheduling_policy(self.pid())
    }

    pub fn set_high_priority(&self, thread: Tid, nice: i32) -> bool {
        self.report(thread, "high", self.table.backend().set_high_priority(self.pid(), thread, nice))
    }

    pub fn set_realtime_priority(&self, thread: Tid, priority: u32) -> bool {
        self.report(
            thread,
            "realtime",
            self.table.backend().set_realtime_priority(self.pid(), thread, priority),
        )
    }

    pub fn set_idle_priority(&self, thread: Tid, priority: u32) -> bool {
        self.report(thread, "idle", self.table.backend().set_idle_priority(self.pid(), thread, priority))
    }

    /// Dispatch on the requested class.
    pub fn set_priority(&self, thread: Tid, priority: Priority) -> bool {
        match priority {
            Priority::High(nice) => self.set_high_priority(thread, nice),
            Priority::Realtime(p) => self.set_realtime_priority(thread, p),
            Priority::Idle(p) => self.set_idle_priority(thread, p),
        }
    }

    /// Reset one thread, or every thread when `thread` is `None`.
    pub fn reset_all_priorities(&self, thread: Option<Tid>) -> bool {
        match self.table.backend().reset_all_priorities(self.pid(), thread) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(pid = self.pid(), ?thread, error = %e, "failed to reset scheduling");
                false
            }
        }
    }

    fn report(&self, thread: Tid, class: &str, res: std::io::Result<()>) -> bool {
        match res {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(pid = self.pid(), thread, class, error = %e, "failed to set priority");
                false
            }
        }
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Process").field(&self.identity).finish()
    }
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.identity, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ProcessStamp;
    use std::sync::Mutex;

    /// Minimal table: pid -> stamp, records resets
    #[derive(Default)]
    struct Table {
        procs: Mutex<Vec<(Pid, ProcessStamp)>>,
        resets: Mutex<Vec<(Pid, Option<Tid>)>>,
    }

    impl PrivilegeBackend for Arc<Table> {
        fn name(&self) -> &'static str {
            "test"
        }
        fn for_each_process(&self, visit: &mut dyn FnMut(Pid, ProcessStamp)) -> BackendResult<()> {
            let snapshot = self.procs.lock().unwrap().clone();
            for (pid, stamp) in snapshot {
                visit(pid, stamp);
            }
            Ok(())
        }
        fn resolve(&self, pid: Pid) -> Option<ProcessStamp> {
            self.procs.lock().unwrap().iter().find(|(p, _)| *p == pid).map(|(_, s)| *s)
        }
        fn contains_thread(&self, pid: Pid, thread: Tid) -> bool {
            thread == pid as Tid
        }
        fn has_non_standard_scheduling_policy(&self, _pid: Pid) -> bool {
            false
        }
        fn set_high_priority(&self, _: Pid, _: Tid, _: i32) -> std::io::Result<()> {
            Ok(())
        }
        fn set_realtime_priority(&self, _: Pid, _: Tid, _: u32) -> std::io::Result<()> {
            Err(std::io::Error::from_raw_os_error(1))
        }
        fn set_idle_priority(&self, _: Pid, _: Tid, _: u32) -> std::io::Result<()> {
            Ok(())
        }
        fn reset_all_priorities(&self, pid: Pid, thread: Option<Tid>) -> std::io::Result<()> {
            self.resets.lock().unwrap().push((pid, thread));
            Ok(())
        }
        fn max_realtime_priority(&self) -> i32 {
            99
        }
    }

    fn table_with(procs: &[(Pid, Uid, u64)]) -> (Arc<Table>, Arc<ProcessTable>) {
        let raw = Arc::new(Table::default());
        *raw.procs.lock().unwrap() =
            procs.iter().map(|&(p, u, s)| (p, ProcessStamp::new(u, s))).collect();
        let table = ProcessTable::new(Arc::clone(&raw));
        (raw, table)
    }

    #[test]
    fn test_valid_until_pid_reused() {
        let (raw, table) = table_with(&[(10, 1000, 5)]);
        let p = Process::resolve(&table, 10);
        assert!(p.is_valid());
        assert_eq!(p.uid(), Some(1000));

        // Original exits, pid recycled by another user
        *raw.procs.lock().unwrap() = vec![(10, ProcessStamp::new(2000, 9))];
        assert!(!p.is_valid());

        // Same user, later start time: still a different process
        *raw.procs.lock().unwrap() = vec![(10, ProcessStamp::new(1000, 9))];
        assert!(!p.is_valid());
    }

    #[test]
    fn test_unresolved_is_never_valid() {
        let (_raw, table) = table_with(&[]);
        let p = Process::resolve(&table, 77);
        assert_eq!(p.uid(), None);
        assert!(!p.is_valid());
    }

    #[test]
    fn test_enumeration_is_not_reentrant() {
        let (_raw, table) = table_with(&[(1, 0, 1), (2, 1000, 2)]);
        let mut nested = Vec::new();
        let mut seen = 0;
        table
            .for_each(|p| {
                seen += 1;
                nested.push(table.for_each(|_| {}).is_err());
                // Resolution from inside a visitor reports unresolved
                assert!(!p.is_valid());
            })
            .unwrap();
        assert_eq!(seen, 2);
        assert_eq!(nested, vec![true, true]);

        // Guard released afterwards
        assert!(!table.enumerating());
        assert!(table.for_each(|_| {}).is_ok());
        assert!(Process::resolve(&table, 2).is_valid());
    }

    #[test]
    fn test_mutations_report_backend_result() {
        let (raw, table) = table_with(&[(5, 1000, 3)]);
        let p = Process::resolve(&table, 5);
        assert!(p.set_priority(5, Priority::High(-5)));
        assert!(!p.set_priority(5, Priority::Realtime(10)));
        assert!(p.set_priority(5, Priority::Idle(0)));
        assert!(p.reset_all_priorities(None));
        assert_eq!(*raw.resets.lock().unwrap(), vec![(5, None)]);
        assert!(p.contains_thread(5));
        assert!(!p.contains_thread(6));
    }
}
