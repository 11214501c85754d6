//! OS privilege backend abstraction.
//!
//! A `PrivilegeBackend` is the only component that touches OS process
//! state. Everything above it is platform-agnostic.
//!
//! # Implementors
//!
//! - `LinuxBackend` (rtkit-module): procfs for enumeration and identity,
//!   `sched_setscheduler`/`setpriority` for mutation.
//! - `SimBackend` (rtkit-module, testing): in-memory process table with
//!   pid reuse and failure injection.
//!
//! **Contract:** mutation methods never re-validate identity. The caller
//! re-resolves the target afterwards before trusting the new state.

use crate::error::BackendResult;
use crate::identity::{Pid, ProcessStamp, Tid};

/// Enumerates, resolves and mutates OS processes.
pub trait PrivilegeBackend: Send + Sync {
    /// Backend name (e.g. "linux", "sim")
    fn name(&self) -> &'static str;

    /// Visit every live process with a freshly resolved stamp.
    ///
    /// Not reentrant. Callers go through `ProcessTable::for_each`, which
    /// holds the enumeration guard.
    fn for_each_process(&self, visit: &mut dyn FnMut(Pid, ProcessStamp)) -> BackendResult<()>;

    /// Resolve a single pid, `None` if no such live process
    fn resolve(&self, pid: Pid) -> Option<ProcessStamp>;

    /// Whether `thread` currently belongs to process `pid`
    fn contains_thread(&self, pid: Pid, thread: Tid) -> bool;

    /// Whether any thread of `pid` runs with non-default scheduling
    fn has_non_standard_scheduling_policy(&self, pid: Pid) -> bool;

    /// Default policy with the given nice level
    fn set_high_priority(&self, pid: Pid, thread: Tid, nice: i32) -> std::io::Result<()>;

    /// Round-robin realtime policy at `priority`
    fn set_realtime_priority(&self, pid: Pid, thread: Tid, priority: u32) -> std::io::Result<()>;

    /// Idle policy
    fn set_idle_priority(&self, pid: Pid, thread: Tid, priority: u32) -> std::io::Result<()>;

    /// Back to default scheduling; `None` resets every thread of the process
    fn reset_all_priorities(&self, pid: Pid, thread: Option<Tid>) -> std::io::Result<()>;

    /// Highest realtime priority the platform supports
    fn max_realtime_priority(&self) -> i32;
}
