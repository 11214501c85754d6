//! `LinuxBackend` — default `PrivilegeBackend` implementation.
//!
//! Identity comes from procfs: the effective uid from `/proc/<pid>/status`
//! and the start time (clock ticks since boot, field 22) from
//! `/proc/<pid>/stat`. Scheduling is per thread on Linux, so process-wide
//! queries and resets walk `/proc/<pid>/task`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use rtkit_core::backend::PrivilegeBackend;
use rtkit_core::error::{BackendError, BackendResult};
use rtkit_core::identity::{Pid, ProcessStamp, Tid};

pub struct LinuxBackend {
    proc_root: PathBuf,
}

impl LinuxBackend {
    /// Open the backend on the system procfs.
    ///
    /// Fails when procfs is not readable; the service must not start
    /// degraded.
    pub fn init() -> BackendResult<Self> {
        Self::with_proc_root("/proc")
    }

    pub fn with_proc_root(root: impl Into<PathBuf>) -> BackendResult<Self> {
        let proc_root = root.into();
        let stat_path = proc_root.join("self").join("stat");
        fs::read_to_string(&stat_path).map_err(|e| {
            BackendError::Unavailable(format!("cannot read {}: {}", stat_path.display(), e))
        })?;
        Ok(Self { proc_root })
    }

    fn pid_dir(&self, pid: Pid) -> PathBuf {
        self.proc_root.join(pid.to_string())
    }

    fn read_stamp(&self, pid: Pid) -> Option<ProcessStamp> {
        let dir = self.pid_dir(pid);
        let stat = fs::read_to_string(dir.join("stat")).ok()?;
        let status = fs::read_to_string(dir.join("status")).ok()?;
        Some(ProcessStamp::new(parse_status_uid(&status)?, parse_stat_start_time(&stat)?))
    }

    fn threads(&self, pid: Pid) -> io::Result<Vec<Tid>> {
        Ok(numeric_entries(&self.pid_dir(pid).join("task"))?.collect())
    }

    fn reset_thread(&self, thread: Tid) -> io::Result<()> {
        set_scheduler(thread, libc::SCHED_OTHER, 0)?;
        if nice_of(thread).is_some_and(|n| n < 0) {
            set_nice(thread, 0)?;
        }
        Ok(())
    }
}

impl PrivilegeBackend for LinuxBackend {
    fn name(&self) -> &'static str {
        "linux"
    }

    fn for_each_process(&self, visit: &mut dyn FnMut(Pid, ProcessStamp)) -> BackendResult<()> {
        for pid in numeric_entries(&self.proc_root)? {
            let Ok(pid) = Pid::try_from(pid) else { continue };
            // Processes may exit between readdir and resolution
            if let Some(stamp) = self.read_stamp(pid) {
                visit(pid, stamp);
            }
        }
        Ok(())
    }

    fn resolve(&self, pid: Pid) -> Option<ProcessStamp> {
        if pid <= 0 {
            return None;
        }
        self.read_stamp(pid)
    }

    fn contains_thread(&self, pid: Pid, thread: Tid) -> bool {
        pid > 0 && thread != 0 && self.pid_dir(pid).join("task").join(thread.to_string()).exists()
    }

    fn has_non_standard_scheduling_policy(&self, pid: Pid) -> bool {
        let Ok(threads) = self.threads(pid) else {
            return false;
        };
        threads.into_iter().any(|tid| {
            let elevated_policy = get_scheduler(tid)
                .is_some_and(|p| p != libc::SCHED_OTHER && p != libc::SCHED_BATCH);
            elevated_policy || nice_of(tid).is_some_and(|n| n < 0)
        })
    }

    fn set_high_priority(&self, _pid: Pid, thread: Tid, nice: i32) -> io::Result<()> {
        set_scheduler(thread, libc::SCHED_OTHER, 0)?;
        set_nice(thread, nice)
    }

    fn set_realtime_priority(&self, _pid: Pid, thread: Tid, priority: u32) -> io::Result<()> {
        let priority = i32::try_from(priority).map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
        set_scheduler(thread, libc::SCHED_RR | libc::SCHED_RESET_ON_FORK, priority)
    }

    fn set_idle_priority(&self, _pid: Pid, thread: Tid, priority: u32) -> io::Result<()> {
        // SCHED_IDLE has no static priority levels
        if priority != 0 {
            tracing::debug!(thread, priority, "idle priority value ignored on linux");
        }
        set_scheduler(thread, libc::SCHED_IDLE | libc::SCHED_RESET_ON_FORK, 0)
    }

    fn reset_all_priorities(&self, pid: Pid, thread: Option<Tid>) -> io::Result<()> {
        match thread {
            Some(tid) => self.reset_thread(tid),
            None => {
                let mut first_err = None;
                for tid in self.threads(pid)? {
                    if let Err(e) = self.reset_thread(tid) {
                        first_err.get_or_insert(e);
                    }
                }
                first_err.map_or(Ok(()), Err)
            }
        }
    }

    fn max_realtime_priority(&self) -> i32 {
        unsafe { libc::sched_get_priority_max(libc::SCHED_RR) }
    }
}

/// Numeric directory entries (pids under /proc, tids under task/)
fn numeric_entries(dir: &Path) -> io::Result<impl Iterator<Item = u64>> {
    Ok(fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().and_then(|s| s.parse::<u64>().ok())))
}

/// Field 22 of /proc/<pid>/stat. `comm` may contain spaces and parens, so
/// fields are counted from the last ')'.
fn parse_stat_start_time(stat: &str) -> Option<u64> {
    let rest = &stat[stat.rfind(')')? + 1..];
    // rest starts at field 3 (state)
    rest.split_whitespace().nth(22 - 3)?.parse().ok()
}

/// Effective uid from the `Uid:` line of /proc/<pid>/status
fn parse_status_uid(status: &str) -> Option<u32> {
    let line = status.lines().find(|l| l.starts_with("Uid:"))?;
    line.split_whitespace().nth(2)?.parse().ok()
}

fn os_tid(thread: Tid) -> io::Result<libc::pid_t> {
    libc::pid_t::try_from(thread).map_err(|_| io::Error::from_raw_os_error(libc::ESRCH))
}

fn set_scheduler(thread: Tid, policy: libc::c_int, priority: libc::c_int) -> io::Result<()> {
    let tid = os_tid(thread)?;
    let param = libc::sched_param { sched_priority: priority };
    if unsafe { libc::sched_setscheduler(tid, policy, &param) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn get_scheduler(thread: Tid) -> Option<libc::c_int> {
    let tid = os_tid(thread).ok()?;
    let policy = unsafe { libc::sched_getscheduler(tid) };
    (policy >= 0).then_some(policy & !libc::SCHED_RESET_ON_FORK)
}

fn nice_of(thread: Tid) -> Option<i32> {
    let tid = os_tid(thread).ok()?;
    // -1 is a valid nice level; only errno tells failures apart
    Errno::clear();
    let nice = unsafe { libc::getpriority(libc::PRIO_PROCESS, tid as libc::id_t) };
    if nice == -1 && Errno::last_raw() != 0 {
        return None;
    }
    Some(nice)
}

fn set_nice(thread: Tid, nice: i32) -> io::Result<()> {
    let tid = os_tid(thread)?;
    if unsafe { libc::setpriority(libc::PRIO_PROCESS, tid as libc::id_t, nice) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
