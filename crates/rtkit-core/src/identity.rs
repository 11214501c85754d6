//! Process identity snapshots
//!
//! A pid alone never identifies a process across time: the OS recycles
//! them. The `(pid, uid, start time)` triple does, up to the granularity of
//! the start timestamp.

use std::fmt;

/// OS process identifier
pub type Pid = i32;

/// OS user identifier
pub type Uid = u32;

/// OS thread identifier
pub type Tid = u64;

/// Owner and creation time resolved from a live process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessStamp {
    /// Effective owning user
    pub uid: Uid,
    /// Process creation time (backend-defined coarse units)
    pub start_time: u64,
}

impl ProcessStamp {
    pub const fn new(uid: Uid, start_time: u64) -> Self {
        Self { uid, start_time }
    }
}

/// Immutable snapshot of a process at the moment it was resolved.
///
/// Two identities are equal iff pid, uid and start time all match. An
/// identity whose stamp could not be resolved never compares equal to a
/// live one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessIdentity {
    pid: Pid,
    stamp: Option<ProcessStamp>,
}

impl ProcessIdentity {
    pub const fn new(pid: Pid, stamp: Option<ProcessStamp>) -> Self {
        Self { pid, stamp }
    }

    /// Identity of an already-resolved process (used by enumeration)
    pub const fn resolved(pid: Pid, stamp: ProcessStamp) -> Self {
        Self { pid, stamp: Some(stamp) }
    }

    /// Identity of a pid the OS had no live process for
    pub const fn unresolved(pid: Pid) -> Self {
        Self { pid, stamp: None }
    }

    #[inline]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    #[inline]
    pub fn uid(&self) -> Option<Uid> {
        self.stamp.map(|s| s.uid)
    }

    #[inline]
    pub fn start_time(&self) -> Option<u64> {
        self.stamp.map(|s| s.start_time)
    }

    #[inline]
    pub fn stamp(&self) -> Option<ProcessStamp> {
        self.stamp
    }

    /// True when both uid and a non-zero start time were resolved
    #[inline]
    pub fn is_resolved(&self) -> bool {
        matches!(self.stamp, Some(s) if s.start_time != 0)
    }
}

impl fmt::Display for ProcessIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stamp {
            Some(s) => write!(f, "pid {} (uid {}, start {})", self.pid, s.uid, s.start_time),
            None => write!(f, "pid {} (unresolved)", self.pid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_needs_all_fields() {
        let a = ProcessIdentity::resolved(100, ProcessStamp::new(1000, 42));
        assert_eq!(a, ProcessIdentity::resolved(100, ProcessStamp::new(1000, 42)));
        assert_ne!(a, ProcessIdentity::resolved(100, ProcessStamp::new(1001, 42)));
        assert_ne!(a, ProcessIdentity::resolved(100, ProcessStamp::new(1000, 43)));
        assert_ne!(a, ProcessIdentity::resolved(101, ProcessStamp::new(1000, 42)));
        assert_ne!(a, ProcessIdentity::unresolved(100));
    }

    #[test]
    fn test_resolution_state() {
        assert!(ProcessIdentity::resolved(1, ProcessStamp::new(0, 7)).is_resolved());
        assert!(!ProcessIdentity::resolved(1, ProcessStamp::new(0, 0)).is_resolved());
        assert!(!ProcessIdentity::unresolved(1).is_resolved());
        assert_eq!(ProcessIdentity::unresolved(1).uid(), None);
    }

    #[test]
    fn test_display() {
        let a = ProcessIdentity::resolved(7, ProcessStamp::new(1000, 99));
        assert_eq!(a.to_string(), "pid 7 (uid 1000, start 99)");
        assert_eq!(ProcessIdentity::unresolved(7).to_string(), "pid 7 (unresolved)");
    }
}
