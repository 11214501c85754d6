//! Authorization backend abstraction.
//!
//! The backend evaluates policy for a named action and a subject and
//! answers asynchronously. The authorization queue guarantees at most one
//! check is outstanding, so implementations report completions without a
//! correlation id: the decision always belongs to the oldest check.
//!
//! # Implementors
//!
//! - `PkcheckAuthority` (rtkit-module): runs polkit's `pkcheck` helper on a
//!   side thread and posts the decision back to the event loop.
//! - `ScriptedAuthority` (rtkit-module, testing): records checks, the test
//!   delivers decisions by hand.

use std::collections::BTreeMap;

use bitflags::bitflags;

use crate::identity::{Pid, Uid};

/// Action guarding `MakeThreadHighPriority*`
pub const ACTION_ACQUIRE_HIGH_PRIORITY: &str = "org.freedesktop.RealtimeKit1.acquire-high-priority";

/// Action guarding `MakeThreadRealtime*`
pub const ACTION_ACQUIRE_REAL_TIME: &str = "org.freedesktop.RealtimeKit1.acquire-real-time";

/// Extra key/value context handed to the backend
pub type Details = BTreeMap<String, String>;

/// Backend verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    Yes,
    No,
    /// Authorized only after the user authenticates
    Challenge,
}

impl Decision {
    #[inline]
    pub fn is_yes(&self) -> bool {
        matches!(self, Decision::Yes)
    }
}

bitflags! {
    /// Options for a single authorization check
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AuthorizationFlags: u32 {
        /// The backend may prompt the user
        const ALLOW_USER_INTERACTION = 0x1;
    }
}

/// Who is asking, as seen by the authorization backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    /// Transport-level sender name (e.g. a unique bus name)
    pub sender: String,
    pub pid: Option<Pid>,
    pub uid: Option<Uid>,
    /// Start time of `pid`, when resolved
    pub start_time: Option<u64>,
}

impl Subject {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            pid: None,
            uid: None,
            start_time: None,
        }
    }
}

/// Evaluates authorization asynchronously.
///
/// **Contract:** `check_authorization()` must not block and must not
/// deliver the decision re-entrantly. The decision is reported later
/// through whatever `DecisionSink` the implementation was built with.
pub trait Authority {
    fn check_authorization(
        &mut self,
        action_id: &str,
        subject: &Subject,
        flags: AuthorizationFlags,
        details: Option<&Details>,
    );
}

/// Where an authorization backend reports its completions
pub trait DecisionSink: Send + Sync {
    fn deliver(&self, decision: Decision);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision() {
        assert!(Decision::Yes.is_yes());
        assert!(!Decision::No.is_yes());
        assert!(!Decision::Challenge.is_yes());
    }

    #[test]
    fn test_flags() {
        let f = AuthorizationFlags::ALLOW_USER_INTERACTION;
        assert!(f.contains(AuthorizationFlags::ALLOW_USER_INTERACTION));
        assert!(AuthorizationFlags::empty().is_empty());
    }
}
