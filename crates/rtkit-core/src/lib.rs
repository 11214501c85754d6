//! # rtkit-core
//!
//! Core types and traits for the rtkit scheduling policy service.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! The Linux backend, the polkit bridge and the simulation doubles live in
//! `rtkit-module`; the request state machine lives in `rtkit-daemon`.
//!
//! ## Modules
//!
//! - `identity` - `(pid, uid, start time)` snapshots used to detect pid reuse
//! - `priority` - priority classes, requested values and limits
//! - `backend` - the OS privilege backend trait
//! - `process` - process handles and the guarded process table
//! - `authority` - authorization decisions, subjects and the backend trait
//! - `transport` - caller peers and single-use reply handles
//! - `error` - error types

pub mod identity;
pub mod priority;
pub mod backend;
pub mod process;
pub mod authority;
pub mod transport;
pub mod error;

// Re-exports for convenience
pub use identity::{Pid, ProcessIdentity, ProcessStamp, Tid, Uid};
pub use priority::{Priority, PriorityClass, PriorityLimits};
pub use backend::PrivilegeBackend;
pub use process::{Process, ProcessTable};
pub use authority::{Authority, AuthorizationFlags, Decision, DecisionSink, Details, Subject};
pub use transport::{CallContext, Peer, Reply, ReplyChannel, ReplyResult, ReplyValue, SavedContext};
pub use error::{BackendError, BackendResult, GrantError, GrantResult};

/// Service-wide constants
pub mod constants {
    /// Well-known service name the original protocol is published under
    pub const SERVICE_NAME: &str = "org.freedesktop.RealtimeKit1";

    /// Object path of the service
    pub const OBJECT_PATH: &str = "/org/freedesktop/RealtimeKit1";

    /// The superuser bypasses authorization and is never swept
    pub const ROOT_UID: crate::Uid = 0;
}
