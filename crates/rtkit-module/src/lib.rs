//! # rtkit-module — Default implementations
//!
//! This crate provides the default implementation for every rtkit-core
//! seam the service consumes.
//!
//! ## Default stack
//!
//! | Trait / role       | Default impl       | Testing double     |
//! |--------------------|--------------------|--------------------|
//! | PrivilegeBackend   | LinuxBackend       | SimBackend         |
//! | Authority          | PkcheckAuthority   | ScriptedAuthority  |
//! | Peer / ReplyChannel| (transport-owned)  | SimPeer / ReplyLog |
//! | Event-loop wakeups | EventFdWaker       | -                  |

pub mod pkcheck;
pub mod eventfd_waker;
pub mod sim;

pub use eventfd_waker::EventFdWaker;
pub use pkcheck::PkcheckAuthority;
pub use sim::{ReplyLog, ScriptedAuthority, SimBackend, SimPeer};

// Platform detection
cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub mod linux;
        pub use linux::LinuxBackend as SystemBackend;
    } else {
        compile_error!("Unsupported platform: rtkit needs a PrivilegeBackend for this OS");
    }
}
