//! # rtkit-daemon — The Service State Machine
//!
//! Everything that decides whether, and in what order, a caller's thread
//! gets elevated scheduling:
//!
//! - `burst` - per-user rate limiter
//! - `registry` - processes this service elevated, and their cleanup
//! - `auth_queue` - one-at-a-time FIFO front of the authorization backend
//! - `daemon` - the grant workflow and the administrative sweeps
//! - `event_loop` - single-threaded driver fed through `LoopHandle`
//! - `config`, `logging` - environment configuration and tracing setup
//!
//! The daemon is generic over the `Authority`; the OS backend is reached
//! through the `ProcessTable` it is constructed with.

pub mod config;
pub mod logging;
pub mod burst;
pub mod registry;
pub mod auth_queue;
pub mod daemon;
pub mod event_loop;

pub use auth_queue::AuthQueue;
pub use burst::BurstLimiter;
pub use config::{ConfigError, DaemonConfig};
pub use daemon::{Daemon, GrantCore};
pub use event_loop::{Event, EventLoop, LoopHandle, Method};
pub use logging::Verbosity;
pub use registry::KnownProcessRegistry;
