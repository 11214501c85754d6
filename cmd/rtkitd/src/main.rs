//! rtkitd — realtime scheduling policy service
//!
//! Hosts the grant service on the main thread:
//!   Linux procfs/sched backend, pkcheck authorization, event loop
//!
//! Run: sudo ./target/release/rtkitd [-v|-q] [--reset-all]
//!
//! The wire transport is supplied by the embedder, which posts calls
//! through the event loop's `LoopHandle`. SIGINT/SIGTERM shut the service
//! down after resetting the processes it elevated.

use std::process::ExitCode;
use std::sync::Arc;

use nix::sys::signal::{SigSet, Signal};

use rtkit_core::process::ProcessTable;
use rtkit_module::{PkcheckAuthority, SystemBackend};
use rtkit_daemon::logging::{init_subscriber, Verbosity};
use rtkit_daemon::{Daemon, DaemonConfig, EventLoop, LoopHandle};

const USAGE: &str = "usage: rtkitd [-v|--verbose] [-q|--quiet] [--reset-all]";

struct Args {
    verbosity: Verbosity,
    reset_all: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut verbose = false;
    let mut quiet = false;
    let mut reset_all = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "-v" | "--verbose" => verbose = true,
            "-q" | "--quiet" => quiet = true,
            "--reset-all" => reset_all = true,
            "-h" | "--help" => return Err(String::new()),
            other => return Err(format!("unknown argument: {}", other)),
        }
    }
    Ok(Args {
        verbosity: Verbosity::from_flags(verbose, quiet),
        reset_all,
    })
}

/// Block SIGINT/SIGTERM in every thread and turn them into `Shutdown`
/// events from a dedicated thread.
fn spawn_signal_thread(handle: LoopHandle) -> nix::Result<()> {
    let mut mask = SigSet::empty();
    mask.add(Signal::SIGINT);
    mask.add(Signal::SIGTERM);
    mask.thread_block()?;

    let spawned = std::thread::Builder::new()
        .name("rtkit-signals".into())
        .spawn(move || match mask.wait() {
            Ok(sig) => {
                tracing::info!(signal = %sig, "shutdown requested");
                handle.shutdown();
            }
            Err(e) => tracing::error!(error = %e, "sigwait failed"),
        });
    if let Err(e) = spawned {
        tracing::error!(error = %e, "failed to spawn signal thread");
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(a) => a,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("rtkitd: {}", msg);
            }
            eprintln!("{}", USAGE);
            return ExitCode::from(2);
        }
    };

    if let Err(e) = init_subscriber(args.verbosity) {
        eprintln!("rtkitd: failed to initialize logging: {}", e);
    }

    let config = DaemonConfig::from_env();
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "refusing to start");
        return ExitCode::FAILURE;
    }
    config.log();

    let backend = match SystemBackend::init() {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(error = %e, "privilege backend unavailable, refusing to start");
            return ExitCode::FAILURE;
        }
    };
    let table = ProcessTable::new(backend);

    let handle = match LoopHandle::new() {
        Ok(h) => h,
        Err(e) => {
            tracing::error!(error = %e, "failed to create event loop");
            return ExitCode::FAILURE;
        }
    };
    let authority = PkcheckAuthority::new(config.pkcheck_path.clone(), Arc::new(handle.clone()));
    let mut daemon = Daemon::new(table, authority, &config);

    tracing::info!(
        backend = daemon.table().backend().name(),
        max_realtime_priority = daemon.max_realtime_priority(),
        min_nice_level = daemon.min_nice_level(),
        "rtkitd starting"
    );

    if args.reset_all {
        daemon.reset_all();
        return ExitCode::SUCCESS;
    }

    if let Err(e) = spawn_signal_thread(handle.clone()) {
        tracing::error!(error = %e, "failed to block termination signals");
        return ExitCode::FAILURE;
    }

    let mut event_loop = EventLoop::new(daemon, handle, &config);
    match event_loop.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "event loop failed");
            ExitCode::FAILURE
        }
    }
}
