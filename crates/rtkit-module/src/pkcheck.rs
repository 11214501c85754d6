//! `PkcheckAuthority` — default `Authority` implementation.
//!
//! Delegates each check to polkit's `pkcheck` helper, run on a short-lived
//! side thread so the service thread never blocks. The exit status maps to
//! a decision:
//!
//! | status | meaning                                   | decision  |
//! |--------|-------------------------------------------|-----------|
//! | 0      | authorized                                | Yes       |
//! | 2      | authentication required / no agent       | Challenge |
//! | other  | denied, dismissed, error, or spawn failure| No        |

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;

use rtkit_core::authority::{Authority, AuthorizationFlags, Decision, DecisionSink, Details, Subject};

pub const DEFAULT_PKCHECK: &str = "/usr/bin/pkcheck";

pub struct PkcheckAuthority {
    program: PathBuf,
    sink: Arc<dyn DecisionSink>,
}

impl PkcheckAuthority {
    pub fn new(program: impl Into<PathBuf>, sink: Arc<dyn DecisionSink>) -> Self {
        Self {
            program: program.into(),
            sink,
        }
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }
}

impl Authority for PkcheckAuthority {
    fn check_authorization(
        &mut self,
        action_id: &str,
        subject: &Subject,
        flags: AuthorizationFlags,
        details: Option<&Details>,
    ) {
        let args = pkcheck_args(action_id, subject, flags, details);
        let program = self.program.clone();
        let sink = Arc::clone(&self.sink);
        let action = action_id.to_string();

        tracing::debug!(action = %action, sender = %subject.sender, "dispatching pkcheck");

        let spawned = thread::Builder::new()
            .name("rtkit-pkcheck".into())
            .spawn(move || {
                let status = Command::new(&program)
                    .args(&args)
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status();
                let decision = match status {
                    Ok(s) => decision_from_exit(s.code()),
                    Err(e) => {
                        tracing::error!(program = %program.display(), error = %e, "failed to run pkcheck");
                        Decision::No
                    }
                };
                tracing::debug!(action = %action, ?decision, "pkcheck finished");
                sink.deliver(decision);
            });

        // The sink only posts to the event queue, so reporting here does not
        // re-enter the authorization queue.
        if let Err(e) = spawned {
            tracing::error!(error = %e, "failed to spawn pkcheck thread");
            self.sink.deliver(Decision::No);
        }
    }
}

/// Command line for one check.
fn pkcheck_args(
    action_id: &str,
    subject: &Subject,
    flags: AuthorizationFlags,
    details: Option<&Details>,
) -> Vec<String> {
    let mut args = vec!["--action-id".to_string(), action_id.to_string()];

    match (subject.pid, subject.start_time, subject.uid) {
        (Some(pid), Some(start), Some(uid)) => {
            args.push("--process".into());
            args.push(format!("{},{},{}", pid, start, uid));
        }
        _ => {
            args.push("--system-bus-name".into());
            args.push(subject.sender.clone());
        }
    }

    if flags.contains(AuthorizationFlags::ALLOW_USER_INTERACTION) {
        args.push("--allow-user-interaction".into());
    }

    for (k, v) in details.into_iter().flatten() {
        args.push("--detail".into());
        args.push(k.clone());
        args.push(v.clone());
    }
    args
}

fn decision_from_exit(code: Option<i32>) -> Decision {
    match code {
        Some(0) => Decision::Yes,
        Some(2) => Decision::Challenge,
        _ => Decision::No,
    }
}
