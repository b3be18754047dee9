//! Scenario tests. Each script runs in a forked child so the test process
//! keeps its own descriptors 0-2 and never waits on another test's
//! children.

use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult};

use crate::lexer::lex;
use crate::parser::parse;
use crate::shell::Shell;
use crate::types::ExitStatus;

mod collaborator_tests;
mod control_flow_tests;
mod quote_tests;
mod redirection_tests;

static FORK_LOCK: Mutex<()> = Mutex::new(());

/// Serializes tests that fork, reap or touch process-wide descriptors.
pub(crate) fn lock() -> MutexGuard<'static, ()> {
    FORK_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Run `body` against a fresh shell in a child process and return the
/// status it exits with.
pub(crate) fn in_forked_shell<F>(body: F) -> ExitStatus
where
    F: FnOnce(&mut Shell) -> ExitStatus,
{
    let _guard = lock();
    // SAFETY: the child runs test code only and leaves through `_exit`.
    match unsafe { fork() }.expect("fork") {
        ForkResult::Child => {
            let status = panic::catch_unwind(AssertUnwindSafe(|| {
                let mut shell = Shell::new();
                body(&mut shell)
            }))
            .unwrap_or(ExitStatus(255));
            let _ = std::io::Write::flush(&mut std::io::stdout());
            // SAFETY: terminates the child without running the harness's
            // exit handlers.
            unsafe { libc::_exit(status.code()) }
        }
        ForkResult::Parent { child } => match waitpid(child, None).expect("waitpid") {
            WaitStatus::Exited(_, code) => ExitStatus(code),
            WaitStatus::Signaled(_, signal, _) => ExitStatus::from_signal(signal as i32),
            other => panic!("unexpected wait status {:?}", other),
        },
    }
}

/// Run `script` the way `shexec -c` would.
pub(crate) fn run(script: &str) -> ExitStatus {
    let tree = parse(&lex(script)).expect("script parses");
    in_forked_shell(move |shell| {
        shell.execute_top_level(&tree);
        shell.run_exit_trap();
        shell.exit_requested.unwrap_or(shell.last_status)
    })
}

pub(crate) fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_default()
}
