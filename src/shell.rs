//! The execution context threaded through every dispatcher call.

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nix::unistd::{getpid, Pid};

use crate::ast::Command;
use crate::builtins::Registry;
use crate::eval::{Evaluator, StdEvaluator};
use crate::expand::{Expander, StdExpander};
use crate::jobs::{JobControl, JobTable};
use crate::types::{ExitStatus, ShellError};
use crate::vars::Variables;

/// Runtime switches, toggled by `set` and by command-line flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOptions {
    pub errexit: bool,
    pub noclobber: bool,
    pub noexec: bool,
    pub xtrace: bool,
    pub pipefail: bool,
    pub errtrace: bool,
    pub functrace: bool,
    pub posix: bool,
    pub interactive: bool,
    /// Satisfy `/dev/fd/N` and `/dev/std*` by duplication instead of the
    /// filesystem.
    pub emulate_dev_fd: bool,
}

impl Default for ShellOptions {
    fn default() -> Self {
        Self {
            errexit: false,
            noclobber: false,
            noexec: false,
            xtrace: false,
            pipefail: false,
            errtrace: false,
            functrace: false,
            posix: false,
            interactive: false,
            emulate_dev_fd: !Path::new("/dev/fd").is_dir(),
        }
    }
}

impl ShellOptions {
    /// `set -o NAME` / `set +o NAME`.
    pub fn set_named(&mut self, name: &str, on: bool) -> bool {
        let slot = match name {
            "errexit" => &mut self.errexit,
            "noclobber" => &mut self.noclobber,
            "noexec" => &mut self.noexec,
            "xtrace" => &mut self.xtrace,
            "pipefail" => &mut self.pipefail,
            "errtrace" => &mut self.errtrace,
            "functrace" => &mut self.functrace,
            "posix" => &mut self.posix,
            _ => return false,
        };
        *slot = on;
        true
    }

    /// `set -e` style single letters.
    pub fn set_flag(&mut self, flag: char, on: bool) -> bool {
        let name = match flag {
            'e' => "errexit",
            'C' => "noclobber",
            'n' => "noexec",
            'x' => "xtrace",
            'E' => "errtrace",
            'T' => "functrace",
            _ => return false,
        };
        self.set_named(name, on)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrapCondition {
    Exit,
    Err,
    Debug,
    Return,
    Signal(i32),
}

#[derive(Debug, Clone)]
pub enum TrapAction {
    Ignore,
    Run(Rc<Command>),
}

/// Trap table. Only the hook points live in the engine; installing
/// handlers and catching signals is up to the embedder.
#[derive(Debug, Clone, Default)]
pub struct Traps {
    handlers: HashMap<TrapCondition, TrapAction>,
    pending: Vec<i32>,
}

impl Traps {
    pub fn set(&mut self, condition: TrapCondition, action: TrapAction) {
        self.handlers.insert(condition, action);
    }

    pub fn clear(&mut self, condition: TrapCondition) -> Option<TrapAction> {
        self.handlers.remove(&condition)
    }

    pub fn get(&self, condition: TrapCondition) -> Option<&TrapAction> {
        self.handlers.get(&condition)
    }

    /// The command to run for `condition`, if one is installed.
    pub fn handler(&self, condition: TrapCondition) -> Option<Rc<Command>> {
        match self.handlers.get(&condition) {
            Some(TrapAction::Run(cmd)) => Some(Rc::clone(cmd)),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (TrapCondition, &TrapAction)> {
        self.handlers.iter().map(|(condition, action)| (*condition, action))
    }

    /// Record a caught signal; its trap runs at the next dispatch.
    pub fn mark_pending(&mut self, signo: i32) {
        self.pending.push(signo);
    }

    pub fn take_pending(&mut self) -> Vec<i32> {
        std::mem::take(&mut self.pending)
    }

    /// Subshells start with every caught trap reset; ignored ones stay
    /// ignored.
    pub fn reset_for_subshell(&mut self) {
        self.handlers
            .retain(|_, action| matches!(action, TrapAction::Ignore));
        self.pending.clear();
    }
}

/// Counts pipe descriptors handled by the pipeline builder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipeLedger {
    pub created: usize,
    pub ends_closed: usize,
}

pub struct Shell {
    pub name: String,
    pub options: ShellOptions,
    pub vars: Variables,
    pub registry: Registry,
    pub traps: Traps,
    pub last_status: ExitStatus,
    pub last_async_pid: Option<Pid>,
    pub line_number: usize,
    /// Set once `exit` ran or a fatal error occurred.
    pub exit_requested: Option<ExitStatus>,
    pub pipe_ledger: PipeLedger,
    pub(crate) jobs: Box<dyn JobControl>,
    pub(crate) expander: Rc<dyn Expander>,
    pub(crate) evaluator: Rc<dyn Evaluator>,
    pub(crate) loop_level: usize,
    pub(crate) function_depth: usize,
    pub(crate) subshell_level: usize,
    /// This process is a forked child of the top-level shell.
    pub(crate) forked: bool,
    /// Pids forked for the pipeline being built, not yet handed to job
    /// control.
    pub(crate) pipeline_pids: Vec<Pid>,
    /// Raised by `exec` without a command: keep the current redirections.
    pub(crate) redirections_persist: bool,
    /// Set while running a trap handler so handlers do not nest.
    pub(crate) running_trap: bool,
    interrupted: Arc<AtomicBool>,
    shell_pid: Pid,
}

impl Default for Shell {
    fn default() -> Self {
        Self::new()
    }
}

impl Shell {
    pub fn new() -> Self {
        let interrupted = Arc::new(AtomicBool::new(false));
        Self {
            name: "shexec".to_string(),
            options: ShellOptions::default(),
            vars: Variables::from_env(),
            registry: Registry::with_defaults(),
            traps: Traps::default(),
            last_status: ExitStatus::SUCCESS,
            last_async_pid: None,
            line_number: 0,
            exit_requested: None,
            pipe_ledger: PipeLedger::default(),
            jobs: Box::new(JobTable::new()),
            expander: Rc::new(StdExpander),
            evaluator: Rc::new(StdEvaluator),
            loop_level: 0,
            function_depth: 0,
            subshell_level: 0,
            forked: false,
            pipeline_pids: Vec::new(),
            redirections_persist: false,
            running_trap: false,
            interrupted,
            shell_pid: getpid(),
        }
    }

    pub fn with_options(mut self, options: ShellOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_job_control(mut self, jobs: Box<dyn JobControl>) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_expander(mut self, expander: Rc<dyn Expander>) -> Self {
        self.expander = expander;
        self
    }

    pub fn with_evaluator(mut self, evaluator: Rc<dyn Evaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Flag an embedder raises (typically from a SIGINT handler) to abort
    /// the command currently running.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    /// Consume a raised interrupt. With a SIGINT trap installed the trap is
    /// queued for the next dispatch instead of aborting the command.
    pub fn check_interrupt(&mut self) -> Result<(), ShellError> {
        if !self.interrupted.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        match self.traps.get(TrapCondition::Signal(libc::SIGINT)) {
            Some(TrapAction::Ignore) => Ok(()),
            Some(TrapAction::Run(_)) => {
                self.traps.mark_pending(libc::SIGINT);
                Ok(())
            }
            None => Err(ShellError::Interrupted),
        }
    }

    /// `$$`: the pid of the top-level shell, also inside subshells.
    pub fn shell_pid(&self) -> Pid {
        self.shell_pid
    }

    pub fn subshell_level(&self) -> usize {
        self.subshell_level
    }

    pub fn loop_level(&self) -> usize {
        self.loop_level
    }

    pub fn function_depth(&self) -> usize {
        self.function_depth
    }

    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name)
    }

    /// Print a diagnostic the way the shell reports command failures.
    pub fn report(&self, err: &ShellError) {
        self.report_message(&err.to_string());
    }

    pub fn report_message(&self, message: &str) {
        let mut stderr = io::stderr().lock();
        let _ = if !self.options.interactive && self.line_number > 0 {
            writeln!(stderr, "{}: line {}: {}", self.name, self.line_number, message)
        } else {
            writeln!(stderr, "{}: {}", self.name, message)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_letters() {
        let mut options = ShellOptions::default();
        assert!(options.set_flag('e', true));
        assert!(options.set_flag('C', true));
        assert!(options.errexit && options.noclobber);
        assert!(options.set_named("pipefail", true));
        assert!(!options.set_named("nonsense", true));
        assert!(!options.set_flag('q', true));
    }

    #[test]
    fn subshell_keeps_only_ignored_traps() {
        let mut traps = Traps::default();
        traps.set(TrapCondition::Exit, TrapAction::Run(Rc::new(Command::simple(&["true"]))));
        traps.set(TrapCondition::Signal(libc::SIGINT), TrapAction::Ignore);
        traps.mark_pending(libc::SIGUSR1);
        traps.reset_for_subshell();
        assert!(traps.get(TrapCondition::Exit).is_none());
        assert!(matches!(traps.get(TrapCondition::Signal(libc::SIGINT)), Some(TrapAction::Ignore)));
        assert!(traps.take_pending().is_empty());
    }

    #[test]
    fn interrupt_flag_is_consumed_once() {
        let mut shell = Shell::new();
        shell.interrupt_flag().store(true, Ordering::SeqCst);
        assert!(matches!(shell.check_interrupt(), Err(ShellError::Interrupted)));
        assert!(shell.check_interrupt().is_ok());
    }

    #[test]
    fn interrupt_with_trap_is_queued() {
        let mut shell = Shell::new();
        let handler = Rc::new(Command::simple(&["true"]));
        shell.traps.set(TrapCondition::Signal(libc::SIGINT), TrapAction::Run(handler));
        shell.interrupt_flag().store(true, Ordering::SeqCst);
        assert!(shell.check_interrupt().is_ok());
        assert_eq!(shell.traps.take_pending(), [libc::SIGINT]);
    }
}
