//! Running builtins and shell functions, in-process or in a forked child.

use std::io::{self, Write};
use std::rc::Rc;

use tracing::debug;

use crate::ast::{Command, CommandFlags};
use crate::builtins::Builtin;
use crate::fds::CloseSet;
use crate::process::{in_child, Forked, Launched, Pipes};
use crate::redir::{self, RedirMode, UndoFrame};
use crate::shell::{Shell, TrapAction, TrapCondition};
use crate::types::{ExecuteResult, ExitStatus, Flow, ShellError};
use crate::vars::ScopeKind;

/// What a command name resolved to, short of a program on disk.
#[derive(Debug, Clone)]
pub(crate) enum Target {
    Builtin(Builtin),
    Function(Rc<Command>),
}

impl Shell {
    /// Run in the shell process itself so the command can change the
    /// shell's state. Redirections are undone afterwards unless `exec`
    /// asked for them to stay.
    pub(crate) fn execute_builtin_or_function(
        &mut self,
        argv: &[String],
        target: &Target,
        cmd: &Command,
        flags: CommandFlags,
    ) -> ExecuteResult {
        let frame = if flags.contains(CommandFlags::REDIRECTS_APPLIED) {
            UndoFrame::default()
        } else {
            match redir::do_redirections(self, &cmd.redirects, RedirMode::Undoable) {
                Ok(frame) => frame,
                Err(err) => {
                    self.report(&err);
                    return Ok(ExitStatus::FAILURE);
                }
            }
        };
        self.redirections_persist = false;

        let result = self.run_target(argv, target, flags);

        let _ = io::stdout().flush();
        if std::mem::take(&mut self.redirections_persist) {
            frame.persist();
        } else {
            frame.restore();
        }
        result
    }

    /// Piped or backgrounded builtins and functions run in a child that
    /// exits when they finish.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn execute_subshell_builtin_or_function(
        &mut self,
        argv: &[String],
        target: &Target,
        cmd: &Command,
        flags: CommandFlags,
        asynchronous: bool,
        pipes: Pipes,
        close_set: &CloseSet,
    ) -> Result<Launched, ShellError> {
        match self.make_child(&argv[0])? {
            Forked::Child => in_child(|| {
                self.enter_subshell();
                if let Err(err) = self.prepare_child(cmd, flags, asynchronous, pipes, close_set) {
                    self.report(&err);
                    return ExitStatus::FAILURE;
                }
                let result = self.run_target(argv, target, flags);
                let status = self.settle(result);
                self.exit_requested.unwrap_or(status)
            }),
            Forked::Parent(pid) => Ok(Launched::Child(pid)),
        }
    }

    fn run_target(&mut self, argv: &[String], target: &Target, flags: CommandFlags) -> ExecuteResult {
        match target {
            Target::Builtin(builtin) => self.run_builtin(builtin, &argv[1..], flags),
            Target::Function(body) => self.call_function(&argv[0], Rc::clone(body), &argv[1..], flags),
        }
    }

    fn run_builtin(&mut self, builtin: &Builtin, args: &[String], flags: CommandFlags) -> ExecuteResult {
        // Commands run by the builtin inherit the caller's ignored result.
        let suspend_errexit =
            builtin.runs_commands && flags.contains(CommandFlags::IGNORE_RESULT) && self.options.errexit;
        if suspend_errexit {
            self.options.errexit = false;
        }
        let result = (builtin.func)(self, args);
        if suspend_errexit {
            self.options.errexit = true;
        }
        result
    }

    /// Call a function body with its own variable scope and positional
    /// parameters. `return` inside it stops here. A call whose result is
    /// ignored runs its whole body with the result ignored.
    pub(crate) fn call_function(
        &mut self,
        name: &str,
        body: Rc<Command>,
        args: &[String],
        flags: CommandFlags,
    ) -> ExecuteResult {
        debug!(function = name, depth = self.function_depth + 1, "calling function");
        self.vars.push_scope(ScopeKind::Function);
        self.vars.push_positional(args.to_vec());
        self.function_depth += 1;
        let saved_loop_level = std::mem::replace(&mut self.loop_level, 0);
        let saved_traps = self.hide_traps_from_function();

        let inherit = flags & CommandFlags::IGNORE_RESULT;
        let result = match self.execute_command(&body, inherit, false, Pipes::NONE, &CloseSet::new()) {
            Err(Flow::Return(status)) => Ok(status),
            other => other,
        };
        if let Ok(status) = result {
            self.last_status = status;
        }
        let trap_result = self.run_trap(TrapCondition::Return);

        for (condition, action) in saved_traps {
            self.traps.set(condition, action);
        }
        self.loop_level = saved_loop_level;
        self.function_depth -= 1;
        self.vars.pop_positional();
        self.vars.pop_scope();
        debug!(function = name, "function returned");
        match trap_result {
            Err(flow) => Err(flow),
            Ok(_) => result,
        }
    }

    /// Functions only see ERR, DEBUG and RETURN traps when errtrace or
    /// functrace is on. Returns the traps to put back afterwards.
    fn hide_traps_from_function(&mut self) -> Vec<(TrapCondition, TrapAction)> {
        let mut hidden = Vec::new();
        if !self.options.errtrace {
            if let Some(action) = self.traps.clear(TrapCondition::Err) {
                hidden.push((TrapCondition::Err, action));
            }
        }
        if !self.options.functrace {
            for condition in [TrapCondition::Debug, TrapCondition::Return] {
                if let Some(action) = self.traps.clear(condition) {
                    hidden.push((condition, action));
                }
            }
        }
        hidden
    }

    /// Call the function `name` directly, outside of any command tree; used
    /// for trap handlers and by embedders.
    pub fn execute_function_call(&mut self, name: &str, argv: &[String]) -> ExitStatus {
        let Some(body) = self.registry.lookup_function(name) else {
            self.report(&ShellError::ExecNotFound(name.to_string()));
            self.last_status = ExitStatus::NOT_FOUND;
            return self.last_status;
        };
        let result = self.call_function(name, body, argv, CommandFlags::empty());
        let status = self.settle(result);
        self.last_status = status;
        status
    }
}
