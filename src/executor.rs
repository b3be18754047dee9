//! The dispatcher: walks a command tree, decides what runs in a child, and
//! hands each node kind to its handler.

use std::io::{self, Write};
use std::rc::Rc;

use nix::errno::Errno;
use nix::unistd;
use tracing::{debug, trace};

use crate::ast::{
    ArithForCommand, CaseCommand, CaseTerminator, Command, CommandFlags, CommandKind, CondExpr,
    Connection, Connector, ForCommand, IfCommand, LoopCommand, SelectCommand, SimpleCommand,
};
use crate::expand::pattern_matches;
use crate::fds::CloseSet;
use crate::invoke::Target;
use crate::process::{self, in_child, Forked, Launched, Pipes};
use crate::redir::{self, RedirMode};
use crate::shell::{Shell, TrapCondition};
use crate::types::{ExecuteResult, ExitStatus, Flow, ShellError};
use crate::vars::ScopeKind;
use crate::word::Word;

/// Outcome of one trip through a loop body.
enum Step {
    Next(ExitStatus),
    Stop(ExitStatus),
}

/// Translate `break`/`continue` aimed at this loop; deeper levels keep
/// unwinding with one level used up.
fn loop_step(result: ExecuteResult) -> Result<Step, Flow> {
    match result {
        Ok(status) => Ok(Step::Next(status)),
        Err(Flow::Break(1)) => Ok(Step::Stop(ExitStatus::SUCCESS)),
        Err(Flow::Break(n)) => Err(Flow::Break(n - 1)),
        Err(Flow::Continue(1)) => Ok(Step::Next(ExitStatus::SUCCESS)),
        Err(Flow::Continue(n)) => Err(Flow::Continue(n - 1)),
        Err(flow) => Err(flow),
    }
}

/// Quote a traced word the way it would have to be typed.
fn trace_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-+./=:,@%^".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', "'\\''"))
    }
}

impl Shell {
    /// Run one complete command tree, e.g. a line read by the REPL.
    pub fn execute_top_level(&mut self, cmd: &Command) -> ExitStatus {
        self.jobs.reap();
        let result = self.execute_command(cmd, CommandFlags::empty(), false, Pipes::NONE, &CloseSet::new());
        let status = self.settle(result);
        self.last_status = status;
        status
    }

    /// Run the EXIT trap once; called when the shell or a subshell ends.
    pub fn run_exit_trap(&mut self) {
        let Some(handler) = self.traps.handler(TrapCondition::Exit) else {
            return;
        };
        self.traps.clear(TrapCondition::Exit);
        let saved = self.last_status;
        self.running_trap = true;
        let result = self.execute_command(&handler, CommandFlags::empty(), false, Pipes::NONE, &CloseSet::new());
        self.running_trap = false;
        self.settle(result);
        self.last_status = saved;
    }

    /// Collapse a dispatcher result into a status, reporting errors and
    /// remembering an `exit`.
    pub(crate) fn settle(&mut self, result: ExecuteResult) -> ExitStatus {
        match result {
            Ok(status) => status,
            Err(Flow::Exit(status)) => {
                self.exit_requested = Some(status);
                status
            }
            Err(Flow::Error(err)) => {
                self.report(&err);
                let status = err.status();
                if err.is_fatal() {
                    self.exit_requested = Some(status);
                }
                status
            }
            Err(flow) => process::flow_status(flow, self.last_status),
        }
    }

    /// Run the handler for `condition`, leaving `$?` untouched. Only `exit`
    /// inside a handler escapes it.
    pub(crate) fn run_trap(&mut self, condition: TrapCondition) -> ExecuteResult {
        let saved = self.last_status;
        if self.running_trap {
            return Ok(saved);
        }
        let Some(handler) = self.traps.handler(condition) else {
            return Ok(saved);
        };
        trace!(?condition, "running trap");
        self.running_trap = true;
        let result = self.execute_command(&handler, CommandFlags::IGNORE_RESULT, false, Pipes::NONE, &CloseSet::new());
        self.running_trap = false;
        self.last_status = saved;
        match result {
            Err(Flow::Exit(status)) => Err(Flow::Exit(status)),
            Err(Flow::Error(err)) => {
                self.report(&err);
                Ok(saved)
            }
            _ => Ok(saved),
        }
    }

    fn run_pending_traps(&mut self) -> Result<(), Flow> {
        if self.running_trap {
            return Ok(());
        }
        for signo in self.traps.take_pending() {
            self.run_trap(TrapCondition::Signal(signo))?;
        }
        Ok(())
    }

    /// A failed command under `set -e` ends the shell; the ERR trap runs
    /// first either way.
    fn check_failure(&mut self, status: ExitStatus, flags: CommandFlags) -> ExecuteResult {
        if status.is_success() || flags.intersects(CommandFlags::IGNORE_RESULT | CommandFlags::INVERT_RESULT) {
            return Ok(status);
        }
        self.last_status = status;
        self.run_trap(TrapCondition::Err)?;
        if self.options.errexit {
            debug!(%status, "errexit");
            return Err(Flow::Exit(status));
        }
        Ok(status)
    }

    /// Run `cmd` with `extra` flags ORed into its own for this call only.
    pub(crate) fn execute_command(
        &mut self,
        cmd: &Command,
        extra: CommandFlags,
        asynchronous: bool,
        pipes: Pipes,
        close_set: &CloseSet,
    ) -> ExecuteResult {
        self.execute_with_flags(cmd, cmd.flags | extra, asynchronous, pipes, close_set)
    }

    pub(crate) fn execute_with_flags(
        &mut self,
        cmd: &Command,
        mut flags: CommandFlags,
        asynchronous: bool,
        pipes: Pipes,
        close_set: &CloseSet,
    ) -> ExecuteResult {
        // Partial-script mode: read everything, run nothing.
        if self.options.noexec && !self.options.interactive {
            return Ok(ExitStatus::SUCCESS);
        }
        self.check_interrupt()?;
        self.run_pending_traps()?;
        if cmd.line > 0 {
            self.line_number = cmd.line;
        }
        // Nothing under `!` triggers errexit or the ERR trap.
        if flags.contains(CommandFlags::INVERT_RESULT) {
            flags |= CommandFlags::IGNORE_RESULT;
        }
        if flags.contains(CommandFlags::TIME_EXECUTION) && !asynchronous {
            return self.execute_timed(cmd, flags, asynchronous, pipes, close_set);
        }

        let user_subshell = matches!(cmd.kind, CommandKind::Subshell(_));
        if user_subshell && flags.contains(CommandFlags::SKIP_FORK) && pipes.is_empty() && !asynchronous {
            // Already the last thing a child does; no second fork needed.
            let status = self.execute_in_subshell(cmd, flags - CommandFlags::SKIP_FORK, false, pipes, close_set);
            return Ok(status);
        }
        let needs_fork = user_subshell
            || flags.intersects(CommandFlags::RUN_IN_SUBSHELL | CommandFlags::FORCE_SUBSHELL)
            || (cmd.is_control_structure() && (asynchronous || !pipes.is_empty()));
        if needs_fork {
            return self.execute_forked(cmd, flags, asynchronous, pipes, close_set);
        }

        if let CommandKind::Simple(simple) = &cmd.kind {
            let status = self.execute_simple(cmd, simple, flags, asynchronous, pipes, close_set)?;
            if pipes.output.is_some() || asynchronous {
                return Ok(status);
            }
            let status = self.finish(status, flags);
            return self.check_failure(status, flags);
        }

        let frame = if !cmd.redirects.is_empty() && !flags.contains(CommandFlags::REDIRECTS_APPLIED) {
            match redir::do_redirections(self, &cmd.redirects, RedirMode::Undoable) {
                Ok(frame) => Some(frame),
                Err(err) => {
                    self.report(&err);
                    let status = self.finish(ExitStatus::FAILURE, flags);
                    return self.check_failure(status, flags);
                }
            }
        } else {
            None
        };

        let inherit = flags & CommandFlags::IGNORE_RESULT;
        let result = match &cmd.kind {
            CommandKind::Simple(_) | CommandKind::Subshell(_) => unreachable!("handled above"),
            CommandKind::Connection(conn) if conn.connector == Connector::Pipe => {
                let first_flags = flags & (CommandFlags::STDIN_FROM_NULL | CommandFlags::IGNORE_RESULT);
                self.execute_pipeline(cmd, first_flags, asynchronous, pipes, close_set)
                    .and_then(|status| self.check_pipefail(status, flags))
            }
            CommandKind::Connection(conn) => self.execute_connection(conn, inherit, close_set),
            CommandKind::For(f) => self.in_loop(|shell| shell.execute_for(f, inherit)),
            CommandKind::ArithFor(f) => self.in_loop(|shell| shell.execute_arith_for(f, inherit)),
            CommandKind::Select(s) => self.in_loop(|shell| shell.execute_select(s, inherit)),
            CommandKind::While(l) => self.in_loop(|shell| shell.execute_while(l, true, inherit)),
            CommandKind::Until(l) => self.in_loop(|shell| shell.execute_while(l, false, inherit)),
            CommandKind::Case(c) => self.execute_case(c, inherit),
            CommandKind::If(i) => self.execute_if(i, inherit),
            CommandKind::Group(inner) => self.execute_command(inner, inherit, false, Pipes::NONE, close_set),
            CommandKind::Arith(a) => self.execute_arith(&a.expression),
            CommandKind::Cond(c) => self.execute_cond(c),
            CommandKind::FunctionDef(def) => {
                debug!(function = %def.name, "defining function");
                self.registry.bind_function(&def.name, Rc::clone(&def.body));
                Ok(ExitStatus::SUCCESS)
            }
        };
        if let Some(frame) = frame {
            frame.restore();
        }
        let status = result?;
        Ok(self.finish(status, flags))
    }

    fn finish(&mut self, status: ExitStatus, flags: CommandFlags) -> ExitStatus {
        let status = if flags.contains(CommandFlags::INVERT_RESULT) {
            status.invert()
        } else {
            status
        };
        self.last_status = status;
        status
    }

    /// With pipefail the rightmost failing stage decides, and it has to be
    /// treated as a failure even when the last stage itself succeeded.
    fn check_pipefail(&mut self, status: ExitStatus, flags: CommandFlags) -> ExecuteResult {
        let last_stage = self.jobs.last_statuses().last().copied();
        if self.options.pipefail && !status.is_success() && last_stage.map_or(false, ExitStatus::is_success) {
            self.check_failure(status, flags)?;
        }
        Ok(status)
    }

    fn execute_forked(
        &mut self,
        cmd: &Command,
        flags: CommandFlags,
        asynchronous: bool,
        pipes: Pipes,
        close_set: &CloseSet,
    ) -> ExecuteResult {
        match self.make_child(&cmd.describe())? {
            Forked::Child => in_child(|| self.execute_in_subshell(cmd, flags, asynchronous, pipes, close_set)),
            Forked::Parent(pid) => {
                // The pipeline builder owns the pipe ends; it closes them.
                if pipes.output.is_some() {
                    return Ok(ExitStatus::SUCCESS);
                }
                if asynchronous {
                    self.stop_pipeline(true);
                    self.last_async_pid = Some(pid);
                    return Ok(ExitStatus::SUCCESS);
                }
                self.stop_pipeline(false);
                let status = self.wait_child(pid)?;
                let status = self.finish(status, flags);
                self.check_failure(status, flags)
            }
        }
    }

    fn in_loop<F>(&mut self, body: F) -> ExecuteResult
    where
        F: FnOnce(&mut Shell) -> ExecuteResult,
    {
        self.loop_level += 1;
        let result = body(self);
        self.loop_level -= 1;
        result
    }

    fn loop_body(&mut self, body: &Command, inherit: CommandFlags) -> Result<Step, Flow> {
        self.check_interrupt()?;
        loop_step(self.execute_command(body, inherit, false, Pipes::NONE, &CloseSet::new()))
    }

    fn expand_words(&mut self, words: &[Word]) -> Result<Vec<String>, ShellError> {
        let expander = Rc::clone(&self.expander);
        expander.expand_words(self, words)
    }

    fn expand_string(&mut self, word: &Word) -> Result<String, ShellError> {
        let expander = Rc::clone(&self.expander);
        expander.expand_string(self, word)
    }

    fn expand_pattern(&mut self, word: &Word) -> Result<String, ShellError> {
        let expander = Rc::clone(&self.expander);
        expander.expand_pattern(self, word)
    }

    fn xtrace(&self, assignments: &[(String, String)], words: &[String]) {
        let prefix = self.var("PS4").unwrap_or("+ ");
        let mut line = prefix.to_string();
        let parts = assignments
            .iter()
            .map(|(name, value)| format!("{}={}", name, trace_quote(value)))
            .chain(words.iter().map(|w| trace_quote(w)));
        line.push_str(&parts.collect::<Vec<_>>().join(" "));
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "{}", line);
    }

    fn resolve(&self, name: &str, flags: CommandFlags) -> Option<Target> {
        let builtin = self.registry.lookup(name);
        if self.options.posix {
            if let Some(b) = builtin.filter(|b| b.special) {
                return Some(Target::Builtin(b));
            }
        }
        if !flags.contains(CommandFlags::NO_FUNCTION_LOOKUP) {
            if let Some(body) = self.registry.lookup_function(name) {
                return Some(Target::Function(body));
            }
        }
        builtin.map(Target::Builtin)
    }

    fn execute_simple(
        &mut self,
        cmd: &Command,
        simple: &SimpleCommand,
        flags: CommandFlags,
        asynchronous: bool,
        pipes: Pipes,
        close_set: &CloseSet,
    ) -> ExecuteResult {
        let words = if flags.contains(CommandFlags::INHIBIT_EXPANSION) {
            simple.words.iter().map(Word::unquoted).collect()
        } else {
            self.expand_words(&simple.words)?
        };
        let mut assignments = Vec::with_capacity(simple.assignments.len());
        for assignment in &simple.assignments {
            let value = self.expand_string(&assignment.value)?;
            assignments.push((assignment.name.clone(), value));
        }
        if self.options.xtrace {
            self.xtrace(&assignments, &words);
        }
        self.run_trap(TrapCondition::Debug)?;

        let Some(name) = words.first() else {
            return self.execute_null_command(cmd, &assignments, flags);
        };
        let target = self.resolve(name, flags);
        trace!(command = %name, builtin = target.is_some(), "simple command");

        self.vars.push_scope(ScopeKind::Temporary);
        for (name, value) in &assignments {
            if let Err(err) = self.vars.set_local(name, value, true) {
                self.vars.pop_scope();
                self.report(&err);
                return Ok(ExitStatus::FAILURE);
            }
        }
        let launched = match &target {
            Some(target) if pipes.is_empty() && !asynchronous => self
                .execute_builtin_or_function(&words, target, cmd, flags)
                .map(Launched::Finished),
            Some(target) => self
                .execute_subshell_builtin_or_function(&words, target, cmd, flags, asynchronous, pipes, close_set)
                .map_err(Flow::from),
            None => self
                .execute_disk_command(&words, cmd, flags, asynchronous, pipes, close_set)
                .map_err(Flow::from),
        };
        let keeps_assignments =
            self.options.posix && matches!(&target, Some(Target::Builtin(b)) if b.special);
        if keeps_assignments {
            self.vars.merge_temporary();
        } else {
            self.vars.pop_scope();
        }

        match launched? {
            Launched::Finished(status) => Ok(status),
            Launched::Child(pid) => {
                if pipes.output.is_some() {
                    return Ok(ExitStatus::SUCCESS);
                }
                if asynchronous {
                    self.stop_pipeline(true);
                    self.last_async_pid = Some(pid);
                    return Ok(ExitStatus::SUCCESS);
                }
                self.stop_pipeline(false);
                Ok(self.wait_child(pid)?)
            }
        }
    }

    /// Only assignments and redirections: assignments stick, redirections
    /// are performed and undone at once (creating or truncating files).
    fn execute_null_command(
        &mut self,
        cmd: &Command,
        assignments: &[(String, String)],
        flags: CommandFlags,
    ) -> ExecuteResult {
        for (name, value) in assignments {
            if let Err(err) = self.vars.set(name, value) {
                self.report(&err);
                return Ok(ExitStatus::FAILURE);
            }
        }
        if !cmd.redirects.is_empty() && !flags.contains(CommandFlags::REDIRECTS_APPLIED) {
            match redir::do_redirections(self, &cmd.redirects, RedirMode::Undoable) {
                Ok(frame) => frame.restore(),
                Err(err) => {
                    self.report(&err);
                    return Ok(ExitStatus::FAILURE);
                }
            }
        }
        Ok(ExitStatus::SUCCESS)
    }

    fn execute_connection(&mut self, conn: &Connection, inherit: CommandFlags, close_set: &CloseSet) -> ExecuteResult {
        match conn.connector {
            Connector::Background => {
                let mut extra = inherit | CommandFlags::BACKGROUND;
                if !redir::stdin_redirects(&conn.first.redirects) {
                    extra |= CommandFlags::STDIN_FROM_NULL;
                }
                self.execute_command(&conn.first, extra, true, Pipes::NONE, close_set)?;
                match &conn.second {
                    Some(second) => self.execute_command(second, inherit, false, Pipes::NONE, close_set),
                    None => Ok(ExitStatus::SUCCESS),
                }
            }
            Connector::Sequence => {
                let status = self.execute_command(&conn.first, inherit, false, Pipes::NONE, &CloseSet::new())?;
                match &conn.second {
                    Some(second) => self.execute_command(second, inherit, false, Pipes::NONE, close_set),
                    None => Ok(status),
                }
            }
            Connector::And | Connector::Or => {
                let status = self.execute_command(
                    &conn.first,
                    inherit | CommandFlags::IGNORE_RESULT,
                    false,
                    Pipes::NONE,
                    close_set,
                )?;
                let run_second = (conn.connector == Connector::And) == status.is_success();
                match &conn.second {
                    Some(second) if run_second => self.execute_command(second, inherit, false, Pipes::NONE, close_set),
                    _ => Ok(status),
                }
            }
            Connector::Pipe => Err(ShellError::BadCommandKind("pipe outside a pipeline".to_string()).into()),
        }
    }

    fn loop_items(&mut self, words: &Option<Vec<Word>>) -> Result<Vec<String>, ShellError> {
        match words {
            Some(words) => self.expand_words(words),
            None => Ok(self.vars.positional().to_vec()),
        }
    }

    fn execute_for(&mut self, f: &ForCommand, inherit: CommandFlags) -> ExecuteResult {
        let items = self.loop_items(&f.words)?;
        let mut status = ExitStatus::SUCCESS;
        for item in items {
            self.vars.set(&f.name, &item)?;
            self.run_trap(TrapCondition::Debug)?;
            match self.loop_body(&f.body, inherit)? {
                Step::Next(s) => status = s,
                Step::Stop(s) => {
                    status = s;
                    break;
                }
            }
        }
        Ok(status)
    }

    fn arith_value(&mut self, word: &Word, empty: i64) -> Result<i64, ShellError> {
        let text = self.expand_string(word)?;
        if text.trim().is_empty() {
            return Ok(empty);
        }
        let evaluator = Rc::clone(&self.evaluator);
        evaluator.arith(self, &text)
    }

    fn execute_arith_for(&mut self, f: &ArithForCommand, inherit: CommandFlags) -> ExecuteResult {
        let mut status = ExitStatus::SUCCESS;
        let arith_error = |shell: &mut Shell, err: ShellError| {
            shell.report(&err);
            Ok(ExitStatus::FAILURE)
        };
        if let Err(err) = self.arith_value(&f.init, 0) {
            return arith_error(self, err);
        }
        loop {
            match self.arith_value(&f.test, 1) {
                Ok(0) => break,
                Ok(_) => {}
                Err(err) => return arith_error(self, err),
            }
            match self.loop_body(&f.body, inherit)? {
                Step::Next(s) => status = s,
                Step::Stop(s) => {
                    status = s;
                    break;
                }
            }
            if let Err(err) = self.arith_value(&f.step, 0) {
                return arith_error(self, err);
            }
        }
        Ok(status)
    }

    fn execute_while(&mut self, l: &LoopCommand, is_while: bool, inherit: CommandFlags) -> ExecuteResult {
        let mut status = ExitStatus::SUCCESS;
        loop {
            self.check_interrupt()?;
            let test = self.execute_command(
                &l.test,
                inherit | CommandFlags::IGNORE_RESULT,
                false,
                Pipes::NONE,
                &CloseSet::new(),
            );
            let passed = match loop_step(test)? {
                Step::Next(s) => s.is_success(),
                Step::Stop(_) => break,
            };
            if passed != is_while {
                break;
            }
            match self.loop_body(&l.body, inherit)? {
                Step::Next(s) => status = s,
                Step::Stop(s) => {
                    status = s;
                    break;
                }
            }
        }
        Ok(status)
    }

    /// One line from fd 0, read a byte at a time so nothing past the newline
    /// is consumed. `None` at end of input.
    fn read_reply() -> Result<Option<String>, ShellError> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match unistd::read(0, &mut byte) {
                Ok(0) if line.is_empty() => return Ok(None),
                Ok(0) => break,
                Ok(_) if byte[0] == b'\n' => break,
                Ok(_) => line.push(byte[0]),
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(ShellError::nix(errno, "read error")),
            }
        }
        Ok(Some(String::from_utf8_lossy(&line).trim().to_string()))
    }

    fn select_menu(items: &[String]) {
        let width = items.len().to_string().len();
        let mut stderr = io::stderr().lock();
        for (index, item) in items.iter().enumerate() {
            let _ = writeln!(stderr, "{:>width$}) {}", index + 1, item, width = width);
        }
    }

    fn execute_select(&mut self, s: &SelectCommand, inherit: CommandFlags) -> ExecuteResult {
        let items = self.loop_items(&s.words)?;
        if items.is_empty() {
            return Ok(ExitStatus::SUCCESS);
        }
        let mut show_menu = true;
        loop {
            if show_menu {
                Self::select_menu(&items);
            }
            let prompt = self.var("PS3").unwrap_or("#? ").to_string();
            {
                let mut stderr = io::stderr().lock();
                let _ = write!(stderr, "{}", prompt);
                let _ = stderr.flush();
            }
            let Some(reply) = Self::read_reply()? else {
                let _ = writeln!(io::stderr());
                return Ok(ExitStatus::FAILURE);
            };
            if reply.is_empty() {
                show_menu = true;
                continue;
            }
            show_menu = false;
            let choice = reply
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| items.get(i))
                .cloned()
                .unwrap_or_default();
            self.vars.set("REPLY", &reply)?;
            self.vars.set(&s.name, &choice)?;
            self.run_trap(TrapCondition::Debug)?;
            // Only `break` or end of input leaves a select loop.
            if let Step::Stop(status) = self.loop_body(&s.body, inherit)? {
                return Ok(status);
            }
        }
    }

    fn execute_case(&mut self, case: &CaseCommand, inherit: CommandFlags) -> ExecuteResult {
        self.run_trap(TrapCondition::Debug)?;
        let word = self.expand_string(&case.word)?;
        let mut status = ExitStatus::SUCCESS;
        let mut falling_through = false;
        for clause in &case.clauses {
            let mut matched = falling_through;
            if !matched {
                for pattern in &clause.patterns {
                    let pattern = self.expand_pattern(pattern)?;
                    if pattern_matches(&pattern, &word) {
                        matched = true;
                        break;
                    }
                }
            }
            if !matched {
                continue;
            }
            status = match &clause.body {
                Some(body) => self.execute_command(body, inherit, false, Pipes::NONE, &CloseSet::new())?,
                None => ExitStatus::SUCCESS,
            };
            match clause.terminator {
                CaseTerminator::Break => break,
                CaseTerminator::FallThrough => falling_through = true,
                CaseTerminator::TestNext => falling_through = false,
            }
        }
        Ok(status)
    }

    fn execute_if(&mut self, i: &IfCommand, inherit: CommandFlags) -> ExecuteResult {
        let test = self.execute_command(
            &i.test,
            inherit | CommandFlags::IGNORE_RESULT,
            false,
            Pipes::NONE,
            &CloseSet::new(),
        )?;
        let branch = if test.is_success() { &i.then_branch } else { &i.else_branch };
        match branch {
            Some(branch) => self.execute_command(branch, inherit, false, Pipes::NONE, &CloseSet::new()),
            None => Ok(ExitStatus::SUCCESS),
        }
    }

    fn execute_arith(&mut self, expression: &[Word]) -> ExecuteResult {
        self.run_trap(TrapCondition::Debug)?;
        let mut parts = Vec::with_capacity(expression.len());
        for word in expression {
            parts.push(self.expand_string(word)?);
        }
        let text = parts.join(" ");
        if self.options.xtrace {
            let mut stderr = io::stderr().lock();
            let _ = writeln!(stderr, "{}(( {} ))", self.var("PS4").unwrap_or("+ "), text);
        }
        let evaluator = Rc::clone(&self.evaluator);
        match evaluator.arith(self, &text) {
            Ok(value) => Ok(ExitStatus::from_bool(value != 0)),
            Err(err) => {
                self.report(&err);
                Ok(ExitStatus::FAILURE)
            }
        }
    }

    fn execute_cond(&mut self, expr: &CondExpr) -> ExecuteResult {
        self.run_trap(TrapCondition::Debug)?;
        match self.eval_cond(expr) {
            Ok(result) => Ok(ExitStatus::from_bool(result)),
            Err(err) => {
                self.report(&err);
                Ok(ExitStatus::BAD_USAGE)
            }
        }
    }

    fn eval_cond(&mut self, expr: &CondExpr) -> Result<bool, ShellError> {
        let evaluator = Rc::clone(&self.evaluator);
        match expr {
            CondExpr::And(left, right) => Ok(self.eval_cond(left)? && self.eval_cond(right)?),
            CondExpr::Or(left, right) => Ok(self.eval_cond(left)? || self.eval_cond(right)?),
            CondExpr::Not(inner) => Ok(!self.eval_cond(inner)?),
            CondExpr::Unary { op, arg } => {
                let arg = self.expand_string(arg)?;
                evaluator.unary_test(self, op, &arg)
            }
            CondExpr::Binary { op, left, right } => {
                let left = self.expand_string(left)?;
                let right = if matches!(op.as_str(), "==" | "=" | "!=") {
                    self.expand_pattern(right)?
                } else {
                    self.expand_string(right)?
                };
                evaluator.binary_test(self, op, &left, &right)
            }
            CondExpr::Term(word) => Ok(!self.expand_string(word)?.is_empty()),
        }
    }
}
