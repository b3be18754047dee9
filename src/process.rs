//! Forking, pipe wiring and handing programs to `execve`.

use std::ffi::CString;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::io::RawFd;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{signal, SigHandler, Signal};
use nix::unistd::{execve, fork, ForkResult, Pid};
use tracing::{debug, trace, warn};

use crate::ast::{Command, CommandFlags, CommandKind, Connector};
use crate::fds::{self, CloseSet};
use crate::redir::{self, RedirMode};
use crate::shell::{Shell, TrapCondition};
use crate::types::{ExecuteResult, ExitStatus, Flow, ShellError};
use crate::utils::search_cmd;

const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";
const NOT_FOUND_HANDLER: &str = "command_not_found_handle";
/// Bytes inspected when deciding why `execve` refused a file.
const SAMPLE_LEN: usize = 80;

/// Pipe ends a command reads from and writes to, when it is a pipeline stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pipes {
    pub input: Option<RawFd>,
    pub output: Option<RawFd>,
}

impl Pipes {
    pub const NONE: Pipes = Pipes {
        input: None,
        output: None,
    };

    pub fn is_empty(&self) -> bool {
        self.input.is_none() && self.output.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forked {
    Child,
    Parent(Pid),
}

/// How far a simple command got before control came back to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launched {
    Finished(ExitStatus),
    Child(Pid),
}

/// Wire the stage's pipe ends onto stdin and stdout.
pub fn do_piping(pipes: Pipes) -> Result<(), ShellError> {
    if let Some(input) = pipes.input {
        if input != 0 {
            fds::dup2(input, 0).map_err(|errno| ShellError::nix(errno, "cannot duplicate fd"))?;
            fds::close_quietly(input);
        }
    }
    if let Some(output) = pipes.output {
        if output != 1 {
            fds::dup2(output, 1).map_err(|errno| ShellError::nix(errno, "cannot duplicate fd"))?;
            fds::close_quietly(output);
        }
    }
    Ok(())
}

/// Run `body` as the whole remaining life of a forked child.
pub(crate) fn in_child<F: FnOnce() -> ExitStatus>(body: F) -> ! {
    let status = panic::catch_unwind(AssertUnwindSafe(body)).unwrap_or(ExitStatus(255));
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();
    std::process::exit(status.code())
}

/// Signal dispositions a program launched by the shell expects. The runtime
/// ignores SIGPIPE, which must not leak into pipeline stages.
pub(crate) fn restore_default_signals() {
    for sig in [
        Signal::SIGINT,
        Signal::SIGQUIT,
        Signal::SIGTERM,
        Signal::SIGPIPE,
        Signal::SIGTSTP,
        Signal::SIGTTIN,
        Signal::SIGTTOU,
    ] {
        // SAFETY: installing SIG_DFL does not run any handler code.
        let _ = unsafe { signal(sig, SigHandler::SigDfl) };
    }
}

/// Background commands without job control must not die from keyboard
/// interrupts aimed at the foreground.
pub(crate) fn ignore_async_signals() {
    for sig in [Signal::SIGINT, Signal::SIGQUIT] {
        // SAFETY: installing SIG_IGN does not run any handler code.
        let _ = unsafe { signal(sig, SigHandler::SigIgn) };
    }
}

fn read_sample(path: &str) -> Vec<u8> {
    let mut sample = Vec::with_capacity(SAMPLE_LEN);
    if let Ok(file) = File::open(path) {
        let _ = file.take(SAMPLE_LEN as u64).read_to_end(&mut sample);
    }
    sample
}

/// A NUL byte in the first line means the file is not a script.
fn looks_binary(sample: &[u8]) -> bool {
    sample
        .iter()
        .take_while(|&&b| b != b'\n')
        .any(|&b| b == 0)
}

fn interpreter_of(sample: &[u8]) -> Option<String> {
    let line = sample.strip_prefix(b"#!")?;
    let line = line.split(|&b| b == b'\n').next()?;
    let text = String::from_utf8_lossy(line);
    text.split_whitespace().next().map(str::to_string)
}

fn to_cstrings<I, S>(items: I) -> Option<Vec<CString>>
where
    I: IntoIterator<Item = S>,
    S: Into<Vec<u8>>,
{
    items.into_iter().map(|s| CString::new(s).ok()).collect()
}

/// Replace the process image with `path`. Only returns on failure, with the
/// status the child should exit with.
pub fn shell_execve(shell: &mut Shell, path: &str, argv: &[String]) -> ExitStatus {
    let env: Vec<String> = shell
        .vars
        .environment()
        .into_iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect();
    let (Some(c_path), Some(c_argv), Some(c_env)) = (
        CString::new(path).ok(),
        to_cstrings(argv.iter().map(String::as_str)),
        to_cstrings(env),
    ) else {
        shell.report_message(&format!("{}: argument contains a NUL byte", path));
        return ExitStatus::NOT_EXECUTABLE;
    };

    let _ = io::stdout().flush();
    let errno = match execve(&c_path, &c_argv, &c_env) {
        Ok(never) => match never {},
        Err(errno) => errno,
    };
    debug!(path, %errno, "execve failed");

    let not_executable = |shell: &Shell, reason: &str| {
        shell.report(&ShellError::CommandNotExecutable {
            path: path.to_string(),
            reason: reason.to_string(),
        });
        ExitStatus::NOT_EXECUTABLE
    };

    match errno {
        Errno::ENOEXEC => {
            let sample = read_sample(path);
            if sample.is_empty() {
                return ExitStatus::SUCCESS;
            }
            if looks_binary(&sample) {
                return not_executable(shell, "cannot execute binary file");
            }
            // A script without an interpreter line runs under the system shell.
            let mut script_argv = vec![c"/bin/sh".to_owned(), c_path];
            script_argv.extend(c_argv.into_iter().skip(1));
            let errno = match execve(c"/bin/sh", &script_argv, &c_env) {
                Ok(never) => match never {},
                Err(errno) => errno,
            };
            not_executable(shell, errno.desc())
        }
        Errno::ENOENT => {
            if Path::new(path).exists() {
                if let Some(interpreter) = interpreter_of(&read_sample(path)) {
                    return not_executable(
                        shell,
                        &format!("{}: bad interpreter: No such file or directory", interpreter),
                    );
                }
            }
            shell.report(&ShellError::CommandNotExecutable {
                path: path.to_string(),
                reason: Errno::ENOENT.desc().to_string(),
            });
            ExitStatus::NOT_FOUND
        }
        Errno::EACCES | Errno::EISDIR if Path::new(path).is_dir() => {
            not_executable(shell, "Is a directory")
        }
        Errno::EACCES => {
            shell.report(&ShellError::ExecPermissionDenied(path.to_string()));
            ExitStatus::NOT_EXECUTABLE
        }
        other => not_executable(shell, other.desc()),
    }
}

impl Shell {
    /// Fork, retrying a few times while the process table is full. The
    /// parent remembers the pid until the pipeline is handed to job control.
    pub(crate) fn make_child(&mut self, description: &str) -> Result<Forked, ShellError> {
        let _ = io::stdout().flush();
        let _ = io::stderr().flush();
        let mut delay = Duration::from_millis(100);
        let mut attempts = 0;
        loop {
            // SAFETY: the child only runs shell code and leaves through
            // `in_child` or `execve`; it never returns into the caller's
            // stack frames above the dispatcher.
            match unsafe { fork() } {
                Ok(ForkResult::Child) => {
                    self.forked = true;
                    self.pipeline_pids.clear();
                    return Ok(Forked::Child);
                }
                Ok(ForkResult::Parent { child }) => {
                    debug!(pid = child.as_raw(), command = description, "forked child");
                    self.pipeline_pids.push(child);
                    return Ok(Forked::Parent(child));
                }
                Err(Errno::EAGAIN) if attempts < 3 => {
                    warn!(attempts, "fork: retrying");
                    self.jobs.reap();
                    thread::sleep(delay);
                    delay *= 2;
                    attempts += 1;
                }
                Err(errno) => return Err(ShellError::ForkFailed(errno)),
            }
        }
    }

    /// Hand the pids forked since the last call to job control as one job.
    /// Returns the last pid, whose status is the pipeline's.
    pub(crate) fn stop_pipeline(&mut self, background: bool) -> Option<Pid> {
        let pids = std::mem::take(&mut self.pipeline_pids);
        self.jobs.register_pipeline(&pids, background);
        pids.last().copied()
    }

    /// Wait for the job containing `pid`, turning an interrupt into an error
    /// once the children are collected.
    pub(crate) fn wait_child(&mut self, pid: Pid) -> Result<ExitStatus, ShellError> {
        let status = self.jobs.wait_for(pid)?;
        trace!(pid = pid.as_raw(), %status, "waited");
        self.check_interrupt()?;
        Ok(status)
    }

    /// Build `a | b | c`: one pipe per `|`, every stage but the last left
    /// running, the last waited for (unless the whole pipeline is itself
    /// asynchronous or feeds an outer pipe). `STDIN_FROM_NULL` in
    /// `first_flags` goes to the leftmost stage only; an ignored result
    /// applies to every stage.
    pub(crate) fn execute_pipeline(
        &mut self,
        cmd: &Command,
        first_flags: CommandFlags,
        asynchronous: bool,
        pipes: Pipes,
        close_set: &CloseSet,
    ) -> ExecuteResult {
        let stages = pipeline_stages(cmd).unwrap_or_default();
        let (last, leading) = match stages.split_last() {
            Some(split) if !split.1.is_empty() => split,
            _ => {
                return Err(ShellError::BadCommandKind(format!("`{}': pipe without a right side", cmd.describe())).into())
            }
        };
        let mut prev = pipes.input;
        let inherit = first_flags & CommandFlags::IGNORE_RESULT;
        let mut stage_flags = first_flags & CommandFlags::STDIN_FROM_NULL;

        for stage in leading {
            let (read, write) = match fds::pipe() {
                Ok(ends) => ends,
                Err(errno) => {
                    self.close_owned(prev, pipes.input);
                    self.abandon_pipeline();
                    return Err(ShellError::PipeCreationFailed(errno).into());
                }
            };
            self.pipe_ledger.created += 1;
            trace!(read, write, "created pipe");

            let launched = self.execute_command(
                stage,
                inherit | std::mem::take(&mut stage_flags),
                asynchronous,
                Pipes {
                    input: prev,
                    output: Some(write),
                },
                &close_set.with(read),
            );
            self.close_owned(prev, pipes.input);
            fds::close_quietly(write);
            self.pipe_ledger.ends_closed += 1;
            prev = Some(read);

            if let Err(flow) = launched {
                self.close_owned(prev, pipes.input);
                self.abandon_pipeline();
                return Err(flow);
            }
        }

        let result = self.execute_command(
            last,
            inherit,
            asynchronous,
            Pipes {
                input: prev,
                output: pipes.output,
            },
            close_set,
        );
        self.close_owned(prev, pipes.input);

        let status = match result {
            Ok(status) => status,
            Err(flow) => {
                self.abandon_pipeline();
                return Err(flow);
            }
        };
        if self.options.pipefail && pipes.output.is_none() && !asynchronous {
            if let Some(failed) = self.jobs.last_statuses().iter().rev().find(|s| !s.is_success()) {
                return Ok(*failed);
            }
        }
        Ok(status)
    }

    /// Close a pipe end this builder created; the caller's own input is not
    /// ours to close.
    fn close_owned(&mut self, fd: Option<RawFd>, callers: Option<RawFd>) {
        if let Some(fd) = fd {
            if Some(fd) != callers {
                fds::close_quietly(fd);
                self.pipe_ledger.ends_closed += 1;
            }
        }
    }

    fn abandon_pipeline(&mut self) {
        if self.pipeline_pids.is_empty() {
            return;
        }
        warn!(pids = ?self.pipeline_pids, "terminating partially built pipeline");
        self.stop_pipeline(false);
        self.jobs.stop_current_pipeline();
    }

    /// Subshell bookkeeping: traps reset, jobs and loops belong to the parent.
    pub(crate) fn enter_subshell(&mut self) {
        self.subshell_level += 1;
        self.loop_level = 0;
        self.traps.reset_for_subshell();
        self.jobs.forget_jobs();
    }

    /// First steps of every forked child: signal dispositions, closing the
    /// close set, pipe wiring, then the command's own redirections.
    pub(crate) fn prepare_child(
        &mut self,
        cmd: &Command,
        flags: CommandFlags,
        asynchronous: bool,
        pipes: Pipes,
        close_set: &CloseSet,
    ) -> Result<(), ShellError> {
        restore_default_signals();
        if asynchronous {
            ignore_async_signals();
        }
        close_set.close_all();
        do_piping(pipes)?;
        if flags.contains(CommandFlags::STDIN_FROM_NULL) && !redir::stdin_redirects(&cmd.redirects) {
            redir::redirect_stdin_from_null()?;
        }
        if !flags.contains(CommandFlags::REDIRECTS_APPLIED) {
            redir::do_redirections(self, &cmd.redirects, RedirMode::Apply).map(drop)?;
        }
        Ok(())
    }

    /// Body of a forked child running `cmd` as a subshell, either because
    /// it was written `( ... )` or because a compound command was piped or
    /// backgrounded. Returns the status the child exits with.
    pub(crate) fn execute_in_subshell(
        &mut self,
        cmd: &Command,
        flags: CommandFlags,
        asynchronous: bool,
        pipes: Pipes,
        close_set: &CloseSet,
    ) -> ExitStatus {
        self.enter_subshell();
        if let Err(err) = self.prepare_child(cmd, flags, asynchronous, pipes, close_set) {
            self.report(&err);
            return ExitStatus::FAILURE;
        }

        let result = match &cmd.kind {
            CommandKind::Subshell(inner) => {
                let mut extra = CommandFlags::empty();
                let elidable = matches!(inner.kind, CommandKind::Simple(_) | CommandKind::Subshell(_))
                    && !inner
                        .flags
                        .intersects(CommandFlags::TIME_EXECUTION | CommandFlags::INVERT_RESULT)
                    && self.traps.handler(TrapCondition::Exit).is_none();
                if elidable {
                    extra |= CommandFlags::SKIP_FORK;
                }
                self.execute_command(inner, extra, false, Pipes::NONE, &CloseSet::new())
            }
            _ => {
                let own = (flags | cmd.flags)
                    - (CommandFlags::RUN_IN_SUBSHELL
                        | CommandFlags::FORCE_SUBSHELL
                        | CommandFlags::INVERT_RESULT
                        | CommandFlags::TIME_EXECUTION
                        | CommandFlags::TIME_POSIX
                        | CommandFlags::BACKGROUND);
                let stripped = Command {
                    flags: own | CommandFlags::REDIRECTS_APPLIED,
                    ..cmd.clone()
                };
                self.execute_command(&stripped, CommandFlags::empty(), false, Pipes::NONE, &CloseSet::new())
            }
        };
        let status = self.settle(result);
        self.last_status = status;
        self.run_exit_trap();
        self.exit_requested.unwrap_or(self.last_status)
    }

    /// Launch a program found on `PATH`. With `SKIP_FORK` and no pipes the
    /// current process is replaced directly.
    pub(crate) fn execute_disk_command(
        &mut self,
        argv: &[String],
        cmd: &Command,
        flags: CommandFlags,
        asynchronous: bool,
        pipes: Pipes,
        close_set: &CloseSet,
    ) -> Result<Launched, ShellError> {
        let Some(name) = argv.first() else {
            return Ok(Launched::Finished(ExitStatus::SUCCESS));
        };
        let path_var = self.vars.get("PATH").unwrap_or(DEFAULT_PATH).to_string();
        let resolved = search_cmd(name, &path_var);
        let nofork = flags.contains(CommandFlags::SKIP_FORK) && pipes.is_empty() && !asynchronous;

        if nofork {
            debug!(command = %name, "exec without fork");
            in_child(|| self.disk_child(argv, resolved.as_deref(), cmd, flags, asynchronous, pipes, close_set));
        }
        match self.make_child(name)? {
            Forked::Child => in_child(|| {
                self.disk_child(argv, resolved.as_deref(), cmd, flags, asynchronous, pipes, close_set)
            }),
            Forked::Parent(pid) => Ok(Launched::Child(pid)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn disk_child(
        &mut self,
        argv: &[String],
        resolved: Option<&str>,
        cmd: &Command,
        flags: CommandFlags,
        asynchronous: bool,
        pipes: Pipes,
        close_set: &CloseSet,
    ) -> ExitStatus {
        if let Err(err) = self.prepare_child(cmd, flags, asynchronous, pipes, close_set) {
            self.report(&err);
            return ExitStatus::FAILURE;
        }
        match resolved {
            Some(path) => shell_execve(self, path, argv),
            None => self.command_not_found(argv),
        }
    }

    fn command_not_found(&mut self, argv: &[String]) -> ExitStatus {
        // Unbound first so a handler that runs a missing command cannot recurse.
        if let Some(handler) = self.registry.unbind_function(NOT_FOUND_HANDLER) {
            let result = self.call_function(NOT_FOUND_HANDLER, handler, argv, CommandFlags::empty());
            return self.settle(result);
        }
        self.report(&ShellError::ExecNotFound(argv[0].clone()));
        ExitStatus::NOT_FOUND
    }
}

/// Stages of a left-associated `|` chain, leftmost first. A pipe node with
/// its own redirections or flags is one stage of the enclosing pipeline.
fn pipeline_stages(cmd: &Command) -> Option<Vec<&Command>> {
    let mut stages = Vec::new();
    let mut node = cmd;
    loop {
        match &node.kind {
            CommandKind::Connection(conn) if conn.connector == Connector::Pipe => {
                let second = conn.second.as_ref()?;
                stages.push(second.as_ref());
                let first = conn.first.as_ref();
                let plain_pipe = matches!(
                    &first.kind,
                    CommandKind::Connection(inner) if inner.connector == Connector::Pipe
                ) && first.redirects.is_empty()
                    && first.flags.is_empty();
                if plain_pipe {
                    node = first;
                } else {
                    stages.push(first);
                    break;
                }
            }
            _ => {
                stages.push(node);
                break;
            }
        }
    }
    stages.reverse();
    Some(stages)
}

/// Map what escaped a forked child's command onto the status it exits with.
pub(crate) fn flow_status(flow: Flow, last: ExitStatus) -> ExitStatus {
    match flow {
        Flow::Exit(status) | Flow::Return(status) => status,
        Flow::Break(_) | Flow::Continue(_) => last,
        Flow::Error(err) => err.status(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_of_a_left_associated_chain() {
        let tree = Command::pipeline(vec![
            Command::simple(&["a"]),
            Command::simple(&["b"]),
            Command::simple(&["c"]),
        ])
        .unwrap();
        let names: Vec<String> = pipeline_stages(&tree)
            .unwrap()
            .iter()
            .map(|c| c.describe())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn redirected_inner_pipe_stays_one_stage() {
        let inner = Command::pipeline(vec![Command::simple(&["a"]), Command::simple(&["b"])])
            .unwrap()
            .with_flags(CommandFlags::INVERT_RESULT);
        let tree = Command::connect(inner, Connector::Pipe, Some(Command::simple(&["c"])));
        assert_eq!(pipeline_stages(&tree).unwrap().len(), 2);

        let dangling = Command::connect(Command::simple(&["a"]), Connector::Pipe, None);
        assert!(pipeline_stages(&dangling).is_none());
    }

    #[test]
    fn script_sniffing() {
        assert!(looks_binary(b"\x7fELF\x02\x01\x01\0\0"));
        assert!(!looks_binary(b"echo hi\n\0"));
        assert_eq!(interpreter_of(b"#!/no/such/sh -e\necho").as_deref(), Some("/no/such/sh"));
        assert_eq!(interpreter_of(b"echo"), None);
    }

    #[test]
    fn flow_to_exit_status() {
        assert_eq!(flow_status(Flow::Exit(ExitStatus(4)), ExitStatus(0)), ExitStatus(4));
        assert_eq!(flow_status(Flow::Break(1), ExitStatus(3)), ExitStatus(3));
        assert_eq!(
            flow_status(Flow::Error(ShellError::ExecNotFound("x".into())), ExitStatus(0)),
            ExitStatus::NOT_FOUND
        );
    }
}
