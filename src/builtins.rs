use std::collections::HashMap;
use std::env;
use std::io::{self, Write};
use std::path::Path;
use std::rc::Rc;
use std::str::FromStr;

use nix::sys::signal::Signal;

use crate::ast::{Command, CommandFlags};
use crate::fds::CloseSet;
use crate::lexer::lex;
use crate::parser::parse;
use crate::process::{self, Pipes};
use crate::shell::{Shell, TrapAction, TrapCondition};
use crate::types::{ExecuteResult, ExitStatus, Flow, ShellError};
use crate::utils::search_cmd;
use crate::vars::is_identifier;
use crate::word::Word;

/// A builtin receives its arguments without the command name.
pub type BuiltinFn = fn(&mut Shell, &[String]) -> ExecuteResult;

#[derive(Debug, Clone, Copy)]
pub struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFn,
    /// POSIX special builtin: assignment prefixes outlive the command.
    pub special: bool,
    /// Runs other commands itself, so `errexit` must not fire inside it
    /// when the caller ignores its result.
    pub runs_commands: bool,
}

const fn builtin(name: &'static str, func: BuiltinFn) -> Builtin {
    Builtin {
        name,
        func,
        special: false,
        runs_commands: false,
    }
}

const fn special(name: &'static str, func: BuiltinFn) -> Builtin {
    Builtin {
        name,
        func,
        special: true,
        runs_commands: false,
    }
}

pub const BUILTINS: &[Builtin] = &[
    special(":", true_builtin),
    builtin("true", true_builtin),
    builtin("false", false_builtin),
    builtin("echo", echo),
    builtin("pwd", pwd),
    builtin("cd", cd),
    special("exit", exit),
    special("export", export),
    special("unset", unset),
    builtin("local", local),
    special("return", return_builtin),
    special("break", break_builtin),
    special("continue", continue_builtin),
    special("exec", exec),
    Builtin {
        name: "command",
        func: command,
        special: false,
        runs_commands: true,
    },
    special("set", set),
    special("shift", shift),
    builtin("type", type_builtin),
    special("readonly", readonly),
    special("trap", trap),
];

/// Builtins and shell functions visible to command lookup.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    builtins: HashMap<String, Builtin>,
    functions: HashMap<String, Rc<Command>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for &b in BUILTINS {
            registry.register(b);
        }
        registry
    }

    pub fn register(&mut self, builtin: Builtin) {
        self.builtins.insert(builtin.name.to_string(), builtin);
    }

    pub fn lookup(&self, name: &str) -> Option<Builtin> {
        self.builtins.get(name).copied()
    }

    pub fn lookup_function(&self, name: &str) -> Option<Rc<Command>> {
        self.functions.get(name).cloned()
    }

    pub fn bind_function(&mut self, name: &str, body: Rc<Command>) {
        self.functions.insert(name.to_string(), body);
    }

    pub fn unbind_function(&mut self, name: &str) -> Option<Rc<Command>> {
        self.functions.remove(name)
    }

    /// Every builtin and function name, unordered.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.builtins.keys().chain(self.functions.keys()).map(String::as_str)
    }
}

fn write_stdout(text: &str) -> Result<(), ShellError> {
    let mut out = io::stdout().lock();
    out.write_all(text.as_bytes())?;
    out.flush()?;
    Ok(())
}

fn usage(shell: &Shell, message: String) -> ExecuteResult {
    shell.report_message(&message);
    Ok(ExitStatus::BAD_USAGE)
}

fn failure(shell: &Shell, message: String) -> ExecuteResult {
    shell.report_message(&message);
    Ok(ExitStatus::FAILURE)
}

fn true_builtin(_shell: &mut Shell, _args: &[String]) -> ExecuteResult {
    Ok(ExitStatus::SUCCESS)
}

fn false_builtin(_shell: &mut Shell, _args: &[String]) -> ExecuteResult {
    Ok(ExitStatus::FAILURE)
}

fn echo_escapes(text: &str) -> (String, bool) {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some('a') => out.push('\x07'),
            Some('e') => out.push('\x1b'),
            Some('r') => out.push('\r'),
            Some('c') => return (out, true),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    (out, false)
}

fn echo(_shell: &mut Shell, args: &[String]) -> ExecuteResult {
    let mut newline = true;
    let mut escapes = false;
    let mut rest = args;
    while let Some(flag) = rest.first() {
        match flag.as_str() {
            "-n" => newline = false,
            "-e" => escapes = true,
            "-E" => escapes = false,
            _ => break,
        }
        rest = &rest[1..];
    }
    let mut line = rest.join(" ");
    if escapes {
        let (expanded, stop) = echo_escapes(&line);
        line = expanded;
        if stop {
            newline = false;
        }
    }
    if newline {
        line.push('\n');
    }
    write_stdout(&line)?;
    Ok(ExitStatus::SUCCESS)
}

fn pwd(shell: &mut Shell, _args: &[String]) -> ExecuteResult {
    match env::current_dir() {
        Ok(dir) => {
            write_stdout(&format!("{}\n", dir.display()))?;
            Ok(ExitStatus::SUCCESS)
        }
        Err(e) => failure(shell, format!("pwd: {}", e)),
    }
}

fn cd(shell: &mut Shell, args: &[String]) -> ExecuteResult {
    let (target, announce) = match args.first().map(String::as_str) {
        None => match shell.var("HOME") {
            Some(home) => (home.to_string(), false),
            None => return failure(shell, "cd: HOME not set".to_string()),
        },
        // Handle cd - to previous directory
        Some("-") => match shell.var("OLDPWD") {
            Some(prev) => (prev.to_string(), true),
            None => return failure(shell, "cd: OLDPWD not set".to_string()),
        },
        Some(path) => (path.to_string(), false),
    };

    let current = env::current_dir().ok();
    if let Err(e) = env::set_current_dir(Path::new(&target)) {
        let reason = match e.kind() {
            io::ErrorKind::NotFound => "No such file or directory".to_string(),
            io::ErrorKind::PermissionDenied => "Permission denied".to_string(),
            _ => e.to_string(),
        };
        return failure(shell, format!("cd: {}: {}", target, reason));
    }
    if let Some(prev) = current {
        shell.vars.set("OLDPWD", &prev.to_string_lossy())?;
    }
    let now = env::current_dir().map_err(ShellError::Io)?;
    shell.vars.set("PWD", &now.to_string_lossy())?;
    if announce {
        write_stdout(&format!("{}\n", now.display()))?;
    }
    Ok(ExitStatus::SUCCESS)
}

fn exit(shell: &mut Shell, args: &[String]) -> ExecuteResult {
    let code = match args.first() {
        None => shell.last_status.code(),
        Some(arg) => match arg.parse::<i64>() {
            // POSIX requires 8-bit exit codes
            Ok(n) => (n & 255) as i32,
            Err(_) => {
                shell.report_message(&format!("exit: {}: numeric argument required", arg));
                2
            }
        },
    };
    Err(Flow::Exit(ExitStatus(code)))
}

/// Split `name=value` arguments of `export`, `local` and `readonly`.
fn name_and_value(arg: &str) -> (&str, Option<&str>) {
    match arg.split_once('=') {
        Some((name, value)) => (name, Some(value)),
        None => (arg, None),
    }
}

fn export(shell: &mut Shell, args: &[String]) -> ExecuteResult {
    let names: Vec<&String> = args.iter().filter(|a| a.as_str() != "-p").collect();
    if names.is_empty() {
        let listing: String = shell
            .vars
            .environment()
            .into_iter()
            .map(|(name, value)| format!("declare -x {}=\"{}\"\n", name, value))
            .collect();
        write_stdout(&listing)?;
        return Ok(ExitStatus::SUCCESS);
    }
    let mut status = ExitStatus::SUCCESS;
    for arg in names {
        let (name, value) = name_and_value(arg);
        if !is_identifier(name) {
            shell.report(&ShellError::InvalidIdentifier(arg.clone()));
            status = ExitStatus::FAILURE;
            continue;
        }
        let result = match value {
            Some(value) => shell.vars.set(name, value).and_then(|_| shell.vars.export(name)),
            None => shell.vars.export(name),
        };
        if let Err(err) = result {
            shell.report(&err);
            status = ExitStatus::FAILURE;
        }
    }
    Ok(status)
}

fn readonly(shell: &mut Shell, args: &[String]) -> ExecuteResult {
    let mut status = ExitStatus::SUCCESS;
    for arg in args {
        let (name, value) = name_and_value(arg);
        if !is_identifier(name) {
            shell.report(&ShellError::InvalidIdentifier(arg.clone()));
            status = ExitStatus::FAILURE;
            continue;
        }
        if let Some(value) = value {
            if let Err(err) = shell.vars.set(name, value) {
                shell.report(&err);
                status = ExitStatus::FAILURE;
                continue;
            }
        }
        shell.vars.set_readonly(name);
    }
    Ok(status)
}

fn unset(shell: &mut Shell, args: &[String]) -> ExecuteResult {
    let mut functions = false;
    let mut rest = args;
    while let Some(flag) = rest.first() {
        match flag.as_str() {
            "-f" => functions = true,
            "-v" => functions = false,
            _ => break,
        }
        rest = &rest[1..];
    }
    let mut status = ExitStatus::SUCCESS;
    for name in rest {
        if functions {
            shell.registry.unbind_function(name);
            continue;
        }
        if !is_identifier(name) {
            shell.report(&ShellError::InvalidIdentifier(name.clone()));
            status = ExitStatus::FAILURE;
            continue;
        }
        if shell.vars.is_set(name) {
            if let Err(err) = shell.vars.unset(name) {
                shell.report(&err);
                status = ExitStatus::FAILURE;
            }
        } else {
            // A name that is only a function is unset as a function.
            shell.registry.unbind_function(name);
        }
    }
    Ok(status)
}

fn local(shell: &mut Shell, args: &[String]) -> ExecuteResult {
    if !shell.vars.in_function() {
        return failure(shell, "local: can only be used in a function".to_string());
    }
    let mut status = ExitStatus::SUCCESS;
    for arg in args {
        let (name, value) = name_and_value(arg);
        if !is_identifier(name) {
            shell.report(&ShellError::InvalidIdentifier(arg.clone()));
            status = ExitStatus::FAILURE;
            continue;
        }
        if let Err(err) = shell.vars.set_local(name, value.unwrap_or(""), false) {
            shell.report(&err);
            status = ExitStatus::FAILURE;
        }
    }
    Ok(status)
}

fn trap_condition(name: &str) -> Option<TrapCondition> {
    match name {
        "EXIT" | "0" => return Some(TrapCondition::Exit),
        "ERR" => return Some(TrapCondition::Err),
        "DEBUG" => return Some(TrapCondition::Debug),
        "RETURN" => return Some(TrapCondition::Return),
        _ => {}
    }
    if let Ok(signo) = name.parse::<i32>() {
        return Signal::try_from(signo).ok().map(|sig| TrapCondition::Signal(sig as i32));
    }
    let upper = name.to_ascii_uppercase();
    let full = if upper.starts_with("SIG") { upper } else { format!("SIG{}", upper) };
    Signal::from_str(&full).ok().map(|sig| TrapCondition::Signal(sig as i32))
}

fn trap_name(condition: TrapCondition) -> String {
    match condition {
        TrapCondition::Exit => "EXIT".to_string(),
        TrapCondition::Err => "ERR".to_string(),
        TrapCondition::Debug => "DEBUG".to_string(),
        TrapCondition::Return => "RETURN".to_string(),
        TrapCondition::Signal(signo) => Signal::try_from(signo)
            .map(|sig| sig.as_str().to_string())
            .unwrap_or_else(|_| signo.to_string()),
    }
}

/// `trap [-p] [action condition...]`. An action of `-` resets, an empty
/// action ignores.
fn trap(shell: &mut Shell, args: &[String]) -> ExecuteResult {
    let args: &[String] = match args.first().map(String::as_str) {
        Some("-p") => &[],
        Some("--") => &args[1..],
        _ => args,
    };
    let Some((action, conditions)) = args.split_first() else {
        let mut listed: Vec<(String, String)> = shell
            .traps
            .iter()
            .map(|(condition, action)| {
                let text = match action {
                    TrapAction::Ignore => String::new(),
                    TrapAction::Run(cmd) => cmd.describe(),
                };
                (trap_name(condition), text)
            })
            .collect();
        listed.sort();
        let mut stdout = io::stdout().lock();
        for (name, text) in listed {
            let _ = writeln!(stdout, "trap -- '{}' {}", text.replace('\'', "'\\''"), name);
        }
        return Ok(ExitStatus::SUCCESS);
    };
    if conditions.is_empty() {
        return usage(shell, "trap: usage: trap [-p] [action condition ...]".to_string());
    }

    let action = match action.as_str() {
        "-" => None,
        "" => Some(TrapAction::Ignore),
        source => match parse(&lex(source)) {
            Ok(cmd) => Some(TrapAction::Run(Rc::new(cmd))),
            Err(err) => {
                shell.report(&err);
                return Ok(ExitStatus::BAD_USAGE);
            }
        },
    };
    let mut status = ExitStatus::SUCCESS;
    for name in conditions {
        let Some(condition) = trap_condition(name) else {
            shell.report_message(&format!("trap: {}: invalid signal specification", name));
            status = ExitStatus::FAILURE;
            continue;
        };
        match &action {
            Some(action) => shell.traps.set(condition, action.clone()),
            None => {
                shell.traps.clear(condition);
            }
        }
    }
    Ok(status)
}

fn numeric_arg(shell: &Shell, builtin: &str, arg: Option<&String>) -> Result<Option<i64>, ExitStatus> {
    match arg {
        None => Ok(None),
        Some(text) => text.parse::<i64>().map(Some).map_err(|_| {
            shell.report_message(&format!("{}: {}: numeric argument required", builtin, text));
            ExitStatus::BAD_USAGE
        }),
    }
}

fn return_builtin(shell: &mut Shell, args: &[String]) -> ExecuteResult {
    if shell.function_depth() == 0 {
        return usage(
            shell,
            "return: can only `return' from a function or sourced script".to_string(),
        );
    }
    let status = match numeric_arg(shell, "return", args.first()) {
        Ok(Some(n)) => ExitStatus((n & 255) as i32),
        Ok(None) => shell.last_status,
        Err(status) => status,
    };
    Err(Flow::Return(status))
}

/// Shared by `break` and `continue`: the number of loops to leave, clamped
/// to the current nesting depth.
fn loop_count(shell: &Shell, name: &str, args: &[String]) -> Result<Option<usize>, ExitStatus> {
    if shell.loop_level() == 0 {
        shell.report_message(&format!(
            "{}: only meaningful in a `for', `while', or `until' loop",
            name
        ));
        return Ok(None);
    }
    let n = numeric_arg(shell, name, args.first())?.unwrap_or(1);
    if n < 1 {
        shell.report_message(&format!("{}: {}: loop count out of range", name, n));
        return Err(ExitStatus::FAILURE);
    }
    Ok(Some((n as usize).min(shell.loop_level())))
}

fn break_builtin(shell: &mut Shell, args: &[String]) -> ExecuteResult {
    match loop_count(shell, "break", args) {
        Ok(Some(n)) => Err(Flow::Break(n)),
        Ok(None) => Ok(ExitStatus::SUCCESS),
        Err(status) => Ok(status),
    }
}

fn continue_builtin(shell: &mut Shell, args: &[String]) -> ExecuteResult {
    match loop_count(shell, "continue", args) {
        Ok(Some(n)) => Err(Flow::Continue(n)),
        Ok(None) => Ok(ExitStatus::SUCCESS),
        Err(status) => Ok(status),
    }
}

fn exec(shell: &mut Shell, args: &[String]) -> ExecuteResult {
    let Some(name) = args.first() else {
        // Redirections given to `exec` stay in effect.
        shell.redirections_persist = true;
        return Ok(ExitStatus::SUCCESS);
    };
    let path_var = shell.var("PATH").unwrap_or_default().to_string();
    let status = match search_cmd(name, &path_var) {
        Some(path) => {
            shell.redirections_persist = true;
            process::restore_default_signals();
            process::shell_execve(shell, &path, args)
        }
        None => {
            shell.report_message(&format!("exec: {}: not found", name));
            ExitStatus::NOT_FOUND
        }
    };
    if shell.options.interactive {
        Ok(status)
    } else {
        Err(Flow::Exit(status))
    }
}

fn describe_command(shell: &Shell, name: &str, verbose: bool) -> Option<String> {
    if shell.registry.lookup_function(name).is_some() {
        return Some(if verbose {
            format!("{} is a function", name)
        } else {
            name.to_string()
        });
    }
    if shell.registry.lookup(name).is_some() {
        return Some(if verbose {
            format!("{} is a shell builtin", name)
        } else {
            name.to_string()
        });
    }
    let path_var = shell.var("PATH").unwrap_or_default();
    search_cmd(name, path_var).map(|path| {
        if verbose {
            format!("{} is {}", name, path)
        } else {
            path
        }
    })
}

/// `command [-v|-V] name [args]`: skip function lookup, or describe.
fn command(shell: &mut Shell, args: &[String]) -> ExecuteResult {
    let (describe, verbose, rest) = match args.first().map(String::as_str) {
        Some("-v") => (true, false, &args[1..]),
        Some("-V") => (true, true, &args[1..]),
        _ => (false, false, args),
    };
    if rest.is_empty() {
        return Ok(ExitStatus::SUCCESS);
    }
    if describe {
        let mut status = ExitStatus::SUCCESS;
        for name in rest {
            match describe_command(shell, name, verbose) {
                Some(line) => write_stdout(&format!("{}\n", line))?,
                None => {
                    if verbose {
                        shell.report_message(&format!("command: {}: not found", name));
                    }
                    status = ExitStatus::FAILURE;
                }
            }
        }
        return Ok(status);
    }
    let words = rest.iter().map(|w| Word::literal(w)).collect();
    let cmd = Command::new(crate::ast::CommandKind::Simple(crate::ast::SimpleCommand {
        assignments: Vec::new(),
        words,
    }));
    shell.execute_command(
        &cmd,
        CommandFlags::NO_FUNCTION_LOOKUP | CommandFlags::INHIBIT_EXPANSION,
        false,
        Pipes::NONE,
        &CloseSet::new(),
    )
}

fn set(shell: &mut Shell, args: &[String]) -> ExecuteResult {
    if args.is_empty() {
        let mut listing = String::new();
        for (name, value) in shell.vars.all() {
            listing.push_str(&format!("{}={}\n", name, value));
        }
        write_stdout(&listing)?;
        return Ok(ExitStatus::SUCCESS);
    }
    let mut iter = args.iter().enumerate();
    while let Some((index, arg)) = iter.next() {
        if arg == "--" {
            shell.vars.set_positional(args[index + 1..].to_vec());
            return Ok(ExitStatus::SUCCESS);
        }
        let on = match arg.chars().next() {
            Some('-') => true,
            Some('+') => false,
            _ => {
                shell.vars.set_positional(args[index..].to_vec());
                return Ok(ExitStatus::SUCCESS);
            }
        };
        let letters = &arg[1..];
        if letters == "o" {
            let Some((_, name)) = iter.next() else {
                return usage(shell, "set: -o: option name required".to_string());
            };
            if !shell.options.set_named(name, on) {
                return usage(shell, format!("set: {}: invalid option name", name));
            }
            continue;
        }
        for flag in letters.chars() {
            if !shell.options.set_flag(flag, on) {
                return usage(shell, format!("set: -{}: invalid option", flag));
            }
        }
    }
    Ok(ExitStatus::SUCCESS)
}

fn shift(shell: &mut Shell, args: &[String]) -> ExecuteResult {
    let n = match numeric_arg(shell, "shift", args.first()) {
        Ok(n) => n.unwrap_or(1),
        Err(status) => return Ok(status),
    };
    if n < 0 {
        return failure(shell, format!("shift: {}: shift count out of range", n));
    }
    Ok(ExitStatus::from_bool(shell.vars.shift(n as usize)))
}

fn type_builtin(shell: &mut Shell, args: &[String]) -> ExecuteResult {
    let mut status = ExitStatus::SUCCESS;
    for name in args {
        match describe_command(shell, name, true) {
            Some(line) => write_stdout(&format!("{}\n", line))?,
            None => {
                shell.report_message(&format!("type: {}: not found", name));
                status = ExitStatus::FAILURE;
            }
        }
    }
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_holds_builtins_and_functions() {
        let mut registry = Registry::with_defaults();
        assert!(registry.lookup("cd").is_some());
        assert!(registry.lookup("exit").unwrap().special);
        assert!(registry.lookup("command").unwrap().runs_commands);
        assert!(registry.lookup("ls").is_none());

        registry.bind_function("greet", Rc::new(Command::simple(&["echo", "hi"])));
        assert!(registry.lookup_function("greet").is_some());
        assert!(registry.unbind_function("greet").is_some());
        assert!(registry.lookup_function("greet").is_none());
    }

    #[test]
    fn echo_escape_handling() {
        assert_eq!(echo_escapes("a\\tb\\n"), ("a\tb\n".to_string(), false));
        assert_eq!(echo_escapes("stop\\cignored"), ("stop".to_string(), true));
        assert_eq!(echo_escapes("keep\\q"), ("keep\\q".to_string(), false));
    }

    #[test]
    fn control_builtins_produce_flow() {
        let mut shell = Shell::new();
        assert!(matches!(exit(&mut shell, &["3".to_string()]), Err(Flow::Exit(ExitStatus(3)))));
        assert!(matches!(exit(&mut shell, &["257".to_string()]), Err(Flow::Exit(ExitStatus(1)))));

        // Outside a loop break is a no-op that succeeds.
        assert!(matches!(break_builtin(&mut shell, &[]), Ok(ExitStatus::SUCCESS)));
        shell.loop_level = 2;
        assert!(matches!(break_builtin(&mut shell, &["5".to_string()]), Err(Flow::Break(2))));
        assert!(matches!(continue_builtin(&mut shell, &[]), Err(Flow::Continue(1))));
        assert!(matches!(
            continue_builtin(&mut shell, &["0".to_string()]),
            Ok(ExitStatus::FAILURE)
        ));

        assert!(matches!(return_builtin(&mut shell, &[]), Ok(ExitStatus::BAD_USAGE)));
        shell.function_depth = 1;
        assert!(matches!(
            return_builtin(&mut shell, &["4".to_string()]),
            Err(Flow::Return(ExitStatus(4)))
        ));
    }

    #[test]
    fn trap_sets_resets_and_ignores() {
        let mut shell = Shell::new();
        let args = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        assert!(trap(&mut shell, &args(&["echo bye", "EXIT", "int"])).is_ok());
        assert!(shell.traps.handler(TrapCondition::Exit).is_some());
        assert!(shell.traps.handler(TrapCondition::Signal(libc::SIGINT)).is_some());

        assert!(trap(&mut shell, &args(&["", "SIGTERM"])).is_ok());
        assert!(matches!(
            shell.traps.get(TrapCondition::Signal(libc::SIGTERM)),
            Some(TrapAction::Ignore)
        ));

        assert!(trap(&mut shell, &args(&["-", "EXIT"])).is_ok());
        assert!(shell.traps.get(TrapCondition::Exit).is_none());

        assert!(matches!(
            trap(&mut shell, &args(&["true", "NOSUCHSIG"])),
            Ok(ExitStatus::FAILURE)
        ));
        assert_eq!(trap_name(TrapCondition::Signal(libc::SIGINT)), "SIGINT");
    }

    #[test]
    fn set_toggles_options_and_positionals() {
        let mut shell = Shell::new();
        let args: Vec<String> = ["-eC", "-o", "pipefail", "--", "a", "b"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(set(&mut shell, &args).unwrap(), ExitStatus::SUCCESS);
        assert!(shell.options.errexit && shell.options.noclobber && shell.options.pipefail);
        assert_eq!(shell.vars.positional(), &["a".to_string(), "b".to_string()]);
        assert_eq!(set(&mut shell, &["+e".to_string()]).unwrap(), ExitStatus::SUCCESS);
        assert!(!shell.options.errexit);
        assert_eq!(set(&mut shell, &["-Q".to_string()]).unwrap(), ExitStatus::BAD_USAGE);
    }

    #[test]
    fn export_and_unset() {
        let mut shell = Shell::new();
        export(&mut shell, &["SHEXEC_TEST_VAR=1".to_string()]).unwrap();
        assert!(shell
            .vars
            .environment()
            .iter()
            .any(|(n, v)| n == "SHEXEC_TEST_VAR" && v == "1"));
        unset(&mut shell, &["SHEXEC_TEST_VAR".to_string()]).unwrap();
        assert!(shell.var("SHEXEC_TEST_VAR").is_none());
        assert_eq!(
            export(&mut shell, &["1bad".to_string()]).unwrap(),
            ExitStatus::FAILURE
        );
    }
}
