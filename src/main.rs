use std::fs;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::Editor;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use shexec::completion::Completer;
use shexec::lexer::lex;
use shexec::parser::parse;
use shexec::{ExitStatus, Shell, ShellOptions};

#[derive(Parser, Debug)]
#[command(name = "shexec", version, about = "A small bash-like shell")]
struct Args {
    /// Run COMMAND instead of reading a script or the terminal
    #[arg(short = 'c', value_name = "COMMAND")]
    command: Option<String>,

    /// Exit as soon as a command fails
    #[arg(short = 'e')]
    errexit: bool,

    /// Refuse to overwrite existing files with `>`
    #[arg(short = 'C')]
    noclobber: bool,

    /// Read commands without running them
    #[arg(short = 'n')]
    noexec: bool,

    /// Print each command before running it
    #[arg(short = 'x')]
    xtrace: bool,

    /// Long option names, as for `set -o`
    #[arg(short = 'o', value_name = "OPTION")]
    options: Vec<String>,

    /// Script to run
    script: Option<PathBuf>,

    /// Positional parameters
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,
}

impl Args {
    fn shell_options(&self) -> Result<ShellOptions> {
        let mut options = ShellOptions {
            errexit: self.errexit,
            noclobber: self.noclobber,
            noexec: self.noexec,
            xtrace: self.xtrace,
            ..ShellOptions::default()
        };
        for name in &self.options {
            if !options.set_named(name, true) {
                bail!("{}: invalid option name", name);
            }
        }
        Ok(options)
    }
}

/// Parse and run one chunk of input; syntax errors only set `$?`.
fn run_source(shell: &mut Shell, source: &str) -> ExitStatus {
    match parse(&lex(source)) {
        Ok(tree) => shell.execute_top_level(&tree),
        Err(err) => {
            shell.report(&err);
            shell.last_status = err.status();
            shell.last_status
        }
    }
}

fn interactive(shell: &mut Shell) -> Result<()> {
    let mut editor: Editor<Completer, DefaultHistory> = Editor::new()?;
    while shell.exit_requested.is_none() {
        editor.set_helper(Some(Completer::for_shell(shell)));
        match editor.readline("$ ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                editor.add_history_entry(line.as_str())?;
                // An interrupt that arrived at the prompt is stale.
                shell.interrupt_flag().store(false, Ordering::SeqCst);
                run_source(shell, &line);
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("SHEXEC_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut shell = Shell::new().with_options(args.shell_options()?);

    let interrupted = shell.interrupt_flag();
    ctrlc::set_handler(move || interrupted.store(true, Ordering::SeqCst))
        .context("installing the interrupt handler")?;

    if let Some(command) = &args.command {
        let mut positional = args.args.clone();
        if let Some(script) = &args.script {
            positional.insert(0, script.to_string_lossy().into_owned());
        }
        shell.vars.set_positional(positional);
        run_source(&mut shell, command);
    } else if let Some(script) = &args.script {
        let source =
            fs::read_to_string(script).with_context(|| format!("cannot read {}", script.display()))?;
        shell.name = script.to_string_lossy().into_owned();
        shell.vars.set_positional(args.args.clone());
        run_source(&mut shell, &source);
    } else {
        shell.options.interactive = true;
        interactive(&mut shell)?;
    }

    shell.run_exit_trap();
    let status = shell.exit_requested.unwrap_or(shell.last_status);
    debug!(%status, "shell exiting");
    std::process::exit(status.code());
}
