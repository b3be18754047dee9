//! `shexec`: the command execution engine of a bash-like shell, plus the
//! small reader and defaults needed to drive it on its own.

pub mod arith;
pub mod ast;
pub mod builtins;
pub mod completion;
pub mod eval;
pub mod executor;
pub mod expand;
pub mod fds;
pub mod invoke;
pub mod jobs;
pub mod lexer;
pub mod parser;
pub mod process;
pub mod redir;
pub mod shell;
pub mod timing;
pub mod types;
pub mod utils;
pub mod vars;
pub mod word;

#[cfg(test)]
mod tests;

pub use ast::{Command, CommandFlags, CommandKind};
pub use shell::{Shell, ShellOptions};
pub use types::{ExecuteResult, ExitStatus, Flow, ShellError};
