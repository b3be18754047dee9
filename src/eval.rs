//! Evaluator used by `(( ))`, `for (( ))` and `[[ ]]` nodes.

use std::fs;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::Path;

use crate::arith;
use crate::expand::pattern_matches;
use crate::shell::Shell;
use crate::types::ShellError;

pub trait Evaluator {
    fn arith(&self, shell: &mut Shell, expr: &str) -> Result<i64, ShellError>;
    fn unary_test(&self, shell: &Shell, op: &str, arg: &str) -> Result<bool, ShellError>;
    /// `right` arrives as a pattern for `==`, `=` and `!=`.
    fn binary_test(&self, shell: &mut Shell, op: &str, left: &str, right: &str) -> Result<bool, ShellError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StdEvaluator;

fn access(path: &str, mode: libc::c_int) -> bool {
    match std::ffi::CString::new(path) {
        // SAFETY: `c` is a valid NUL-terminated string for the call.
        Ok(c) => unsafe { libc::access(c.as_ptr(), mode) == 0 },
        Err(_) => false,
    }
}

impl Evaluator for StdEvaluator {
    fn arith(&self, shell: &mut Shell, expr: &str) -> Result<i64, ShellError> {
        arith::evaluate(expr, &mut shell.vars)
    }

    fn unary_test(&self, _shell: &Shell, op: &str, arg: &str) -> Result<bool, ShellError> {
        let meta = || fs::metadata(arg).ok();
        Ok(match op {
            "-n" => !arg.is_empty(),
            "-z" => arg.is_empty(),
            "-e" | "-a" => Path::new(arg).exists(),
            "-f" => meta().map_or(false, |m| m.is_file()),
            "-d" => meta().map_or(false, |m| m.is_dir()),
            "-p" => meta().map_or(false, |m| m.file_type().is_fifo()),
            "-s" => meta().map_or(false, |m| m.size() > 0),
            "-h" | "-L" => fs::symlink_metadata(arg).map_or(false, |m| m.file_type().is_symlink()),
            "-r" => access(arg, libc::R_OK),
            "-w" => access(arg, libc::W_OK),
            "-x" => access(arg, libc::X_OK),
            "-u" => meta().map_or(false, |m| m.permissions().mode() & 0o4000 != 0),
            "-g" => meta().map_or(false, |m| m.permissions().mode() & 0o2000 != 0),
            "-t" => arg
                .parse::<i32>()
                // SAFETY: isatty only inspects the descriptor number.
                .map_or(false, |fd| unsafe { libc::isatty(fd) == 1 }),
            _ => return Err(ShellError::Usage(format!("{}: unary operator expected", op))),
        })
    }

    fn binary_test(&self, shell: &mut Shell, op: &str, left: &str, right: &str) -> Result<bool, ShellError> {
        let mut num = |text: &str| arith::evaluate(text, &mut shell.vars);
        Ok(match op {
            "==" | "=" => pattern_matches(right, left),
            "!=" => !pattern_matches(right, left),
            "<" => left < right,
            ">" => left > right,
            "-eq" => num(left)? == num(right)?,
            "-ne" => num(left)? != num(right)?,
            "-lt" => num(left)? < num(right)?,
            "-le" => num(left)? <= num(right)?,
            "-gt" => num(left)? > num(right)?,
            "-ge" => num(left)? >= num(right)?,
            "-nt" | "-ot" => {
                let modified = |p: &str| fs::metadata(p).and_then(|m| m.modified()).ok();
                match (modified(left), modified(right)) {
                    (Some(l), Some(r)) if op == "-nt" => l > r,
                    (Some(l), Some(r)) => l < r,
                    (Some(_), None) => op == "-nt",
                    (None, Some(_)) => op == "-ot",
                    (None, None) => false,
                }
            }
            "-ef" => match (fs::metadata(left), fs::metadata(right)) {
                (Ok(l), Ok(r)) => l.dev() == r.dev() && l.ino() == r.ino(),
                _ => false,
            },
            _ => return Err(ShellError::Usage(format!("{}: binary operator expected", op))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_and_integer_predicates() {
        let mut shell = Shell::new();
        let eval = StdEvaluator;
        assert!(eval.unary_test(&shell, "-n", "x").unwrap());
        assert!(eval.unary_test(&shell, "-z", "").unwrap());
        assert!(eval.unary_test(&shell, "-d", "/").unwrap());
        assert!(eval.binary_test(&mut shell, "==", "hello", "h*o").unwrap());
        assert!(eval.binary_test(&mut shell, "!=", "hello", "x*").unwrap());
        assert!(eval.binary_test(&mut shell, "-lt", "2", "10").unwrap());
        assert!(eval.binary_test(&mut shell, "<", "abc", "abd").unwrap());
        assert!(eval.binary_test(&mut shell, "=~", "a", "b").is_err());
    }
}
