use std::fmt;
use std::io;

use nix::errno::Errno;
use thiserror::Error;

/// Status of a finished command, as `$?` reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ExitStatus(pub i32);

impl ExitStatus {
    pub const SUCCESS: ExitStatus = ExitStatus(0);
    pub const FAILURE: ExitStatus = ExitStatus(1);
    pub const BAD_USAGE: ExitStatus = ExitStatus(2);
    pub const NOT_EXECUTABLE: ExitStatus = ExitStatus(126);
    pub const NOT_FOUND: ExitStatus = ExitStatus(127);

    pub fn from_signal(signo: i32) -> Self {
        ExitStatus(128 + signo)
    }

    pub fn from_bool(ok: bool) -> Self {
        if ok {
            Self::SUCCESS
        } else {
            Self::FAILURE
        }
    }

    pub fn is_success(self) -> bool {
        self.0 == 0
    }

    pub fn invert(self) -> Self {
        Self::from_bool(!self.is_success())
    }

    pub fn code(self) -> i32 {
        self.0 & 255
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("{target}: {}", .errno.desc())]
    RedirectionFailed { target: String, errno: Errno },
    #[error("{0}: ambiguous redirect")]
    AmbiguousRedirect(String),
    #[error("{0}: cannot overwrite existing file")]
    NoClobberBlocked(String),
    #[error("cannot create temp file for here-document: {0}")]
    HereDocWriteFailed(#[source] io::Error),
    #[error("pipe error: {}", .0.desc())]
    PipeCreationFailed(Errno),
    #[error("fork: {}", .0.desc())]
    ForkFailed(Errno),
    #[error("{0}: command not found")]
    ExecNotFound(String),
    #[error("{0}: Permission denied")]
    ExecPermissionDenied(String),
    #[error("{path}: {reason}")]
    CommandNotExecutable { path: String, reason: String },
    #[error("bad command: {0}")]
    BadCommandKind(String),
    #[error("syntax error near unexpected token `{0}'")]
    Syntax(String),
    #[error("{0}")]
    ExpansionFailed(String),
    #[error("`{0}': not a valid identifier")]
    InvalidIdentifier(String),
    #[error("{0}: readonly variable")]
    ReadonlyVariable(String),
    #[error("{0}")]
    Arithmetic(String),
    #[error("{0}")]
    Usage(String),
    #[error("interrupted")]
    Interrupted,
    #[error("{1}: {}", .0.desc())]
    Nix(Errno, String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ShellError {
    pub fn nix(errno: Errno, context: impl Into<String>) -> Self {
        ShellError::Nix(errno, context.into())
    }

    /// Status the failing command reports to `$?`.
    pub fn status(&self) -> ExitStatus {
        match self {
            ShellError::ExecNotFound(_) => ExitStatus::NOT_FOUND,
            ShellError::ExecPermissionDenied(_) | ShellError::CommandNotExecutable { .. } => {
                ExitStatus::NOT_EXECUTABLE
            }
            ShellError::Usage(_) | ShellError::BadCommandKind(_) | ShellError::Syntax(_) => {
                ExitStatus::BAD_USAGE
            }
            ShellError::Interrupted => ExitStatus::from_signal(libc::SIGINT),
            _ => ExitStatus::FAILURE,
        }
    }

    /// Errors that indicate a malformed tree or a broken host rather than a
    /// failing command. They stop the engine instead of setting `$?`.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ShellError::BadCommandKind(_))
    }
}

/// Non-local exits bubbling up through the dispatcher.
#[derive(Debug)]
pub enum Flow {
    Break(usize),
    Continue(usize),
    Return(ExitStatus),
    Exit(ExitStatus),
    Error(ShellError),
}

impl From<ShellError> for Flow {
    fn from(err: ShellError) -> Self {
        Flow::Error(err)
    }
}

pub type ExecuteResult = Result<ExitStatus, Flow>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invert_maps_any_failure_to_success() {
        assert_eq!(ExitStatus(3).invert(), ExitStatus::SUCCESS);
        assert_eq!(ExitStatus::SUCCESS.invert(), ExitStatus::FAILURE);
    }

    #[test]
    fn error_statuses() {
        assert_eq!(ShellError::ExecNotFound("x".into()).status(), ExitStatus::NOT_FOUND);
        assert_eq!(
            ShellError::ExecPermissionDenied("x".into()).status(),
            ExitStatus::NOT_EXECUTABLE
        );
        assert_eq!(ShellError::Interrupted.status(), ExitStatus(130));
        assert!(ShellError::BadCommandKind("x".into()).is_fatal());
    }
}
