//! Applying redirections to the shell's own descriptor table, with an undo
//! frame that puts everything back afterwards.
//!
//! Every descriptor overwritten in undoable mode is first copied to a
//! close-on-exec descriptor at or above [`SHELL_FD_BASE`]. The frame keeps
//! two lists. The undo list copies the saved descriptors back and closes
//! the copies. The exec-survivor list only closes the copies, and runs when
//! `exec` makes the redirections permanent and the undo list is discarded.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::net::{TcpStream, UdpSocket};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{IntoRawFd, RawFd};

use nix::errno::Errno;
use tracing::{debug, trace, warn};

use crate::ast::{RedirInstruction, Redirectee, Redirection};
use crate::fds::{self, SHELL_FD_BASE};
use crate::shell::Shell;
use crate::types::ShellError;
use crate::word::Word;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirMode {
    /// Change descriptors for good; used in children that exit afterwards.
    Apply,
    /// Record how to reverse every change.
    Undoable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoAction {
    /// Copy `saved` back onto `fd`, then close `saved`.
    Restore { fd: RawFd, saved: RawFd, cloexec: bool },
    /// `fd` was not open before.
    Close { fd: RawFd },
}

impl UndoAction {
    fn run(self) {
        match self {
            UndoAction::Restore { fd, saved, cloexec } => {
                match fds::dup2(saved, fd) {
                    Ok(_) if cloexec => {
                        let _ = fds::set_cloexec(fd, true);
                    }
                    Ok(_) => {}
                    Err(errno) => warn!(fd, saved, %errno, "cannot restore descriptor"),
                }
                fds::close_quietly(saved);
            }
            UndoAction::Close { fd } => fds::close_quietly(fd),
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct UndoList {
    actions: Vec<UndoAction>,
}

impl UndoList {
    pub fn push(&mut self, action: UndoAction) {
        self.actions.push(action);
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UndoAction> {
        self.actions.iter()
    }

    /// Run every action, newest first.
    fn run(&mut self) {
        while let Some(action) = self.actions.pop() {
            action.run();
        }
    }

    fn discard(&mut self) {
        self.actions.clear();
    }
}

/// Reversal state for one redirection list. Dropping an unconsumed frame
/// restores it.
#[derive(Debug, Default)]
#[must_use = "dropping the frame undoes the redirections immediately"]
pub struct UndoFrame {
    undo: UndoList,
    exec_survivors: UndoList,
}

fn flush_std_streams() {
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();
}

impl UndoFrame {
    pub fn is_empty(&self) -> bool {
        self.undo.is_empty() && self.exec_survivors.is_empty()
    }

    pub fn undo_list(&self) -> &UndoList {
        &self.undo
    }

    pub fn exec_list(&self) -> &UndoList {
        &self.exec_survivors
    }

    /// Put the descriptor table back the way it was.
    pub fn restore(mut self) {
        self.restore_in_place();
    }

    /// Keep the redirections (`exec` without a command) and only release
    /// the saved copies.
    pub fn persist(mut self) {
        if self.is_empty() {
            return;
        }
        flush_std_streams();
        debug!(saved = self.exec_survivors.len(), "making redirections permanent");
        self.undo.discard();
        self.exec_survivors.run();
    }

    fn restore_in_place(&mut self) {
        if self.is_empty() {
            return;
        }
        flush_std_streams();
        trace!(actions = self.undo.len(), "undoing redirections");
        self.undo.run();
        self.exec_survivors.discard();
    }
}

impl Drop for UndoFrame {
    fn drop(&mut self) {
        self.restore_in_place();
    }
}

/// True when any redirection replaces standard input.
pub fn stdin_redirects(redirects: &[Redirection]) -> bool {
    redirects.iter().any(|r| {
        r.reads_stdin()
            && !matches!(
                r.instruction,
                RedirInstruction::ErrAndOut | RedirInstruction::AppendErrAndOut
            )
    })
}

/// Asynchronous commands without their own input read from /dev/null.
pub fn redirect_stdin_from_null() -> Result<(), ShellError> {
    let null = File::open("/dev/null").map_err(|e| io_failure("/dev/null", &e))?;
    let fd = null.into_raw_fd();
    if fd != 0 {
        let result = fds::dup2(fd, 0);
        fds::close_quietly(fd);
        result.map_err(|errno| ShellError::RedirectionFailed {
            target: "/dev/null".to_string(),
            errno,
        })?;
    } else {
        fds::set_cloexec(0, false).map_err(|errno| ShellError::nix(errno, "/dev/null"))?;
    }
    Ok(())
}

fn io_failure(target: &str, err: &io::Error) -> ShellError {
    ShellError::RedirectionFailed {
        target: target.to_string(),
        errno: Errno::from_i32(err.raw_os_error().unwrap_or(libc::EIO)),
    }
}

/// Perform `redirects` left to right. In undoable mode the returned frame
/// reverses them; on failure everything already applied is undone before
/// the error is returned.
pub fn do_redirections(
    shell: &Shell,
    redirects: &[Redirection],
    mode: RedirMode,
) -> Result<UndoFrame, ShellError> {
    let mut frame = UndoFrame::default();
    if redirects.is_empty() {
        return Ok(frame);
    }
    flush_std_streams();
    // Saved copies must stay clear of every descriptor this list names.
    let floor = redirects
        .iter()
        .map(|r| match r.redirectee {
            Redirectee::Fd(fd) => r.redirector.max(fd),
            Redirectee::Word(_) => r.redirector,
        })
        .max()
        .map_or(SHELL_FD_BASE, |highest| (highest + 1).max(SHELL_FD_BASE));
    let applier = Applier {
        shell,
        undoable: mode == RedirMode::Undoable,
        floor,
    };
    for redirect in redirects {
        trace!(
            fd = redirect.redirector,
            op = redirect.instruction.operator(),
            "applying redirection"
        );
        applier.perform(redirect, &mut frame)?;
    }
    Ok(frame)
}

/// Backing file for a here-document: written, reopened read-only and
/// unlinked, so the returned descriptor is the only reference left.
pub fn here_document_to_fd(content: &str) -> Result<RawFd, ShellError> {
    let mut tmp = tempfile::Builder::new()
        .prefix("sh-thd-")
        .tempfile()
        .map_err(ShellError::HereDocWriteFailed)?;
    tmp.write_all(content.as_bytes())
        .and_then(|_| tmp.flush())
        .map_err(ShellError::HereDocWriteFailed)?;
    let reader = File::open(tmp.path()).map_err(ShellError::HereDocWriteFailed)?;
    drop(tmp);
    Ok(reader.into_raw_fd())
}

struct Applier<'a> {
    shell: &'a Shell,
    undoable: bool,
    floor: RawFd,
}

impl<'a> Applier<'a> {
    fn perform(&self, r: &Redirection, frame: &mut UndoFrame) -> Result<(), ShellError> {
        use RedirInstruction::*;

        match r.instruction {
            Output | OutputForce | Append | Input | InputOutput => {
                self.open_onto(r.redirector, r.instruction, &r.redirectee, frame)
            }
            ErrAndOut | AppendErrAndOut => {
                let plain = if r.instruction == ErrAndOut { Output } else { Append };
                self.open_onto(1, plain, &r.redirectee, frame)?;
                self.duplicate(2, 1, false, frame)
            }
            DuplicatingInput | DuplicatingOutput | MoveInput | MoveOutput => {
                let moving = matches!(r.instruction, MoveInput | MoveOutput);
                match &r.redirectee {
                    Redirectee::Fd(source) => self.duplicate(r.redirector, *source, moving, frame),
                    Redirectee::Word(word) => self.duplicate_word(r, word, moving, frame),
                }
            }
            HereDocument { quoted } => {
                let Redirectee::Word(body) = &r.redirectee else {
                    return Err(ShellError::BadCommandKind(
                        "here-document without a body".to_string(),
                    ));
                };
                let raw = body.unquoted();
                let content = if quoted {
                    raw
                } else {
                    self.shell.expander.expand_here_document(self.shell, &raw)?
                };
                let fd = here_document_to_fd(&content)?;
                self.install(r.redirector, fd, "here-document", frame)
            }
            HereString => {
                let Redirectee::Word(word) = &r.redirectee else {
                    return Err(ShellError::BadCommandKind(
                        "here-string without a word".to_string(),
                    ));
                };
                let mut content = self.shell.expander.expand_string(self.shell, word)?;
                content.push('\n');
                let fd = here_document_to_fd(&content)?;
                self.install(r.redirector, fd, "here-string", frame)
            }
            Close => self.close(r.redirector, frame),
        }
    }

    fn expand_target(&self, word: &Word) -> Result<String, ShellError> {
        let mut fields = self
            .shell
            .expander
            .expand_words(self.shell, std::slice::from_ref(word))?;
        if fields.len() != 1 {
            return Err(ShellError::AmbiguousRedirect(word.to_string()));
        }
        Ok(fields.remove(0))
    }

    fn open_onto(
        &self,
        redirector: RawFd,
        instruction: RedirInstruction,
        redirectee: &Redirectee,
        frame: &mut UndoFrame,
    ) -> Result<(), ShellError> {
        let Redirectee::Word(word) = redirectee else {
            return Err(ShellError::BadCommandKind(format!(
                "`{}' needs a file name",
                instruction.operator()
            )));
        };
        let filename = self.expand_target(word)?;
        let fd = self.open_target(&filename, instruction)?;
        self.install(redirector, fd, &filename, frame)
    }

    /// Move the freshly opened `fd` onto `redirector`.
    fn install(
        &self,
        redirector: RawFd,
        fd: RawFd,
        target: &str,
        frame: &mut UndoFrame,
    ) -> Result<(), ShellError> {
        if self.undoable {
            if fd != redirector && fds::is_open(redirector) {
                if let Err(err) = self.save(redirector, frame) {
                    fds::close_quietly(fd);
                    return Err(err);
                }
            } else {
                frame.undo.push(UndoAction::Close { fd: redirector });
            }
        }
        if fd == redirector {
            // The open itself landed on the slot; it must survive exec.
            return fds::set_cloexec(fd, false).map_err(|errno| ShellError::RedirectionFailed {
                target: target.to_string(),
                errno,
            });
        }
        let result = fds::dup2(fd, redirector);
        fds::close_quietly(fd);
        result.map(drop).map_err(|errno| ShellError::RedirectionFailed {
            target: target.to_string(),
            errno,
        })
    }

    fn save(&self, fd: RawFd, frame: &mut UndoFrame) -> Result<(), ShellError> {
        let cloexec = fds::is_cloexec(fd).unwrap_or(false);
        let saved = fds::dup_above(fd, self.floor).map_err(|errno| ShellError::RedirectionFailed {
            target: fd.to_string(),
            errno,
        })?;
        trace!(fd, saved, "saved descriptor");
        frame.undo.push(UndoAction::Restore { fd, saved, cloexec });
        if fd >= SHELL_FD_BASE && cloexec {
            // One of the shell's own descriptors; bring it back even after exec.
            frame
                .exec_survivors
                .push(UndoAction::Restore { fd, saved, cloexec });
        } else {
            frame.exec_survivors.push(UndoAction::Close { fd: saved });
        }
        Ok(())
    }

    fn duplicate(
        &self,
        redirector: RawFd,
        source: RawFd,
        moving: bool,
        frame: &mut UndoFrame,
    ) -> Result<(), ShellError> {
        if source == redirector {
            return Ok(());
        }
        if !fds::is_open(source) {
            return Err(ShellError::RedirectionFailed {
                target: source.to_string(),
                errno: Errno::EBADF,
            });
        }
        if self.undoable {
            if fds::is_open(redirector) {
                self.save(redirector, frame)?;
            } else {
                frame.undo.push(UndoAction::Close { fd: redirector });
            }
        }
        fds::dup2(source, redirector).map_err(|errno| ShellError::RedirectionFailed {
            target: source.to_string(),
            errno,
        })?;
        if fds::is_cloexec(source).unwrap_or(false) {
            let _ = fds::set_cloexec(redirector, true);
        }
        if moving {
            if self.undoable {
                self.save(source, frame)?;
            }
            fds::close_quietly(source);
        }
        Ok(())
    }

    /// `N>&word`: the word names a descriptor, `-`, or for `>&` on stdout a
    /// file receiving both stdout and stderr.
    fn duplicate_word(
        &self,
        r: &Redirection,
        word: &Word,
        moving: bool,
        frame: &mut UndoFrame,
    ) -> Result<(), ShellError> {
        let text = self.expand_target(word)?;
        if text == "-" {
            return self.close(r.redirector, frame);
        }
        let (digits, moving) = match text.strip_suffix('-') {
            Some(digits) => (digits, true),
            None => (text.as_str(), moving),
        };
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            let source = digits.parse::<RawFd>().map_err(|_| ShellError::RedirectionFailed {
                target: text.clone(),
                errno: Errno::EBADF,
            })?;
            return self.duplicate(r.redirector, source, moving, frame);
        }
        if r.instruction == RedirInstruction::DuplicatingOutput && r.redirector == 1 {
            let target = Redirectee::Word(Word::literal(&text));
            self.open_onto(1, RedirInstruction::Output, &target, frame)?;
            return self.duplicate(2, 1, false, frame);
        }
        Err(ShellError::AmbiguousRedirect(text))
    }

    fn close(&self, redirector: RawFd, frame: &mut UndoFrame) -> Result<(), ShellError> {
        if self.undoable && fds::is_open(redirector) {
            self.save(redirector, frame)?;
        }
        fds::close_quietly(redirector);
        Ok(())
    }

    fn open_target(&self, filename: &str, instruction: RedirInstruction) -> Result<RawFd, ShellError> {
        if let Some(fd) = self.special_file(filename)? {
            return Ok(fd);
        }
        let mut options = OpenOptions::new();
        match instruction {
            RedirInstruction::Input => {
                options.read(true);
            }
            RedirInstruction::Output if self.shell.options.noclobber => {
                return noclobber_open(filename);
            }
            RedirInstruction::Output | RedirInstruction::OutputForce => {
                options.write(true).create(true).truncate(true).mode(0o666);
            }
            RedirInstruction::Append => {
                options.append(true).create(true).mode(0o666);
            }
            RedirInstruction::InputOutput => {
                options.read(true).write(true).create(true).mode(0o666);
            }
            other => {
                return Err(ShellError::BadCommandKind(format!(
                    "`{}' does not open a file",
                    other.operator()
                )))
            }
        }
        options
            .open(filename)
            .map(IntoRawFd::into_raw_fd)
            .map_err(|e| io_failure(filename, &e))
    }

    /// Names satisfied without opening a path: network endpoints always,
    /// and the descriptor aliases when the platform has no /dev/fd.
    fn special_file(&self, filename: &str) -> Result<Option<RawFd>, ShellError> {
        if let Some(rest) = filename.strip_prefix("/dev/tcp/") {
            return open_network(filename, rest, false).map(Some);
        }
        if let Some(rest) = filename.strip_prefix("/dev/udp/") {
            return open_network(filename, rest, true).map(Some);
        }
        if !self.shell.options.emulate_dev_fd {
            return Ok(None);
        }
        let source = match filename {
            "/dev/stdin" => 0,
            "/dev/stdout" => 1,
            "/dev/stderr" => 2,
            other => match other.strip_prefix("/dev/fd/").and_then(|n| n.parse::<RawFd>().ok()) {
                Some(fd) => fd,
                None => return Ok(None),
            },
        };
        fds::dup_above(source, 0)
            .map(Some)
            .map_err(|errno| ShellError::RedirectionFailed {
                target: filename.to_string(),
                errno,
            })
    }
}

/// Open for writing without destroying an existing regular file. Devices
/// and other non-regular files may still be written.
fn noclobber_open(filename: &str) -> Result<RawFd, ShellError> {
    match fs::metadata(filename) {
        Ok(meta) if meta.is_file() => Err(ShellError::NoClobberBlocked(filename.to_string())),
        Ok(_) => {
            let file = OpenOptions::new()
                .write(true)
                .open(filename)
                .map_err(|e| io_failure(filename, &e))?;
            // The name may have been swapped for a regular file since the stat.
            let meta = file.metadata().map_err(|e| io_failure(filename, &e))?;
            if meta.is_file() {
                return Err(ShellError::NoClobberBlocked(filename.to_string()));
            }
            Ok(file.into_raw_fd())
        }
        Err(_) => match OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o666)
            .open(filename)
        {
            Ok(file) => Ok(file.into_raw_fd()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(ShellError::NoClobberBlocked(filename.to_string()))
            }
            Err(e) => Err(io_failure(filename, &e)),
        },
    }
}

fn open_network(filename: &str, spec: &str, udp: bool) -> Result<RawFd, ShellError> {
    let Some((host, port)) = spec.rsplit_once('/') else {
        return Err(ShellError::RedirectionFailed {
            target: filename.to_string(),
            errno: Errno::EINVAL,
        });
    };
    let port: u16 = port.parse().map_err(|_| ShellError::RedirectionFailed {
        target: filename.to_string(),
        errno: Errno::EINVAL,
    })?;
    debug!(host, port, udp, "opening network redirection");
    if udp {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).map_err(|e| io_failure(filename, &e))?;
        socket
            .connect((host, port))
            .map_err(|e| io_failure(filename, &e))?;
        Ok(socket.into_raw_fd())
    } else {
        let stream = TcpStream::connect((host, port)).map_err(|e| io_failure(filename, &e))?;
        Ok(stream.into_raw_fd())
    }
}
