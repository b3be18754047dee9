//! Raw descriptor plumbing shared by the redirection manager and the
//! pipeline builder.

use std::os::unix::io::RawFd;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::unistd;

/// Descriptors the shell keeps for itself (saved copies) live at or above
/// this number.
pub const SHELL_FD_BASE: RawFd = 10;

pub fn is_open(fd: RawFd) -> bool {
    fcntl(fd, FcntlArg::F_GETFD).is_ok()
}

pub fn is_cloexec(fd: RawFd) -> Result<bool, Errno> {
    let bits = fcntl(fd, FcntlArg::F_GETFD)?;
    Ok(FdFlag::from_bits_truncate(bits).contains(FdFlag::FD_CLOEXEC))
}

pub fn set_cloexec(fd: RawFd, on: bool) -> Result<(), Errno> {
    let flag = if on { FdFlag::FD_CLOEXEC } else { FdFlag::empty() };
    fcntl(fd, FcntlArg::F_SETFD(flag)).map(drop)
}

/// Duplicate `fd` onto the lowest free descriptor at or above `floor`. The
/// copy is close-on-exec.
pub fn dup_above(fd: RawFd, floor: RawFd) -> Result<RawFd, Errno> {
    fcntl(fd, FcntlArg::F_DUPFD_CLOEXEC(floor))
}

pub fn dup2(from: RawFd, to: RawFd) -> Result<RawFd, Errno> {
    unistd::dup2(from, to)
}

pub fn close(fd: RawFd) -> Result<(), Errno> {
    unistd::close(fd)
}

/// Close and ignore the result; used on cleanup paths where the descriptor
/// may already be gone.
pub fn close_quietly(fd: RawFd) {
    let _ = unistd::close(fd);
}

/// A pipe whose two ends are close-on-exec. Returns `(read, write)`.
pub fn pipe() -> Result<(RawFd, RawFd), Errno> {
    let mut ends = [0 as libc::c_int; 2];
    // SAFETY: `ends` is a valid two-element buffer for pipe(2).
    Errno::result(unsafe { libc::pipe(ends.as_mut_ptr()) })?;
    for &end in &ends {
        if let Err(errno) = set_cloexec(end, true) {
            close_quietly(ends[0]);
            close_quietly(ends[1]);
            return Err(errno);
        }
    }
    Ok((ends[0], ends[1]))
}

/// Descriptors a freshly forked child must close before doing anything else.
/// Each nested pipeline stage gets a copy extended with its own read end, so
/// a child's set is always a superset of its parent's.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseSet {
    bits: Vec<bool>,
}

impl CloseSet {
    const INITIAL_SIZE: usize = 32;

    pub fn new() -> Self {
        Self {
            bits: vec![false; Self::INITIAL_SIZE],
        }
    }

    /// A copy of this set that also contains `fd`.
    pub fn with(&self, fd: RawFd) -> Self {
        let mut next = self.clone();
        next.insert(fd);
        next
    }

    pub fn insert(&mut self, fd: RawFd) {
        let Ok(index) = usize::try_from(fd) else {
            return;
        };
        if index >= self.bits.len() {
            self.bits.resize(index + 8, false);
        }
        self.bits[index] = true;
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        usize::try_from(fd)
            .ok()
            .and_then(|i| self.bits.get(i).copied())
            .unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = RawFd> + '_ {
        self.bits
            .iter()
            .enumerate()
            .filter(|(_, &set)| set)
            .map(|(fd, _)| fd as RawFd)
    }

    pub fn is_empty(&self) -> bool {
        !self.bits.iter().any(|&b| b)
    }

    pub fn is_subset_of(&self, other: &CloseSet) -> bool {
        self.iter().all(|fd| other.contains(fd))
    }

    /// Run in a child right after fork.
    pub fn close_all(&self) {
        for fd in self.iter() {
            close_quietly(fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_set_grows_monotonically() {
        let base = CloseSet::new().with(4);
        let nested = base.with(70);
        assert!(base.contains(4));
        assert!(!base.contains(70));
        assert!(nested.contains(4) && nested.contains(70));
        assert!(base.is_subset_of(&nested));
        assert_eq!(nested.iter().collect::<Vec<_>>(), vec![4, 70]);
        assert!(CloseSet::new().is_empty());
    }

    #[test]
    fn pipe_ends_are_cloexec() {
        let _guard = crate::tests::lock();
        let (r, w) = pipe().unwrap();
        assert!(is_cloexec(r).unwrap());
        assert!(is_cloexec(w).unwrap());
        let saved = dup_above(r, SHELL_FD_BASE).unwrap();
        assert!(saved >= SHELL_FD_BASE);
        assert!(is_cloexec(saved).unwrap());
        for fd in [r, w, saved] {
            close(fd).unwrap();
        }
    }
}
