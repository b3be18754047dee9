//! Waiting on children. The engine only calls the [`JobControl`] hooks; the
//! default [`JobTable`] is a plain waitpid table without process groups or
//! terminal control.

use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::{debug, trace};

use crate::types::{ExitStatus, ShellError};

pub trait JobControl {
    /// Hand over the processes of one pipeline, leftmost first.
    fn register_pipeline(&mut self, pids: &[Pid], background: bool);

    /// Block until every process of the job containing `pid` has exited;
    /// returns `pid`'s own status.
    fn wait_for(&mut self, pid: Pid) -> Result<ExitStatus, ShellError>;

    /// Terminate the most recently registered pipeline (used when building
    /// it failed half way).
    fn stop_current_pipeline(&mut self);

    /// Drop all knowledge of jobs; a subshell's children are its own.
    fn forget_jobs(&mut self);

    /// Collect finished background jobs without blocking.
    fn reap(&mut self);

    /// Per-stage statuses of the last pipeline waited for.
    fn last_statuses(&self) -> &[ExitStatus];
}

#[derive(Debug)]
struct Job {
    pids: Vec<Pid>,
    statuses: Vec<Option<ExitStatus>>,
    background: bool,
}

impl Job {
    fn is_done(&self) -> bool {
        self.statuses.iter().all(Option::is_some)
    }

    fn record(&mut self, pid: Pid, status: ExitStatus) -> bool {
        match self.pids.iter().position(|&p| p == pid) {
            Some(index) => {
                self.statuses[index] = Some(status);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Default)]
pub struct JobTable {
    jobs: Vec<Job>,
    last_statuses: Vec<ExitStatus>,
}

fn status_of(wait: WaitStatus) -> Option<(Pid, ExitStatus)> {
    match wait {
        WaitStatus::Exited(pid, code) => Some((pid, ExitStatus(code))),
        WaitStatus::Signaled(pid, signal, _) => Some((pid, ExitStatus::from_signal(signal as i32))),
        _ => None,
    }
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn record(&mut self, pid: Pid, status: ExitStatus) {
        for job in &mut self.jobs {
            if job.record(pid, status) {
                return;
            }
        }
    }

    fn wait_one(pid: Pid) -> Result<Option<ExitStatus>, ShellError> {
        loop {
            match waitpid(pid, None) {
                Ok(wait) => {
                    if let Some((_, status)) = status_of(wait) {
                        return Ok(Some(status));
                    }
                }
                Err(Errno::EINTR) => continue,
                // Already collected elsewhere.
                Err(Errno::ECHILD) => return Ok(None),
                Err(errno) => return Err(ShellError::nix(errno, "waitpid")),
            }
        }
    }
}

impl JobControl for JobTable {
    fn register_pipeline(&mut self, pids: &[Pid], background: bool) {
        if pids.is_empty() {
            return;
        }
        debug!(?pids, background, "registering pipeline");
        self.jobs.push(Job {
            pids: pids.to_vec(),
            statuses: vec![None; pids.len()],
            background,
        });
    }

    fn wait_for(&mut self, pid: Pid) -> Result<ExitStatus, ShellError> {
        let Some(index) = self.jobs.iter().position(|job| job.pids.contains(&pid)) else {
            let status = Self::wait_one(pid)?.unwrap_or(ExitStatus::SUCCESS);
            self.last_statuses = vec![status];
            return Ok(status);
        };
        let pending: Vec<Pid> = {
            let job = &self.jobs[index];
            job.pids
                .iter()
                .zip(&job.statuses)
                .filter(|(_, status)| status.is_none())
                .map(|(&pid, _)| pid)
                .collect()
        };
        for member in pending {
            let status = Self::wait_one(member)?.unwrap_or(ExitStatus::SUCCESS);
            trace!(pid = member.as_raw(), %status, "child finished");
            self.jobs[index].record(member, status);
        }
        let job = self.jobs.remove(index);
        self.last_statuses = job.statuses.iter().map(|s| s.unwrap_or_default()).collect();
        let position = job.pids.iter().position(|&p| p == pid).unwrap_or(0);
        Ok(self.last_statuses.get(position).copied().unwrap_or_default())
    }

    fn stop_current_pipeline(&mut self) {
        let Some(job) = self.jobs.pop() else {
            return;
        };
        for (&pid, status) in job.pids.iter().zip(&job.statuses) {
            if status.is_none() {
                let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM);
                let _ = Self::wait_one(pid);
            }
        }
    }

    fn forget_jobs(&mut self) {
        self.jobs.clear();
    }

    fn reap(&mut self) {
        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) | Err(_) => break,
                Ok(wait) => {
                    if let Some((pid, status)) = status_of(wait) {
                        self.record(pid, status);
                    }
                }
            }
        }
        self.jobs.retain(|job| {
            let finished = job.background && job.is_done();
            if finished {
                debug!(pids = ?job.pids, "background job finished");
            }
            !finished
        });
    }

    fn last_statuses(&self) -> &[ExitStatus] {
        &self.last_statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::{fork, ForkResult};

    fn spawn_exiting(code: i32) -> Pid {
        // SAFETY: the child only calls async-signal-safe _exit.
        match unsafe { fork() }.unwrap() {
            ForkResult::Child => unsafe { libc::_exit(code) },
            ForkResult::Parent { child } => child,
        }
    }

    #[test]
    fn waits_for_whole_pipeline() {
        let _guard = crate::tests::lock();
        let mut table = JobTable::new();
        let first = spawn_exiting(3);
        let last = spawn_exiting(0);
        table.register_pipeline(&[first, last], false);
        assert_eq!(table.wait_for(last).unwrap(), ExitStatus::SUCCESS);
        assert_eq!(table.last_statuses(), &[ExitStatus(3), ExitStatus::SUCCESS]);
        assert!(table.is_empty());
    }

    #[test]
    fn unregistered_pid_is_waited_directly() {
        let _guard = crate::tests::lock();
        let mut table = JobTable::new();
        let pid = spawn_exiting(7);
        assert_eq!(table.wait_for(pid).unwrap(), ExitStatus(7));
    }
}
